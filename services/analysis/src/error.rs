/// Errors produced by analysis store operations.
///
/// Payloads are plain strings so the contract stays engine-agnostic; each
/// backend maps its native errors into these variants. Missing records are
/// not an error (lookups return `Option`).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage engine is unreachable or a connection could not be
    /// acquired. Retryable after backoff.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// An existing structure under the expected name is incompatible with
    /// the schema this service requires. Fatal at startup.
    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    /// A classifier label outside {Real, Fake} reached the persistence
    /// boundary. Caller-side validation bug, never retried.
    #[error("invalid verdict: {0:?}")]
    InvalidVerdict(String),

    /// A write was attempted but did not durably complete. The caller must
    /// not report the corresponding upload as successful.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_does_not_leak_variant_internals() {
        let err = StoreError::StorageUnavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "storage unavailable: connection refused");

        let err = StoreError::InvalidVerdict("Maybe".to_string());
        assert!(err.to_string().contains("Maybe"));
    }
}
