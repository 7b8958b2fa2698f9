use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::ClassifierConfig;

/// Raw output of one classification call: a label plus a confidence score.
/// Label-to-verdict mapping happens at the persistence boundary, not here.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("failed to launch classifier: {0}")]
    Launch(String),

    #[error("classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("classifier failed: {0}")]
    Failed(String),

    #[error("malformed classifier output: {0:?}")]
    Malformed(String),
}

/// Capability to classify an image on disk.
///
/// The store only ever sees the already-mapped output, so the transport
/// behind this trait (process spawn, RPC, in-process model) is swappable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image_path: &Path) -> Result<Classification, ClassifierError>;
}

/// Classifier that shells out to an external inference script and parses a
/// single `label,confidence` line from its stdout.
pub struct CommandClassifier {
    program: String,
    script: String,
    timeout: Duration,
}

impl CommandClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            program: config.program.clone(),
            script: config.script.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl Classifier for CommandClassifier {
    async fn classify(&self, image_path: &Path) -> Result<Classification, ClassifierError> {
        debug!(
            program = %self.program,
            script = %self.script,
            path = %image_path.display(),
            "Invoking classifier"
        );

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .arg(&self.script)
                .arg(image_path)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ClassifierError::Timeout(self.timeout))?
        .map_err(|e| ClassifierError::Launch(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ClassifierError::Failed(format!(
                "exit status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse `label,confidence` from the last non-empty stdout line. Inference
/// frameworks tend to print warnings first, so earlier lines are ignored.
fn parse_output(stdout: &str) -> Result<Classification, ClassifierError> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ClassifierError::Malformed(stdout.to_string()))?;

    let (label, confidence) = line
        .rsplit_once(',')
        .ok_or_else(|| ClassifierError::Malformed(line.to_string()))?;

    let confidence: f64 = confidence
        .trim()
        .parse()
        .map_err(|_| ClassifierError::Malformed(line.to_string()))?;

    if !(0.0..=1.0).contains(&confidence) {
        return Err(ClassifierError::Malformed(line.to_string()));
    }

    Ok(Classification {
        label: label.trim().to_string(),
        confidence,
    })
}
