//! Analysis Service
//!
//! Persistence and retrieval service for the deepfake detection platform.
//! Uploaded images are handed to an external classifier, and the verdict
//! (Real/Fake plus confidence) is stored together with the original image
//! bytes as one append-only record. The service exposes the history, the
//! raw images, and aggregate statistics over HTTP, and prunes old records
//! to a retention cap in the background.
//!
//! ## Architecture
//!
//! ```text
//! HTTP API                    Classifier                Analysis Store
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ POST         │  path     │ external     │          │ PostgreSQL   │
//! │ /api/analyze │──────────▶│ inference    │          │   analyses   │
//! └──────────────┘           │ process      │          ├──────────────┤
//!        │                   └──────────────┘          │ in-memory    │
//!        │ verdict + bytes           │ label,conf      │ (dev/tests)  │
//!        ▼                           ▼                 └──────────────┘
//! ┌─────────────────────────────────────────┐                 ▲
//! │ save / list_recent / get_image / stats  │─────────────────┘
//! └─────────────────────────────────────────┘                 │
//!                                   ┌──────────────┐          │
//!                                   │ Retention    │──────────┘
//!                                   │ task         │  cleanup_oldest
//!                                   └──────────────┘
//! ```
//!
//! The store is a trait with one implementation per storage engine; calling
//! code never branches on engine identity.

pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod record;
pub mod retention;
pub mod store;

pub use api::{create_router, AppState};
pub use classifier::{Classification, Classifier, ClassifierError, CommandClassifier};
pub use config::{Config, StorageEngine};
pub use error::StoreError;
pub use record::{AnalysisStats, AnalysisSummary, ImageBlob, NewAnalysis, Verdict};
pub use retention::spawn_retention_task;
pub use store::{AnalysisStore, MemoryAnalysisStore, PostgresAnalysisStore};
