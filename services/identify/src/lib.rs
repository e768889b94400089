//! Plant Identification Service
//!
//! Accepts plant photos from authenticated users, has them classified by a
//! generative vision model, and keeps a per-user history of identifications
//! together with the original images.
//!
//! ## Features
//!
//! - **Concurrent Orchestration**: The image is stored and classified at the
//!   same time; the response waits for both but only fails on classification
//! - **Owner Scoping**: Every object key and history query is derived from the
//!   verified bearer identity, never from client-supplied paths
//! - **Day-based History**: Local calendar days are mapped to half-open UTC
//!   windows using the client's timezone offset
//! - **Guaranteed Cleanup**: Decoded uploads are spooled to a per-request temp
//!   file that is removed on every exit path
//!
//! ## Architecture
//!
//! ```text
//!  Browser                    Identify Service                  External
//! ┌─────────┐  Bearer  ┌──────────────────────────┐
//! │ POST    │─────────▶│ auth::OwnerId            │──────────▶ Token verifier
//! │ identify│          └──────────────────────────┘
//! └─────────┘                     │
//!                                 ▼
//!                      ┌──────────────────────────┐
//!                      │ Orchestrator             │──────────▶ Vision classifier
//!                      │                          │──────────▶ S3 (images)
//!                      └──────────────────────────┘──────────▶ PostgreSQL (records)
//! ┌─────────┐                     ▲
//! │ GET     │          ┌──────────────────────────┐
//! │ history │─────────▶│ HistoryService           │
//! │ images  │          │ ImageService             │
//! └─────────┘          └──────────────────────────┘
//! ```

pub mod auth;
pub mod blob_store;
pub mod classification;
pub mod classifier;
pub mod config;
pub mod error;
pub mod history;
pub mod images;
pub mod orchestrator;
pub mod record_store;
pub mod routes;
pub mod upload;

pub use auth::{IdentityToolkitVerifier, OwnerId, TokenVerifier};
pub use blob_store::{BlobStore, S3BlobStore, StoredImage};
pub use classification::ClassificationResult;
pub use classifier::{Classifier, GeminiClassifier};
pub use config::Config;
pub use error::{ServiceError, ServiceResult};
pub use history::HistoryService;
pub use images::ImageService;
pub use orchestrator::Orchestrator;
pub use record_store::{IdentificationRequest, PgRecordStore, RecordStore};
pub use routes::{create_router, start_api_server, AppState};
