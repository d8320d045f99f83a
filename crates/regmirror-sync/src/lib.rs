//! regmirror sync engine
//!
//! Mirrors declared container images and Helm charts into a destination
//! registry.
//!
//! # Overview
//!
//! The engine handles:
//! - **Classification**: denylist, ignore list and namespace resolution for
//!   every declared line
//! - **Deletion pass**: force-deletes destination repositories of denylist
//!   entries before an image run
//! - **Provisioning**: creates destination repositories on demand
//! - **Transfer**: drives `skopeo` and `helm` through a bounded worker pool
//!   with retry on transient failures
//! - **Bookkeeping**: appends every outcome to the ledger and resets the
//!   declared list once the run completes
//!
//! # Architecture
//!
//! ```text
//!   required-images.txt        required-charts.txt
//!            │                          │
//!            ▼                          ▼
//!     ┌─────────────┐            ┌─────────────┐
//!     │  classify   │            │   expand    │
//!     └──────┬──────┘            └──────┬──────┘
//!            │   worker pool (N)        │
//!            ▼                          ▼
//!   provision → creds → copy   provision → download → push
//!            │                          │
//!            └────────► ledger ◄────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use regmirror_sync::{EngineConfig, Services, SyncEngine};
//!
//! let engine = SyncEngine::new(
//!     EngineConfig::from(&config),
//!     config.resolver(),
//!     policy,
//!     services,
//!     config.load_policy_document()?,
//! )?;
//! let summary = engine.run_images(&list, &ledger).await?;
//! println!("{summary}");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::significant_drop_tightening)]

pub mod control;
pub mod engine;
pub mod error;
pub mod plan;
pub mod retry;
pub mod summary;
pub mod transfer;

// Re-export main types at crate root
pub use control::RunControl;
pub use engine::{EngineConfig, Services, SyncEngine};
pub use error::{ArtifactError, EngineError, Result, Retryable, TransferError};
pub use plan::{Decision, Plan, PlannedArtifact};
pub use retry::{RetryPolicy, RetryPolicyBuilder};
pub use summary::{ArtifactOutcome, FailedArtifact, RunKind, RunSummary};
pub use transfer::{ChartTransfer, CopyRequest, HelmCli, ImageTransfer, Skopeo};
