//! # regmirror registry
//!
//! Everything that talks to a registry provider on behalf of the mirroring
//! engine: repository provisioning, credential exchange and chart repository
//! access.
//!
//! ## Features
//!
//! - **Provider seam**: [`RepositoryService`] and [`TokenService`] traits,
//!   implemented by [`AwsCli`] (the `aws ecr` CLI) and [`InMemoryRegistry`]
//! - **Provisioning**: [`RepositoryProvisioner`] creates repositories on
//!   demand, attaches the access policy, and serializes work per path
//! - **Credentials**: [`CredentialBroker`] decodes and caches tokens per region
//! - **Charts**: [`ChartIndexClient`] expands chart repositories and verifies
//!   downloaded archives
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use regmirror_registry::{InMemoryRegistry, RepositoryProvisioner, RepositoryService};
//!
//! # async fn run() -> regmirror_registry::Result<()> {
//! let registry: Arc<dyn RepositoryService> = Arc::new(InMemoryRegistry::new("reg.example"));
//! let provisioner = RepositoryProvisioner::new(registry, "{}");
//!
//! let uri = provisioner.ensure("quay/coreos/etcd").await?;
//! assert_eq!(uri, "reg.example/quay/coreos/etcd");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  RepositoryProvisioner   │   │     CredentialBroker     │
//! └────────────┬─────────────┘   └────────────┬─────────────┘
//!              │ RepositoryService            │ TokenService
//!              ▼                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        AwsCli (aws ecr ...)  |  InMemoryRegistry         │
//! └─────────────────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod aws;
mod charts;
mod config;
mod credentials;
mod error;
mod memory;
mod provisioner;
mod service;

pub use aws::AwsCli;
pub use charts::{sha256_hex, ChartIndex, ChartIndexClient, ChartSource, ChartVersion};
pub use config::{AccessKeys, AwsCliConfig, ChartClientConfig, ACCESS_KEY_ENV, SECRET_KEY_ENV};
pub use credentials::{Credential, CredentialBroker};
pub use error::{ErrorKind, RegistryError, Result};
pub use memory::{CallCounts, InMemoryRegistry};
pub use provisioner::RepositoryProvisioner;
pub use service::{Repository, RepositoryService, TokenService};
