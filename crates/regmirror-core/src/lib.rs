//! # regmirror core
//!
//! Pure building blocks of the mirroring engine: artifact references, the
//! destination namespace resolver, deny/ignore policy lists, the outcome
//! ledger and run configuration. Nothing in this crate talks to a registry.
//!
//! ## Example
//!
//! ```rust
//! use regmirror_core::{ImageReference, NamespaceResolver};
//!
//! let resolver = NamespaceResolver::default();
//! let image = ImageReference::parse("quay.io/coreos/etcd:v3.5.0")?;
//! let dest = resolver.resolve_image(&image);
//!
//! assert_eq!(dest.path, "quay/coreos/etcd");
//! assert_eq!(dest.tag, "v3.5.0");
//! # Ok::<(), regmirror_core::Error>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod policy;
pub mod reference;
pub mod resolver;


pub use config::MirrorConfig;
pub use error::{Error, Result};
pub use ledger::{MemoryLedger, OutcomeLedger, OutcomeSink, RunOutcome};
pub use policy::{DeniedEntry, DeniedSet, IgnoreSet, PolicyLists, RequiredList};
pub use reference::{ArtifactKind, ChartReference, HostKind, ImageReference, DEFAULT_TAG};
pub use resolver::{Destination, DomainMap, DomainRule, NamespaceResolver, DEFAULT_PREFIX};
