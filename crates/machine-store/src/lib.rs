//! Machine resource store
//!
//! Versioned persistence for Machine, MachineTemplate and MachineDriver
//! objects. Every write is checked against the stored `resourceVersion`; a
//! stale write fails with [`StoreError::Conflict`] and the caller re-reads.
//!
//! # Example
//!
//! ```no_run
//! use machine_crds::MachineTemplate;
//! use machine_store::{KubeStore, ResourceStore};
//!
//! # async fn example(client: kube::Client) -> Result<(), machine_store::StoreError> {
//! let templates = KubeStore::<MachineTemplate>::namespaced(client);
//! if let Some(template) = templates.get(Some("fleet"), "tpl-a").await? {
//!     println!("driver: {}", template.spec.driver);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::{KubeClusterLookup, KubeStore};
pub use error::StoreError;
pub use store_trait::{MetadataLookup, ResourceStore, StoredResource};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockClusterLookup, MockResourceStore};
