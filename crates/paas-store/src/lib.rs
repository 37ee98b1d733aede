//! paas-store — embedded persistence for the control plane entities.
//!
//! Backed by [redb](https://docs.rs/redb); every entity is JSON-serialized
//! into a `&str → &[u8]` table. The release table is keyed by UUID with a
//! companion index table keyed `{app}:{lane}`, which enforces the
//! one-release-per-(app, lane) invariant the same way a unique composite
//! index would.
//!
//! `PaasStore` is `Clone + Send + Sync` (backed by `Arc<Database>`) and
//! implements all five repository port traits.

pub mod store;
pub mod tables;

pub use store::PaasStore;
