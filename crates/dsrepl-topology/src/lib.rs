#![warn(missing_docs)]

//! Replication topology model for the `dsreplication` administration tool.
//!
//! This crate is pure and synchronous: it knows nothing about LDAP
//! connections. It describes what was read from the servers
//! ([`ServerDescriptor`], [`TopologySnapshot`]) and decides what has to be
//! written (eligible base DNs, free IDs, registry merge source).

pub mod descriptor;
pub mod dn;
pub mod error;
pub mod ids;
pub mod policy;
pub mod reconcile;
pub mod registry;
pub mod snapshot;
pub mod status;

pub use descriptor::{
    InstanceKey, ReplicaDescriptor, ReplicaRef, ReplicationServerInfo, ServerDescriptor,
};
pub use error::TopologyError;
pub use ids::IdAllocator;
pub use reconcile::{EnablePlan, SuffixRelation, SuffixSelection};
pub use registry::{IdConflict, Registry, RegistryAction, ServerProperties, Side};
pub use snapshot::{SuffixDescriptor, TopologySnapshot};
