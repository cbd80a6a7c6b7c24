//! Storage modules for Tether
//!
//! Provides the transactional cluster object store holding networks and
//! executor attachments.

pub mod cluster_store;

pub use cluster_store::{AttachmentFilter, ClusterStore, NetworkFilter, ReadTx, WriteTx};
