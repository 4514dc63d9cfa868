//! Capability traits for the discovery pipeline.
//!
//! Applications implement these to plug in page fetching, semantic
//! judgment, and storage.

pub mod fetcher;
pub mod oracle;
pub mod store;
