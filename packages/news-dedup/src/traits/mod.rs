//! Collaborator traits for the dedup pipeline.
//!
//! Applications implement these to plug in their own storage, messaging
//! and inference backends. In-memory implementations live in [`crate::stores`]
//! and [`crate::testing`].

pub mod bus;
pub mod inference;
pub mod store;
