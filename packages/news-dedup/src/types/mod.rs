//! Data types shared across the pipeline stages.

pub mod article;
pub mod artifact;
pub mod config;
pub mod decision;
pub mod group;
