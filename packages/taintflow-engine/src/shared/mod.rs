//! Shared models and the graph construction surface.

pub mod builder;
pub mod models;

pub use builder::GraphBuilder;
pub use models::*;
