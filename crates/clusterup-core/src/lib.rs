pub mod assets;
pub mod catalog;
pub mod cluster;
pub mod component;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod image;
pub mod io;
pub mod lifecycle;
pub mod paths;
pub mod pipeline;
pub mod preflight;
pub mod readiness;
pub mod state;
pub mod task;
pub mod wait;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ClusterUpError, Fatal, Result};
