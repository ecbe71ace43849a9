//! Core library for zi: the implementation store, feed cache, solver,
//! executor, desktop integration and app list sync.

pub mod catalog;
pub mod config;
pub mod desktop;
pub mod executor;
pub mod feeds;
pub mod fetcher;
pub mod io;
pub mod manifest;
pub mod paths;
pub mod selections_manager;
pub mod solver;
pub mod store;

pub mod reporter;

pub use config::Config;
pub use paths::*;
pub use reporter::{NullReporter, Reporter};

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("zi-core/", env!("CARGO_PKG_VERSION"));
