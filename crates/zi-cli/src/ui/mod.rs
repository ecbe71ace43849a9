//! Terminal output
//!
//! - [`theme`] - Colors and icons
//! - [`reporter`] - [`zi_core::Reporter`] implementation for the terminal
//! - [`table`] - Tables for apps, catalogs, selections and the store

pub mod reporter;
pub mod table;
pub mod theme;

pub use reporter::TerminalReporter;
pub use theme::Theme;
