pub mod apps;
pub mod catalog;
pub mod completions;
pub mod digest;
pub mod run;
pub mod select;
pub mod store;
pub mod sync;
pub mod update;
