//! zi - decentralized software installation
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_panics_doc)]
//!
//! Command line front end for the zi engines.
//!
//! # Overview
//!
//! Applications are identified by feed URIs. `zi run` solves the feed's
//! dependencies, downloads whatever is missing into the content-addressed
//! store and launches the result. `zi add-app` and `zi integrate` keep a
//! per-user application list and create menu entries, aliases and file type
//! handlers for it; `zi sync` shares that list between machines.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.zi/
//! ├── store/          # Implementations by manifest digest
//! ├── cache/          # Feeds and the merged catalog
//! ├── config.toml     # Settings
//! ├── app-list.xml    # Integrated applications
//! ├── bin/            # Alias stubs
//! └── applications/   # Menu entries
//! ```

pub mod cmd;
pub mod ops;
pub mod ui;

pub use zi_core::USER_AGENT;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "zi")]
#[command(author, version, about = "zi - decentralized software installation")]
pub struct Cli {
    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Never use the network
    #[arg(long, global = true)]
    pub offline: bool,

    /// Download fresh copies of all feeds
    #[arg(long, global = true)]
    pub refresh: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options that shape a solve.
#[derive(Debug, Clone, Default, Args)]
pub struct RequirementArgs {
    /// Command to select instead of `run`
    #[arg(long)]
    pub command: Option<String>,
    /// Version range of the main interface, e.g. `1.2..!2`
    #[arg(long)]
    pub version: Option<String>,
    /// Version range for another interface
    #[arg(long, num_args = 2, value_names = ["URI", "RANGE"])]
    pub version_for: Vec<String>,
    /// Require a version older than this
    #[arg(long)]
    pub before: Option<String>,
    /// Require at least this version
    #[arg(long)]
    pub not_before: Option<String>,
    /// Target operating system
    #[arg(long)]
    pub os: Option<String>,
    /// Target CPU
    #[arg(long)]
    pub cpu: Option<String>,
    /// Select source code instead of binaries
    #[arg(long)]
    pub source: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Choose implementations for an application and print them
    Select {
        /// Feed URI, alias or catalog name
        app: String,
        #[command(flatten)]
        requirements: RequirementArgs,
        /// Print the selections document
        #[arg(long)]
        xml: bool,
    },
    /// Select and download an application without running it
    Download {
        /// Feed URI, alias or catalog name
        app: String,
        #[command(flatten)]
        requirements: RequirementArgs,
        /// Print the selected implementations
        #[arg(long)]
        show: bool,
    },
    /// Select, download and run an application
    Run {
        /// Feed URI, alias or catalog name
        app: String,
        #[command(flatten)]
        requirements: RequirementArgs,
        /// Arguments for the application
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Check for a newer version of an application
    Update {
        /// Feed URI, alias or catalog name
        app: String,
        #[command(flatten)]
        requirements: RequirementArgs,
    },
    /// Update every application in the app list
    #[command(name = "update-all")]
    UpdateAll,
    /// Add an application to the app list
    #[command(name = "add-app")]
    AddApp {
        /// Feed URI, alias or catalog name
        app: String,
        #[command(flatten)]
        requirements: RequirementArgs,
    },
    /// Remove an application and its desktop integration
    #[command(name = "remove-app")]
    RemoveApp {
        /// Feed URI or alias
        #[arg(required_unless_present = "all")]
        app: Option<String>,
        /// Remove every application
        #[arg(long, conflicts_with = "app")]
        all: bool,
    },
    /// List applications in the app list
    #[command(name = "list-apps")]
    ListApps {
        /// Only show applications matching this text
        query: Option<String>,
    },
    /// Add or remove desktop integration for an application
    Integrate {
        /// Feed URI, alias or catalog name
        app: String,
        /// Categories to add (capabilities, defaults, menu, desktop, aliases, icons, all)
        #[arg(long = "add", value_name = "CATEGORY")]
        add: Vec<String>,
        /// Categories to remove
        #[arg(long = "remove", value_name = "CATEGORY")]
        remove: Vec<String>,
    },
    /// Recreate desktop integration for every application
    #[command(name = "repair-apps")]
    RepairApps,
    /// Synchronize the app list with the sync server
    Sync {
        /// Which side wins: none, client or server
        #[arg(long, default_value = "none")]
        reset: String,
        /// Re-encrypt the server's list with a new crypto key
        #[arg(long, value_name = "KEY")]
        new_crypto_key: Option<String>,
    },
    /// Manage the implementation store
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
    /// Compute the manifest digest of a directory or archive
    Digest {
        /// Directory or archive
        path: PathBuf,
        /// Print only this algorithm
        #[arg(long)]
        algorithm: Option<String>,
        /// Print the manifest instead of the digest
        #[arg(long)]
        manifest: bool,
    },
    /// Search and manage catalogs
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum StoreCommands {
    /// Add a directory or archive under a digest
    Add {
        /// Expected digest, e.g. sha256new_ABC...
        digest: String,
        /// Directory or archive
        source: PathBuf,
        /// Sub-directory of the archive to extract
        #[arg(long)]
        extract: Option<String>,
    },
    /// Recompute the digest of stored implementations
    Verify {
        /// Digests to verify
        #[arg(required = true)]
        digests: Vec<String>,
    },
    /// Verify every stored implementation
    Audit,
    /// Hard-link identical files across implementations
    Optimise,
    /// Remove every stored implementation
    Purge {
        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Remove stored implementations
    Remove {
        /// Digests to remove
        #[arg(required = true)]
        digests: Vec<String>,
    },
    /// Print the path of a stored implementation
    Find {
        /// Digest to look up
        digest: String,
    },
    /// List stored implementations
    List,
    /// Print the manifest of a stored implementation
    Manifest {
        /// Digest to look up
        digest: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum CatalogCommands {
    /// Search the catalog
    Search {
        /// Words to look for
        query: String,
    },
    /// Download all catalog sources again
    Refresh,
    /// List the configured catalog sources
    List,
    /// Add a catalog source
    Add {
        /// Catalog URI or file
        uri: String,
    },
    /// Remove a catalog source
    Remove {
        /// Catalog URI or file
        uri: String,
    },
    /// Restore the default catalog source
    Reset,
}
