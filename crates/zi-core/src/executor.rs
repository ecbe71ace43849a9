//! Turning selections into a process to launch.
//!
//! [`Executor::build`] is pure: it resolves implementation directories,
//! follows runner chains and applies environment bindings, producing a
//! [`LaunchCommand`]. [`Executor::start`] spawns it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command as ProcessCommand};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use zi_schema::requirements::DEFAULT_COMMAND;
use zi_schema::{EnvironmentBinding, EnvironmentMode, FeedUri, ImplementationSelection, Selections};

use crate::store::ImplementationStore;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("No implementation selected for {0}")]
    MissingSelection(FeedUri),

    #[error("Implementation {0} is not cached")]
    NotCached(String),

    #[error("Command '{command}' not found in selection for {interface}")]
    MissingCommand { interface: FeedUri, command: String },

    #[error("Command '{0}' has neither a path nor a runner")]
    NothingToRun(String),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

/// A fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Program to execute.
    pub program: String,
    /// Arguments after the program.
    pub arguments: Vec<String>,
    /// Complete environment of the new process.
    pub environment: BTreeMap<String, String>,
}

/// Hook invoked right before a process is launched.
pub trait LaunchObserver: Send + Sync {
    /// Inspect the command about to be started.
    fn before_launch(&self, command: &LaunchCommand);
}

/// Observer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLaunchObserver;

impl LaunchObserver for NoopLaunchObserver {
    fn before_launch(&self, _command: &LaunchCommand) {}
}

/// Builds and starts processes for selections.
pub struct Executor<'a> {
    store: &'a dyn ImplementationStore,
    observer: Arc<dyn LaunchObserver>,
    base_environment: BTreeMap<String, String>,
}

impl std::fmt::Debug for Executor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("store", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl<'a> Executor<'a> {
    /// Executor resolving implementations in `store`, starting from the current environment.
    pub fn new(store: &'a dyn ImplementationStore) -> Self {
        Self {
            store,
            observer: Arc::new(NoopLaunchObserver),
            base_environment: std::env::vars().collect(),
        }
    }

    /// Start from `environment` instead of the current process environment.
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.base_environment = environment;
        self
    }

    /// Notify `observer` before launching.
    pub fn with_observer(mut self, observer: Arc<dyn LaunchObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn directory(&self, selection: &ImplementationSelection) -> Result<PathBuf, ExecutorError> {
        if let Some(path) = &selection.local_path {
            return Ok(path.clone());
        }
        self.store
            .get_path(&selection.manifest_digest)
            .ok_or_else(|| ExecutorError::NotCached(selection.id.clone()))
    }

    /// Resolve the command line and environment for `selections`.
    ///
    /// # Errors
    ///
    /// Returns an error if a selection is missing, not cached, or lacks a
    /// command it is required to provide.
    pub fn build(&self, selections: &Selections, user_args: &[String]) -> Result<LaunchCommand, ExecutorError> {
        let mut environment = self.base_environment.clone();
        let mut directories = BTreeMap::new();
        for selection in &selections.implementations {
            if selection.id.starts_with("package:") {
                continue;
            }
            directories.insert(selection.interface.clone(), self.directory(selection)?);
        }

        for selection in &selections.implementations {
            let Some(dir) = directories.get(&selection.interface) else {
                continue;
            };
            let commands = selection.commands.iter();
            for binding in selection
                .bindings
                .iter()
                .chain(commands.clone().flat_map(|c| c.bindings.iter()))
            {
                apply_binding(&mut environment, binding, dir);
            }
            let dependencies = selection
                .dependencies
                .iter()
                .chain(commands.flat_map(|c| c.dependencies.iter()));
            for dependency in dependencies {
                let Some(dep_dir) = directories.get(&dependency.interface) else {
                    continue;
                };
                for binding in &dependency.bindings {
                    apply_binding(&mut environment, binding, dep_dir);
                }
            }
        }

        let main = selections
            .main_implementation()
            .ok_or_else(|| ExecutorError::MissingSelection(selections.interface.clone()))?;
        let command = selections.command.as_deref().unwrap_or(DEFAULT_COMMAND);
        let mut line = command_line(selections, &directories, main, command)?;
        line.extend(user_args.iter().cloned());

        let program = line.remove(0);
        debug!(%program, arguments = ?line, "Built command line");
        Ok(LaunchCommand {
            program,
            arguments: line,
            environment,
        })
    }

    /// Build and spawn the process.
    ///
    /// # Errors
    ///
    /// Returns a build error or [`ExecutorError::Spawn`].
    pub fn start(&self, selections: &Selections, user_args: &[String]) -> Result<Child, ExecutorError> {
        let launch = self.build(selections, user_args)?;
        self.observer.before_launch(&launch);
        ProcessCommand::new(&launch.program)
            .args(&launch.arguments)
            .env_clear()
            .envs(&launch.environment)
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: launch.program.clone(),
                source,
            })
    }
}

/// Arguments for running `command` of `selection`, runners first. Never empty.
fn command_line(
    selections: &Selections,
    directories: &BTreeMap<FeedUri, PathBuf>,
    selection: &ImplementationSelection,
    command: &str,
) -> Result<Vec<String>, ExecutorError> {
    let cmd = selection
        .command(command)
        .ok_or_else(|| ExecutorError::MissingCommand {
            interface: selection.interface.clone(),
            command: command.to_string(),
        })?;

    let mut line = Vec::new();
    if let Some(runner) = &cmd.runner {
        let runner_selection = selections
            .get(&runner.interface)
            .ok_or_else(|| ExecutorError::MissingSelection(runner.interface.clone()))?;
        line = command_line(selections, directories, runner_selection, runner.command_or_default())?;
        line.extend(runner.arguments.iter().cloned());
    }
    if let Some(path) = &cmd.path {
        let full = match directories.get(&selection.interface) {
            Some(dir) => dir.join(path),
            None => PathBuf::from(path),
        };
        line.push(full.display().to_string());
    }
    line.extend(cmd.arguments.iter().cloned());

    if line.is_empty() {
        return Err(ExecutorError::NothingToRun(command.to_string()));
    }
    Ok(line)
}

fn apply_binding(environment: &mut BTreeMap<String, String>, binding: &EnvironmentBinding, dir: &Path) {
    let value = match (&binding.insert, &binding.value) {
        (Some(insert), _) if insert.is_empty() || insert == "." => dir.display().to_string(),
        (Some(insert), _) => dir.join(insert).display().to_string(),
        (None, Some(value)) => value.clone(),
        (None, None) => dir.display().to_string(),
    };
    let separator = binding
        .separator
        .clone()
        .unwrap_or_else(|| if cfg!(windows) { ";" } else { ":" }.to_string());
    let old = environment
        .get(&binding.name)
        .cloned()
        .or_else(|| binding.default.clone());

    let new = match (binding.mode, old) {
        (EnvironmentMode::Replace, _) | (_, None) => value,
        (_, Some(old)) if old.is_empty() => value,
        (EnvironmentMode::Prepend, Some(old)) => format!("{value}{separator}{old}"),
        (EnvironmentMode::Append, Some(old)) => format!("{old}{separator}{value}"),
    };
    environment.insert(binding.name.clone(), new);
}
