//! Solving and downloading on behalf of commands.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{info, warn};
use zi_core::feeds::FeedCache;
use zi_core::fetcher::{Fetcher, HttpFetcher};
use zi_core::selections_manager::SelectionsManager;
use zi_core::solver::{BacktrackingSolver, Solution, SolverError, solve_with_download};
use zi_core::store::ImplementationStore;
use zi_schema::{Architecture, FeedUri, Requirements, Selections, VersionRange};

use super::context::{Context, ResolvedApp};
use super::error::CliError;
use crate::RequirementArgs;

/// Build solver requirements from the command line.
pub fn requirements(app: &ResolvedApp, args: &RequirementArgs) -> Result<Requirements> {
    let mut requirements = Requirements::new(app.interface.clone());
    requirements.command = args.command.clone().or_else(|| app.command.clone());
    requirements.source = args.source;

    let mut architecture = Architecture::current();
    if let Some(os) = &args.os {
        architecture.os = os.parse().map_err(CliError::invalid)?;
    }
    if let Some(cpu) = &args.cpu {
        architecture.cpu = cpu.parse().map_err(CliError::invalid)?;
    }
    requirements.architecture = architecture;

    if let Some(range) = root_range(args)? {
        requirements = requirements.with_versions(range);
    }
    for pair in args.version_for.chunks(2) {
        let [uri, range] = pair else {
            return Err(CliError::invalid("--version-for needs a URI and a range").into());
        };
        let uri = FeedUri::parse(uri).map_err(CliError::invalid)?;
        let range = VersionRange::parse(range).map_err(CliError::invalid)?;
        requirements = requirements.with_versions_for(uri, range);
    }
    Ok(requirements)
}

fn root_range(args: &RequirementArgs) -> Result<Option<VersionRange>> {
    let bounded = args.before.is_some() || args.not_before.is_some();
    let text = match (&args.version, bounded) {
        (Some(_), true) => {
            return Err(CliError::invalid("--version cannot be combined with --before or --not-before").into());
        }
        (Some(version), false) => version.clone(),
        (None, true) => format!(
            "{}..{}",
            args.not_before.as_deref().unwrap_or(""),
            args.before.as_deref().map(|b| format!("!{b}")).unwrap_or_default()
        ),
        (None, false) => return Ok(None),
    };
    VersionRange::parse(&text).map(Some).map_err(|e| CliError::invalid(e).into())
}

/// Solve, downloading missing feeds. A stale result is re-solved once with
/// fresh feeds unless the network is off; failures of that refresh fall back
/// to the cached answer.
pub async fn solve(ctx: &Context, requirements: &Requirements) -> Result<Solution> {
    let store = ctx.store()?;
    let feeds = ctx.feeds();
    let solution = solve_with(ctx, store.clone(), feeds, requirements).await?;
    if !solution.stale || ctx.offline() || ctx.refresh {
        return Ok(solution);
    }

    info!(interface = %requirements.interface, "Cached feeds are stale, refreshing");
    let fresh = Arc::new(
        FeedCache::new(ctx.locations.feed_cache(), &ctx.config, ctx.client.clone()).with_refresh(true),
    );
    match solve_with(ctx, store, fresh, requirements).await {
        Ok(refreshed) => Ok(refreshed),
        Err(e) if matches!(e.downcast_ref::<SolverError>(), Some(SolverError::Cancelled)) => Err(e),
        Err(e) => {
            warn!(error = %e, "Refreshing stale feeds failed, using cached selections");
            Ok(solution)
        }
    }
}

async fn solve_with(
    ctx: &Context,
    store: Arc<dyn ImplementationStore>,
    feeds: Arc<FeedCache>,
    requirements: &Requirements,
) -> Result<Solution> {
    let solver =
        BacktrackingSolver::new(feeds.clone(), store, &ctx.config).with_cancellation(ctx.cancel.clone());
    let solution = solve_with_download(&solver, &feeds, requirements, &ctx.cancel).await?;
    Ok(solution)
}

/// Download every selected implementation that is not cached yet.
pub async fn fetch(ctx: &Context, selections: &Selections) -> Result<()> {
    let store = ctx.store()?;
    let manager = SelectionsManager::new(ctx.feeds(), store.clone());
    let uncached = manager.uncached_implementations(selections);
    if uncached.is_empty() {
        return Ok(());
    }
    let implementations = manager
        .original_implementations(&uncached)
        .context("Failed to look up download locations")?;
    let fetcher = HttpFetcher::new(ctx.client.clone(), store, ctx.reporter.clone(), ctx.cancel.clone());
    fetcher.fetch(&implementations).await?;
    Ok(())
}

/// Interface, version and location of every selection.
pub fn describe(selections: &Selections, store: &dyn ImplementationStore) -> Vec<(String, String, String)> {
    selections
        .implementations
        .iter()
        .map(|s| {
            let location = if let Some(path) = &s.local_path {
                path.display().to_string()
            } else if let Some(package) = s.id.strip_prefix("package:") {
                format!("(package {package})")
            } else {
                store
                    .get_path(&s.manifest_digest)
                    .map_or_else(|| "(not cached)".to_string(), |p| p.display().to_string())
            };
            (s.interface.to_string(), s.version.to_string(), location)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> ResolvedApp {
        ResolvedApp {
            interface: FeedUri::parse("http://example.com/app.xml").unwrap(),
            command: Some("edit".into()),
        }
    }

    #[test]
    fn builds_requirements_from_flags() {
        let args = RequirementArgs {
            not_before: Some("1.0".into()),
            before: Some("2.0".into()),
            version_for: vec!["http://example.com/lib.xml".into(), "3..".into()],
            os: Some("Linux".into()),
            source: true,
            ..RequirementArgs::default()
        };
        let requirements = requirements(&app(), &args).unwrap();

        assert_eq!(requirements.command.as_deref(), Some("edit"));
        assert!(requirements.source);
        assert_eq!(requirements.architecture.os.to_string(), "Linux");
        let root = requirements.versions().unwrap();
        assert!(root.matches(&"1.5".parse().unwrap()));
        assert!(!root.matches(&"2.0".parse().unwrap()));
        assert_eq!(requirements.extra_restrictions.len(), 2);
    }

    #[test]
    fn explicit_command_wins_over_alias() {
        let args = RequirementArgs {
            command: Some("test".into()),
            ..RequirementArgs::default()
        };
        assert_eq!(requirements(&app(), &args).unwrap().command.as_deref(), Some("test"));
    }

    #[test]
    fn rejects_conflicting_version_flags() {
        let args = RequirementArgs {
            version: Some("1.0".into()),
            before: Some("2.0".into()),
            ..RequirementArgs::default()
        };
        let err = requirements(&app(), &args).unwrap_err();
        assert!(err.downcast_ref::<CliError>().is_some());
    }
}
