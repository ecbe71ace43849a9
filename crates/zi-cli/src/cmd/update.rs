//! Update commands

use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;
use zi_core::config::NetworkLevel;
use zi_core::feeds::FeedProvider;
use zi_core::selections_manager::diff;
use zi_schema::{Requirements, Selections};

use crate::RequirementArgs;
use crate::ops::solve::{fetch, requirements, solve};
use crate::ops::tasks::{lock, run_all};
use crate::ops::Context;

/// Check for a newer version of one application
pub async fn update(ctx: &Context, app: &str, args: &RequirementArgs) -> Result<()> {
    let app = ctx.resolve(app).await?;
    let requirements = requirements(&app, args)?;
    update_one(ctx, &requirements).await
}

/// Update every application in the app list, continuing past failures
pub async fn update_all(ctx: &Context) -> Result<()> {
    let integration = ctx.integration()?;
    let requirements: HashMap<_, Requirements> = integration
        .app_list()
        .entries
        .iter()
        .map(|e| (e.interface.clone(), e.effective_requirements()))
        .collect();
    if requirements.is_empty() {
        ctx.reporter.info("No applications in the app list.");
        return Ok(());
    }
    let mut interfaces: Vec<_> = requirements.keys().cloned().collect();
    interfaces.sort();

    let integration = std::sync::Mutex::new(integration);
    run_all("applications", interfaces, &*ctx.reporter, |interface| {
        let requirements = &requirements;
        let integration = &integration;
        async move {
            let Some(req) = requirements.get(&interface) else {
                return Ok(());
            };
            update_one(ctx, req).await?;
            let feed = ctx.feeds().get_feed(&interface)?;
            let mut integration = lock(integration, "app list")?;
            integration.update_app(&interface, &feed)?;
            integration.finish()?;
            Ok(())
        }
    })
    .await
}

async fn update_one(ctx: &Context, requirements: &Requirements) -> Result<()> {
    let old = previous_selections(ctx, requirements).await;

    let mut fresh = ctx.clone();
    fresh.refresh = !ctx.offline();
    let solution = solve(&fresh, requirements).await?;
    fetch(ctx, &solution.selections).await?;

    let changes = old.map(|old| diff(&old, &solution.selections)).unwrap_or_default();
    let name = requirements.interface.to_string();
    if changes.is_empty() {
        ctx.reporter.done(&name, "no updates found");
    } else {
        for change in &changes {
            ctx.reporter.info(&change.to_string());
        }
        ctx.reporter.done(&name, "updated");
    }
    Ok(())
}

/// What the cached feeds select today, if they are complete enough to say.
async fn previous_selections(ctx: &Context, requirements: &Requirements) -> Option<Selections> {
    let mut cached = ctx.clone();
    cached.config.network_use = NetworkLevel::Offline;
    cached.refresh = false;
    match solve(&cached, requirements).await {
        Ok(solution) => Some(solution.selections),
        Err(e) => {
            debug!(error = %e, "No previous selections to compare with");
            None
        }
    }
}
