//! App list commands: add-app, remove-app, list-apps, integrate, repair-apps

use std::sync::Arc;

use anyhow::{Context as _, Result};
use zi_core::desktop::{AppEntry, Category, CategoryIntegration};
use zi_core::feeds::{FeedError, FeedProvider};
use zi_schema::{Feed, FeedUri, Requirements};

use crate::RequirementArgs;
use crate::ops::solve::requirements;
use crate::ops::tasks::{lock, run_all};
use crate::ops::{CliError, Context};
use crate::ui::table;

/// Read a feed from the cache, downloading it when missing and allowed.
pub async fn load_feed(ctx: &Context, interface: &FeedUri) -> Result<Arc<Feed>> {
    let feeds = ctx.feeds();
    let feed = match feeds.get_feed(interface) {
        Err(FeedError::NotCached(_)) if !ctx.offline() => feeds.download(interface).await,
        other => other,
    };
    feed.with_context(|| format!("Failed to load feed {interface}"))
}

/// Add an application without desktop integration
pub async fn add_app(ctx: &Context, app: &str, args: &RequirementArgs) -> Result<()> {
    let app = ctx.resolve(app).await?;
    let requirements = requirements(&app, args)?;
    let feed = load_feed(ctx, &app.interface).await?;

    let mut entry = AppEntry::new(app.interface.clone(), feed.name.clone());
    entry.capability_lists.clone_from(&feed.capability_lists);
    if requirements != Requirements::new(app.interface.clone()).with_architecture(requirements.architecture) {
        entry.requirements = Some(requirements);
    }

    let mut integration = ctx.integration()?;
    integration.add_app_from(&entry, Some(&feed))?;
    integration.finish()?;
    ctx.reporter.success(&format!("Added {} to the app list", feed.name));
    Ok(())
}

/// Remove one application, or all of them
pub async fn remove_app(ctx: &Context, app: Option<&str>, all: bool) -> Result<()> {
    let mut integration = ctx.integration()?;
    if all {
        let interfaces: Vec<FeedUri> = integration
            .app_list()
            .entries
            .iter()
            .map(|e| e.interface.clone())
            .collect();
        let count = interfaces.len();
        let integration = std::sync::Mutex::new(integration);
        run_all("applications", interfaces, &*ctx.reporter, |interface| {
            let integration = &integration;
            async move {
                let mut integration = lock(integration, "app list")?;
                integration.remove_app(&interface)?;
                Ok(())
            }
        })
        .await?;
        ctx.reporter.summary_plain(count, "removed");
        return Ok(());
    }

    let name = app.ok_or_else(|| CliError::invalid("Specify an application or --all"))?;
    let app = ctx.resolve(name).await?;
    integration.remove_app(&app.interface)?;
    ctx.reporter.success(&format!("Removed {}", app.interface));
    Ok(())
}

/// Print the app list
pub fn list_apps(ctx: &Context, query: Option<&str>) -> Result<()> {
    let integration = ctx.integration()?;
    let entries = match query {
        Some(query) => integration.app_list().search(query),
        None => integration.app_list().entries.iter().collect(),
    };
    if entries.is_empty() {
        println!();
        println!("  No applications found.");
        println!("  Run 'zi add-app <uri>' to get started.");
        return Ok(());
    }
    println!("{}", table::apps(&entries));
    Ok(())
}

/// Add or remove access point categories; without flags the default set is added
pub async fn integrate(ctx: &Context, app: &str, add: &[String], remove: &[String]) -> Result<()> {
    let app = ctx.resolve(app).await?;
    let add = if add.is_empty() && remove.is_empty() {
        Category::default_set()
    } else {
        Category::parse_list(add)?
    };
    let remove = Category::parse_list(remove)?;
    if let Some(both) = add.intersection(&remove).next() {
        return Err(CliError::invalid(format!("Category '{both}' cannot be added and removed at once")).into());
    }

    let mut integration = ctx.integration()?;
    if !remove.is_empty() {
        integration.remove_access_point_categories(&app.interface, &remove)?;
    }
    if !add.is_empty() {
        let feed = load_feed(ctx, &app.interface).await?;
        if !integration.app_list().contains(&app.interface) {
            integration.add_app(&app.interface, &feed)?;
        }
        integration.add_access_point_categories(&app.interface, &feed, &add)?;
    }

    let entry = integration
        .app_list()
        .get(&app.interface)
        .ok_or_else(|| CliError::invalid(format!("{} is not in the app list", app.interface)))?;
    for point in entry.access_points() {
        ctx.reporter.done(&entry.name, &point.to_string());
    }
    Ok(())
}

/// Re-create every recorded access point
pub fn repair_apps(ctx: &Context) -> Result<()> {
    let integration = ctx.integration()?;
    let feeds = ctx.feeds();
    integration.repair(&*feeds)?;
    ctx.reporter.summary_plain(integration.app_list().entries.len(), "repaired");
    Ok(())
}
