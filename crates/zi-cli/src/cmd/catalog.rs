//! Catalog commands

use std::path::Path;

use anyhow::Result;
use zi_schema::FeedUri;

use crate::CatalogCommands;
use crate::ops::{CliError, Context};
use crate::ui::table;

pub async fn dispatch(ctx: &Context, command: CatalogCommands) -> Result<()> {
    match command {
        CatalogCommands::Search { query } => search(ctx, &query).await,
        CatalogCommands::Refresh => refresh(ctx).await,
        CatalogCommands::List => list(ctx),
        CatalogCommands::Add { uri } => add(ctx, &uri),
        CatalogCommands::Remove { uri } => remove(ctx, &uri),
        CatalogCommands::Reset => reset(ctx),
    }
}

fn source_uri(value: &str) -> Result<FeedUri> {
    if let Ok(uri) = FeedUri::parse(value) {
        return Ok(uri);
    }
    let path = Path::new(value);
    if path.exists() {
        return Ok(FeedUri::from_path(path)?);
    }
    Err(CliError::invalid(format!("'{value}' is neither a URL nor an existing file")).into())
}

/// Search the catalog, downloading it when nothing is cached
pub async fn search(ctx: &Context, query: &str) -> Result<()> {
    let manager = ctx.catalog();
    let catalog = if ctx.refresh {
        manager.get_online().await?
    } else if ctx.offline() {
        manager
            .get_cached()?
            .ok_or_else(|| CliError::invalid("No catalog is cached; run without --offline first"))?
    } else {
        manager.get().await?
    };

    let found = catalog.search(query);
    if found.is_empty() {
        ctx.reporter.info(&format!("Nothing in the catalog matches '{query}'"));
        return Ok(());
    }
    println!("{}", table::feeds(&found));
    Ok(())
}

pub async fn refresh(ctx: &Context) -> Result<()> {
    if ctx.offline() {
        return Err(CliError::invalid("Refreshing the catalog needs network access").into());
    }
    ctx.reporter.section("Refreshing catalog");
    let catalog = ctx.catalog().get_online().await?;
    ctx.reporter.summary_plain(catalog.feeds.len(), "in catalog");
    Ok(())
}

pub fn list(ctx: &Context) -> Result<()> {
    for source in ctx.catalog().sources()? {
        println!("{source}");
    }
    Ok(())
}

pub fn add(ctx: &Context, uri: &str) -> Result<()> {
    let uri = source_uri(uri)?;
    ctx.catalog().add_source(&uri)?;
    ctx.reporter.success(&format!("Added catalog source {uri}"));
    Ok(())
}

pub fn remove(ctx: &Context, uri: &str) -> Result<()> {
    let uri = source_uri(uri)?;
    ctx.catalog().remove_source(&uri)?;
    ctx.reporter.success(&format!("Removed catalog source {uri}"));
    Ok(())
}

pub fn reset(ctx: &Context) -> Result<()> {
    ctx.catalog().reset_sources()?;
    ctx.reporter.success("Catalog sources reset to the default");
    Ok(())
}
