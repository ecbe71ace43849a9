//! Select and download commands

use anyhow::Result;

use crate::RequirementArgs;
use crate::ops::Context;
use crate::ops::solve::{describe, fetch, requirements, solve};
use crate::ui::table;

/// Solve and print the selections
pub async fn select(ctx: &Context, app: &str, args: &RequirementArgs, xml: bool) -> Result<()> {
    let app = ctx.resolve(app).await?;
    let requirements = requirements(&app, args)?;
    let solution = solve(ctx, &requirements).await?;

    if xml {
        println!("{}", solution.selections.to_xml());
    } else {
        let store = ctx.store()?;
        println!("{}", table::selections(&describe(&solution.selections, &*store)));
    }
    if solution.stale && ctx.offline() {
        ctx.reporter.warning("Some feeds are stale; run again without --offline to refresh them");
    }
    Ok(())
}

/// Solve and make sure every selected implementation is in the store
pub async fn download(ctx: &Context, app: &str, args: &RequirementArgs, show: bool) -> Result<()> {
    let app = ctx.resolve(app).await?;
    let requirements = requirements(&app, args)?;
    let solution = solve(ctx, &requirements).await?;
    fetch(ctx, &solution.selections).await?;

    if show {
        let store = ctx.store()?;
        println!("{}", table::selections(&describe(&solution.selections, &*store)));
    }
    ctx.reporter.success(&format!(
        "{} is ready ({} implementation{})",
        app.interface,
        solution.selections.implementations.len(),
        if solution.selections.implementations.len() == 1 { "" } else { "s" }
    ));
    Ok(())
}
