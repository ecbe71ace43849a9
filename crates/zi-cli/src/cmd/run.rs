//! Run command

use anyhow::{Context as _, Result};
use tracing::debug;
use zi_core::executor::Executor;

use crate::RequirementArgs;
use crate::ops::Context;
use crate::ops::solve::{fetch, requirements, solve};

/// Solve, download and launch an application; returns its exit code.
pub async fn run(ctx: &Context, app: &str, args: &RequirementArgs, user_args: &[String]) -> Result<i32> {
    let app = ctx.resolve(app).await?;
    let requirements = requirements(&app, args)?;
    let solution = solve(ctx, &requirements).await?;
    fetch(ctx, &solution.selections).await?;

    let store = ctx.store()?;
    let mut child = Executor::new(&*store).start(&solution.selections, user_args)?;
    debug!(pid = child.id(), "Launched application");

    let status = tokio::task::spawn_blocking(move || child.wait())
        .await
        .context("Failed to wait for the application")?
        .context("Failed to wait for the application")?;
    Ok(status.code().unwrap_or(1))
}
