//! zi - decentralized software installation CLI

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use zi_cli::cmd;
use zi_cli::ops::{Context, ExitStatus, final_status};
use zi_cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let cancel = CancellationToken::new();
    match dispatch(cli, cancel.clone()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            final_status(&e, &cancel).into()
        }
    }
}

async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<ExitCode> {
    if let Commands::Completions { shell } = &cli.command {
        cmd::completions::completions(*shell);
        return Ok(ExitStatus::Ok.into());
    }
    if let Commands::Digest {
        path,
        algorithm,
        manifest,
    } = &cli.command
    {
        cmd::digest::digest(path, algorithm.as_deref(), *manifest)?;
        return Ok(ExitStatus::Ok.into());
    }

    let mut ctx = Context::from_cli(&cli)?;
    ctx.cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Select {
            app,
            requirements,
            xml,
        } => cmd::select::select(&ctx, &app, &requirements, xml).await?,
        Commands::Download {
            app,
            requirements,
            show,
        } => cmd::select::download(&ctx, &app, &requirements, show).await?,
        Commands::Run {
            app,
            requirements,
            args,
        } => {
            let code = cmd::run::run(&ctx, &app, &requirements, &args).await?;
            return Ok(ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)));
        }
        Commands::Update { app, requirements } => cmd::update::update(&ctx, &app, &requirements).await?,
        Commands::UpdateAll => cmd::update::update_all(&ctx).await?,
        Commands::AddApp { app, requirements } => cmd::apps::add_app(&ctx, &app, &requirements).await?,
        Commands::RemoveApp { app, all } => cmd::apps::remove_app(&ctx, app.as_deref(), all).await?,
        Commands::ListApps { query } => cmd::apps::list_apps(&ctx, query.as_deref())?,
        Commands::Integrate { app, add, remove } => cmd::apps::integrate(&ctx, &app, &add, &remove).await?,
        Commands::RepairApps => cmd::apps::repair_apps(&ctx)?,
        Commands::Sync { reset, new_crypto_key } => {
            cmd::sync::sync(&ctx, &reset, new_crypto_key.as_deref()).await?;
        }
        Commands::Store { command } => cmd::store::dispatch(&ctx, command).await?,
        Commands::Catalog { command } => cmd::catalog::dispatch(&ctx, command).await?,
        Commands::Digest { .. } | Commands::Completions { .. } => {}
    }
    Ok(ExitStatus::Ok.into())
}
