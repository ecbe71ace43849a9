//! Sync command

use anyhow::Result;
use zi_core::Config;
use zi_core::desktop::{SyncIntegrationManager, SyncResetMode};

use crate::ops::{CliError, Context};

/// Synchronize the app list, optionally switching to a new crypto key
pub async fn sync(ctx: &Context, reset: &str, new_crypto_key: Option<&str>) -> Result<()> {
    let reset: SyncResetMode = reset.parse().map_err(CliError::InvalidArguments)?;
    if ctx.offline() {
        return Err(CliError::invalid("Syncing needs network access").into());
    }

    let integration = ctx.integration()?;
    let mut sync = SyncIntegrationManager::new(integration, ctx.config.sync.clone(), ctx.client.clone())?
        .with_cancellation(ctx.cancel.clone());
    let feeds = ctx.feeds();

    ctx.reporter.section("Syncing");
    match new_crypto_key {
        Some(key) => {
            if reset != SyncResetMode::None {
                return Err(CliError::invalid("--new-crypto-key cannot be combined with --reset").into());
            }
            sync.change_crypto_key(key, &*feeds).await?;
            let path = ctx.locations.config_file();
            let mut config = Config::load(&path)?;
            config.sync.crypto_key = key.to_string();
            config.save(&path)?;
            ctx.reporter.success("Crypto key changed; use the new key on your other machines");
        }
        None => {
            sync.sync(reset, &*feeds).await?;
            ctx.reporter.summary_plain(sync.manager().app_list().entries.len(), "in sync");
        }
    }
    Ok(())
}
