//! Store commands: add, verify, audit, optimise, purge, remove, find, list, manifest

use std::io::Write as _;
use std::path::Path;

use anyhow::{Context as _, Result};
use zi_core::io::extract::{ArchiveFormat, ExtractOptions};
use zi_core::manifest::Manifest;
use zi_core::store::{ArchiveFileInfo, ImplementationStore, KeepDamaged, StoreError};
use zi_schema::ManifestDigest;

use crate::StoreCommands;
use crate::ops::error::store_status;
use crate::ops::tasks::run_all;
use crate::ops::{CliError, Context};
use crate::ui::theme::format_size;

pub async fn dispatch(ctx: &Context, command: StoreCommands) -> Result<()> {
    match command {
        StoreCommands::Add {
            digest,
            source,
            extract,
        } => add(ctx, &digest, &source, extract),
        StoreCommands::Verify { digests } => verify(ctx, digests).await,
        StoreCommands::Audit => audit(ctx),
        StoreCommands::Optimise => optimise(ctx),
        StoreCommands::Purge { yes } => purge(ctx, yes),
        StoreCommands::Remove { digests } => remove(ctx, digests).await,
        StoreCommands::Find { digest } => find(ctx, &digest),
        StoreCommands::List => list(ctx),
        StoreCommands::Manifest { digest } => manifest(ctx, &digest),
    }
}

fn parse_digest(id: &str) -> Result<ManifestDigest> {
    ManifestDigest::parse_id(id).map_err(|_| CliError::invalid(format!("'{id}' is not a manifest digest")).into())
}

/// Add a directory or an archive to the store under `digest`
pub fn add(ctx: &Context, digest: &str, source: &Path, extract: Option<String>) -> Result<()> {
    let digest = parse_digest(digest)?;
    let store = ctx.store()?;

    let path = if source.is_dir() {
        if extract.is_some() {
            return Err(CliError::invalid("--extract only applies to archives").into());
        }
        store.add_directory(source, &digest, &*ctx.reporter)?
    } else {
        let format = ArchiveFormat::detect(None, &source.to_string_lossy())?;
        let archive = ArchiveFileInfo {
            path: source.to_path_buf(),
            format,
            options: ExtractOptions {
                extract,
                ..ExtractOptions::default()
            },
        };
        store.add_archives(&[archive], &digest, &ctx.cancel, &*ctx.reporter)?
    };
    ctx.reporter.success(&format!("Stored as {}", path.display()));
    Ok(())
}

/// Recompute the digests of stored implementations
pub async fn verify(ctx: &Context, digests: Vec<String>) -> Result<()> {
    let store = ctx.store()?;
    let count = digests.len();
    run_all("implementations", digests, &*ctx.reporter, |id| {
        let store = &store;
        async move {
            let digest = parse_digest(&id)?;
            store.verify(&digest, &KeepDamaged)?;
            ctx.reporter.done(&id, "ok");
            Ok(())
        }
    })
    .await?;
    ctx.reporter.summary_plain(count, "verified");
    Ok(())
}

/// Verify every stored implementation
pub fn audit(ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    ctx.reporter.section("Auditing");
    let problems = store.audit(&ctx.cancel, &*ctx.reporter)?;
    let total = store.list_all()?.len();
    let Some(first) = problems.first() else {
        ctx.reporter.summary_plain(total, "intact");
        return Ok(());
    };
    for problem in &problems {
        ctx.reporter.error(&problem.to_string());
    }
    Err(CliError::Aggregate {
        what: "implementations",
        failed: problems.len(),
        total,
        status: store_status(first),
    }
    .into())
}

/// Replace duplicate files with hard links
pub fn optimise(ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    ctx.reporter.section("Optimising");
    let saved = store.optimise(&ctx.cancel, &*ctx.reporter)?;
    ctx.reporter.success(&format!("Saved {}", format_size(saved)));
    Ok(())
}

/// Remove every implementation, asking first unless `yes`
pub fn purge(ctx: &Context, yes: bool) -> Result<()> {
    let store = ctx.store()?;
    if !yes && !ctx.reporter.confirm(&format!("Delete everything in {}?", store.path().display())) {
        return Err(CliError::UserCanceled.into());
    }
    store.purge(&ctx.cancel, &*ctx.reporter)?;
    ctx.reporter.success("Store purged");
    Ok(())
}

/// Remove implementations by digest
pub async fn remove(ctx: &Context, digests: Vec<String>) -> Result<()> {
    let store = ctx.store()?;
    let count = digests.len();
    run_all("implementations", digests, &*ctx.reporter, |id| {
        let store = &store;
        async move {
            let digest = parse_digest(&id)?;
            if !store.remove(&digest, &*ctx.reporter)? {
                return Err(StoreError::ImplementationNotFound(id).into());
            }
            Ok(())
        }
    })
    .await?;
    ctx.reporter.summary_plain(count, "removed");
    Ok(())
}

/// Print the directory of a stored implementation
pub fn find(ctx: &Context, digest: &str) -> Result<()> {
    let store = ctx.store()?;
    let path = store
        .get_path(&parse_digest(digest)?)
        .ok_or_else(|| StoreError::ImplementationNotFound(digest.to_string()))?;
    println!("{}", path.display());
    Ok(())
}

pub fn list(ctx: &Context) -> Result<()> {
    let store = ctx.store()?;
    let mut digests: Vec<String> = store.list_all()?.iter().map(ToString::to_string).collect();
    digests.sort();
    for digest in &digests {
        println!("{digest}");
    }
    Ok(())
}

/// Print the stored manifest of an implementation
pub fn manifest(ctx: &Context, digest: &str) -> Result<()> {
    let digest = parse_digest(digest)?;
    let store = ctx.store()?;
    let path = store
        .get_path(&digest)
        .ok_or_else(|| StoreError::ImplementationNotFound(digest.to_string()))?;
    let algorithm = digest
        .best_algorithm()
        .ok_or_else(|| StoreError::NoKnownDigest(digest.to_string()))?;
    let manifest = Manifest::load(&path, algorithm)
        .with_context(|| format!("Failed to read the manifest of {}", path.display()))?;
    std::io::stdout().write_all(&manifest.to_bytes())?;
    Ok(())
}
