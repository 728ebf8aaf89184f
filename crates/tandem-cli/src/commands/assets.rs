use std::path::{Path, PathBuf};
use std::sync::Arc;

use tandem_core::assets::{AssetOutcome, AssetRef, AssetSync, StorageAssetSource};

use crate::catalog::Profile;
use crate::cli::AssetCommands;
use crate::commands::common::{default_data_dir, open_store};
use crate::config_profiles::{resolve_backend, CliProfilesConfig};
use crate::error::CliError;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PullSummary {
    pub downloaded: usize,
    pub up_to_date: usize,
    pub missing: usize,
    pub failed: usize,
}

pub async fn run_assets(
    command: AssetCommands,
    db_path: &Path,
    profile: Option<&str>,
) -> Result<(), CliError> {
    match command {
        AssetCommands::Pull { dir } => run_pull(dir, db_path, profile).await,
    }
}

async fn run_pull(
    dir: Option<PathBuf>,
    db_path: &Path,
    profile: Option<&str>,
) -> Result<(), CliError> {
    let config = CliProfilesConfig::load()?;
    let profile_name = config.resolve_profile_name(profile);
    let backend = resolve_backend(config.profile(&profile_name))?;
    let source = StorageAssetSource::new(backend)?;
    let dir = dir.unwrap_or_else(|| default_data_dir().join("assets"));

    let store = open_store(db_path).await?;
    let profiles = store.list::<Profile>().await?;
    store.close().await?;

    let assets = profiles
        .into_iter()
        .filter_map(|(_, profile)| {
            profile
                .avatar_key
                .map(|key| AssetRef::new(key, profile.avatar_hash))
        })
        .collect::<Vec<_>>();

    let sync = AssetSync::new(&dir, Arc::new(source));
    let summary = pull_assets(&sync, &assets).await;
    println!(
        "Assets in {}: {} downloaded, {} up to date, {} missing remotely, {} failed",
        dir.display(),
        summary.downloaded,
        summary.up_to_date,
        summary.missing,
        summary.failed
    );

    if summary.failed > 0 {
        return Err(CliError::SyncFailed(format!(
            "{} asset(s) failed to download",
            summary.failed
        )));
    }
    Ok(())
}

/// Download each asset independently; one failure does not stop the rest.
pub async fn pull_assets(sync: &AssetSync, assets: &[AssetRef]) -> PullSummary {
    let mut summary = PullSummary::default();
    for asset in assets {
        match sync.sync_asset(asset).await {
            Ok(AssetOutcome::Downloaded { .. }) => summary.downloaded += 1,
            Ok(AssetOutcome::UpToDate) => summary.up_to_date += 1,
            Ok(AssetOutcome::NoRemoteAsset) => summary.missing += 1,
            Err(error) => {
                tracing::warn!(key = %asset.key, error = %error, "Asset download failed");
                eprintln!("{}: {error}", asset.key);
                summary.failed += 1;
            }
        }
    }
    summary
}
