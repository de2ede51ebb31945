//! Writing generated assets to disk.
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::api::request::Submission;
use crate::api::routes::AppState;
use crate::backend::AssetResult;
use crate::error::AppResult;
use crate::media::AcceptHeader;

/// Write an asset next to its final path first and rename it into place, so
/// a half-written file never appears under `path`.
pub async fn write_asset(path: &Path, asset: &AssetResult) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let partial = partial_path(path);
    if let Err(e) = fs::write(&partial, &asset.bytes).await {
        let _ = fs::remove_file(&partial).await;
        return Err(e.into());
    }
    fs::rename(&partial, path).await?;
    tracing::info!(path = %path.display(), bytes = asset.bytes.len(), "Saved asset");
    Ok(())
}

/// Run a submission and save the asset. Nothing is written on failure.
pub async fn generate_to_path(
    state: &AppState,
    submission: Submission,
    accept: &AcceptHeader,
    path: &Path,
) -> AppResult<AssetResult> {
    let asset = state.invoke(submission, accept).await?;
    write_asset(path, &asset).await?;
    Ok(asset)
}

/// Preferred file extension for a content type, `bin` when unknown.
pub fn extension_for(content_type: &str) -> &'static str {
    image::ImageFormat::from_mime_type(content_type)
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
