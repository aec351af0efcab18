use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info, warn};

use crate::error::SyncError;

const SIZE_THRESHOLD: u64 = 150 * 1024;
const MAX_SMALL_BACKUPS: usize = 50;
const MAX_LARGE_BACKUPS: usize = 25;

/// Copy the original into a sibling `backup/` directory with an ISO-8601
/// timestamp suffix, then prune old copies.
pub fn create_backup(original: &Path) -> Result<PathBuf, SyncError> {
    let parent = original.parent().unwrap_or_else(|| Path::new("."));
    let backup_dir = parent.join("backup");
    fs::create_dir_all(&backup_dir).map_err(|e| SyncError::io("creating backup directory", e))?;

    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "subtitles".to_string());
    let suffix = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Local::now().format("%Y-%m-%dT%H-%M-%S");
    let destination = backup_dir.join(format!("{stem}.{stamp}{suffix}"));

    fs::copy(original, &destination).map_err(|e| SyncError::io("copying subtitle backup", e))?;
    info!("backed up original to {}", destination.display());

    if let Err(e) = prune(&backup_dir, &stem, &suffix) {
        warn!("backup retention pruning failed: {e}");
    }
    Ok(destination)
}

/// Keep the newest copies only: 50 for small files, 25 once they pass
/// 150 KB.
fn prune(backup_dir: &Path, stem: &str, suffix: &str) -> Result<(), std::io::Error> {
    let prefix = format!("{stem}.");
    let mut copies: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();
    for dir_entry in fs::read_dir(backup_dir)? {
        let dir_entry = dir_entry?;
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&prefix) || !name.ends_with(suffix) {
            continue;
        }
        let meta = dir_entry.metadata()?;
        copies.push((dir_entry.path(), meta.modified()?, meta.len()));
    }
    if copies.is_empty() {
        return Ok(());
    }

    let newest_size = copies
        .iter()
        .max_by_key(|(_, modified, _)| *modified)
        .map(|(_, _, size)| *size)
        .unwrap_or(0);
    let limit = if newest_size < SIZE_THRESHOLD {
        MAX_SMALL_BACKUPS
    } else {
        MAX_LARGE_BACKUPS
    };
    if copies.len() <= limit {
        return Ok(());
    }

    copies.sort_by_key(|(_, modified, _)| *modified);
    let excess = copies.len() - limit;
    for (path, _, _) in copies.into_iter().take(excess) {
        debug!("pruning old backup {}", path.display());
        fs::remove_file(path)?;
    }
    Ok(())
}
