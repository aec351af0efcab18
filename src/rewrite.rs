use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::SyncError;
use crate::offset::OffsetModel;
use crate::subtitle::{self, SubtitleEntry};

/// Shortest cue a correction may leave behind.
pub const MIN_CUE_DURATION: f64 = 0.5;

/// Shift every cue by Δ(t). Starts clamp at zero and cues keep at least
/// [`MIN_CUE_DURATION`] of screen time. Text, numbering and order are
/// untouched.
pub fn apply(entries: &[SubtitleEntry], model: &OffsetModel) -> Vec<SubtitleEntry> {
    entries
        .iter()
        .map(|entry| {
            let start = (entry.start + model.delta_at(entry.start)).max(0.0);
            let end = (entry.end + model.delta_at(entry.end)).max(start + MIN_CUE_DURATION);
            SubtitleEntry {
                index: entry.index,
                start,
                end,
                text: entry.text.clone(),
            }
        })
        .collect()
}

/// Output path next to the input: `<stem>.corrected.srt`.
pub fn corrected_path(input: &Path) -> PathBuf {
    input.with_extension("corrected.srt")
}

/// Apply the model and write the corrected file.
pub fn write_corrected(
    input: &Path,
    entries: &[SubtitleEntry],
    model: &OffsetModel,
) -> Result<PathBuf, SyncError> {
    let corrected = apply(entries, model);
    let out = corrected_path(input);
    subtitle::write(&out, &corrected)?;
    info!(
        "wrote {} corrected entries to {}",
        corrected.len(),
        out.display()
    );
    Ok(out)
}
