use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::normalize::normalize;

static TIMING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2}):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d{2}):(\d{2}):(\d{2})[,.](\d{3})$")
        .unwrap()
});

/// A single cue: timing in seconds, text kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEntry {
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl SubtitleEntry {
    pub fn start_minute(&self) -> u32 {
        (self.start / 60.0).floor() as u32
    }
}

/// Parse an SRT file. Rejects any other extension up front.
pub fn parse(path: &Path) -> Result<Vec<SubtitleEntry>, SyncError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext != "srt" {
        return Err(SyncError::UnsupportedFormat(if ext.is_empty() {
            path.display().to_string()
        } else {
            format!(".{ext}")
        }));
    }

    let raw = fs::read_to_string(path).map_err(|e| SyncError::io("reading subtitle file", e))?;
    let entries = parse_str(&raw)?;
    info!(
        "parsed {} subtitle entries from {}",
        entries.len(),
        path.display()
    );
    Ok(entries)
}

/// Parse SRT content: index line, timing line, cue lines, blank separator.
pub fn parse_str(raw: &str) -> Result<Vec<SubtitleEntry>, SyncError> {
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let mut entries: Vec<SubtitleEntry> = Vec::new();
    let mut lines = raw.lines().enumerate().peekable();

    while let Some((lineno, line)) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }

        let index: usize = line.trim().parse().map_err(|_| {
            SyncError::parse(lineno + 1, format!("expected cue index, got {line:?}"))
        })?;
        if index != entries.len() + 1 {
            return Err(SyncError::parse(
                lineno + 1,
                format!(
                    "cue indices must be contiguous, expected {}",
                    entries.len() + 1
                ),
            ));
        }

        let (timing_no, timing) = lines
            .next()
            .ok_or_else(|| SyncError::parse(lineno + 2, "missing timing line"))?;
        let caps = TIMING.captures(timing.trim()).ok_or_else(|| {
            SyncError::parse(
                timing_no + 1,
                format!("expected 'HH:MM:SS,mmm --> HH:MM:SS,mmm', got {timing:?}"),
            )
        })?;
        let start = capture_seconds(&caps, 1);
        let end = capture_seconds(&caps, 5);
        if start > end {
            return Err(SyncError::parse(timing_no + 1, "cue starts after it ends"));
        }
        if let Some(prev) = entries.last() {
            if start < prev.start {
                return Err(SyncError::parse(
                    timing_no + 1,
                    "cues must be ordered by start time",
                ));
            }
        }

        // Cue lines are kept byte-for-byte; only line terminators go.
        let mut text_lines: Vec<&str> = Vec::new();
        while let Some(&(_, l)) = lines.peek() {
            if l.trim().is_empty() {
                lines.next();
                break;
            }
            text_lines.push(l);
            lines.next();
        }

        entries.push(SubtitleEntry {
            index,
            start,
            end,
            text: text_lines.join("\n"),
        });
    }

    if entries.is_empty() {
        return Err(SyncError::parse(1, "no subtitle cues found"));
    }
    Ok(entries)
}

fn capture_seconds(caps: &regex::Captures<'_>, first_group: usize) -> f64 {
    // Groups are fixed-width digits by construction, parses cannot fail.
    let field = |i: usize| caps[first_group + i].parse::<f64>().unwrap_or(0.0);
    field(0) * 3600.0 + field(1) * 60.0 + field(2) + field(3) / 1000.0
}

/// Aggregate normalized cue text per whole minute of the cue start.
pub fn minute_index(entries: &[SubtitleEntry]) -> BTreeMap<u32, String> {
    let mut index: BTreeMap<u32, String> = BTreeMap::new();
    for entry in entries {
        let cleaned = normalize(&entry.text);
        if cleaned.is_empty() {
            continue;
        }
        let bucket = index.entry(entry.start_minute()).or_default();
        if !bucket.is_empty() {
            bucket.push(' ');
        }
        bucket.push_str(&cleaned);
    }
    debug!("built minute index covering {} minutes", index.len());
    index
}

/// Minutes in `[lo, hi]` whose aggregated text reaches `min_chars`.
pub fn eligible_minutes(
    index: &BTreeMap<u32, String>,
    min_chars: usize,
    lo: u32,
    hi: u32,
) -> Vec<u32> {
    index
        .range(lo..=hi)
        .filter(|(_, text)| text.chars().count() >= min_chars)
        .map(|(m, _)| *m)
        .collect()
}

pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

/// Serialize entries back to SRT.
pub fn render(entries: &[SubtitleEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "{}", entry.index);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_timestamp(entry.start),
            format_timestamp(entry.end)
        );
        let _ = writeln!(out, "{}", entry.text);
        let _ = writeln!(out);
    }
    out
}

pub fn write(path: &Path, entries: &[SubtitleEntry]) -> Result<(), SyncError> {
    fs::write(path, render(entries)).map_err(|e| SyncError::io("writing subtitle file", e))
}
