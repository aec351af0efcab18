use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::Regex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::align::{self, AlignmentMatch};
use crate::audio::{AudioSample, MediaSource};
use crate::backup;
use crate::error::{SyncError, TranscribeError};
use crate::offset::{self, Estimate};
use crate::rewrite;
use crate::sampler::{self, SAMPLE_DURATION};
use crate::subtitle::{self, format_timestamp};
use crate::transcribe::{transcribe_with_retry, Transcriber};

/// Target share of samples that should match before alignment settles.
pub const MIN_SUCCESS_RATE: f64 = 0.4;
/// Spread above which a refinement pass is worth its cost.
pub const REFINE_STD_LIMIT: f64 = 3.0;
/// Two matches within this window describe the same sample position.
pub const MERGE_WINDOW_SECS: f64 = 30.0;

static EPISODE_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)s\d{1,2}\s?e\d{1,2}|\d{1,2}x\d{2}|\bseason\b|\bepisode\b").unwrap()
});

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub samples: usize,
    pub search_window: u32,
    pub similarity_threshold: f64,
    pub min_chars: usize,
    pub fan_out: usize,
    pub dry_run: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            samples: 16,
            search_window: 20,
            similarity_threshold: 0.65,
            min_chars: 40,
            fan_out: 4,
            dry_run: false,
        }
    }
}

/// Outcome of a run, rendered for the user at the end. A run that found
/// no usable matches still carries a report; it just has no estimate.
#[derive(Debug)]
pub struct SyncReport {
    pub samples_requested: usize,
    pub samples_transcribed: usize,
    pub effective_threshold: f64,
    pub matches: Vec<AlignmentMatch>,
    pub estimate: Option<Estimate>,
    pub refined: bool,
    pub output: Option<PathBuf>,
}

impl SyncReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== SYNCHRONIZATION SUMMARY ===");
        let _ = writeln!(
            out,
            "samples: {}/{} transcribed, {} matched (threshold {:.2}{})",
            self.samples_transcribed,
            self.samples_requested,
            self.matches.len(),
            self.effective_threshold,
            if self.refined { ", refined" } else { "" }
        );
        for m in &self.matches {
            let _ = writeln!(
                out,
                "  sample {:>2} at {} -> minute {:>3} (similarity {:.2})",
                m.sample_index,
                format_timestamp(m.sample_time),
                m.minute,
                m.similarity
            );
        }
        match &self.estimate {
            Some(estimate) => {
                let _ = writeln!(
                    out,
                    "offset points ({} kept, {} rejected):",
                    estimate.points.len(),
                    estimate.rejected
                );
                for p in &estimate.points {
                    let _ = writeln!(
                        out,
                        "  t={} delta={:+.1}s weight={:.2}",
                        format_timestamp(p.time),
                        p.delta,
                        p.weight
                    );
                }
                let _ = writeln!(
                    out,
                    "mode: {} (mean {:+.2}s, spread {:.2}s)",
                    estimate.model.mode_name(),
                    estimate.mean_delta,
                    estimate.std_dev
                );
                match &self.output {
                    Some(path) => {
                        let _ = writeln!(out, "corrected subtitles: {}", path.display());
                    }
                    None => {
                        let _ = writeln!(out, "dry run: no file written");
                    }
                }
            }
            None => {
                let _ = writeln!(
                    out,
                    "no usable offset measurements; subtitles left untouched"
                );
            }
        }
        out
    }
}

/// Threshold floor for the adaptive walk; large sample sets tolerate
/// looser matches.
pub fn threshold_floor(samples: usize) -> f64 {
    if samples >= 24 {
        0.35
    } else {
        0.40
    }
}

/// Thresholds tried in order: the configured value, then steps of 0.10
/// down until the floor is reached.
pub fn threshold_walk(theta0: f64, samples: usize) -> Vec<f64> {
    let floor = threshold_floor(samples);
    let mut walk = vec![theta0];
    let mut current = theta0;
    let mut step = 1u32;
    while current > floor + 1e-9 {
        current = (theta0 - 0.10 * f64::from(step)).max(floor);
        walk.push(current);
        step += 1;
    }
    walk
}

/// A second pass pays off only in the murky middle: some matches but not
/// enough, and too much spread to trust them.
pub fn should_refine(success_rate: f64, std_dev: f64) -> bool {
    (0.25..=0.6).contains(&success_rate) && std_dev > REFINE_STD_LIMIT
}

/// A refinement stands only if it cut the spread by at least 20%.
pub fn refinement_accepted(std_before: f64, std_after: f64) -> bool {
    std_after <= std_before * 0.8
}

/// Duration guess when the media cannot be probed: episode-marked names
/// read as TV, everything else as a film.
pub fn fallback_duration(media: &Path) -> f64 {
    let name = media
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if EPISODE_HINT.is_match(&name) {
        1200.0
    } else {
        5400.0
    }
}

/// Combine two match lists, collapsing matches within
/// [`MERGE_WINDOW_SECS`] of each other onto the higher similarity.
pub fn merge_matches(
    base: Vec<AlignmentMatch>,
    extra: Vec<AlignmentMatch>,
) -> Vec<AlignmentMatch> {
    let mut merged = base;
    for candidate in extra {
        match merged
            .iter_mut()
            .find(|m| (m.sample_time - candidate.sample_time).abs() <= MERGE_WINDOW_SECS)
        {
            Some(existing) => {
                if candidate.similarity > existing.similarity {
                    *existing = candidate;
                }
            }
            None => merged.push(candidate),
        }
    }
    merged.sort_by(|a, b| a.sample_time.total_cmp(&b.sample_time));
    merged
}

fn seed_for(media: &Path) -> u64 {
    let mut hasher = DefaultHasher::new();
    media.hash(&mut hasher);
    hasher.finish()
}

pub struct Synchronizer {
    media: PathBuf,
    subtitle: PathBuf,
    options: SyncOptions,
    source: Arc<dyn MediaSource>,
    transcriber: Arc<dyn Transcriber>,
}

impl Synchronizer {
    pub fn new(
        media: PathBuf,
        subtitle: PathBuf,
        options: SyncOptions,
        source: Arc<dyn MediaSource>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Self {
        Self {
            media,
            subtitle,
            options,
            source,
            transcriber,
        }
    }

    /// Run the whole pipeline: sample, transcribe, align, estimate,
    /// rewrite.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let entries = subtitle::parse(&self.subtitle)?;
        let index = subtitle::minute_index(&entries);
        let eligible = subtitle::eligible_minutes(&index, self.options.min_chars, 0, u32::MAX);
        info!(
            "{} of {} subtitle minutes carry at least {} characters",
            eligible.len(),
            index.len(),
            self.options.min_chars
        );

        let duration = match self.source.duration(&self.media).await {
            Some(d) => d,
            None => {
                let d = fallback_duration(&self.media);
                warn!("could not probe media duration, assuming {:.0} minutes", d / 60.0);
                d
            }
        };

        let seed = seed_for(&self.media);
        let workdir =
            tempfile::tempdir().map_err(|e| SyncError::io("creating working directory", e))?;

        let samples = self
            .collect_samples(self.options.samples, seed, duration, workdir.path())
            .await?;
        let transcribed = samples.len();

        let (mut matches, mut threshold) = self.align_adaptive(&samples, &index);
        let mut estimate = match points_to_estimate(&matches) {
            Some(est) => est,
            None => {
                warn!("no matches at any threshold; leaving subtitles untouched");
                let report = SyncReport {
                    samples_requested: self.options.samples,
                    samples_transcribed: transcribed,
                    effective_threshold: threshold,
                    matches,
                    estimate: None,
                    refined: false,
                    output: None,
                };
                print!("{}", report.render());
                return Err(SyncError::InsufficientMatches);
            }
        };

        let mut refined = false;
        let success_rate = matches.len() as f64 / transcribed.max(1) as f64;
        if should_refine(success_rate, estimate.std_dev) {
            info!(
                "refining: success rate {:.0}% with {:.1}s spread",
                success_rate * 100.0,
                estimate.std_dev
            );
            let extra_samples = (transcribed as f64 * 1.5).ceil() as usize;
            let second = self
                .collect_samples(extra_samples, seed.wrapping_add(1), duration, workdir.path())
                .await?;
            let lowered = (threshold - 0.05).max(0.0);
            let second_matches = align::align_samples(
                &second,
                &index,
                self.options.search_window,
                lowered,
                self.options.min_chars,
            );
            let merged = merge_matches(matches.clone(), second_matches);
            if let Some(candidate) = points_to_estimate(&merged) {
                if refinement_accepted(estimate.std_dev, candidate.std_dev) {
                    info!(
                        "refinement kept: spread {:.2}s -> {:.2}s",
                        estimate.std_dev, candidate.std_dev
                    );
                    matches = merged;
                    estimate = candidate;
                    threshold = lowered;
                    refined = true;
                } else {
                    info!(
                        "refinement rolled back: spread {:.2}s -> {:.2}s",
                        estimate.std_dev, candidate.std_dev
                    );
                }
            }
        }

        let output = if self.options.dry_run {
            info!(
                "dry run: would write {}",
                rewrite::corrected_path(&self.subtitle).display()
            );
            None
        } else {
            backup::create_backup(&self.subtitle)?;
            Some(rewrite::write_corrected(
                &self.subtitle,
                &entries,
                &estimate.model,
            )?)
        };

        let report = SyncReport {
            samples_requested: self.options.samples,
            samples_transcribed: transcribed,
            effective_threshold: threshold,
            matches,
            estimate: Some(estimate),
            refined,
            output,
        };
        print!("{}", report.render());
        Ok(report)
    }

    /// Extract and transcribe `n` samples with a bounded fan-out. Samples
    /// that fail extraction (after one retry elsewhere) or exhaust their
    /// transcription retries are dropped; auth and quota failures abort.
    async fn collect_samples(
        &self,
        n: usize,
        seed: u64,
        duration: f64,
        workdir: &Path,
    ) -> Result<Vec<AudioSample>, SyncError> {
        let times = sampler::pick(duration, n, seed);
        if times.is_empty() {
            return Err(SyncError::Extraction(format!(
                "media too short to sample ({duration:.0}s)"
            )));
        }
        let spare: Vec<f64> = sampler::candidates(duration)
            .into_iter()
            .filter(|c| !times.contains(c))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.options.fan_out));
        let mut tasks = JoinSet::new();
        for (i, start) in times.iter().copied().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let source = Arc::clone(&self.source);
            let transcriber = Arc::clone(&self.transcriber);
            let media = self.media.clone();
            let wav = workdir.join(format!("sample_{i:03}.wav"));
            let spare = spare.clone();
            let retry_seed = seed.wrapping_add(i as u64);

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;

                let start =
                    match extract_with_retry(source.as_ref(), &media, start, &wav, &spare, retry_seed)
                        .await
                    {
                        Ok(actual) => actual,
                        Err(e) => {
                            warn!("sample {i} dropped: {e}");
                            return Ok(None);
                        }
                    };

                match transcribe_with_retry(transcriber.as_ref(), &wav).await {
                    Ok(text) if !text.is_empty() => Ok(Some(AudioSample {
                        index: i,
                        start_time: start,
                        duration: SAMPLE_DURATION,
                        wav_path: wav,
                        transcript: Some(text),
                    })),
                    Ok(_) => {
                        warn!("sample {i} dropped: empty transcript");
                        Ok(None)
                    }
                    Err(e @ (TranscribeError::Auth(_) | TranscribeError::Quota(_))) => {
                        Err(SyncError::Transcribe(e))
                    }
                    Err(TranscribeError::Retryable(message)) => {
                        warn!("sample {i} dropped after retries: {message}");
                        Ok(None)
                    }
                }
            });
        }

        let mut samples: Vec<AudioSample> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(sample))) => samples.push(sample),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(SyncError::Internal(format!("sample task failed: {e}")));
                }
            }
        }
        samples.sort_by_key(|s| s.index);
        info!(
            "collected {}/{} transcribed samples",
            samples.len(),
            times.len()
        );
        Ok(samples)
    }

    /// Align at the configured threshold, stepping down toward the floor
    /// while fewer than [`MIN_SUCCESS_RATE`] of samples match.
    fn align_adaptive(
        &self,
        samples: &[AudioSample],
        index: &BTreeMap<u32, String>,
    ) -> (Vec<AlignmentMatch>, f64) {
        if samples.is_empty() {
            return (Vec::new(), self.options.similarity_threshold);
        }

        let walk = threshold_walk(self.options.similarity_threshold, samples.len());
        let mut result = (Vec::new(), self.options.similarity_threshold);
        for theta in walk {
            let matches = align::align_samples(
                samples,
                index,
                self.options.search_window,
                theta,
                self.options.min_chars,
            );
            let rate = matches.len() as f64 / samples.len() as f64;
            info!(
                "threshold {:.2}: {}/{} samples matched",
                theta,
                matches.len(),
                samples.len()
            );
            result = (matches, theta);
            if rate >= MIN_SUCCESS_RATE {
                break;
            }
        }
        result
    }
}

fn points_to_estimate(matches: &[AlignmentMatch]) -> Option<Estimate> {
    if matches.is_empty() {
        return None;
    }
    offset::estimate(&offset::points_from_matches(matches)).ok()
}

/// One retry at a random unused candidate position before the sample is
/// given up on.
async fn extract_with_retry(
    source: &dyn MediaSource,
    media: &Path,
    start: f64,
    wav: &Path,
    spare: &[f64],
    retry_seed: u64,
) -> Result<f64, SyncError> {
    match source.extract(media, start, SAMPLE_DURATION, wav).await {
        Ok(()) => Ok(start),
        Err(first) => {
            let mut rng = StdRng::seed_from_u64(retry_seed);
            let Some(&alternate) = spare.choose(&mut rng) else {
                return Err(first);
            };
            warn!("extraction at {start:.0}s failed ({first}), retrying at {alternate:.0}s");
            source
                .extract(media, alternate, SAMPLE_DURATION, wav)
                .await?;
            Ok(alternate)
        }
    }
}
