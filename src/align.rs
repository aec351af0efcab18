use std::collections::BTreeMap;

use tracing::debug;

use crate::audio::AudioSample;

/// A farther candidate minute must beat the accepted best by this much.
pub const IMPROVEMENT_MARGIN: f64 = 0.05;

/// An accepted pairing of one audio sample with one subtitle minute.
#[derive(Debug, Clone)]
pub struct AlignmentMatch {
    pub sample_index: usize,
    pub sample_time: f64,
    pub minute: u32,
    pub similarity: f64,
    pub subtitle_text: String,
    pub transcript: String,
}

/// Levenshtein edit distance over characters, two-row DP.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Normalized similarity in [0, 1]; empty input scores zero.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

/// Search the minute window around a sample for its best-matching bucket.
///
/// Candidates are visited by increasing distance from the sample's own
/// minute (ties toward the earlier minute). Once the best score clears the
/// threshold the search stops at the end of the current distance ring, and
/// a farther candidate only replaces an accepted best when it improves by
/// at least [`IMPROVEMENT_MARGIN`].
pub fn find_best_match(
    sample: &AudioSample,
    transcript: &str,
    index: &BTreeMap<u32, String>,
    window: u32,
    threshold: f64,
    min_chars: usize,
) -> Option<AlignmentMatch> {
    if transcript.is_empty() {
        return None;
    }

    let center = sample.minute() as i64;
    let mut best: Option<(f64, u32)> = None;

    for distance in 0..=window as i64 {
        let mut ring = vec![center - distance];
        if distance > 0 {
            ring.push(center + distance);
        }
        for minute in ring {
            if minute < 0 {
                continue;
            }
            let minute = minute as u32;
            let Some(bucket) = index.get(&minute) else {
                continue;
            };
            if bucket.chars().count() < min_chars {
                continue;
            }

            let score = similarity(transcript, bucket);
            best = match best {
                None => Some((score, minute)),
                Some((best_score, best_minute)) => {
                    let improves = if best_score >= threshold {
                        score >= best_score + IMPROVEMENT_MARGIN
                    } else {
                        score > best_score
                    };
                    if improves {
                        Some((score, minute))
                    } else {
                        Some((best_score, best_minute))
                    }
                }
            };
        }
        if let Some((best_score, _)) = best {
            if best_score >= threshold {
                break;
            }
        }
    }

    let (score, minute) = best?;
    if score < threshold {
        debug!(
            "sample {}: best candidate at minute {} scored {:.3}, below {:.2}",
            sample.index, minute, score, threshold
        );
        return None;
    }
    Some(AlignmentMatch {
        sample_index: sample.index,
        sample_time: sample.start_time,
        minute,
        similarity: score,
        subtitle_text: index[&minute].clone(),
        transcript: transcript.to_string(),
    })
}

/// Align every transcribed sample; at most one match per sample. The result
/// is sorted by sample start time.
pub fn align_samples(
    samples: &[AudioSample],
    index: &BTreeMap<u32, String>,
    window: u32,
    threshold: f64,
    min_chars: usize,
) -> Vec<AlignmentMatch> {
    let mut matches: Vec<AlignmentMatch> = samples
        .iter()
        .filter_map(|sample| {
            let transcript = sample.transcript.as_deref()?;
            find_best_match(sample, transcript, index, window, threshold, min_chars)
        })
        .collect();
    matches.sort_by(|a, b| a.sample_time.total_cmp(&b.sample_time));
    debug!(
        "aligned {}/{} samples at threshold {:.2}",
        matches.len(),
        samples.len(),
        threshold
    );
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sample_at(start: f64) -> AudioSample {
        AudioSample {
            index: 0,
            start_time: start,
            duration: 60.0,
            wav_path: PathBuf::from("sample.wav"),
            transcript: None,
        }
    }

    fn index_of(pairs: &[(u32, &str)]) -> BTreeMap<u32, String> {
        pairs.iter().map(|(m, t)| (*m, t.to_string())).collect()
    }

    const LONG_A: &str = "the quick brown fox jumps over the lazy dog tonight";
    const LONG_B: &str = "an entirely different sentence about sailing ships at dawn";

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("flaw", "lawn"), 2);
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("hello", "hello"), 1.0);
        assert_eq!(similarity("", "hello"), 0.0);
        let s = similarity("hello there", "hello theme");
        assert!(s > 0.8 && s < 1.0);
    }

    #[test]
    fn finds_exact_bucket_at_own_minute() {
        let index = index_of(&[(4, LONG_B), (5, LONG_A), (6, LONG_B)]);
        let sample = sample_at(300.0);
        let m = find_best_match(&sample, LONG_A, &index, 20, 0.65, 40).unwrap();
        assert_eq!(m.minute, 5);
        assert_eq!(m.similarity, 1.0);
    }

    #[test]
    fn finds_shifted_bucket_within_window() {
        let index = index_of(&[(5, LONG_B), (9, LONG_A)]);
        let sample = sample_at(300.0);
        let m = find_best_match(&sample, LONG_A, &index, 20, 0.65, 40).unwrap();
        assert_eq!(m.minute, 9);
    }

    #[test]
    fn ties_break_toward_earlier_minute() {
        // Identical buckets equidistant from the center minute.
        let index = index_of(&[(3, LONG_A), (7, LONG_A)]);
        let sample = sample_at(300.0);
        let m = find_best_match(&sample, LONG_A, &index, 20, 0.65, 40).unwrap();
        assert_eq!(m.minute, 3);
    }

    #[test]
    fn far_candidate_needs_margin_over_accepted_best() {
        // Minute 5 already clears the threshold; minute 6 is scanned in a
        // later ring and must not displace it on a hair-thin improvement.
        let near = "the quick brown fox jumps over the lazy dog at dusk";
        let index = index_of(&[(5, near), (6, LONG_A)]);
        let sample = sample_at(300.0);
        let m = find_best_match(&sample, LONG_A, &index, 20, 0.65, 40).unwrap();
        assert_eq!(m.minute, 5);
    }

    #[test]
    fn window_clamps_at_minute_zero() {
        let index = index_of(&[(0, LONG_A)]);
        let sample = sample_at(0.0);
        let m = find_best_match(&sample, LONG_A, &index, 20, 0.65, 40).unwrap();
        assert_eq!(m.minute, 0);
    }

    #[test]
    fn rejects_below_threshold() {
        let index = index_of(&[(5, LONG_B)]);
        let sample = sample_at(300.0);
        assert!(find_best_match(&sample, LONG_A, &index, 20, 0.65, 40).is_none());
    }

    #[test]
    fn skips_short_buckets() {
        let index = index_of(&[(5, "too short")]);
        let sample = sample_at(300.0);
        assert!(find_best_match(&sample, "too short", &index, 20, 0.65, 40).is_none());
    }

    #[test]
    fn outside_window_is_invisible() {
        let index = index_of(&[(30, LONG_A)]);
        let sample = sample_at(300.0);
        assert!(find_best_match(&sample, LONG_A, &index, 20, 0.65, 40).is_none());
    }

    #[test]
    fn align_samples_sorts_by_time_and_skips_untranscribed() {
        let index = index_of(&[(5, LONG_A), (10, LONG_B)]);
        let mut late = sample_at(600.0);
        late.index = 1;
        late.transcript = Some(LONG_B.to_string());
        let mut early = sample_at(300.0);
        early.index = 0;
        early.transcript = Some(LONG_A.to_string());
        let mut silent = sample_at(900.0);
        silent.index = 2;

        let matches = align_samples(&[late, early, silent], &index, 20, 0.65, 40);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].minute, 5);
        assert_eq!(matches[1].minute, 10);
    }
}
