use once_cell::sync::Lazy;
use regex::Regex;

static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static BRACKETED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)|\*[^*]*\*").unwrap());
static CUE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*>>+\s*").unwrap());
static SPEAKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[A-Z][A-Z0-9 _-]{1,30}:\s*").unwrap());
static ORNAMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[♪♫★►▼→←↑↓]").unwrap());
static REPEAT_DOTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.{2,}").unwrap());
static REPEAT_DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Canonicalize cue or transcript text for comparison.
///
/// Strips markup, sound descriptions, speaker labels and ornament symbols,
/// then lowercases and collapses whitespace. Idempotent.
pub fn normalize(text: &str) -> String {
    let text = TAGS.replace_all(text, "");
    let text = BRACKETED.replace_all(&text, "");
    let text = CUE_PREFIX.replace_all(&text, "");
    let text = SPEAKER.replace_all(&text, "");
    let text = ORNAMENTS.replace_all(&text, "");
    let text = REPEAT_DOTS.replace_all(&text, ".");
    let text = REPEAT_DASHES.replace_all(&text, "-");
    let text = text.to_lowercase();
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_html_tags() {
        assert_eq!(normalize("<i>Hello</i> <b>world</b>"), "hello world");
    }

    #[test]
    fn strips_sound_descriptions() {
        assert_eq!(
            normalize("[door slam] They've arrived. (whispers) *gasps*"),
            "they've arrived."
        );
    }

    #[test]
    fn strips_music_cues() {
        assert_eq!(normalize("♪ music ♪ keep talking"), "music keep talking");
    }

    #[test]
    fn strips_speaker_labels() {
        assert_eq!(normalize("JOE: Hey!\nHow are you?"), "hey! how are you?");
        assert_eq!(normalize("CAPTAIN REX: fire"), "fire");
    }

    #[test]
    fn keeps_sentences_starting_with_one_capital() {
        // A normal sentence is not a speaker label.
        assert_eq!(normalize("Note: this stays"), "note: this stays");
    }

    #[test]
    fn strips_cue_arrows() {
        assert_eq!(normalize(">> Previously on the show"), "previously on the show");
    }

    #[test]
    fn collapses_whitespace_and_punctuation_runs() {
        assert_eq!(normalize("wait...  what -- no"), "wait. what - no");
    }

    #[test]
    fn idempotent() {
        let samples = [
            "<i>Hello</i> [music] JOE: there...",
            "♪ la la ♪ (laughs)  MIXED case Text",
            "",
            "already clean text",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn empty_and_noise_only() {
        assert_eq!(normalize("[music]"), "");
        assert_eq!(normalize("♪ ♪"), "");
        assert_eq!(normalize("   "), "");
    }
}
