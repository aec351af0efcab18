use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[clap(
    name = "subdrift",
    version,
    about = "Fixes subtitle timing drift by aligning AI-transcribed audio samples against the subtitle text",
    after_help = "Environment variables: OPENAI_API_KEY, GOOGLE_PLACES_API_KEY"
)]
pub struct Args {
    /// Path to the media file (.mp4, .mkv, .avi, ...)
    #[clap(long)]
    pub media: PathBuf,

    /// Path to the subtitle file (.srt only)
    #[clap(long)]
    pub sub: PathBuf,

    /// Transcription engine
    #[clap(long, value_enum, default_value_t = ApiEngine::Whisper)]
    pub api: ApiEngine,

    /// Number of audio samples to extract
    #[clap(long, default_value_t = 16)]
    pub samples: usize,

    /// Search window in minutes around each sample
    #[clap(long, default_value_t = 20)]
    pub search_window: u32,

    /// Similarity threshold for accepting a match (0.0-1.0)
    #[clap(long, default_value_t = 0.65)]
    pub similarity_threshold: f64,

    /// Minimum characters a subtitle minute needs to be matchable
    #[clap(long, default_value_t = 40)]
    pub min_chars: usize,

    /// Verbose diagnostics
    #[clap(long)]
    pub debug: bool,

    /// Analyze only, write nothing
    #[clap(long)]
    pub dry_run: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiEngine {
    Whisper,
    Google,
}

impl ApiEngine {
    pub fn key_variable(self) -> &'static str {
        match self {
            Self::Whisper => "OPENAI_API_KEY",
            Self::Google => "GOOGLE_PLACES_API_KEY",
        }
    }
}
