use thiserror::Error;

/// Failures reported by the transcription adapters.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("transient transcription failure: {0}")]
    Retryable(String),

    #[error("transcription API rejected credentials: {0}")]
    Auth(String),

    #[error("transcription API quota exhausted: {0}")]
    Quota(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Usage(String),

    #[error("only .srt subtitles are supported, got: {0}")]
    UnsupportedFormat(String),

    #[error("malformed SRT at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("audio extraction failed: {0}")]
    Extraction(String),

    #[error(transparent)]
    Transcribe(#[from] TranscribeError),

    #[error("no alignment matches survived filtering")]
    InsufficientMatches,

    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl SyncError {
    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::UnsupportedFormat(_) | Self::Parse { .. } => 3,
            Self::InsufficientMatches => 4,
            Self::Extraction(_) | Self::Transcribe(_) => 5,
            Self::Io { .. } | Self::Internal(_) => 1,
        }
    }
}
