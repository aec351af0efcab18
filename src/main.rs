use std::env;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use subdrift::args::Args;
use subdrift::audio::FfmpegMedia;
use subdrift::error::SyncError;
use subdrift::sync::{SyncOptions, Synchronizer};
use subdrift::transcribe;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if args.debug { "debug" } else { "info" })
        .init();

    let code = tokio::select! {
        code = run(args) => code,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; no output written");
            130
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> i32 {
    match execute(args).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{e}");
            e.exit_code()
        }
    }
}

async fn execute(args: Args) -> Result<(), SyncError> {
    validate(&args)?;

    let api_key = env::var(args.api.key_variable()).map_err(|_| {
        SyncError::Usage(format!(
            "API key not found, set the {} environment variable",
            args.api.key_variable()
        ))
    })?;

    info!("media: {}", args.media.display());
    info!("subtitles: {}", args.sub.display());
    info!("engine: {:?}", args.api);

    let options = SyncOptions {
        samples: args.samples,
        search_window: args.search_window,
        similarity_threshold: args.similarity_threshold,
        min_chars: args.min_chars,
        dry_run: args.dry_run,
        ..SyncOptions::default()
    };
    let synchronizer = Synchronizer::new(
        args.media,
        args.sub,
        options,
        Arc::new(FfmpegMedia),
        transcribe::create(args.api, api_key),
    );

    synchronizer.run().await?;
    Ok(())
}

fn validate(args: &Args) -> Result<(), SyncError> {
    if !args.media.exists() {
        return Err(SyncError::Usage(format!(
            "media file not found: {}",
            args.media.display()
        )));
    }
    if !args.sub.exists() {
        return Err(SyncError::Usage(format!(
            "subtitle file not found: {}",
            args.sub.display()
        )));
    }
    if !(0.0..=1.0).contains(&args.similarity_threshold) {
        return Err(SyncError::Usage(
            "similarity threshold must be between 0.0 and 1.0".into(),
        ));
    }
    if args.samples < 1 {
        return Err(SyncError::Usage("sample count must be at least 1".into()));
    }
    if args.search_window < 1 {
        return Err(SyncError::Usage(
            "search window must be at least 1 minute".into(),
        ));
    }
    if args.min_chars < 1 {
        return Err(SyncError::Usage(
            "minimum characters must be at least 1".into(),
        ));
    }
    Ok(())
}
