//! CLI entry point for stitchd
//!
//! Parses command line arguments, prepares the output tree and runs the
//! controller in single-run or watch mode.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use stitchd::{
    prepare_output_root, run_startup_checks, ConfigStore, Daemon, ExifTool, RunFlag, RunMode,
    SdkCliStitcher,
};
use tokio::signal;

/// stitchd - converts 360° camera captures into stitched panoramas, once each
#[derive(Parser, Debug)]
#[command(name = "stitchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory tree holding .insv/.insp captures
    input_dir: PathBuf,

    /// Directory tree receiving stitched .mp4/.jpg output
    output_dir: PathBuf,

    /// Path to the configuration file, created with defaults if absent
    #[arg(default_value = "config.toml")]
    config_file: PathBuf,

    /// Keep scanning on an interval instead of exiting after one pass
    #[arg(long)]
    watch: bool,

    /// Stitching front end to invoke
    #[arg(long, default_value = "stitcherSDKDemo")]
    stitcher: PathBuf,

    /// exiftool binary used for metadata
    #[arg(long, default_value = "exiftool")]
    exiftool: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    // RUST_LOG wins over the verbosity flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose {
            "stitchd=debug,stitchd_config=debug,stitchd_cli=debug".to_string()
        } else {
            "stitchd=info,stitchd_config=info,stitchd_cli=info".to_string()
        }
    });

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Clear the running flag on the first stop signal.
fn stop_on_signal(running: RunFlag) {
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Stop signal received, finishing current job");
        running.stop();
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                // --help / --version
                ExitCode::SUCCESS
            };
        }
    };

    init_logging(args.verbose);
    tracing::info!("stitchd starting");

    if let Err(e) = prepare_output_root(&args.output_dir) {
        tracing::error!("{}", e);
        return ExitCode::FAILURE;
    }

    let mut config = ConfigStore::new(args.config_file.clone()).load();
    config.apply_env_overrides();

    stitchd::startup::log_config(&config, &args.input_dir, &args.output_dir);
    run_startup_checks(&args.stitcher, &args.exiftool);

    let mode = RunMode::select(args.watch, &config);
    let daemon = Daemon::new(
        config,
        args.input_dir,
        args.output_dir,
        Arc::new(SdkCliStitcher::new(args.stitcher)),
        Arc::new(ExifTool::new(args.exiftool)),
    );

    stop_on_signal(daemon.running_flag());

    match daemon.run(mode).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Daemon error: {}", e);
            ExitCode::FAILURE
        }
    }
}
