//! BeachVar Agent - Entry Point
//!
//! Runs next to the BeachVar device service on an edge box and keeps both
//! the device workload and the agent itself on the latest published image.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;

use bvagent::app::context::AgentContext;
use bvagent::app::diagnostic::run_diagnostic;
use bvagent::app::options::AppOptions;
use bvagent::app::run::{run, RunExit};
use bvagent::logs::{init_logging, LogOptions};
use bvagent::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Run diagnostics
    if cli_args.contains_key("diagnostic") || cli_args.contains_key("diag") {
        return if run_diagnostic().await {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    // Invalid configuration is fatal before logging or any cycle starts
    let context = match AgentContext::from_env() {
        Ok(context) => context,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging, keeping the file writer guard alive until exit
    let log_options = LogOptions {
        log_level: context.log_level,
        json_format: context.log_json,
        log_dir: context.log_dir.clone(),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    info!(
        version = %version.version,
        git_hash = %version.git_hash,
        "Starting BeachVar Agent"
    );

    let options = AppOptions::from_context(&context);
    info!("Running BeachVar Agent with options: {:?}", options);

    match run(context, options, await_shutdown_signal()).await {
        Ok(RunExit::Shutdown) => ExitCode::SUCCESS,
        Ok(RunExit::HandOff) => {
            info!("Replacement agent is starting, exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to run the agent: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Unable to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
