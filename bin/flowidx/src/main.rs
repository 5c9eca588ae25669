//! Flow chain indexer binary.

use clap::{Parser, Subcommand};
use flowidx_config::Config;
use flowidx_node::EXIT_OK;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about = "Flow chain indexer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the indexer node.
    Node(NodeCommand),
    /// Load, validate and print the resolved configuration.
    Config(ConfigCommand),
}

#[derive(Debug, Parser)]
struct NodeCommand {
    /// Path to a TOML config file. Environment variables override file
    /// values.
    #[arg(long, value_name = "FILE", env = "FLOWIDX_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for rolling log files, in addition to stdout.
    #[arg(long, value_name = "DIR", env = "FLOWIDX_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ConfigCommand {
    /// Path to a TOML config file.
    #[arg(long, value_name = "FILE", env = "FLOWIDX_CONFIG")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    let code = match cli.command {
        Commands::Node(command) => run_node(command),
        Commands::Config(command) => print_config(command),
    };
    std::process::exit(code);
}

fn run_node(command: NodeCommand) -> i32 {
    let _guard = match &command.log_dir {
        Some(dir) => Some(flowidx_tracing::init_with_file(
            "info,flowidx=debug",
            dir,
            "flowidx.log",
        )),
        None => {
            flowidx_tracing::init("info,flowidx=debug");
            None
        }
    };

    let config = match Config::load(command.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            return flowidx_node::EXIT_FATAL_INIT;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to build runtime");
            return flowidx_node::EXIT_FATAL_INIT;
        }
    };

    runtime.block_on(async {
        let cancel = CancellationToken::new();
        tokio::spawn(shutdown_signal(cancel.clone()));
        match flowidx_node::launch(config, cancel).await {
            Ok(()) => {
                info!("shutdown complete");
                EXIT_OK
            }
            Err(err) => {
                error!(%err, "indexer failed");
                err.exit_code()
            }
        }
    })
}

fn print_config(command: ConfigCommand) -> i32 {
    match Config::load(command.config.as_deref()) {
        Ok(config) => match toml::to_string_pretty(&config) {
            Ok(rendered) => {
                println!("{rendered}");
                EXIT_OK
            }
            Err(err) => {
                eprintln!("failed to render config: {err}");
                flowidx_node::EXIT_FATAL_INIT
            }
        },
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            flowidx_node::EXIT_FATAL_INIT
        }
    }
}

/// Cancels the root token on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received ctrl-c");
    }
    cancel.cancel();
}
