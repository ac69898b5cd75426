//! ganymede: directory client CLI.
//!
//! Logs in to a Ganymede directory server over WebSocket, browses object
//! types and their objects, shows object details, moves files in both
//! directions and prints messages pushed by the server.

mod commands;
mod config;
mod console;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{debug, error};

use crate::commands::LoginFailed;
use crate::config::Config;

/// ganymede: directory client
#[derive(Parser)]
#[command(name = "ganymede", version, about = "Ganymede directory client")]
struct Cli {
    /// Server URL (ws:// or wss://)
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Username to log in as
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the object types visible to this account
    Types,

    /// List the objects of one type
    List {
        /// Type label as shown by `types`
        type_label: String,
        /// Include objects this account cannot edit
        #[arg(short, long)]
        all: bool,
    },

    /// Show one object's fields
    View {
        /// Object id in type:num form
        invid: String,
    },

    /// Upload a local file to the server
    Upload {
        /// File to send
        path: PathBuf,
        /// Name announced to the server (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Have the server send a file and save it locally
    Download {
        /// File name on the server
        name: String,
        /// Where to write it (defaults to the file name in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Stay logged in and print server messages
    Watch {
        /// Stop after this many seconds
        #[arg(long = "for")]
        seconds: Option<u64>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("ganymede=debug,ganymede_cli=debug,ganymede_client=debug")
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("ganymede=warn,ganymede_cli=warn,ganymede_client=warn")
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let result = match Config::load(&config_path) {
        Ok(cfg) => run(cli, cfg).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        if e.downcast_ref::<LoginFailed>().is_some() {
            // The console notifier already told the user why.
            debug!("{:#}", e);
        } else {
            error!("{:#}", e);
            eprintln!("ganymede: {e:#}");
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli, cfg: Config) -> anyhow::Result<()> {
    let cfg = cfg.with_overrides(cli.server.as_deref(), cli.user.as_deref());
    let conn = &cfg.connection;

    match cli.command {
        Command::Types => commands::types::run(conn, cli.json).await,
        Command::List { type_label, all } => {
            commands::list::run(conn, &type_label, all, cli.json).await
        }
        Command::View { invid } => commands::view::run(conn, &invid, cli.json).await,
        Command::Upload { path, name } => {
            commands::upload::run(conn, &path, name.as_deref()).await
        }
        Command::Download { name, output } => {
            commands::download::run(conn, &name, output.as_deref()).await
        }
        Command::Watch { seconds } => commands::watch::run(conn, seconds).await,
        Command::Config => commands::show_config::run(&cfg, cli.json),
    }
}
