mod commands;
mod serve;
mod settings;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::commands::admin::{self, Task};
use crate::commands::validate::cmd_validate;
use crate::settings::Settings;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// QCAT questionnaire administration.
#[derive(Parser)]
#[command(name = "qcat", version, about = "QCAT questionnaire administration")]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true, env = "QCAT_CONFIG")]
    config: Option<PathBuf>,

    /// Search backend URL; `memory` uses an in-process index
    #[arg(long, global = true, env = "QCAT_ES_URL")]
    es_url: Option<String>,

    /// Prefix of every index and alias
    #[arg(long, global = true, env = "QCAT_INDEX_PREFIX")]
    index_prefix: Option<String>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the search index of one configuration, or of all of them
    Reindex {
        /// Configuration code
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        code: Option<String>,
        /// Rebuild every configuration with an active edition
        #[arg(long)]
        all: bool,
    },

    /// Delete every index under the configured prefix
    DeleteIndices,

    /// Re-read one configuration edition from the configurations directory
    ReloadConfiguration {
        code: String,
        edition: String,
    },

    /// Drain the notification queue
    SendNotifications {
        /// Maximum number of notifications to send (0 sends all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },

    /// Validate a configuration document against the schema and the registry
    ValidateConfiguration {
        /// Path to the configuration JSON file
        file: PathBuf,
    },

    /// Validate every stored payload against its configuration
    CheckData,

    /// Clear expired edit locks
    CleanLocks,

    /// Replay failed index writes and repair aliases that drifted from the store
    RetryIndex,

    /// Delete uploaded files no document refers to
    CollectBlobs,

    /// Start the HTTP JSON API
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8000")]
        port: u16,
        /// TLS certificate file (PEM format), requires the `tls` feature
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        /// TLS private key file (PEM format), requires the `tls` feature
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json, cli.quiet);

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s.with_overrides(cli.es_url.clone(), cli.index_prefix.clone()),
        Err(msg) => {
            report_error(&msg, cli.output, cli.quiet);
            process::exit(1);
        }
    };

    let task = match cli.command {
        Commands::ValidateConfiguration { file } => {
            cmd_validate(&file, &settings, cli.output, cli.quiet);
            return;
        }
        Commands::Serve {
            port,
            tls_cert,
            tls_key,
        } => {
            let result = runtime(cli.output, cli.quiet)
                .block_on(serve::start_server(&settings, port, tls_cert, tls_key));
            if let Err(e) = result {
                report_error(&format!("server error: {}", e), cli.output, cli.quiet);
                process::exit(1);
            }
            return;
        }
        Commands::Reindex { code, all } => Task::Reindex {
            code: if all { None } else { code },
        },
        Commands::DeleteIndices => Task::DeleteIndices,
        Commands::ReloadConfiguration { code, edition } => Task::ReloadConfiguration { code, edition },
        Commands::SendNotifications { limit } => Task::SendNotifications { limit },
        Commands::CheckData => Task::CheckData,
        Commands::CleanLocks => Task::CleanLocks,
        Commands::RetryIndex => Task::RetryIndex,
        Commands::CollectBlobs => Task::CollectBlobs,
    };

    match runtime(cli.output, cli.quiet).block_on(admin::run(task, &settings)) {
        Ok(outcome) => {
            if !cli.quiet {
                match cli.output {
                    OutputFormat::Text => {
                        if !outcome.text.is_empty() {
                            println!("{}", outcome.text);
                        }
                    }
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::to_string_pretty(&outcome.json).unwrap_or_default()
                    ),
                }
            }
            if outcome.failed {
                process::exit(1);
            }
        }
        Err(msg) => {
            report_error(&msg, cli.output, cli.quiet);
            process::exit(1);
        }
    }
}

fn runtime(output: OutputFormat, quiet: bool) -> tokio::runtime::Runtime {
    match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("error starting runtime: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

/// Logs go to stderr so that command output on stdout stays parseable.
fn init_tracing(json: bool, quiet: bool) {
    let default = if quiet { "qcat=warn" } else { "qcat=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
