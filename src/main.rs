//! ims-injector - IMS Connect transaction injector
//!
//! Sends transactions to IMS Connect over one or more sessions, from a
//! request file, the command line or an interactive REPL.

mod commands;
mod config;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::OutputFormat;
use config::{Config, CONFIG_ENV};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ims-injector")]
#[command(about = "Transaction injector for IMS Connect")]
#[command(version)]
struct Cli {
    /// YAML config file
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// IMS Connect host
    #[arg(long)]
    host: Option<String>,

    /// IMS Connect port
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of concurrent sessions
    #[arg(short = 'n', long)]
    sessions: Option<usize>,

    /// IMS datastore name
    #[arg(short, long)]
    datastore: Option<String>,

    /// Client id (workers past the first append their number)
    #[arg(long)]
    client_id: Option<String>,

    // ===== TLS Options =====
    /// Enable TLS connection
    #[arg(long)]
    tls: bool,

    /// Path to CA certificate for server verification
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Skip server certificate verification (INSECURE)
    #[arg(long, short = 'k')]
    insecure: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start interactive REPL
    Repl,

    /// Send every request in a file ('-' for stdin) over the session pool
    Run {
        /// Request file, one '<trancode> <text>' per line
        file: PathBuf,

        /// Number of passes over the file
        #[arg(short, long, default_value = "1")]
        repeat: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Plain)]
        output: OutputFormat,
    },

    /// Send one transaction and print the response
    Send {
        /// Transaction code followed by the message text
        #[arg(required = true, trailing_var_arg = true)]
        request: Vec<String>,
    },

    /// Print the header template, optionally for a transaction code
    Header {
        #[arg(short, long)]
        trancode: Option<String>,
    },
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(ref host) = self.host {
            config.connection.host = host.clone();
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(sessions) = self.sessions {
            config.pool.sessions = sessions;
        }
        if let Some(ref datastore) = self.datastore {
            config.header.datastore = datastore.clone();
        }
        if let Some(ref client_id) = self.client_id {
            config.header.client_id = client_id.clone();
        }
        if self.tls || self.ca_cert.is_some() || self.insecure {
            config.connection.tls.enabled = true;
        }
        if let Some(ref path) = self.ca_cert {
            config.connection.tls.ca_cert_path = Some(path.clone());
        }
        if self.insecure {
            config.connection.tls.insecure = true;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => fail(e),
    };
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    if let Err(e) = config.validate() {
        fail(e);
    }
    if let Some(ref path) = cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }
    tracing::info!(
        "Target {}:{} ({} session(s), TLS {})",
        config.connection.host,
        config.connection.port,
        config.pool.sessions,
        if config.connection.tls.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );

    match cli.command {
        Some(Commands::Repl) | None => {
            if let Err(e) = repl::run(&config).await {
                fail(e);
            }
        }
        Some(Commands::Run {
            file,
            repeat,
            output,
        }) => {
            let requests = match commands::load_requests(&file) {
                Ok(r) => r,
                Err(e) => fail(format!("cannot read '{}': {}", file.display(), e)),
            };
            if requests.is_empty() {
                fail(format!("no requests in '{}'", file.display()));
            }

            let mut stdout = std::io::stdout().lock();
            match commands::run_batch(&config, requests, repeat, output, &mut stdout).await {
                Ok(summary) => {
                    eprintln!("{}", summary);
                    if !summary.is_success() {
                        std::process::exit(1);
                    }
                }
                Err(e) => fail(e),
            }
        }
        Some(Commands::Send { request }) => {
            let line = request.join(" ");
            match commands::send_one(&config, &line).await {
                Ok(text) => println!("{}", text),
                Err(e) => fail(e),
            }
        }
        Some(Commands::Header { trancode }) => {
            let template = match config.template() {
                Ok(t) => t,
                Err(e) => fail(e),
            };
            match commands::describe_header(&template, trancode.as_deref()) {
                Ok(text) => print!("{}", text),
                Err(e) => fail(e),
            }
        }
    }
}

fn fail(error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", "Error".red(), error);
    std::process::exit(1);
}
