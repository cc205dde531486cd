//! Interactive REPL.
//!
//! Every input line is sent as one transaction over a single session.

use crate::config::Config;
use colored::Colorize;
use irm_client::{connect, ImsStream, Worker};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config as EditorConfig, Editor};
use std::sync::Arc;

const HELP_TEXT: &str = r#"
Enter a transaction as '<trancode> <text>', for example:
  IVTNO DISPLAY LAST1

Meta commands:
  :help                         Show this help
  :stats                        Show session counters
  :quit, :exit                  Close the session and exit
"#;

enum Step {
    Continue,
    Quit,
}

pub async fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let template = Arc::new(config.template()?);
    let pool_config = config.pool_config();

    println!("{}", "IMS Connect injector".bold().cyan());
    println!("Connecting to {}...", pool_config.connection.address());
    let session = connect(&pool_config.connection).await?;
    let mut worker = Worker::new(0, template, session, pool_config.worker)?;
    println!(
        "{} (client id '{}')",
        "Connected!".green(),
        worker.client_id().trimmed()
    );

    let editor_config = EditorConfig::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(editor_config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".ims_injector_history"))
        .unwrap_or_else(|_| ".ims_injector_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type ':help' for available commands.\n");

    let mut broken = false;
    loop {
        let prompt = format!("{} ", "ims>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(meta) = line.strip_prefix(':') {
                    match meta_command(&worker, meta) {
                        Step::Continue => continue,
                        Step::Quit => break,
                    }
                }

                match worker.transact(line).await {
                    Ok(text) => println!("{}\n", text),
                    Err(e) if e.is_fatal() => {
                        println!("{}: {}", "Session lost".red(), e);
                        broken = true;
                        break;
                    }
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    if !broken {
        let _ = worker.close().await;
    }
    println!("{}", "Disconnected.".dimmed());
    Ok(())
}

fn meta_command(worker: &Worker<ImsStream>, command: &str) -> Step {
    match command.trim().to_lowercase().as_str() {
        "help" | "h" | "?" => {
            println!("{}", HELP_TEXT);
            Step::Continue
        }
        "stats" => {
            let stats = worker.stats();
            println!(
                "transactions={} responses={} business_errors={} rejected={} acks_sent={}\n",
                stats.transactions,
                stats.responses,
                stats.business_errors,
                stats.rejected,
                stats.acks_sent
            );
            Step::Continue
        }
        "quit" | "exit" | "q" => Step::Quit,
        other => {
            println!(
                "{}: unknown command ':{}'. Type ':help' for help.\n",
                "Error".red(),
                other
            );
            Step::Continue
        }
    }
}
