use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orbitr_server::{operator_console, AppState, HttpServer, OrbitrConfig};
use orbitr_state::RulesEngine;

#[derive(Parser, Debug)]
#[command(name = "orbitr", version, about = "Multi-agent SDLC compliance monitoring server")]
struct Cli {
    /// Config file (defaults to <config_dir>/orbitr/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API and background workers.
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        database: Option<PathBuf>,
        /// Start the workflow simulator immediately.
        #[arg(long)]
        simulate: bool,
    },
    /// Open the operator console against a running server.
    Console {
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,
    },
    /// Compliance rules tooling.
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// Validate a YAML/JSON rules file and list what it defines.
    Check { file: PathBuf },
}

fn init_tracing(default_filter: &str, writer: BoxMakeWriter) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Serve { bind: None, database: None, simulate: false });

    match command {
        Command::Serve { bind, database, simulate } => {
            init_tracing("info", BoxMakeWriter::new(std::io::stdout));
            let mut config = OrbitrConfig::load(cli.config.as_deref())?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(database) = database {
                config.database = database;
            }
            tracing::info!(bind = %config.bind, database = %config.database.display(), "Starting Orbitr");

            let bind_addr = config.bind.clone();
            let app = AppState::new(config)?;
            if simulate {
                orbitr_server::simulation::start(&app)?;
            }
            HttpServer::new(bind_addr, app).run().await
        }
        Command::Console { url } => {
            // The TUI owns the terminal.
            init_tracing("warn", BoxMakeWriter::new(std::io::sink));
            operator_console::run_operator_console(url).await
        }
        Command::Rules { action: RulesCommand::Check { file } } => {
            init_tracing("warn", BoxMakeWriter::new(std::io::stderr));
            let mut rules = RulesEngine::empty();
            let count = rules.load_file(&file)?;
            println!("{}: {count} rules, fingerprint {}", file.display(), rules.fingerprint().unwrap_or("-"));
            for rule in rules.all_rules() {
                println!(
                    "  {:<8} {:<9} {:<8} {}",
                    rule.id,
                    rule.severity.as_str(),
                    if rule.enabled { "enabled" } else { "disabled" },
                    rule.name
                );
            }
            Ok(())
        }
    }
}
