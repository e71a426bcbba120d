use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordination::debate::{Panel, RunOutcome};
use tracing::info;

use debate_agents::driver::{self, Driver, RunMode};
use debate_agents::{render, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "debate-agents", version, about = "Run and resume multi-agent debates")]
struct Cli {
    /// TOML file overriding the DEBATE_* environment defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new debate.
    Run {
        #[arg(long)]
        prompt: String,
        /// Built-in panel: council or grid.
        #[arg(long, default_value = "council")]
        panel: String,
        #[arg(long)]
        rounds: Option<u32>,
    },
    /// Continue a paused debate.
    Resume { id: String },
    /// Add a user message to a session.
    Say { id: String, text: String },
    /// Synthesize the decision for a session.
    Decide { id: String },
    /// Print a session's transcript and decision.
    Show { id: String },
    /// List stored sessions, newest first.
    List,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = AppConfig::load(cli.config.as_deref())?;
    info!(
        mock = config.mock,
        sessions = %config.sessions_dir.display(),
        "debate driver starting"
    );
    let driver = Driver::from_config(config)?;

    match cli.command {
        Command::Run {
            prompt,
            panel,
            rounds,
        } => {
            let mut panel = Panel::builtin(&panel)
                .with_context(|| format!("Unknown panel '{}' (expected council or grid)", panel))?;
            if let Some(rounds) = rounds {
                panel = panel.with_total_rounds(rounds)?;
            }
            let scheduler = driver.new_session(panel, &prompt)?;
            println!("session {}", scheduler.id());
            run_live(&driver, &scheduler, RunMode::Fresh).await?;
        }
        Command::Resume { id } => {
            let scheduler = driver.open(&id).await?;
            run_live(&driver, &scheduler, RunMode::Resume).await?;
        }
        Command::Say { id, text } => {
            driver.say(&id, &text).await?;
            println!("added to {}", id);
        }
        Command::Decide { id } => {
            let synthesis = driver.decide(&id).await?;
            println!("{}", render::render_decision(&synthesis.decision));
        }
        Command::Show { id } => {
            let (envelope, _) = driver
                .store()
                .load(&id)
                .await
                .with_context(|| format!("Failed to load session {}", id))?;
            print!("{}", render::render_session(&envelope));
        }
        Command::List => {
            let sessions = driver.store().list().await.context("Failed to list sessions")?;
            if sessions.is_empty() {
                println!("no sessions in {}", driver.config().sessions_dir.display());
            }
            for summary in &sessions {
                println!("{}", render::render_summary(summary));
            }
        }
    }

    Ok(())
}

async fn run_live(
    driver: &Driver,
    scheduler: &coordination::debate::DebateScheduler,
    mode: RunMode,
) -> Result<()> {
    let printer = render::spawn_live_printer(scheduler);
    let outcome = driver.run(scheduler, mode, driver::ctrl_c()).await;
    printer.abort();
    match outcome? {
        RunOutcome::Completed => println!(
            "\ndebate complete; run `debate-agents decide {}` for the decision",
            scheduler.id()
        ),
        RunOutcome::Cancelled => println!(
            "\ndebate paused; run `debate-agents resume {}` to continue",
            scheduler.id()
        ),
    }
    Ok(())
}
