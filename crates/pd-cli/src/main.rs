mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// pingdom CLI -- trigger collection runs and read traffic reports.
#[derive(Debug, Parser)]
#[command(name = "pd", version, about)]
struct Cli {
    /// Base URL of the pingdom daemon.
    #[arg(long, global = true, default_value = "http://127.0.0.1:5000")]
    api_url: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show daemon status (default when no subcommand is given).
    Status,

    /// Collect and print a traffic report.
    Report {
        #[command(subcommand)]
        window: ReportWindow,
    },

    /// Inspect or replace report schedules.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Debug, Subcommand)]
enum ReportWindow {
    /// Collect yesterday and report on it.
    #[command(name = "last-24h")]
    Last24h,
    /// Collect the seven days before today and report on them.
    #[command(name = "last-7d")]
    Last7d,
    /// Report on already-stored days without collecting.
    Range {
        /// First day, YYYY-MM-DD.
        #[arg(long)]
        start: String,
        /// Day after the last one, YYYY-MM-DD.
        #[arg(long)]
        end: String,
    },
}

#[derive(Debug, Subcommand)]
enum ScheduleAction {
    /// Print the stored schedules.
    Show,
    /// Replace schedules from a JSON payload file.
    Set {
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let api_url = cli.api_url.trim_end_matches('/');

    match cli.command {
        None | Some(Commands::Status) => commands::status::run(api_url).await?,
        Some(Commands::Report { window }) => match window {
            ReportWindow::Last24h => commands::report::collect(api_url, "last-24h").await?,
            ReportWindow::Last7d => commands::report::collect(api_url, "last-7d").await?,
            ReportWindow::Range { start, end } => {
                commands::report::stored(api_url, &start, &end).await?
            }
        },
        Some(Commands::Schedule { action }) => match action {
            ScheduleAction::Show => commands::schedule::show(api_url).await?,
            ScheduleAction::Set { file } => commands::schedule::set(api_url, &file).await?,
        },
    }

    Ok(())
}
