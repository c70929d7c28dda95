use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use wallsvc_cli::WallsvcCliApp;
use wallsvc_core::ServiceConfig;

#[derive(Parser)]
#[command(name = "wallsvc")]
#[command(about = "Set the wallpaper directly or through the foreground wallpaper service")]
#[command(version)]
struct Cli {
    /// Decode and log instead of changing the wallpaper
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode an image and set it on the calling thread
    Apply { file: PathBuf },

    /// Set each file in turn on the background worker
    Set {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Run the wallpaper service headlessly and print its notifications
    Service {
        file: PathBuf,

        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        #[arg(long, default_value_t = 3000)]
        success_grace_ms: u64,

        #[arg(long, default_value_t = 2500)]
        failure_grace_ms: u64,

        /// Platform level reported to the launcher
        #[arg(long, default_value_t = 34)]
        api_level: u32,

        /// Print the notification report as JSON
        #[arg(long)]
        json: bool,
    },
}

async fn run(cli: Cli) -> Result<bool> {
    let app = WallsvcCliApp::new(cli.dry_run);

    match cli.command {
        Command::Apply { file } => {
            app.apply_file(&file)?;
            Ok(true)
        }
        Command::Set { files } => {
            let succeeded = app.set_files(&files).await?;
            println!("{}/{} wallpapers set", succeeded, files.len());
            Ok(succeeded == files.len())
        }
        Command::Service {
            file,
            timeout_secs,
            success_grace_ms,
            failure_grace_ms,
            api_level,
            json,
        } => {
            let config = ServiceConfig::default()
                .with_timeout(Duration::from_secs(timeout_secs))
                .with_grace_periods(
                    Duration::from_millis(success_grace_ms),
                    Duration::from_millis(failure_grace_ms),
                );
            let report = app.run_service(&file, config, api_level).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.accepted {
                for entry in &report.notifications {
                    println!("{:>6} ms  {}", entry.at_ms, serde_json::to_string(&entry.event)?);
                }
                println!("Service stopped after {} ms", report.elapsed_ms);
            } else {
                println!("Wallpaper service did not accept the request");
            }
            Ok(report.accepted)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
