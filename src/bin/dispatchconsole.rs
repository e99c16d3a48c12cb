use anyhow::Result;
use clap::{Parser, Subcommand};
use dispatchconsole::{app::AppStateBuilder, config::Config, version};
use dotenv::dotenv;
use std::fs::OpenOptions;
use tokio::select;
use tracing::{info, level_filters::LevelFilter};

#[derive(Parser, Debug)]
#[command(
    author,
    version = version::get_short_version(),
    about = "Dispatcher console ring-plan webhooks",
    long_about = version::get_version_info()
)]
struct Cli {
    #[clap(
        long,
        global = true,
        help = "Path to the configuration file (TOML format)"
    )]
    conf: Option<String>,
    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration and exit without starting the server
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    let config = match cli.conf.as_deref() {
        Some(path) => {
            println!("Loading config from: {}", path);
            Config::load(path)?
        }
        None => Config::default(),
    };

    if matches!(cli.command, Some(Commands::CheckConfig)) {
        match config.validate() {
            Ok(()) => {
                println!("Configuration is valid.");
                return Ok(());
            }
            Err(issues) => {
                eprintln!("Configuration validation failed:");
                for issue in issues {
                    eprintln!("- {}: {}", issue.field, issue.message);
                }
                std::process::exit(1);
            }
        }
    }

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(Ok(level)) = config
        .log_level
        .as_ref()
        .map(|level| level.parse::<LevelFilter>())
    {
        log_fmt = log_fmt.with_max_level(level);
    }

    let mut _guard = None;
    if let Some(ref log_file) = config.log_file {
        let file = OpenOptions::new().create(true).append(true).open(log_file)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        _guard = Some(guard);
        log_fmt.with_ansi(false).with_writer(non_blocking).try_init().ok();
    } else {
        log_fmt.try_init().ok();
    }

    info!("{}", version::get_version_info().replace('\n', ", "));
    let state = AppStateBuilder::new().config(config).build()?;
    info!("Starting dispatchconsole on {}", state.config.http_addr);

    let token = state.token.clone();
    select! {
        result = dispatchconsole::app::run(state) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
            token.cancel();
        }
    }
    Ok(())
}
