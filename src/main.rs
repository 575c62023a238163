//! CLI entry point for skillshelf.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use skillshelf::cli::{Args, Command};
use skillshelf::{Config, JobController, ProcessExit, RotatingJar, Topic};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() {
    std::process::exit(run().await.code());
}

async fn run() -> ProcessExit {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("skillshelf starting");

    match run_command(args).await {
        Ok(exit) => exit,
        Err(error) => {
            // Job errors carry their own exit mapping; everything else is
            // a configuration or input problem.
            match error.downcast_ref::<skillshelf::JobError>() {
                Some(job_error) => {
                    eprintln!("{job_error}");
                    job_error.exit()
                }
                None => {
                    eprintln!("{error:#}");
                    ProcessExit::ConfigError
                }
            }
        }
    }
}

async fn run_command(args: Args) -> Result<ProcessExit> {
    let config = load_config(args.config.as_deref(), &args)?;
    let jar = load_jar(args.cookies.as_deref())?;
    let mut controller =
        JobController::new(config, jar, args.cookies.clone()).map_err(anyhow::Error::from)?;

    install_interrupt_handler(&controller);

    let exit = match args.command {
        Command::Discover { skills_file } => {
            let topics = load_topics(&skills_file)?;
            info!(topics = topics.len(), "discover: starting");
            controller.run_discovery(topics).await?
        }
        Command::Download { .. } => controller.run_download().await?,
    };
    Ok(exit)
}

fn load_config(path: Option<&std::path::Path>, args: &Args) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Command::Download { force } = &args.command
        && *force
    {
        config.force_redownload = true;
    }
    Ok(config)
}

fn load_jar(path: Option<&std::path::Path>) -> Result<Arc<RotatingJar>> {
    match path {
        Some(path) => {
            let jar = RotatingJar::from_file(path)
                .with_context(|| format!("loading cookies from {}", path.display()))?;
            info!(cookies = jar.len(), "loaded cookie jar");
            Ok(Arc::new(jar))
        }
        None => {
            warn!("no cookie file given; only unauthenticated endpoints will work");
            Ok(Arc::new(RotatingJar::new()))
        }
    }
}

fn load_topics(path: &PathBuf) -> Result<Vec<Topic>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("reading skills file {}", path.display()))?;
    let topics: Vec<Topic> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parsing skills file {}", path.display()))?;
    Ok(topics)
}

fn install_interrupt_handler(controller: &JobController) {
    let flag = controller.interrupt_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("SIGINT received; finishing the current request before pausing");
            flag.store(true, Ordering::SeqCst);
        }
    });
}
