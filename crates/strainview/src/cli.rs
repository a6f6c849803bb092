//! Exposes the command line application.
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;

use strainview_service::archive::ArchiveService;
use strainview_service::config::Config;
use strainview_service::coordinator::FetchCoordinator;
use strainview_service::metrics;
use strainview_service::session::Session;
use strainview_service::types::StrainRequest;
use strainview_sources::{IntervalLength, SampleRate, Site};

use crate::endpoints::ResolveResponse;
use crate::logging;
use crate::server;

/// Strainview commands.
#[derive(Subcommand)]
enum Command {
    /// Run the web server.
    Run,

    /// Resolve a single window of strain data and print it as JSON.
    Resolve(ResolveArgs),

    /// Check the health of a running server.
    Healthcheck(HealthcheckArgs),
}

#[derive(Args)]
struct ResolveArgs {
    /// The interferometer, one of H1, L1 or V1.
    #[arg(long)]
    site: Site,

    /// The sample rate in Hz.
    #[arg(long, default_value = "4096")]
    rate: SampleRate,

    /// GPS time of the center of the window.
    #[arg(long)]
    center: f64,

    /// Length of the window in seconds, rounded to the nearest power of two in 1/8..=64.
    #[arg(long, default_value_t = 4.0)]
    interval: f64,

    /// Zoom steps applied to the interval, positive values widen the window.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    zoom: i32,

    /// Also print the samples.
    #[arg(long)]
    samples: bool,
}

impl ResolveArgs {
    /// The requested window length, snapped to the ladder and zoomed.
    fn interval(&self) -> IntervalLength {
        IntervalLength::nearest_step(self.interval).zoomed(self.zoom)
    }
}

#[derive(Args)]
struct HealthcheckArgs {
    /// Address of the server, defaults to the configured bind address.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Timeout in seconds.
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

/// Command line interface parser.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        session_mode: sentry::SessionMode::Request,
        auto_session_tracking: false,
        ..Default::default()
    });

    // SAFETY: No other threads have been spawned yet.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags: BTreeMap<_, _> = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone() {
            if let Some(name) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(tag, name);
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Resolve(args) => resolve(config, args).context("failed to resolve request")?,
        Command::Healthcheck(args) => healthcheck(config, args)?,
    }

    Ok(())
}

/// Resolves one request, reporting progress on stderr.
fn resolve(config: Config, args: ResolveArgs) -> Result<()> {
    let interval = args.interval().as_secs();
    let request = StrainRequest::new(args.site, args.rate, args.center, interval)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("strainview-cli")
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let archive = ArchiveService::from_config(&config)?;
        let coordinator = FetchCoordinator::new(archive, &config.caches)?;
        let mut session = Session::new(coordinator);

        let (sender, mut receiver) = mpsc::unbounded_channel();
        session.set_progress(Some(sender));
        let printer = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = receiver.recv().await {
                eprintln!("{event}");
                events.push(event);
            }
            events
        });

        let result = session.submit(request).await;
        let id = session.id();
        // Closes the progress channel.
        drop(session);
        let progress = printer.await?;

        let response = ResolveResponse::new(id, result?, progress, args.samples);
        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(())
    })
}

fn healthcheck(config: Config, args: HealthcheckArgs) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(args.timeout))
        .build()?;

    let addr = match args.addr {
        Some(addr) => addr,
        None => config.bind.parse()?,
    };

    let url = format!("http://{addr}/healthcheck");
    tracing::debug!("Sending request to: {url}");

    match client.get(url).send() {
        Ok(response) if response.status().is_success() => {
            println!("OK");
            Ok(())
        }
        Ok(response) => {
            println!("ERROR");
            Err(anyhow::anyhow!(
                "Strainview ({addr}) is unhealthy. Status: {}",
                response.status()
            ))
        }
        Err(error) => {
            println!("ERROR");
            Err(anyhow::anyhow!(
                "Failed to check Strainview ({addr}) health: {error}"
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_args(extra: &[&str]) -> ResolveArgs {
        let base = ["strainview", "resolve", "--site", "H1", "--center", "1187008882.4"];
        let cli = Cli::try_parse_from(base.iter().chain(extra)).unwrap();
        let Command::Resolve(args) = cli.command else {
            panic!("expected the resolve command");
        };
        args
    }

    #[test]
    fn test_resolve_interval() {
        assert_eq!(resolve_args(&[]).interval().as_secs(), 4.0);
        assert_eq!(resolve_args(&["--interval", "3"]).interval().as_secs(), 4.0);
        assert_eq!(resolve_args(&["--zoom", "-2"]).interval().as_secs(), 1.0);
        assert_eq!(resolve_args(&["--interval", "32", "--zoom", "3"]).interval().as_secs(), 64.0);
    }
}
