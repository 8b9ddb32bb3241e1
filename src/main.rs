use clap::{ArgAction, Parser};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use fingerwatch::comparator::Notifier;
use fingerwatch::config::{load_env_file, CliOverrides, Config, Settings};
use fingerwatch::live::LiveFetcher;
use fingerwatch::notifier::{EmailNotifier, LogOnlyNotifier, MailCredentials};
use fingerwatch::output::render;
use fingerwatch::probe::DnsProber;
use fingerwatch::reference::ReferenceFetcher;
use fingerwatch::scheduler::Scheduler;
use fingerwatch::{CheckReport, Comparator, Outcome};

mod metrics;

const DEFAULT_CONFIG_FILE: &str = "fingerwatch.toml";

#[derive(Parser, Debug)]
#[command(name = "fingerwatch", version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to ./fingerwatch.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Hostname whose certificate is monitored
    #[arg(long)]
    host: Option<String>,

    /// TLS port of the monitored host
    #[arg(short, long)]
    port: Option<u16>,

    /// URL serving the expected fingerprint
    #[arg(long)]
    reference_url: Option<String>,

    /// Cron expression for the check cadence
    #[arg(long)]
    schedule: Option<String>,

    /// Certificate digest: sha1 or sha256
    #[arg(long)]
    digest: Option<String>,

    /// Report format: text, json or summary
    #[arg(short, long)]
    output: Option<String>,

    /// Retries per invocation after the first failure
    #[arg(long)]
    max_retries: Option<u32>,

    /// Log mismatches instead of emailing them
    #[arg(long)]
    no_mail: bool,

    /// Push results to a Prometheus Push Gateway
    #[arg(long)]
    prometheus: bool,

    /// Prometheus Push Gateway address
    #[arg(long)]
    prometheus_address: Option<String>,

    /// Run a single check, print the report and exit
    #[arg(long)]
    once: bool,

    /// Run a check at startup before waiting for the first tick
    #[arg(long)]
    run_now: bool,

    /// Print an example configuration file and exit
    #[arg(long)]
    init_config: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<Settings, Box<dyn Error>> {
    let file_config = match &args.config {
        Some(path) => Some(Config::from_file(path)?),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Some(Config::from_file(DEFAULT_CONFIG_FILE)?)
        }
        None => None,
    };

    let cli_config = Config::from_cli_args(CliOverrides {
        hostname: args.host.clone(),
        port: args.port,
        reference_url: args.reference_url.clone(),
        schedule: args.schedule.clone(),
        digest: args.digest.clone(),
        output: args.output.clone(),
        max_retries: args.max_retries,
        no_mail: args.no_mail,
        prometheus: if args.prometheus { Some(true) } else { None },
        prometheus_address: args.prometheus_address.clone(),
    });

    let mut config = Config::defaults();
    if let Some(file_config) = file_config {
        config = config.merge_with(file_config);
    }
    Ok(config.merge_with(cli_config).validate()?)
}

fn build_comparator(settings: &Settings) -> Result<Comparator, Box<dyn Error>> {
    let notifier: Box<dyn Notifier> = match &settings.mail {
        Some(mail) => {
            let credentials = MailCredentials::from_env()?;
            Box::new(EmailNotifier::new(mail.clone(), credentials))
        }
        None => Box::new(LogOnlyNotifier),
    };

    Ok(Comparator::new(
        settings.target.clone(),
        Box::new(DnsProber::new(settings.dns_timeout)),
        Box::new(ReferenceFetcher::new(settings.reference_timeout)?),
        Box::new(LiveFetcher::new(settings.handshake_timeout, settings.digest)),
        notifier,
        settings.retry,
    ))
}

fn publish(report: &CheckReport, settings: &Settings) {
    if let Some(address) = &settings.prometheus {
        metrics::prom::prometheus_metrics(report, address);
    }
}

fn main() {
    let args = Args::parse();

    if args.init_config {
        println!("{}", Config::example_toml());
        exit(0);
    }

    init_logging(args.verbose);
    load_env_file(None);

    let settings = match load_config(&args) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("{}", e);
            exit(2);
        }
    };

    let comparator = match build_comparator(&settings) {
        Ok(comparator) => comparator,
        Err(e) => {
            tracing::error!("{}", e);
            exit(2);
        }
    };

    let scheduler = Scheduler::new(settings.schedule.clone(), comparator);

    if args.once {
        let report = scheduler.run_tick();
        println!("{}", render(&report, settings.output));
        publish(&report, &settings);
        exit(match report.outcome {
            Outcome::Matched => 0,
            Outcome::Mismatched => 1,
            Outcome::Failed => 2,
        });
    }

    tracing::info!(
        "Checking {} against {} with retry policy {} x {:?}",
        settings.target.address(),
        settings.target.reference_url,
        settings.retry.max_retries,
        settings.retry.delay
    );
    if settings.retry.delay > Duration::from_secs(60) {
        tracing::warn!("Retry delay is longer than a minute; invocations may skip ticks");
    }

    scheduler.run(args.run_now, |report| {
        tracing::info!(
            "Check finished: {} after {} attempt(s)",
            report.outcome,
            report.attempts.len()
        );
        tracing::debug!("{}", render(report, settings.output));
        publish(report, &settings);
    });
}
