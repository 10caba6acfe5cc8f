use catalog_scraper::{catalog, Pipeline, ScrapeConfig, ScrapeRequest, ScrapeResult};
use clap::Parser;
use futures::future::join_all;
use std::{path::PathBuf, process::ExitCode, time::Duration};
use tracing::{debug, error, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;

/// Scrape university and scholarship pages into JSON records.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Pages to scrape, one record per URL.
    #[arg(required = true)]
    urls: Vec<String>,

    /// Network deadline per page, in milliseconds.
    #[arg(long)]
    fetch_timeout_ms: Option<u64>,

    /// Overall deadline per page, in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    max_body_bytes: Option<usize>,

    #[arg(long)]
    max_redirects: Option<usize>,

    /// JSON rule table replacing the built-in one.
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Pretty-print each result.
    #[arg(long)]
    pretty: bool,
}

impl Args {
    fn config(&self) -> Result<ScrapeConfig, catalog_scraper::ConfigError> {
        let mut config = ScrapeConfig::from_env()?;
        if let Some(ms) = self.fetch_timeout_ms {
            config.fetch_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            config.pipeline_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = self.max_body_bytes {
            config.max_body_bytes = n;
        }
        if let Some(n) = self.max_redirects {
            config.max_redirects = n;
        }
        config.validate()?;
        Ok(config)
    }
}

async fn run(args: Args) -> Result<bool, Box<dyn std::error::Error>> {
    let config = args.config()?;
    debug!("Using {:?}", config);

    let rules = match &args.rules {
        Some(path) => catalog::rules_from_file(path)?,
        None => catalog::rules(),
    };
    let pipeline = Pipeline::with_rules(&config, rules)?;

    let requests: Vec<_> = args.urls.iter().map(ScrapeRequest::new).collect();
    let results = join_all(requests.iter().map(|r| pipeline.scrape(r))).await;

    let mut all_ok = true;
    for (request, result) in requests.iter().zip(&results) {
        if let ScrapeResult::Failure { kind, .. } = result {
            all_ok = false;
            warn!("{}: {}", request.url, kind.category().public_message());
        }
        let line = if args.pretty {
            serde_json::to_string_pretty(result)?
        } else {
            serde_json::to_string(result)?
        };
        println!("{}", line);
    }

    Ok(all_ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
                "info,html5ever=error,selectors=error,hyper=warn,reqwest=info".into()
            }),
        )
        .with(ErrorLayer::default())
        .init();

    match run(Args::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            error!("{}", err);
            ExitCode::from(2)
        }
    }
}
