use anyhow::Context;
use certsteward::cache::DirCache;
use certsteward::cli::Cli;
use certsteward::config::Route53Config;
use certsteward::dns::route53::Route53Performer;
use certsteward::issuer::{accept_tos, AcmeIssuer};
use certsteward::{acme, server, CertificateManager};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

const ENV_FILTER_NAME: &str = "CERTSTEWARD_LOG";

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let filter = EnvFilter::try_from_env(ENV_FILTER_NAME)
        .unwrap_or_else(|_| EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run(cli).await {
        error!("{err:#}");
        std::process::exit(255);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let dns_config =
        Route53Config::load(&cli.configuration_path).context("reading configuration")?;

    // staging by default; users opt into production once everything works
    let directory = if cli.debug_mode {
        acme::LETS_ENCRYPT_STAGING
    } else {
        acme::LETS_ENCRYPT_PRODUCTION
    };
    let directory = Url::parse(directory).context("parsing ACME directory URL")?;

    let performer = Route53Performer::from_config(&dns_config);
    let issuer = AcmeIssuer::new(directory, cli.email, accept_tos, Box::new(performer));
    let manager = CertificateManager::builder()
        .cache(DirCache::new(&cli.cache_path))
        .known_hosts([cli.hostname.clone()])
        .issuer(Arc::new(issuer))
        .renew_before(cli.renew_before)
        .build()?;

    info!("starting certificate manager for {}", cli.hostname);
    // blocks until a valid certificate is in hand, so the TLS listener
    // below never serves a handshake it cannot complete
    manager.clone().start().await?;
    info!("certificate manager started, serving on {}", cli.hostport);

    server::serve(manager, &cli.hostport).await
}
