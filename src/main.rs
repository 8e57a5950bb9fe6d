#[macro_use]
extern crate tracing;

use clap::{
    Parser,
    ValueEnum,
};
use eyre::Result;
use futures::StreamExt as _;
use httpproxy_dns_source::{
    source::watch_endpoints,
    store::ReflectorSnapshot,
    Endpoint,
    HTTPProxySource,
    SourceConfig,
};
use std::{
    sync::Arc,
    time::Duration,
};

#[derive(Parser)]
#[command(version, about)]
enum Args {
    /// Print the endpoints generated from the current HTTPProxies once.
    Endpoints(ArgsEndpoints),
    /// Keep watching HTTPProxies and print the endpoints whenever they change.
    Watch(ArgsWatch),
}

#[derive(Parser)]
struct ArgsEndpoints {
    #[command(flatten)]
    source: SourceConfig,

    #[clap(long, value_enum, default_value_t = Output::Yaml)]
    output: Output,
}

#[derive(Parser)]
struct ArgsWatch {
    #[command(flatten)]
    source: SourceConfig,

    #[clap(long, value_enum, default_value_t = Output::Yaml)]
    output: Output,

    #[clap(
        long,
        env = "EXTERNAL_DNS_INTERVAL",
        help = "How often to regenerate endpoints",
        default_value = "1m",
        value_parser = humantime::parse_duration
    )]
    interval: Duration,
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    Yaml,
    Json,
}

impl Output {
    fn print(self, endpoints: &[Endpoint]) -> Result<()> {
        match self {
            Output::Yaml => print!("{}", serde_yaml::to_string(endpoints)?),
            Output::Json => println!("{}", serde_json::to_string_pretty(endpoints)?),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().expect("color_eyre init");
    tracing_subscriber::fmt::init();

    match Args::parse() {
        Args::Endpoints(ArgsEndpoints { source, output }) => {
            let source = start_source(&source).await?;
            let endpoints = source.endpoints().await?;
            info!("Generated {} endpoints", endpoints.len());
            output.print(&endpoints)?;
        }
        Args::Watch(ArgsWatch {
            source,
            output,
            interval,
        }) => {
            let source = Arc::new(start_source(&source).await?);
            info!("Watching HTTPProxies, regenerating endpoints every {}", humantime::format_duration(interval));

            let mut updates = Box::pin(watch_endpoints(source, interval));
            while let Some(update) = updates.next().await {
                match update {
                    Ok(endpoints) => output.print(&endpoints)?,
                    // a broken template stays broken, no point in retrying
                    Err(err) => return Err(err.into()),
                }
            }
        }
    }

    Ok(())
}

async fn start_source(config: &SourceConfig) -> Result<HTTPProxySource<ReflectorSnapshot, kube::Client>> {
    let client = kube::Client::try_default().await?;

    let (snapshot, driver) = ReflectorSnapshot::watch(client.clone(), config.namespace());
    tokio::spawn(driver);

    info!("Waiting for HTTPProxy cache to sync");
    let source = HTTPProxySource::new(config, snapshot, client).await?;

    Ok(source)
}
