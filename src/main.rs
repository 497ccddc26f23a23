//! `otel-fetch [URL]`: fetch one URL under a root span and print the body.

use clap::Parser;
use otel_fetch::cli::Cli;
use otel_fetch::{Error, TelemetryBuilder, TelemetryGuard};

const CONFIG_FILE: &str = "otel-fetch.toml";
const ENV_PREFIX: &str = "OTEL_FETCH_";

fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    let config = TelemetryBuilder::new()
        .with_file(CONFIG_FILE)
        .with_env(ENV_PREFIX)
        .with_standard_env()
        .extract_config()?;

    // Installed outside the runtime: the OTLP HTTP exporter uses a blocking client.
    let guard = TelemetryGuard::install(&config)?;

    cli.execute(&config, guard)
}
