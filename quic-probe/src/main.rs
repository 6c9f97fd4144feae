// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quic_probe::{tls::stub::StubEngine, Connection, Scenario, Trace};
use std::net::SocketAddr;
use structopt::StructOpt;
use url::Url;

#[derive(Debug, StructOpt)]
#[structopt(name = "quic-probe", about = "QUIC protocol-conformance test client")]
struct Opts {
    /// Scenario to exercise against the target
    scenario: String,

    /// Target URL, e.g. https://test.example.com:4433/index.html
    url: Url,

    /// Extra scenario debug output
    #[structopt(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::from_args();

    let Some(scenario) = Scenario::from_name(&opts.scenario) else {
        eprintln!("unknown scenario '{}'; available:", opts.scenario);
        for scenario in Scenario::ALL {
            eprintln!("  {}", scenario.name());
        }
        std::process::exit(2);
    };

    let host = opts
        .url
        .host_str()
        .ok_or("target URL carries no host")?
        .to_string();
    let port = opts.url.port().unwrap_or(443);
    let peer: SocketAddr = tokio::net::lookup_host((host.as_str(), port))
        .await?
        .next()
        .ok_or("could not resolve target host")?;

    tracing::info!(scenario = scenario.name(), %peer, "starting scenario");

    // The TLS engine is pluggable; the stub only carries scenarios that
    // do not need handshake completion. See the `tls` module contract.
    let conn = Connection::connect(peer, Box::new(StubEngine::new())).await?;

    let mut trace = Trace::new(scenario.name(), scenario.version());
    let path = if opts.url.path().is_empty() {
        "/"
    } else {
        opts.url.path()
    };
    scenario.run(conn, &mut trace, path, opts.debug).await;

    println!("{}", serde_json::to_string_pretty(&trace)?);
    Ok(())
}
