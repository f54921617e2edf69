use statbridge_agent::agent::Agent;
use statbridge_agent::config::{Args, Schedule};

use anyhow::Result;
use clap::Parser;
use tracing::*;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = args.log.init()?;

    info!("statbridge startup");

    let schedule = Schedule::try_from(&args.poll)?;
    let families = args.families.enabled();
    let sources = args.source.into_sources()?;
    let mut agent = Agent::new(&families, schedule, |family| sources.for_family(family))?;

    let exporters = args.metrics.to_exporters();
    if exporters.is_empty() {
        warn!("No metrics exporter is enabled, polled values will only be cached");
    }
    for exporter in &exporters {
        exporter.serve(agent.prometheus_registry(), agent.cancellation_token())?;
        statbridge_utils::always!("Exporting metrics: {:?}", exporter);
    }

    agent.start();

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, exiting");
    agent.stop();
    agent.join().await;
    drop(exporters);

    info!("statbridge exiting");
    Ok(())
}
