use std::sync::Arc;

use tracing::info;

use fleetslot::config::SchedulerConfig;
use fleetslot::reaper::run_reaper;
use fleetslot::scenario::Scenario;
use fleetslot::store::InMemoryStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = SchedulerConfig::from_env();
    fleetslot::observability::init(config.metrics_port);

    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FLEETSLOT_SCENARIO").ok())
        .ok_or("usage: fleetslot <scenario.json> (or set FLEETSLOT_SCENARIO)")?;

    let text = std::fs::read_to_string(&path)?;
    let scenario = Scenario::from_json(&text)?;
    info!("replaying {path}: {} resources, {} steps", scenario.resources.len(), scenario.steps.len());
    info!("  commit_timeout: {:?}", config.commit_timeout);
    info!("  draft_hold: {:?}", config.draft_hold);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let store = Arc::new(InMemoryStore::with_config(config.clone()));
    let reaper = tokio::spawn(run_reaper(store.clone(), config.reaper_interval));

    let outcomes = scenario.replay(&store).await?;
    let rejected = outcomes.iter().filter(|o| o.rejection.is_some()).count();
    for outcome in &outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }
    for record in store.reservations().await {
        println!("{}", serde_json::to_string(&record)?);
    }

    reaper.abort();
    info!("{} steps, {rejected} rejected", outcomes.len());
    Ok(())
}
