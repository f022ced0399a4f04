use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use tracing::{info, warn};

use location_resolver::{
    build_resolver, init_tracing, AppConfig, CancellationToken, LocationOutcome, ProgressObserver,
    ProgressState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = AppConfig::from_env();
    let resolver = build_resolver(&config).context("failed to set up location resolver")?;

    let locations = io::stdin()
        .lock()
        .lines()
        .collect::<Result<Vec<String>, _>>()
        .context("failed to read locations from stdin")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            interrupt.cancel();
        }
    });

    let observer: ProgressObserver = Arc::new(|state: ProgressState| {
        info!(
            completed = state.completed,
            total = state.total,
            phase = ?state.phase,
            "{}",
            state.message
        );
    });

    let result = resolver
        .resolve_all(&locations, Some(observer), &cancel)
        .await
        .context("resolution did not complete")?;

    let mut rows = Vec::with_capacity(result.len());
    for (raw, outcome) in result.iter() {
        let resolved = match outcome {
            LocationOutcome::Resolved(location) => serde_json::to_value(location)?,
            LocationOutcome::Absent => Value::Null,
        };
        rows.push(json!({ "location": raw, "resolved": resolved }));
    }
    let output = json!({
        "locations": rows,
        "stats": result.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
