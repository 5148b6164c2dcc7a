use std::time::Duration;

use anyhow::Result;
use tokio::time::{sleep, Instant};

use crate::commands::status::print_statuses;

/// How long to watch newly started services before reporting and
/// returning.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn start(file: Option<String>, services: Vec<String>) -> Result<()> {
    let (supervisor, _events) = super::launch(file).await?;

    let targets: Vec<String> = if services.is_empty() {
        supervisor.keys().map(str::to_owned).collect()
    } else {
        services
    };

    for key in &targets {
        if !supervisor.start_service(key).await? {
            println!("{key}: not started (required tool missing)");
        }
    }

    // The processes are detached; wait only until their health settles
    // (or the timeout runs out), then report and leave them running.
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        sleep(Duration::from_millis(500)).await;

        let snaps = supervisor.statuses().await;
        let settled = snaps
            .iter()
            .filter(|snap| targets.contains(&snap.key))
            .all(|snap| snap.health != roadie_types::HealthStatus::Starting);
        if settled || Instant::now() >= deadline {
            print_statuses(&snaps);
            break;
        }
    }

    supervisor.shutdown();
    Ok(())
}
