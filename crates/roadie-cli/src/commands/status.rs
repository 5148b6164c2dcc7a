use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use roadie_core::ServiceSnapshot;
use roadie_types::HealthStatus;

pub async fn status(file: Option<String>) -> Result<()> {
    let (supervisor, _events) = super::launch(file).await?;

    // Give the monitor one probe pass before reading.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let snaps = supervisor.statuses().await;
    print_statuses(&snaps);

    supervisor.shutdown();
    Ok(())
}

pub(crate) fn print_statuses(snaps: &[ServiceSnapshot]) {
    let width = snaps.iter().map(|s| s.key.len()).max().unwrap_or(0);

    for snap in snaps {
        let status = match snap.health {
            HealthStatus::Healthy => "healthy".green(),
            HealthStatus::Starting => "starting".yellow(),
            HealthStatus::Unhealthy => "unhealthy".red(),
            HealthStatus::Stopped => "stopped".dimmed(),
        };

        let pid = snap
            .effective_pid
            .map_or_else(|| "-".to_owned(), |pid| pid.to_string());

        let mut notes = Vec::new();
        if snap.externally_managed {
            notes.push("external".to_owned());
        }
        if !snap.tool_available {
            notes.push(snap.tool_message.clone());
        }
        let notes = if notes.is_empty() {
            String::new()
        } else {
            format!("  ({})", notes.join("; "))
        };

        println!("{:width$}  {status:>9}  pid {pid}{notes}", snap.key);
    }
}
