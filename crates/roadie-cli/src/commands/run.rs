use std::time::Duration;

use anyhow::Result;
use tokio::signal;

use crate::logger::{Console, Note};

pub async fn run(file: Option<String>, services: Vec<String>) -> Result<()> {
    let (supervisor, mut events) = super::launch(file).await?;

    if services.is_empty() {
        supervisor.start_all().await?;
    } else {
        for key in &services {
            if !supervisor.start_service(key).await? {
                println!("{key}: not started (required tool missing)");
            }
        }
    }

    let keys: Vec<String> = supervisor.keys().map(str::to_owned).collect();
    let mut console = Console::stdout();
    let mut shutting_down = false;
    let mut tail_timer = tokio::time::interval(Duration::from_millis(300));

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                if shutting_down {
                    tracing::warn!("second Ctrl+C: exiting immediately");
                    return Ok(());
                }
                shutting_down = true;
                console.note(Note::Info, "Ctrl+C: stopping services...");

                if let Err(err) = supervisor.stop_all(true).await {
                    console.note(Note::Error, &format!("failed to stop services: {err}"));
                }
                supervisor.shutdown();
                console.note(Note::Info, "All services stopped");
                return Ok(());
            }

            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => {
                        console.note(Note::Info, &format!("{} is {}", event.key, event.status));
                    }
                    None => {
                        tracing::info!("event stream ended");
                        return Ok(());
                    }
                }
            }

            _ = tail_timer.tick() => {
                for key in &keys {
                    let Some(svc) = supervisor.service(key) else { continue };
                    for line in svc.tail_new_lines().await {
                        console.service(key, &line);
                    }
                }
            }
        }
    }
}
