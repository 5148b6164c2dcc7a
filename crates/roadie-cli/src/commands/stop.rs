use anyhow::Result;

use crate::logger::{Console, Note};

pub async fn stop(file: Option<String>, services: Vec<String>) -> Result<()> {
    let (supervisor, _events) = super::launch(file).await?;
    let mut console = Console::stdout();

    if services.is_empty() {
        supervisor.stop_all(true).await?;
        console.note(Note::Info, "All services stopped");
    } else {
        for key in &services {
            supervisor.stop_service(key, true).await?;
            console.note(Note::Info, &format!("{key} stopped"));
        }
    }

    supervisor.shutdown();
    Ok(())
}
