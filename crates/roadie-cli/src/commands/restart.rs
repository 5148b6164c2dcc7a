use anyhow::Result;

use crate::logger::{Console, Note};

pub async fn restart(file: Option<String>, services: Vec<String>) -> Result<()> {
    let (supervisor, _events) = super::launch(file).await?;
    let mut console = Console::stdout();

    let targets: Vec<String> = if services.is_empty() {
        supervisor.keys().map(str::to_owned).collect()
    } else {
        services
    };

    for key in &targets {
        if supervisor.restart_service(key).await? {
            console.note(Note::Info, &format!("{key} restarted"));
        } else {
            console.note(Note::Error, &format!("{key}: not restarted (required tool missing)"));
        }
    }

    supervisor.shutdown();
    Ok(())
}
