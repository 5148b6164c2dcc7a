pub mod restart;
pub mod run;
pub mod start;
pub mod status;
pub mod stop;

use std::path::PathBuf;

use anyhow::Result;
use roadie_core::{platform_controller, Supervisor};
use roadie_types::StatusEvent;
use tokio::sync::mpsc;

use crate::DEFAULT_FILENAMES;

pub(crate) fn manifest_path(file: Option<String>) -> PathBuf {
    if let Some(file) = file {
        return PathBuf::from(file);
    }
    for filename in DEFAULT_FILENAMES {
        if std::path::Path::new(filename).exists() {
            return PathBuf::from(filename);
        }
    }
    PathBuf::from(DEFAULT_FILENAMES[0])
}

/// Load the manifest and bring the supervisor up, re-attached to
/// whatever survived a previous invocation.
pub(crate) async fn launch(
    file: Option<String>,
) -> Result<(Supervisor, mpsc::Receiver<StatusEvent>)> {
    let path = manifest_path(file);
    let manifest = roadie_config::load_from_path(&path)?;
    let ctl = platform_controller();
    let (supervisor, events) = Supervisor::launch(manifest.services, manifest.settings, ctl).await?;
    Ok((supervisor, events))
}
