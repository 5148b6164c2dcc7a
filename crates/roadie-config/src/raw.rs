use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawManifest {
    #[serde(default)]
    pub settings: Option<RawSettings>,
    pub services: BTreeMap<String, RawService>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawService {
    pub cmd: Vec<String>,
    pub title: Option<String>,
    pub cwd: Option<String>,
    pub env: Option<HashMap<String, String>>,
    pub port: Option<u16>,
    pub tool: Option<String>,
    pub grace_attempts: Option<u32>,
    pub deps: Option<Vec<String>>,
    pub api_docs: Option<Vec<String>>,

    // At most one of these picks the service kind; none means a plain
    // process watched by pid liveness only.
    pub health_url: Option<String>,
    pub broker_addr: Option<String>,
    pub list_cmd: Option<Vec<String>>,
}

/// Optional `[settings]` overrides for the supervisor itself. Durations
/// are plain seconds (milliseconds where noted) to keep the manifest
/// hand-editable.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawSettings {
    pub state_dir: Option<String>,
    pub log_dir: Option<String>,
    pub base_interval_secs: Option<u64>,
    pub startup_interval_secs: Option<u64>,
    pub stable_interval_secs: Option<u64>,
    pub http_timeout_ms: Option<u64>,
    pub stop_wait_secs: Option<u64>,
    pub restart_delay_ms: Option<u64>,
    pub log_max_lines: Option<usize>,
}
