use std::{path::PathBuf, time::Duration};

use roadie_types::{ServiceDefinition, ServiceKind, SupervisorConfig};

use crate::{
    raw::{RawService, RawSettings},
    ConfigError,
};

impl RawService {
    pub fn to_definition(&self, name: &str) -> Result<ServiceDefinition, ConfigError> {
        if self.cmd.is_empty() {
            return Err(ConfigError::Validation(format!(
                "service `{name}`: cmd is empty"
            )));
        }
        if self.cmd.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "service `{name}`: cmd contains empty element"
            )));
        }

        let kind_fields = [
            self.health_url.is_some(),
            self.broker_addr.is_some(),
            self.list_cmd.is_some(),
        ]
        .iter()
        .filter(|&&set| set)
        .count();
        if kind_fields > 1 {
            return Err(ConfigError::Validation(format!(
                "service `{name}`: health_url, broker_addr and list_cmd are mutually exclusive"
            )));
        }

        let kind = if let Some(health_url) = &self.health_url {
            ServiceKind::Http {
                health_url: health_url.clone(),
            }
        } else if let Some(broker_addr) = &self.broker_addr {
            ServiceKind::Worker {
                broker_addr: broker_addr.clone(),
            }
        } else if let Some(list_cmd) = &self.list_cmd {
            if list_cmd.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "service `{name}`: list_cmd is empty"
                )));
            }
            ServiceKind::ContainerGroup {
                list_cmd: list_cmd.clone(),
            }
        } else {
            ServiceKind::Plain
        };

        let mut def = ServiceDefinition::new(name, self.cmd.clone());
        if let Some(title) = &self.title {
            def.title = title.clone();
        }
        def.cwd = self.cwd.as_ref().map(PathBuf::from);
        if let Some(env) = &self.env {
            let mut env: Vec<(String, String)> =
                env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            env.sort();
            def.env = env;
        }
        def.kind = kind;
        def.port = self.port;
        def.tool = self.tool.clone();
        if let Some(grace) = self.grace_attempts {
            def.grace_attempts = grace;
        }
        def.deps = self.deps.clone().unwrap_or_default();
        def.api_docs = self.api_docs.clone().unwrap_or_default();
        Ok(def)
    }
}

impl RawSettings {
    /// Layer the manifest overrides onto the defaults.
    pub fn apply(&self, mut cfg: SupervisorConfig) -> SupervisorConfig {
        if let Some(dir) = &self.state_dir {
            cfg.state_dir = PathBuf::from(dir);
        }
        if let Some(dir) = &self.log_dir {
            cfg.log_dir = PathBuf::from(dir);
        }
        if let Some(secs) = self.base_interval_secs {
            cfg.base_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.startup_interval_secs {
            cfg.startup_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.stable_interval_secs {
            cfg.stable_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = self.http_timeout_ms {
            cfg.http_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = self.stop_wait_secs {
            cfg.stop_wait = Duration::from_secs(secs);
        }
        if let Some(ms) = self.restart_delay_ms {
            cfg.restart_delay = Duration::from_millis(ms);
        }
        if let Some(lines) = self.log_max_lines {
            cfg.log_max_lines = lines;
        }
        cfg
    }
}
