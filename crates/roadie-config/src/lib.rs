mod adapter;
mod raw;

use roadie_types::{ServiceDefinition, SupervisorConfig};

/// Error type for manifest parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("validation error(s): {0}")]
    Validation(String),
}

/// A parsed manifest: the service definitions plus the supervisor
/// settings with any `[settings]` overrides applied.
#[derive(Debug)]
pub struct Manifest {
    pub services: Vec<ServiceDefinition>,
    pub settings: SupervisorConfig,
}

/// Load a manifest from a file path.
///
/// # Errors
///
/// Returns a `ConfigError` if the manifest cannot be read or parsed.
pub fn load_from_path(path: &std::path::Path) -> Result<Manifest, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_toml(&text)
}

/// Parse a manifest from a TOML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the manifest cannot be parsed or fails
/// validation.
pub fn parse_toml(text: &str) -> Result<Manifest, ConfigError> {
    let raw = toml::from_str::<raw::RawManifest>(text)?;

    let mut services = Vec::with_capacity(raw.services.len());
    for (name, raw_service) in &raw.services {
        services.push(raw_service.to_definition(name)?);
    }

    for def in &services {
        for dep in &def.deps {
            if !raw.services.contains_key(dep) {
                return Err(ConfigError::Validation(format!(
                    "service `{}`: unknown dependency `{dep}`",
                    def.key
                )));
            }
        }
    }

    let settings = raw
        .settings
        .unwrap_or_default()
        .apply(SupervisorConfig::default());

    Ok(Manifest { services, settings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use roadie_types::ServiceKind;
    use std::time::Duration;

    #[test]
    fn parse_toml_ok() {
        let txt = r#"
            [services.api]
            cmd = ["cargo", "run", "--bin", "api"]
            health_url = "http://127.0.0.1:8080/health"
            port = 8080
            deps = ["db"]

            [services.db]
            cmd = ["postgres", "-D", ".pg"]
        "#;
        let manifest = parse_toml(txt).unwrap();
        assert_eq!(manifest.services.len(), 2);

        let api = manifest
            .services
            .iter()
            .find(|s| s.key == "api")
            .unwrap();
        assert_eq!(api.cmd, vec!["cargo", "run", "--bin", "api"]);
        assert_eq!(api.port, Some(8080));
        assert_eq!(api.deps, vec!["db"]);
        assert!(matches!(api.kind, ServiceKind::Http { .. }));
    }

    #[test]
    fn parse_toml_with_settings() {
        let txt = r#"
            [settings]
            base_interval_secs = 3
            state_dir = ".devtool"

            [services.api]
            cmd = ["serve"]
        "#;
        let manifest = parse_toml(txt).unwrap();
        assert_eq!(manifest.settings.base_interval, Duration::from_secs(3));
        assert_eq!(
            manifest.settings.state_dir,
            std::path::PathBuf::from(".devtool")
        );
    }

    #[test]
    fn rejects_unknown_dependency() {
        let txt = r#"
            [services.api]
            cmd = ["serve"]
            deps = ["ghost"]
        "#;
        let err = parse_toml(txt).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn rejects_unknown_fields() {
        let txt = r#"
            [services.api]
            cmd = ["serve"]
            helth_url = "typo"
        "#;
        assert!(parse_toml(txt).is_err());
    }
}
