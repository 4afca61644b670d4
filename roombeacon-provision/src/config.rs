use std::path::Path;
use std::time::Duration;

use crate::ConfigError;

/// Provisioner configuration
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Exact advertised name of a beacon waiting to be provisioned
    pub device_name: String,
    pub connect_timeout_secs: u64,
    pub service_discovery_timeout_secs: u64,
    pub characteristic_discovery_timeout_secs: u64,
    pub save_timeout_secs: u64,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            device_name: roombeacon_proto::ble::DEVICE_NAME.to_string(),
            connect_timeout_secs: 15,
            service_discovery_timeout_secs: 10,
            characteristic_discovery_timeout_secs: 10,
            save_timeout_secs: 10,
        }
    }
}

impl ProvisionerConfig {
    /// Load from `path`, writing the defaults there if the file does not exist
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            let config = Self::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&config)?)?;
            Ok(config)
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn service_discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.service_discovery_timeout_secs)
    }

    pub fn characteristic_discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.characteristic_discovery_timeout_secs)
    }

    pub fn save_timeout(&self) -> Duration {
        Duration::from_secs(self.save_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("roombeacon-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = scratch_dir("config-create");
        let path = dir.join("config.json");

        let config = ProvisionerConfig::load_or_create(&path).unwrap();
        assert_eq!(config, ProvisionerConfig::default());
        assert!(path.exists());
        assert_eq!(ProvisionerConfig::load_or_create(&path).unwrap(), config);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = scratch_dir("config-partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(
            &path,
            r#"{ "device_name": "Beacon-Lab", "save_timeout_secs": 30 }"#,
        )
        .unwrap();

        let config = ProvisionerConfig::load_or_create(&path).unwrap();
        assert_eq!(config.device_name, "Beacon-Lab");
        assert_eq!(config.save_timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(15));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = scratch_dir("config-bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            ProvisionerConfig::load_or_create(&path),
            Err(ConfigError::Json(_))
        ));

        std::fs::remove_dir_all(dir).unwrap();
    }
}
