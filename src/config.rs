//! Engine configuration, deserialized from YAML.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;
use url::Url;

fn default_image_timeout() -> u64 {
    15
}

fn default_enhance_timeout() -> u64 {
    20
}

fn default_service_timeout() -> u64 {
    30
}

fn default_weather_timeout() -> u64 {
    10
}

/// Which rendering backend a deployment uses.
#[derive(Deserialize, Debug, Clone)]
pub enum Backend {
    Docx {
        /// Path to the binary template container.
        template: PathBuf,
    },
    Cloud {
        endpoint: Url,
        token: String,
    },
}

#[derive(Deserialize, Debug, Clone)]
pub struct EnhancerConfig {
    pub endpoint: Url,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct WeatherConfig {
    pub endpoint: Url,
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    #[serde(default)]
    pub enhancer: Option<EnhancerConfig>,
    #[serde(default)]
    pub weather: Option<WeatherConfig>,
    #[serde(default = "default_image_timeout")]
    pub image_timeout_secs: u64,
    #[serde(default = "default_enhance_timeout")]
    pub enhance_timeout_secs: u64,
    #[serde(default = "default_service_timeout")]
    pub service_timeout_secs: u64,
    #[serde(default = "default_weather_timeout")]
    pub weather_timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        for (name, secs) in [
            ("image_timeout_secs", self.image_timeout_secs),
            ("enhance_timeout_secs", self.enhance_timeout_secs),
            ("service_timeout_secs", self.service_timeout_secs),
            ("weather_timeout_secs", self.weather_timeout_secs),
        ] {
            if secs == 0 {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        if let Backend::Cloud { token, .. } = &self.backend
            && token.trim().is_empty()
        {
            return Err("cloud backend requires a non-empty token".to_owned());
        }
        Ok(())
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub fn enhance_timeout(&self) -> Duration {
        Duration::from_secs(self.enhance_timeout_secs)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }

    pub fn weather_timeout(&self) -> Duration {
        Duration::from_secs(self.weather_timeout_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn docx_backend_with_defaults() {
        let config: Config = serde_yaml::from_str(
            r#"
backend:
  Docx:
    template: templates/inspection.docx
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.image_timeout(), Duration::from_secs(15));
        assert!(config.enhancer.is_none());
    }

    #[test]
    fn cloud_backend_requires_token() {
        let config: Config = serde_yaml::from_str(
            r#"
backend:
  Cloud:
    endpoint: https://docs.example.com/api/
    token: ""
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
