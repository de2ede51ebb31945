//! Env-driven configuration for the gateway, the CLI and the library.
//!
//! Values are read from the process environment; `dotenv` is loaded on demand
//! by the binaries. Defaults are provided for local development against a
//! ComfyUI server on the same host.
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set when BACKEND={1}")]
    Missing(&'static str, &'static str),
}

/// Which inference backend `/invocations` is proxied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Local ComfyUI server reached over REST + websocket.
    ComfyUI,
    /// Managed SageMaker endpoint invoked synchronously.
    SageMaker,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "comfyui" | "comfy" => Ok(BackendKind::ComfyUI),
            "sagemaker" => Ok(BackendKind::SageMaker),
            other => Err(format!("unknown backend '{other}', expected comfyui or sagemaker")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendKind,
    pub comfyui_url: String,
    pub endpoint_name: Option<String>,
    pub workflow_dir: String,
    pub api_host: String,
    pub api_port: String,
    pub jpeg_quality: u8,
    pub debug_header: bool,
    pub ping_timeout: Duration,
    pub connect_timeout: Duration,
    pub submit_timeout: Duration,
}

impl Config {
    pub fn dotenv_load() {
        dotenv::dotenv().ok();
    }

    pub fn new() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. `new` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let backend_raw = get("BACKEND", "comfyui");
        let backend = backend_raw.parse().map_err(|reason| ConfigError::Invalid {
            key: "BACKEND",
            value: backend_raw.clone(),
            reason,
        })?;

        let endpoint_name = lookup("ENDPOINT_NAME").filter(|s| !s.trim().is_empty());
        if backend == BackendKind::SageMaker && endpoint_name.is_none() {
            return Err(ConfigError::Missing("ENDPOINT_NAME", "sagemaker"));
        }

        let jpeg_quality = parse_number::<u8>("JPEG_QUALITY", &get("JPEG_QUALITY", "90"))?;
        if !(1..=100).contains(&jpeg_quality) {
            return Err(ConfigError::Invalid {
                key: "JPEG_QUALITY",
                value: jpeg_quality.to_string(),
                reason: "must be between 1 and 100".to_string(),
            });
        }

        Ok(Config {
            backend,
            comfyui_url: get("COMFYUI_URL", "http://127.0.0.1:8188"),
            endpoint_name,
            workflow_dir: get("WORKFLOW_DIR", "./workflow"),
            api_host: get("API_HOST", "0.0.0.0"),
            api_port: get("API_PORT", "8080"),
            jpeg_quality,
            debug_header: parse_flag(&get("DEBUG_HEADER", "false")),
            ping_timeout: parse_secs("PING_TIMEOUT_SECS", &get("PING_TIMEOUT_SECS", "5"))?,
            connect_timeout: parse_secs("CONNECT_TIMEOUT_SECS", &get("CONNECT_TIMEOUT_SECS", "10"))?,
            submit_timeout: parse_secs("SUBMIT_TIMEOUT_SECS", &get("SUBMIT_TIMEOUT_SECS", "300"))?,
        })
    }

    pub fn print_env_vars(&self) {
        tracing::info!(
            backend = ?self.backend,
            comfyui_url = %self.comfyui_url,
            endpoint_name = self.endpoint_name.as_deref().unwrap_or("<unset>"),
            workflow_dir = %self.workflow_dir,
            jpeg_quality = self.jpeg_quality,
            debug_header = self.debug_header,
            submit_timeout_secs = self.submit_timeout.as_secs(),
            "Loaded configuration"
        );
    }
}

/// `true`, `1` and `t` (any case) enable a flag; anything else disables it.
fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "t")
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_secs(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse_number::<u64>(key, raw).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_target_local_comfyui() {
        let conf = config_from(&[]).unwrap();
        assert_eq!(conf.backend, BackendKind::ComfyUI);
        assert_eq!(conf.comfyui_url, "http://127.0.0.1:8188");
        assert_eq!(conf.workflow_dir, "./workflow");
        assert_eq!(conf.jpeg_quality, 90);
        assert!(!conf.debug_header);
        assert_eq!(conf.ping_timeout, Duration::from_secs(5));
        assert_eq!(conf.submit_timeout, Duration::from_secs(300));
    }

    #[test]
    fn debug_header_accepts_short_truthy_forms() {
        for raw in ["True", "1", "t", "TRUE"] {
            assert!(config_from(&[("DEBUG_HEADER", raw)]).unwrap().debug_header, "{raw}");
        }
        assert!(!config_from(&[("DEBUG_HEADER", "yes")]).unwrap().debug_header);
    }

    #[test]
    fn sagemaker_requires_endpoint_name() {
        let err = config_from(&[("BACKEND", "sagemaker")]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("ENDPOINT_NAME", _)));

        let conf = config_from(&[("BACKEND", "SageMaker"), ("ENDPOINT_NAME", "comfyui-endpoint")])
            .unwrap();
        assert_eq!(conf.backend, BackendKind::SageMaker);
        assert_eq!(conf.endpoint_name.as_deref(), Some("comfyui-endpoint"));
    }

    #[test]
    fn rejects_out_of_range_quality() {
        assert!(config_from(&[("JPEG_QUALITY", "0")]).is_err());
        assert!(config_from(&[("JPEG_QUALITY", "abc")]).is_err());
        assert_eq!(config_from(&[("JPEG_QUALITY", "75")]).unwrap().jpeg_quality, 75);
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = config_from(&[("BACKEND", "bedrock")]).unwrap_err();
        assert!(err.to_string().contains("BACKEND"));
    }
}
