//! Settings for the simulator: defaults, then a JSON settings file, then the environment.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::llm_client::{Purpose, SamplingParams};
use crate::error::ConfigError;

const APP_DIR: &str = "child-dialogue-sim";
const SETTINGS_FILE: &str = "settings.json";

const DASHSCOPE_ENDPOINT: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";
const OPENAI_COMPATIBLE_ENDPOINT: &str = "http://localhost:1234/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderFlavor {
    #[serde(rename = "dashscope", alias = "dash_scope")]
    DashScope,
    #[serde(rename = "openai_compatible", alias = "openai")]
    OpenAiCompatible,
}

impl ProviderFlavor {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderFlavor::DashScope => "dashscope",
            ProviderFlavor::OpenAiCompatible => "openai_compatible",
        }
    }

    /// Local OpenAI-compatible servers usually run without a key.
    pub fn requires_credential(self) -> bool {
        matches!(self, ProviderFlavor::DashScope)
    }

    fn default_endpoint(self) -> &'static str {
        match self {
            ProviderFlavor::DashScope => DASHSCOPE_ENDPOINT,
            ProviderFlavor::OpenAiCompatible => OPENAI_COMPATIBLE_ENDPOINT,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dashscope" | "dash_scope" => Some(ProviderFlavor::DashScope),
            "openai_compatible" | "openai" => Some(ProviderFlavor::OpenAiCompatible),
            _ => None,
        }
    }
}

/// Connection to the generative text service.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub provider: ProviderFlavor,
    /// Overrides the provider's default URL.
    pub endpoint: Option<String>,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub top_p: f32,
}

impl ServiceSettings {
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.provider.default_endpoint().to_string())
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            provider: ProviderFlavor::DashScope,
            endpoint: None,
            model: "qwen-turbo".into(),
            api_key: None,
            timeout_secs: 30,
            top_p: 0.8,
        }
    }
}

impl fmt::Debug for ServiceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceSettings")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint())
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("top_p", &self.top_p)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Sampling for the two calls. Evaluation runs cooler to keep scores stable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    pub generation: SamplingSettings,
    pub evaluation: SamplingSettings,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            generation: SamplingSettings {
                temperature: 0.8,
                max_tokens: 500,
            },
            evaluation: SamplingSettings {
                temperature: 0.3,
                max_tokens: 800,
            },
        }
    }
}

impl SimulationSettings {
    pub fn params(&self, purpose: Purpose) -> SamplingParams {
        let sampling = match purpose {
            Purpose::Generation => self.generation,
            Purpose::Evaluation => self.evaluation,
        };
        SamplingParams {
            purpose,
            temperature: sampling.temperature,
            max_tokens: sampling.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub service: ServiceSettings,
    pub simulation: SimulationSettings,
    /// JSON file with personalities and challenges; built-in data when unset.
    pub catalog: Option<PathBuf>,
}

/// `<config dir>/child-dialogue-sim/settings.json`
pub fn default_settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(APP_DIR);
    path.push(SETTINGS_FILE);
    path
}

impl Settings {
    /// Load settings, apply environment overrides and validate.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = default_settings_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Overlay values from the environment. `lookup` is `std::env::var` outside tests.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = lookup("DASHSCOPE_API_KEY").or_else(|| lookup("ALIYUN_DASHSCOPE_API_KEY")) {
            self.service.api_key = Some(key);
        }
        if let Some(raw) = lookup("CHILD_SIM_PROVIDER") {
            self.service.provider =
                ProviderFlavor::parse(&raw).ok_or_else(|| ConfigError::InvalidValue {
                    key: "CHILD_SIM_PROVIDER".into(),
                    message: format!("unknown provider '{raw}'"),
                })?;
        }
        if let Some(endpoint) = lookup("CHILD_SIM_ENDPOINT") {
            self.service.endpoint = Some(endpoint);
        }
        if let Some(model) = lookup("CHILD_SIM_MODEL") {
            self.service.model = model;
        }
        if let Some(raw) = lookup("CHILD_SIM_TIMEOUT_SECS") {
            self.service.timeout_secs =
                raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "CHILD_SIM_TIMEOUT_SECS".into(),
                    message: format!("'{raw}' is not a whole number of seconds"),
                })?;
        }
        if let Some(catalog) = lookup("CHILD_SIM_CATALOG") {
            self.catalog = Some(PathBuf::from(catalog));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        if self.service.timeout_secs == 0 {
            return Err(invalid("service.timeout_secs", "must be at least 1".into()));
        }
        if self.service.model.trim().is_empty() {
            return Err(invalid("service.model", "must not be empty".into()));
        }
        for (key, sampling) in [
            ("simulation.generation", self.simulation.generation),
            ("simulation.evaluation", self.simulation.evaluation),
        ] {
            if !(0.0..=2.0).contains(&sampling.temperature) {
                return Err(invalid(
                    key,
                    format!("temperature {} is outside 0..=2", sampling.temperature),
                ));
            }
            if sampling.max_tokens == 0 {
                return Err(invalid(key, "max_tokens must be at least 1".into()));
            }
        }
        if self.simulation.evaluation.temperature >= self.simulation.generation.temperature {
            return Err(invalid(
                "simulation.evaluation",
                "evaluation temperature must be lower than generation temperature".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.service.endpoint(), DASHSCOPE_ENDPOINT);
        assert_eq!(settings.simulation.params(Purpose::Generation).temperature, 0.8);
        assert_eq!(settings.simulation.params(Purpose::Evaluation).max_tokens, 800);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("ALIYUN_DASHSCOPE_API_KEY", "sk-legacy"),
                ("CHILD_SIM_PROVIDER", "openai"),
                ("CHILD_SIM_MODEL", "local-model"),
                ("CHILD_SIM_TIMEOUT_SECS", "20"),
            ]))
            .unwrap();

        assert_eq!(settings.service.api_key.as_deref(), Some("sk-legacy"));
        assert_eq!(settings.service.provider, ProviderFlavor::OpenAiCompatible);
        assert_eq!(settings.service.endpoint(), OPENAI_COMPATIBLE_ENDPOINT);
        assert_eq!(settings.service.model, "local-model");
        assert_eq!(settings.service.timeout_secs, 20);
    }

    #[test]
    fn primary_key_wins_over_alias() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("DASHSCOPE_API_KEY", "sk-new"),
                ("ALIYUN_DASHSCOPE_API_KEY", "sk-legacy"),
            ]))
            .unwrap();
        assert_eq!(settings.service.api_key.as_deref(), Some("sk-new"));
    }

    #[test]
    fn bad_env_values_are_rejected() {
        let mut settings = Settings::default();
        assert!(settings
            .apply_env(env(&[("CHILD_SIM_TIMEOUT_SECS", "soon")]))
            .is_err());
        assert!(settings
            .apply_env(env(&[("CHILD_SIM_PROVIDER", "carrier-pigeon")]))
            .is_err());
    }

    #[test]
    fn evaluation_must_run_cooler() {
        let mut settings = Settings::default();
        settings.simulation.evaluation.temperature = 0.9;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("lower than generation"));
    }

    #[test]
    fn partial_settings_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"service": {{"provider": "openai_compatible", "model": "qwen-plus", "api_key": "sk-file"}}, "catalog": "data/catalog.json"}}"#
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.service.provider, ProviderFlavor::OpenAiCompatible);
        assert_eq!(settings.service.model, "qwen-plus");
        assert_eq!(settings.service.api_key.as_deref(), Some("sk-file"));
        assert_eq!(settings.service.timeout_secs, 30);
        assert_eq!(settings.simulation, SimulationSettings::default());
        assert_eq!(settings.catalog, Some(PathBuf::from("data/catalog.json")));
    }

    #[test]
    fn debug_redacts_key() {
        let settings = ServiceSettings {
            api_key: Some("sk-secret".into()),
            ..ServiceSettings::default()
        };
        let shown = format!("{settings:?}");
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("REDACTED"));
    }
}
