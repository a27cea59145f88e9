use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::api::{SamplingParams, StopSequences};
use crate::core::config::io::ConfigError;
use crate::utils::url::normalize_base_url;

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Contents of `config.toml`. Every field may also come from the environment.
///
/// ```toml
/// api_key = "sk-..."
///
/// [model]
/// id = "gpt-4"
/// temperature = 0.7
/// stop = ["\n\n"]
/// ```
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct ModelConfig {
    pub id: Option<String>,
    #[serde(flatten)]
    pub params: SamplingParams,
}

/// Validated settings a completion client is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub params: SamplingParams,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    /// Overlays values found through `lookup` (normally the process
    /// environment) on top of the file contents.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(id) = lookup("MODEL_ID") {
            self.model.id = Some(id);
        }

        let params = &mut self.model.params;
        overlay(&lookup, "MODEL_TEMPERATURE", "temperature", &mut params.temperature)?;
        overlay(&lookup, "MODEL_TOP_P", "top_p", &mut params.top_p)?;
        overlay(&lookup, "MODEL_N", "n", &mut params.n)?;
        overlay(&lookup, "MODEL_MAX_TOKENS", "max_tokens", &mut params.max_tokens)?;
        overlay(
            &lookup,
            "MODEL_PRESENCE_PENALTY",
            "presence_penalty",
            &mut params.presence_penalty,
        )?;
        overlay(
            &lookup,
            "MODEL_FREQUENCY_PENALTY",
            "frequency_penalty",
            &mut params.frequency_penalty,
        )?;
        overlay_json(&lookup, "MODEL_STOP", "stop", &mut params.stop)?;
        overlay_json(&lookup, "MODEL_LOGIT_BIAS", "logit_bias", &mut params.logit_bias)?;
        Ok(())
    }

    /// Fills in defaults and checks every value before any request is made.
    pub fn resolve(self) -> Result<Settings, ConfigError> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let model = match self.model.id {
            Some(id) if id.trim().is_empty() => {
                return Err(ConfigError::invalid("model_id", "must not be blank"))
            }
            Some(id) => id,
            None => DEFAULT_MODEL.to_string(),
        };

        let base_url = self
            .base_url
            .map(|url| normalize_base_url(&url))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        validate_params(&self.model.params)?;

        Ok(Settings {
            api_key,
            base_url,
            model,
            params: self.model.params,
        })
    }
}

fn overlay<F, T>(
    lookup: &F,
    var: &str,
    param: &'static str,
    slot: &mut Option<T>,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(var) {
        let value = raw
            .trim()
            .parse::<T>()
            .map_err(|err| ConfigError::invalid(param, format!("{raw:?}: {err}")))?;
        *slot = Some(value);
    }
    Ok(())
}

fn overlay_json<F, T>(
    lookup: &F,
    var: &str,
    param: &'static str,
    slot: &mut Option<T>,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: serde::de::DeserializeOwned,
{
    if let Some(raw) = lookup(var) {
        let value = serde_json::from_str::<T>(&raw)
            .map_err(|err| ConfigError::invalid(param, format!("{raw:?}: {err}")))?;
        *slot = Some(value);
    }
    Ok(())
}

fn check_range(param: &'static str, value: Option<f64>, min: f64, max: f64) -> Result<(), ConfigError> {
    match value {
        Some(v) if !(min..=max).contains(&v) => Err(ConfigError::invalid(
            param,
            format!("{v} is outside {min}..={max}"),
        )),
        _ => Ok(()),
    }
}

pub fn validate_params(params: &SamplingParams) -> Result<(), ConfigError> {
    check_range("temperature", params.temperature, 0.0, 2.0)?;
    check_range("top_p", params.top_p, 0.0, 1.0)?;
    check_range("presence_penalty", params.presence_penalty, -2.0, 2.0)?;
    check_range("frequency_penalty", params.frequency_penalty, -2.0, 2.0)?;

    if params.n == Some(0) {
        return Err(ConfigError::invalid("n", "must be greater than 0"));
    }

    match &params.stop {
        Some(StopSequences::One(stop)) if stop.trim().is_empty() => {
            return Err(ConfigError::invalid("stop", "must not be blank"));
        }
        Some(StopSequences::Many(stops)) if stops.is_empty() || stops.len() > 4 => {
            return Err(ConfigError::invalid(
                "stop",
                format!("expected 1 to 4 sequences, got {}", stops.len()),
            ));
        }
        _ => {}
    }

    if let Some(bias) = &params.logit_bias {
        check_logit_bias(bias)?;
    }

    Ok(())
}

fn check_logit_bias(bias: &BTreeMap<String, f64>) -> Result<(), ConfigError> {
    for (token, value) in bias {
        if !(-100.0..=100.0).contains(value) {
            return Err(ConfigError::invalid(
                "logit_bias",
                format!("bias {value} for token {token} is outside -100..=100"),
            ));
        }
    }
    Ok(())
}
