use crate::core::config::data::{path_display, Config};
use directories::{BaseDirs, ProjectDirs};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Dotenv-style settings file in the home directory.
pub const DOTENV_FILE: &str = ".cli-gpt";

/// Errors that can occur when loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        /// Path to the configuration file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as valid TOML.
    Parse {
        /// Path to the configuration file with invalid TOML.
        path: PathBuf,
        /// The TOML deserialization error.
        source: toml::de::Error,
    },

    /// Failed to read or parse the `~/.cli-gpt` settings file.
    Dotenv {
        path: PathBuf,
        source: dotenvy::Error,
    },

    /// No API key in the file or in `OPENAI_API_KEY`.
    MissingApiKey,

    /// A model parameter could not be parsed or is out of range.
    Invalid {
        param: &'static str,
        detail: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(param: &'static str, detail: impl Into<String>) -> Self {
        ConfigError::Invalid {
            param,
            detail: detail.into(),
        }
    }

    fn display_path(path: &Path) -> String {
        path_display(path)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(
                    f,
                    "Failed to read config at {}: {}",
                    Self::display_path(path),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "Failed to parse config at {}: {}",
                    Self::display_path(path),
                    source
                )
            }
            ConfigError::Dotenv { path, source } => {
                write!(
                    f,
                    "Failed to read settings at {}: {}",
                    Self::display_path(path),
                    source
                )
            }
            ConfigError::MissingApiKey => {
                write!(f, "OPENAI_API_KEY environment variable is not set")
            }
            ConfigError::Invalid { param, detail } => {
                write!(f, "Invalid value for parameter {param}: {detail}")
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Dotenv { source, .. } => Some(source),
            ConfigError::MissingApiKey | ConfigError::Invalid { .. } => None,
        }
    }
}

impl Config {
    /// Loads the config file, or the default config when it does not exist.
    pub fn load_from_path(config_path: &Path) -> Result<Config, ConfigError> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
            path: config_path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })
    }

    /// Loads the user's config file, then `~/.cli-gpt`, then the process
    /// environment; later sources win.
    pub fn load() -> Result<Config, ConfigError> {
        let config_path = Self::get_config_path();
        let dotenv_path = Self::get_dotenv_path();
        Self::load_layered(config_path.as_deref(), dotenv_path.as_deref(), |name| {
            std::env::var(name).ok()
        })
    }

    pub fn load_layered<F>(
        config_path: Option<&Path>,
        dotenv_path: Option<&Path>,
        env: F,
    ) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => Config::default(),
        };
        let dotenv = match dotenv_path {
            Some(path) => load_dotenv(path)?,
            None => HashMap::new(),
        };
        config.apply_env(|name| env(name).or_else(|| dotenv.get(name).cloned()))?;
        Ok(config)
    }

    pub fn get_config_path() -> Option<PathBuf> {
        ProjectDirs::from("cz", "synaptiko", "cli-gpt")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn get_dotenv_path() -> Option<PathBuf> {
        BaseDirs::new().map(|dirs| dirs.home_dir().join(DOTENV_FILE))
    }
}

/// Reads `KEY=value` pairs from a dotenv file; a missing file is empty.
pub fn load_dotenv(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let to_error = |source: dotenvy::Error| ConfigError::Dotenv {
        path: path.to_path_buf(),
        source,
    };
    dotenvy::from_path_iter(path)
        .map_err(to_error)?
        .collect::<Result<_, _>>()
        .map_err(to_error)
}
