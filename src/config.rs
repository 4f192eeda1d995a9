use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::llm::{GenerationParams, LoadOptions};
use crate::prompts::DEFAULT_CONTEXT_TURNS;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where tracing output goes while the TUI owns the terminal
    pub log_file: PathBuf,

    /// Which model to load and from where
    pub model: ModelConfig,

    /// Hub and inference endpoints
    pub provider: ProviderConfig,

    /// Sampling parameters and the token slider range
    pub generation: GenerationConfig,

    /// Prompt shaping
    pub chat: ChatConfig,

    /// Parley home directory
    #[serde(skip)]
    pub parley_home: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub id: String,
    pub revision: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub hub_url: String,
    /// `{model}` is replaced with the model id
    pub inference_url: String,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_new_tokens: u32,
    pub min_new_tokens: u32,
    pub max_new_tokens_limit: u32,
    pub step: u32,
    pub temperature: f32,
    pub do_sample: bool,
    pub repetition_penalty: f32,
    pub pad_token_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Prior turns rendered into each prompt
    pub context_turns: usize,
}

fn default_home() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    home.join(".parley")
}

impl Default for Config {
    fn default() -> Self {
        let parley_home = default_home();

        Config {
            log_file: parley_home.join("parley.log"),
            model: ModelConfig::default(),
            provider: ProviderConfig::default(),
            generation: GenerationConfig::default(),
            chat: ChatConfig::default(),
            parley_home,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        let options = LoadOptions::default();
        Self {
            id: "Xenova/distilgpt2".to_string(),
            revision: options.revision,
            files: options.files,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            hub_url: "https://huggingface.co".to_string(),
            inference_url: "https://api-inference.huggingface.co/models/{model}".to_string(),
            api_key: None,
            api_key_env: Some("HF_TOKEN".to_string()),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let params = GenerationParams::default();
        Self {
            max_new_tokens: params.max_new_tokens,
            min_new_tokens: 10,
            max_new_tokens_limit: 100,
            step: 5,
            temperature: params.temperature,
            do_sample: params.do_sample,
            repetition_penalty: params.repetition_penalty,
            pad_token_id: params.pad_token_id,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_turns: DEFAULT_CONTEXT_TURNS,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from `~/.parley/config.toml`.
    ///
    /// An explicit path must exist; the default one is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let parley_home = default_home();
        let config_path = match path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file {} does not exist", path.display());
                }
                path.to_path_buf()
            }
            None => parley_home.join("config.toml"),
        };

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", config_path.display()))?
        } else {
            Config::default()
        };

        config.parley_home = parley_home;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn default_path(&self) -> PathBuf {
        self.parley_home.join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        let generation = &self.generation;
        if self.model.id.trim().is_empty() {
            bail!("model.id must not be empty");
        }
        if generation.min_new_tokens == 0 {
            bail!("generation.min_new_tokens must be at least 1");
        }
        if generation.min_new_tokens > generation.max_new_tokens_limit {
            bail!(
                "generation.min_new_tokens ({}) exceeds generation.max_new_tokens_limit ({})",
                generation.min_new_tokens,
                generation.max_new_tokens_limit
            );
        }
        if generation.step == 0 {
            bail!("generation.step must be at least 1");
        }
        if self.chat.context_turns == 0 {
            bail!("chat.context_turns must be at least 1");
        }
        Ok(())
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            revision: self.model.revision.clone(),
            files: self.model.files.clone(),
        }
    }
}

impl GenerationConfig {
    /// Fixed session parameters, with `max_new_tokens` as the starting value.
    pub fn params(&self) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.max_new_tokens,
            temperature: self.temperature,
            do_sample: self.do_sample,
            repetition_penalty: self.repetition_penalty,
            pad_token_id: self.pad_token_id,
        }
    }
}

impl ProviderConfig {
    /// Get API key from config or environment
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .filter(|key| !key.trim().is_empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.chat.context_turns, 4);
        assert_eq!(config.generation.params(), GenerationParams::default());
        assert_eq!(config.load_options(), LoadOptions::default());
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[model]\nid = \"gpt2\"\n\n[generation]\nmax_new_tokens = 30\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.model.id, "gpt2");
        assert_eq!(config.model.revision, "main");
        assert_eq!(config.generation.max_new_tokens, 30);
        assert_eq!(config.generation.step, 5);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.generation.min_new_tokens = 20;
        config.provider.api_key = Some("abc".to_string());
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.generation, config.generation);
        assert_eq!(loaded.provider, config.provider);
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn rejects_bad_ranges() {
        let mut config = Config::default();
        config.generation.min_new_tokens = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generation.min_new_tokens = 200;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.generation.step = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.chat.context_turns = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_prefers_config_value() {
        let provider = ProviderConfig {
            api_key: Some("from-config".to_string()),
            api_key_env: Some("PARLEY_TEST_UNSET_VARIABLE".to_string()),
            ..ProviderConfig::default()
        };
        assert_eq!(provider.get_api_key().as_deref(), Some("from-config"));

        let provider = ProviderConfig {
            api_key: None,
            api_key_env: Some("PARLEY_TEST_UNSET_VARIABLE".to_string()),
            ..ProviderConfig::default()
        };
        assert_eq!(provider.get_api_key(), None);
    }
}
