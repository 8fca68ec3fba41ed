//! Configuration for demoflow.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DEMOFLOW_HOME, DEMOFLOW_BASE_URL,
//!    DEMOFLOW_MODEL, DEMOFLOW_API_KEY)
//! 2. Config file (.demoflow/config.yaml)
//! 3. Defaults (~/.demoflow)
//!
//! Config file discovery searches the current directory and its parents
//! for .demoflow/config.yaml.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub home: Option<String>,

    #[serde(default)]
    pub generator: Option<GeneratorFileConfig>,

    #[serde(default)]
    pub executors: Option<ExecutorFileConfig>,

    #[serde(default)]
    pub step_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratorFileConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub retries: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

/// Helper command lines per executor kind, e.g.
/// `web: ["demoflow-web-agent", "--headless"]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorFileConfig {
    pub web: Option<Vec<String>>,
    pub desktop: Option<Vec<String>>,
    pub app_action: Option<Vec<String>>,
}

/// Resolved generator settings
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub base_url: String,
    pub model: String,
    /// Extra attempts after the first on schema-validation failure
    pub retries: u32,
    pub timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            retries: 2,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Resolved executor helper commands
#[derive(Debug, Clone, Default)]
pub struct ExecutorCommands {
    pub web: Option<Vec<String>>,
    pub desktop: Option<Vec<String>>,
    pub app_action: Option<Vec<String>>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to demoflow home (persisted runs live underneath)
    pub home: PathBuf,

    pub generator: GeneratorSettings,

    pub executors: ExecutorCommands,

    /// Default per-attempt step timeout when a step declares none
    pub step_timeout: Duration,

    /// Path to config file (if one was found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Directory holding persisted run results
    pub fn runs_dir(&self) -> PathBuf {
        self.home.join("runs")
    }

    /// API key for the generation service, from the environment
    pub fn api_key(&self) -> String {
        std::env::var("DEMOFLOW_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or_default()
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".demoflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            return None;
        }
    }
}

fn resolve() -> Result<ResolvedConfig> {
    let config_file = find_config_file();
    let file: ConfigFile = match &config_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        }
        None => ConfigFile::default(),
    };

    // Home: env > file > ~/.demoflow
    let home = if let Ok(home) = std::env::var("DEMOFLOW_HOME") {
        PathBuf::from(home)
    } else if let Some(home) = &file.home {
        let base = config_file
            .as_ref()
            .and_then(|p| p.parent())
            .and_then(|p| p.parent())
            .map(PathBuf::from)
            .unwrap_or_default();
        base.join(home)
    } else {
        dirs::home_dir()
            .context("Could not determine home directory")?
            .join(".demoflow")
    };

    let mut generator = GeneratorSettings::default();
    if let Some(g) = &file.generator {
        if let Some(base_url) = &g.base_url {
            generator.base_url = base_url.clone();
        }
        if let Some(model) = &g.model {
            generator.model = model.clone();
        }
        if let Some(retries) = g.retries {
            generator.retries = retries;
        }
        if let Some(secs) = g.timeout_seconds {
            generator.timeout = Duration::from_secs(secs);
        }
    }
    if let Ok(base_url) = std::env::var("DEMOFLOW_BASE_URL") {
        generator.base_url = base_url;
    }
    if let Ok(model) = std::env::var("DEMOFLOW_MODEL") {
        generator.model = model;
    }

    let executors = file
        .executors
        .map(|e| ExecutorCommands {
            web: e.web,
            desktop: e.desktop,
            app_action: e.app_action,
        })
        .unwrap_or_default();

    Ok(ResolvedConfig {
        home,
        generator,
        executors,
        step_timeout: Duration::from_secs(file.step_timeout_seconds.unwrap_or(90)),
        config_file,
    })
}

/// Get the resolved configuration (cached after first call)
pub fn get() -> Result<&'static ResolvedConfig> {
    match CONFIG.get_or_init(|| resolve().map_err(|e| format!("{:#}", e))) {
        Ok(config) => Ok(config),
        Err(message) => anyhow::bail!("Configuration error: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_parsing() {
        let yaml = r#"
home: state
generator:
  model: test-model
  retries: 1
executors:
  web: ["web-agent", "--headless"]
step_timeout_seconds: 30
"#;
        let file: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(file.home.as_deref(), Some("state"));
        assert_eq!(
            file.generator.as_ref().unwrap().model.as_deref(),
            Some("test-model")
        );
        assert_eq!(
            file.executors.as_ref().unwrap().web.as_ref().unwrap()[0],
            "web-agent"
        );
        assert_eq!(file.step_timeout_seconds, Some(30));
    }

    #[test]
    fn test_empty_config_parses() {
        let file: ConfigFile = serde_yaml::from_str("{}").unwrap();
        assert!(file.home.is_none());
        assert!(file.generator.is_none());
    }
}
