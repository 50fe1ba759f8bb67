use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_PATH: &str = "config/server.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Upper bound on analyses running at once. `None` leaves spawning unbounded.
    pub max_concurrent: Option<usize>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: "python".to_string(),
            args: vec!["prediction.py".to_string()],
            working_dir: None,
            max_concurrent: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub artifact_dir: Option<PathBuf>,
    pub serving_prefix: String,
    pub cors_allowed_origin: Option<String>,
    pub analyzer: AnalyzerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            upload_dir: PathBuf::from("uploads"),
            artifact_dir: None,
            serving_prefix: "heatmaps".to_string(),
            cors_allowed_origin: None,
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads the YAML file named by `PREDICT_CONFIG` (or `config/server.yaml` when
    /// present), then applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var("PREDICT_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&config_str).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, serde_yaml::Error> {
        let mut config: Self = serde_yaml::from_str(config_str)?;
        config.analyzer.max_concurrent = config.analyzer.max_concurrent.filter(|&n| n > 0);
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PORT",
                value: port,
            })?;
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ARTIFACT_DIR") {
            self.artifact_dir = Some(PathBuf::from(dir));
        }
        if let Some(prefix) = lookup("SERVING_PREFIX") {
            self.serving_prefix = prefix;
        }
        if let Some(origin) = lookup("CORS_ALLOWED_ORIGIN") {
            self.cors_allowed_origin = Some(origin);
        }
        if let Some(command) = lookup("ANALYZER_COMMAND") {
            self.analyzer.command = command;
        }
        if let Some(args) = lookup("ANALYZER_ARGS") {
            self.analyzer.args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(dir) = lookup("ANALYZER_WORKING_DIR") {
            self.analyzer.working_dir = Some(PathBuf::from(dir));
        }
        if let Some(limit) = lookup("ANALYZER_MAX_CONCURRENT") {
            let parsed: usize = limit.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "ANALYZER_MAX_CONCURRENT",
                value: limit.clone(),
            })?;
            self.analyzer.max_concurrent = (parsed > 0).then_some(parsed);
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Directory the analyzer runs in; relative artifact paths resolve against it.
    pub fn analyzer_base_dir(&self) -> PathBuf {
        match &self.analyzer.working_dir {
            Some(dir) => absolutize(dir),
            None => absolutize(Path::new(".")),
        }
    }

    /// Root served under the serving prefix. Falls back to the analyzer's working directory.
    pub fn artifact_root(&self) -> PathBuf {
        match &self.artifact_dir {
            Some(dir) => absolutize(dir),
            None => self.analyzer_base_dir(),
        }
    }

    pub fn serving_prefix(&self) -> &str {
        self.serving_prefix.trim_matches('/')
    }
}

pub(crate) fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            log::warn!("Failed to get the current working directory: {}", e);
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_original_service() {
        let config = AppConfig::default();
        assert_eq!(config.port, 3000);
        assert_eq!(config.serving_prefix(), "heatmaps");
        assert_eq!(config.analyzer.command, "python");
        assert_eq!(config.analyzer.args, vec!["prediction.py"]);
        assert!(config.analyzer.max_concurrent.is_none());
    }

    #[test]
    fn yaml_overrides_only_given_keys() {
        let yaml = r#"
port: 8081
analyzer:
  command: /usr/bin/python3
  max_concurrent: 4
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.port, 8081);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.analyzer.command, "/usr/bin/python3");
        assert_eq!(config.analyzer.args, vec!["prediction.py"]);
        assert_eq!(config.analyzer.max_concurrent, Some(4));
    }

    #[test]
    fn yaml_zero_limit_means_unbounded() {
        let config = AppConfig::from_yaml("analyzer:\n  max_concurrent: 0\n").unwrap();
        assert_eq!(config.analyzer.max_concurrent, None);
    }

    #[test]
    fn env_overrides_split_analyzer_args() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("PORT", "9000"),
                ("ANALYZER_ARGS", "-u  predict.py --cpu"),
                ("ANALYZER_MAX_CONCURRENT", "0"),
                ("SERVING_PREFIX", "/maps/"),
            ]))
            .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.analyzer.args, vec!["-u", "predict.py", "--cpu"]);
        assert_eq!(config.analyzer.max_concurrent, None);
        assert_eq!(config.serving_prefix(), "maps");
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "PORT", .. }));
    }

    #[test]
    fn artifact_root_falls_back_to_analyzer_dir() {
        let mut config = AppConfig::default();
        config.analyzer.working_dir = Some(PathBuf::from("/srv/model"));
        assert_eq!(config.artifact_root(), PathBuf::from("/srv/model"));

        config.artifact_dir = Some(PathBuf::from("/srv/heatmaps"));
        assert_eq!(config.artifact_root(), PathBuf::from("/srv/heatmaps"));
    }
}
