use crate::capture::DEFAULT_TICK_INTERVAL;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};
use thiserror::Error;
use toml_edit::{DocumentMut, Item, Table, value};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config document: {0}")]
    Edit(#[from] toml_edit::TomlError),
    #[error("config key must look like `section.key`, got `{0}`")]
    BadKey(String),
    #[error("unknown config key `{0}`")]
    UnknownKey(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub export: ExportConfig,
    pub scan: ScanConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/facturas.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub dir: String,
    pub txt_file: String,
    pub xlsx_file: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: "data".to_string(),
            txt_file: "facturas_data.txt".to_string(),
            xlsx_file: "facturas_data.xlsx".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub tick_interval_ms: u64,
    pub max_frames_per_tick: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            max_frames_per_tick: 1,
        }
    }
}

impl ScanConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl ExportConfig {
    pub fn txt_path(&self) -> PathBuf {
        Path::new(&self.dir).join(&self.txt_file)
    }

    pub fn xlsx_path(&self) -> PathBuf {
        Path::new(&self.dir).join(&self.xlsx_file)
    }
}

/// Keys `set_value` accepts, with whether the value is an integer.
const KNOWN_KEYS: &[(&str, &str, bool)] = &[
    ("storage", "db_path", false),
    ("export", "dir", false),
    ("export", "txt_file", false),
    ("export", "xlsx_file", false),
    ("scan", "tick_interval_ms", true),
    ("scan", "max_frames_per_tick", true),
];

impl Config {
    /// A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Update one `section.key` in place, keeping the rest of the file
    /// (comments included) untouched. Creates the file if needed.
    pub fn set_value(
        path: impl AsRef<Path>,
        key: &str,
        new_value: &str,
    ) -> Result<(), ConfigError> {
        let (section, name) = key
            .split_once('.')
            .ok_or_else(|| ConfigError::BadKey(key.to_string()))?;
        let &(_, _, numeric) = KNOWN_KEYS
            .iter()
            .find(|(s, k, _)| *s == section && *k == name)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut doc = content.parse::<DocumentMut>()?;

        if !doc.contains_table(section) {
            doc[section] = Item::Table(Table::new());
        }
        doc[section][name] = match (numeric, new_value.parse::<i64>()) {
            (true, Ok(n)) => value(n),
            (true, Err(_)) => {
                return Err(ConfigError::BadKey(format!("{key} = {new_value}")));
            }
            (false, _) => value(new_value),
        };

        // validate before writing
        toml::from_str::<Config>(&doc.to_string())?;
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, doc.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = Config::load("/nonexistent/config.toml").unwrap();
        assert_eq!(cfg.storage.db_path, "data/facturas.db");
        assert_eq!(cfg.scan.tick_interval(), Duration::from_millis(20));
        assert_eq!(cfg.export.xlsx_path(), Path::new("data/facturas_data.xlsx"));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[export]\ndir = \"out\"\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.export.txt_path(), Path::new("out/facturas_data.txt"));
        assert_eq!(cfg.scan.max_frames_per_tick, 1);
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scan]\ntick_interval_ms = \"fast\"\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_set_value_keeps_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "# local settings\n[storage]\ndb_path = \"a.db\"\n").unwrap();

        Config::set_value(&path, "storage.db_path", "b.db").unwrap();
        Config::set_value(&path, "scan.tick_interval_ms", "50").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# local settings"));
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.storage.db_path, "b.db");
        assert_eq!(cfg.scan.tick_interval_ms, 50);
    }

    #[test]
    fn test_set_value_rejects_bad_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(matches!(
            Config::set_value(&path, "db_path", "x"),
            Err(ConfigError::BadKey(_))
        ));
        assert!(matches!(
            Config::set_value(&path, "storage.color", "x"),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(Config::set_value(&path, "scan.tick_interval_ms", "soon").is_err());
        assert!(!path.exists());
    }
}
