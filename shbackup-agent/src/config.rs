use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const CREDENTIAL_FILE: &str = "apikey.lic";
pub const SETTINGS_FILE: &str = "agent.toml";
const SETTINGS_ENV: &str = "SHBACKUP_CONFIG";

const KEY_API_KEY: &str = "API_KEY";
const KEY_BASE_URL: &str = "API_BASE_URL";
const KEY_LOCAL_FOLDER: &str = "LOCAL_FOLDER_PATH";

/// Tunables read from the optional `agent.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    pub archive_prefix: String,
    pub loc_tag: String,
    pub log_dir: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            archive_prefix: "Tallybackupason".to_string(),
            loc_tag: "TallyBackups".to_string(),
            log_dir: PathBuf::from("logs"),
            request_timeout_secs: 300,
        }
    }
}

impl AgentSettings {
    /// Load from `$SHBACKUP_CONFIG`, else `./agent.toml` when present, else defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = match std::env::var_os(SETTINGS_ENV) {
            Some(p) => PathBuf::from(p),
            None => {
                let local = PathBuf::from(SETTINGS_FILE);
                if !local.exists() {
                    return Ok(Self::default());
                }
                local
            }
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let settings: AgentSettings = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.archive_prefix.is_empty() {
            anyhow::bail!("archive_prefix must not be empty");
        }
        if self.loc_tag.is_empty() {
            anyhow::bail!("loc_tag must not be empty");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

/// Credentials and endpoints for one run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_base_url: String,
    api_key: Option<String>,
    pub local_folder: Option<PathBuf>,
    pub settings: AgentSettings,
}

impl AgentConfig {
    /// Merge the credential file with the process environment; the environment wins.
    pub fn load(settings: AgentSettings) -> anyhow::Result<Self> {
        let mut values = match credential_path() {
            Some(path) => read_credentials(&path)?,
            None => HashMap::new(),
        };
        for key in [KEY_API_KEY, KEY_BASE_URL, KEY_LOCAL_FOLDER] {
            if let Ok(v) = std::env::var(key) {
                values.insert(key.to_string(), v);
            }
        }
        Self::from_values(&values, settings)
    }

    pub fn from_values(values: &HashMap<String, String>, settings: AgentSettings) -> anyhow::Result<Self> {
        let non_empty = |key: &str| {
            values
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let config = AgentConfig {
            api_base_url: non_empty(KEY_BASE_URL)
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            api_key: non_empty(KEY_API_KEY),
            local_folder: non_empty(KEY_LOCAL_FOLDER).map(PathBuf::from),
            settings,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.api_base_url.is_empty() {
            anyhow::bail!("Missing {KEY_BASE_URL}");
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            anyhow::bail!("{KEY_BASE_URL} must be an http(s) URL: {}", self.api_base_url);
        }
        Ok(())
    }

    /// The API key; every mode except registration needs one.
    pub fn api_key(&self) -> anyhow::Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Missing {KEY_API_KEY}"))
    }
}

/// `~/apikey.lic` when it exists, else `./apikey.lic` when it exists.
pub fn credential_path() -> Option<PathBuf> {
    find_credentials(dirs::home_dir().as_deref())
}

fn find_credentials(home: Option<&Path>) -> Option<PathBuf> {
    let home = home.map(|h| h.join(CREDENTIAL_FILE));
    let local = PathBuf::from(CREDENTIAL_FILE);
    home.into_iter().chain(std::iter::once(local)).find(|p| p.exists())
}

/// Where registration writes the credential file.
pub fn home_credential_path() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(home.join(CREDENTIAL_FILE))
}

fn read_credentials(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let iter = dotenvy::from_path_iter(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    let mut values = HashMap::new();
    for item in iter {
        let (key, value) =
            item.map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        values.insert(key, value);
    }
    Ok(values)
}

/// Write a credential file in the same dotenv layout `load` reads.
pub fn write_credentials(path: &Path, api_key: &str, api_base_url: &str) -> anyhow::Result<()> {
    let content = format!("{KEY_API_KEY}={api_key}\n{KEY_BASE_URL}={api_base_url}\n");
    std::fs::write(path, content)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_settings() {
        let toml_str = r#"
archive_prefix = "Backup"
loc_tag = "Nightly"
"#;
        let settings: AgentSettings = toml::from_str(toml_str).unwrap();
        settings.validate().unwrap();
        assert_eq!(settings.archive_prefix, "Backup");
        assert_eq!(settings.loc_tag, "Nightly");
        assert_eq!(settings.log_dir, PathBuf::from("logs"));
        assert_eq!(settings.request_timeout_secs, 300);
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let settings: AgentSettings = toml::from_str(r#"archive_prefix = """#).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_config_from_values() {
        let config = AgentConfig::from_values(
            &values(&[
                ("API_KEY", " key-123 "),
                ("API_BASE_URL", "https://backups.example.com/"),
                ("LOCAL_FOLDER_PATH", "/data/tally"),
            ]),
            AgentSettings::default(),
        )
        .unwrap();
        assert_eq!(config.api_key().unwrap(), "key-123");
        assert_eq!(config.api_base_url, "https://backups.example.com");
        assert_eq!(config.local_folder, Some(PathBuf::from("/data/tally")));
    }

    #[test]
    fn test_missing_key_only_fails_on_use() {
        let config = AgentConfig::from_values(
            &values(&[("API_BASE_URL", "http://localhost:8000"), ("API_KEY", "")]),
            AgentSettings::default(),
        )
        .unwrap();
        assert!(config.api_key().is_err());
        assert_eq!(config.local_folder, None);
    }

    #[test]
    fn test_bad_base_url_rejected() {
        assert!(AgentConfig::from_values(&values(&[]), AgentSettings::default()).is_err());
        assert!(AgentConfig::from_values(
            &values(&[("API_BASE_URL", "backups.example.com")]),
            AgentSettings::default()
        )
        .is_err());
    }

    #[test]
    fn test_credentials_found_in_home() {
        let home = tempfile::tempdir().unwrap();
        assert_eq!(find_credentials(Some(home.path())), None);

        let path = home.path().join(CREDENTIAL_FILE);
        write_credentials(&path, "key-789", "https://api.example.com").unwrap();
        assert_eq!(find_credentials(Some(home.path())), Some(path));
    }

    #[test]
    fn test_home_credential_path() {
        let path = home_credential_path().unwrap();
        assert_eq!(path, dirs::home_dir().unwrap().join(CREDENTIAL_FILE));
    }

    #[test]
    fn test_credentials_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CREDENTIAL_FILE);
        write_credentials(&path, "key-456", "https://api.example.com").unwrap();

        let values = read_credentials(&path).unwrap();
        assert_eq!(values.get("API_KEY").map(String::as_str), Some("key-456"));
        assert_eq!(
            values.get("API_BASE_URL").map(String::as_str),
            Some("https://api.example.com")
        );
    }
}
