use anyhow::{Context, Result};
use ini::Ini;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Connection defaults read from a config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub authentication: AuthenticationConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Contact points, `host` or `host:port`
    pub hosts: Vec<String>,
    /// Connect timeout in seconds
    pub timeout: Option<u64>,
    /// Request timeout in seconds
    pub request_timeout: Option<u64>,
    pub fetch_size: Option<i32>,
    pub consistency: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticationConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub keyspace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub date_format: Option<String>,
    /// `local`, `utc` or a fixed offset such as `+08:00`
    pub time_zone: Option<String>,
}

impl Config {
    /// Load `config_path`, or the first config found in the standard locations
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_default(),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                toml::from_str(&content).with_context(|| "Failed to parse TOML config")?
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).with_context(|| "Failed to parse YAML config")?
            }
            Some("json") => {
                serde_json::from_str(&content).with_context(|| "Failed to parse JSON config")?
            }
            _ => {
                return Err(anyhow::anyhow!(
                    "Unsupported config file format: {}",
                    path.display()
                ))
            }
        };

        Ok(config)
    }

    fn load_default() -> Result<Self> {
        match Self::default_paths().into_iter().find(|path| path.exists()) {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Read connection defaults from a cqlsh `cqlshrc`
    ///
    /// An explicit path must exist. Without one, `~/.cassandra/cqlshrc` is
    /// used when present.
    pub fn load_cqlshrc(path: Option<&Path>) -> Result<Option<Self>> {
        let path = match path {
            Some(path) if !path.exists() => {
                anyhow::bail!("cqlshrc file not found: {}", path.display())
            }
            Some(path) => path.to_path_buf(),
            None => match dirs::home_dir().map(|home| home.join(".cassandra").join("cqlshrc")) {
                Some(path) if path.exists() => path,
                _ => return Ok(None),
            },
        };

        let rc = Ini::load_from_file(&path)
            .with_context(|| format!("Failed to parse cqlshrc: {}", path.display()))?;
        Self::from_cqlshrc(&rc)
            .with_context(|| format!("Invalid cqlshrc: {}", path.display()))
            .map(Some)
    }

    fn from_cqlshrc(rc: &Ini) -> Result<Self> {
        let get = |section: &str, key: &str| {
            rc.section(Some(section))
                .and_then(|props| props.get(key))
                .map(str::trim)
                .filter(|value| !value.is_empty())
        };
        let seconds = |key: &str| -> Result<Option<u64>> {
            get("connection", key)
                .map(|value| {
                    value
                        .parse::<f64>()
                        .ok()
                        .filter(|secs| *secs >= 0.0)
                        .map(|secs| secs.ceil() as u64)
                        .with_context(|| format!("connection.{} is not a number: {}", key, value))
                })
                .transpose()
        };

        let port = get("connection", "port");
        let hosts = get("connection", "hostname")
            .map(|hostnames| {
                hostnames
                    .split(',')
                    .map(str::trim)
                    .filter(|host| !host.is_empty())
                    .map(|host| match port {
                        Some(port) if !host.contains(':') => format!("{}:{}", host, port),
                        _ => host.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            connection: ConnectionConfig {
                hosts,
                timeout: seconds("timeout")?,
                request_timeout: seconds("request_timeout")?,
                ..ConnectionConfig::default()
            },
            authentication: AuthenticationConfig {
                username: get("authentication", "username").map(str::to_string),
                password: get("authentication", "password").map(str::to_string),
                keyspace: get("authentication", "keyspace").map(str::to_string),
            },
            output: OutputConfig::default(),
        })
    }

    /// Fill every setting this config leaves open from `fallback`
    pub fn or(self, fallback: Config) -> Self {
        Self {
            connection: ConnectionConfig {
                hosts: if self.connection.hosts.is_empty() {
                    fallback.connection.hosts
                } else {
                    self.connection.hosts
                },
                timeout: self.connection.timeout.or(fallback.connection.timeout),
                request_timeout: self
                    .connection
                    .request_timeout
                    .or(fallback.connection.request_timeout),
                fetch_size: self.connection.fetch_size.or(fallback.connection.fetch_size),
                consistency: self.connection.consistency.or(fallback.connection.consistency),
            },
            authentication: AuthenticationConfig {
                username: self.authentication.username.or(fallback.authentication.username),
                password: self.authentication.password.or(fallback.authentication.password),
                keyspace: self.authentication.keyspace.or(fallback.authentication.keyspace),
            },
            output: OutputConfig {
                date_format: self.output.date_format.or(fallback.output.date_format),
                time_zone: self.output.time_zone.or(fallback.output.time_zone),
            },
        }
    }

    /// Search order: working directory, then the user config directory
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = ["cqlkit.toml", "cqlkit.yaml", "cqlkit.yml", "cqlkit.json"]
            .iter()
            .map(PathBuf::from)
            .collect();

        if let Some(config_dir) = dirs::config_dir() {
            let dir = config_dir.join("cqlkit");
            paths.extend(
                ["config.toml", "config.yaml", "config.yml", "config.json"]
                    .iter()
                    .map(|name| dir.join(name)),
            );
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_toml() {
        let file = write_config(
            ".toml",
            r#"
[connection]
hosts = ["db1", "db2:19042"]
request_timeout = 30

[authentication]
username = "reader"
password = "secret"
keyspace = "shop"
"#,
        );
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.connection.hosts, vec!["db1", "db2:19042"]);
        assert_eq!(config.connection.request_timeout, Some(30));
        assert_eq!(config.connection.timeout, None);
        assert_eq!(config.authentication.keyspace.as_deref(), Some("shop"));
    }

    #[test]
    fn test_load_yaml_and_json() {
        let yaml = write_config(".yaml", "output:\n  date_format: \"%Y-%m-%d\"\n");
        let config = Config::load(Some(yaml.path())).unwrap();
        assert_eq!(config.output.date_format.as_deref(), Some("%Y-%m-%d"));

        let json = write_config(".json", r#"{"connection": {"fetch_size": 100}}"#);
        let config = Config::load(Some(json.path())).unwrap();
        assert_eq!(config.connection.fetch_size, Some(100));
    }

    #[test]
    fn test_load_cqlshrc() {
        let rc = write_config(
            "",
            r#"
[authentication]
username = reader
password = secret
keyspace = Shop

[connection]
hostname = db1, db2:19042
port = 9142
timeout = 10
request_timeout = 2.5
"#,
        );
        let config = Config::load_cqlshrc(Some(rc.path())).unwrap().unwrap();
        assert_eq!(config.connection.hosts, vec!["db1:9142", "db2:19042"]);
        assert_eq!(config.connection.timeout, Some(10));
        assert_eq!(config.connection.request_timeout, Some(3));
        assert_eq!(config.authentication.username.as_deref(), Some("reader"));
        assert_eq!(config.authentication.keyspace.as_deref(), Some("Shop"));

        assert!(Config::load_cqlshrc(Some(Path::new("/nonexistent/cqlshrc"))).is_err());

        let bad = write_config("", "[connection]\ntimeout = soon\n");
        assert!(Config::load_cqlshrc(Some(bad.path())).is_err());
    }

    #[test]
    fn test_config_file_wins_over_cqlshrc() {
        let mut config = Config::default();
        config.connection.hosts = vec!["cfg".to_string()];
        config.authentication.username = Some("cfg_user".to_string());

        let mut rc = Config::default();
        rc.connection.hosts = vec!["rc".to_string()];
        rc.connection.timeout = Some(9);
        rc.authentication.username = Some("rc_user".to_string());
        rc.authentication.password = Some("rc_pass".to_string());

        let merged = config.or(rc);
        assert_eq!(merged.connection.hosts, vec!["cfg"]);
        assert_eq!(merged.connection.timeout, Some(9));
        assert_eq!(merged.authentication.username.as_deref(), Some("cfg_user"));
        assert_eq!(merged.authentication.password.as_deref(), Some("rc_pass"));
    }

    #[test]
    fn test_missing_and_unknown_files_are_errors() {
        assert!(Config::load(Some(Path::new("/nonexistent/cqlkit.toml"))).is_err());
        let ini = write_config(".ini", "[connection]\n");
        assert!(Config::load(Some(ini.path())).is_err());
    }
}
