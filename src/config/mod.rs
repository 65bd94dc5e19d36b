use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use toml::Value;

use crate::server::{DEFAULT_HOST, DEFAULT_PORT};

pub const DEFAULT_CONFIG_FILE: &str = "lidarlink.toml";
pub const CONFIG_PATH_ARG: &str = "--config";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub listener: ListenerConfig,
    pub status: StatusConfig,
    pub console: ConsoleConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub human_friendly: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            human_friendly: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    pub read_poll_interval_ms: u64,
    pub accept_retry_interval_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            read_poll_interval_ms: 100,
            accept_retry_interval_ms: 250,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StatusConfig {
    pub report_interval_ms: u64,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ConsoleConfig {
    pub enabled: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    Defaults,
    File(PathBuf),
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Defaults => write!(f, "built-in defaults"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl AppConfig {
    // `--config <path>` must come first when present; everything after it is treated as
    // `--section.key value` overrides.
    pub fn load_with_discovery(
        args: impl IntoIterator<Item = String>,
    ) -> Result<(Self, ConfigSource), ConfigError> {
        let mut args: Vec<String> = args.into_iter().collect();
        let source = if args.first().map(String::as_str) == Some(CONFIG_PATH_ARG) {
            if args.len() < 2 {
                return Err(ConfigError::MissingValueForArg {
                    key: "config".to_owned(),
                });
            }
            let path = args.remove(1);
            args.remove(0);
            ConfigSource::File(PathBuf::from(path))
        } else if Path::new(DEFAULT_CONFIG_FILE).is_file() {
            ConfigSource::File(PathBuf::from(DEFAULT_CONFIG_FILE))
        } else {
            ConfigSource::Defaults
        };

        let config = match &source {
            ConfigSource::File(path) => Self::load_from_toml_with_args(path, args)?,
            ConfigSource::Defaults => Self::load_defaults_with_args(args)?,
        };
        Ok((config, source))
    }

    pub fn load_from_toml_with_args(
        path: impl AsRef<Path>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let path_display = path.as_ref().to_string_lossy().to_string();
        let toml_content = fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Io {
            path: path_display.clone(),
            source,
        })?;

        let file_value: Value = toml_content
            .parse()
            .map_err(|source| ConfigError::TomlParse {
                path: path_display,
                source,
            })?;

        let mut root_value = defaults_as_toml()?;
        merge_tables(&mut root_value, file_value);
        Self::finish(root_value, args)
    }

    pub fn load_defaults_with_args(
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        Self::finish(defaults_as_toml()?, args)
    }

    fn finish(
        mut root_value: Value,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, ConfigError> {
        let overrides = parse_cli_overrides(args)?;
        for (key_path, raw_value) in overrides {
            apply_override(&mut root_value, &key_path, &raw_value)?;
        }

        root_value.try_into().map_err(ConfigError::Deserialize)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    TomlParse {
        path: String,
        source: toml::de::Error,
    },
    Deserialize(toml::de::Error),
    SerializeDefaults(toml::ser::Error),
    MissingValueForArg {
        key: String,
    },
    InvalidArgFormat {
        arg: String,
    },
    InvalidPath {
        key: String,
    },
    UnknownPath {
        key: String,
    },
    UnsupportedOverrideType {
        key: String,
    },
    InvalidValueForType {
        key: String,
        expected: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config file '{path}': {source}")
            }
            Self::TomlParse { path, source } => {
                write!(f, "failed to parse TOML config '{path}': {source}")
            }
            Self::Deserialize(source) => write!(f, "failed to deserialize config: {source}"),
            Self::SerializeDefaults(source) => {
                write!(f, "failed to render default config: {source}")
            }
            Self::MissingValueForArg { key } => {
                write!(f, "missing value for CLI argument '--{key}'")
            }
            Self::InvalidArgFormat { arg } => write!(
                f,
                "invalid CLI argument format '{arg}', expected '--section.key value'"
            ),
            Self::InvalidPath { key } => write!(f, "invalid override key path '{key}'"),
            Self::UnknownPath { key } => write!(f, "unknown override key path '{key}'"),
            Self::UnsupportedOverrideType { key } => {
                write!(f, "override not supported for complex TOML type at '{key}'")
            }
            Self::InvalidValueForType {
                key,
                expected,
                value,
            } => write!(
                f,
                "invalid value '{value}' for '{key}', expected type {expected}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

fn defaults_as_toml() -> Result<Value, ConfigError> {
    Value::try_from(AppConfig::default()).map_err(ConfigError::SerializeDefaults)
}

// Values from `overlay` win; nested tables are merged key by key so a file only has to
// mention the settings it changes.
fn merge_tables(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                let nested = overlay_value.is_table()
                    && base_table.get(&key).is_some_and(Value::is_table);
                match base_table.get_mut(&key) {
                    Some(base_value) if nested => merge_tables(base_value, overlay_value),
                    _ => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parse_cli_overrides(
    args: impl IntoIterator<Item = String>,
) -> Result<Vec<(String, String)>, ConfigError> {
    let mut parsed = Vec::new();
    let mut iter = args.into_iter();

    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--") else {
            return Err(ConfigError::InvalidArgFormat { arg });
        };

        if stripped.is_empty() {
            return Err(ConfigError::InvalidArgFormat { arg });
        }

        let value = iter.next().ok_or_else(|| ConfigError::MissingValueForArg {
            key: stripped.to_owned(),
        })?;

        parsed.push((stripped.to_owned(), value));
    }

    Ok(parsed)
}

fn apply_override(root: &mut Value, key_path: &str, raw_value: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = key_path.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err(ConfigError::InvalidPath {
            key: key_path.to_owned(),
        });
    }

    let unknown = || ConfigError::UnknownPath {
        key: key_path.to_owned(),
    };

    let mut current = root;
    for part in &parts {
        current = current
            .as_table_mut()
            .ok_or_else(unknown)?
            .get_mut(*part)
            .ok_or_else(unknown)?;
    }

    *current = parse_value_using_current_type(key_path, raw_value, current)?;
    Ok(())
}

fn parse_value_using_current_type(
    key_path: &str,
    raw_value: &str,
    current_value: &Value,
) -> Result<Value, ConfigError> {
    let invalid = |expected: &'static str| ConfigError::InvalidValueForType {
        key: key_path.to_owned(),
        expected,
        value: raw_value.to_owned(),
    };

    match current_value {
        Value::String(_) => Ok(Value::String(raw_value.to_owned())),
        Value::Integer(_) => raw_value
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| invalid("integer")),
        Value::Float(_) => raw_value
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid("float")),
        Value::Boolean(_) => raw_value
            .parse::<bool>()
            .map(Value::Boolean)
            .map_err(|_| invalid("boolean")),
        Value::Datetime(_) | Value::Array(_) | Value::Table(_) => {
            Err(ConfigError::UnsupportedOverrideType {
                key: key_path.to_owned(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{AppConfig, ConfigError, ConfigSource, CONFIG_PATH_ARG};

    fn write_temp_config(content: &str, suffix: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "lidarlink-config-test-{suffix}-{}.toml",
            std::process::id()
        ));
        fs::write(&path, content).expect("failed to write temp config");
        path
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    #[test]
    fn defaults_match_reference_listener_address() {
        let config = AppConfig::load_defaults_with_args(Vec::new()).expect("defaults should load");

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.listener.host, "0.0.0.0");
        assert_eq!(config.listener.port, 5000);
        assert_eq!(config.listener.read_poll_interval_ms, 100);
        assert_eq!(config.status.report_interval_ms, 0);
        assert!(config.console.enabled);
    }

    #[test]
    fn partial_file_is_layered_over_defaults() {
        let path = write_temp_config(
            r#"
[listener]
host = "192.168.1.50"
port = 7777
"#,
            "partial",
        );

        let config = AppConfig::load_from_toml_with_args(&path, Vec::new())
            .expect("partial config should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.listener.host, "192.168.1.50");
        assert_eq!(config.listener.port, 7777);
        assert_eq!(config.listener.accept_retry_interval_ms, 250);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn argv_overrides_matching_toml_paths() {
        let path = write_temp_config(
            r#"
[logging]
level = "debug"

[listener]
port = 7777
"#,
            "override",
        );

        let config = AppConfig::load_from_toml_with_args(
            &path,
            args(&[
                "--logging.level",
                "verbose",
                "--listener.port",
                "6000",
                "--console.enabled",
                "false",
                "--status.report_interval_ms",
                "1000",
            ]),
        )
        .expect("config with overrides should load");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert_eq!(config.logging.level, "verbose");
        assert_eq!(config.listener.port, 6000);
        assert!(!config.console.enabled);
        assert_eq!(config.status.report_interval_ms, 1000);
    }

    #[test]
    fn rejects_unknown_override_path() {
        let err = AppConfig::load_defaults_with_args(args(&["--listener.nonexistent", "x"]))
            .expect_err("unknown override key should fail");
        assert!(matches!(err, ConfigError::UnknownPath { .. }));
    }

    #[test]
    fn rejects_override_with_wrong_type() {
        let err = AppConfig::load_defaults_with_args(args(&["--listener.port", "many"]))
            .expect_err("non-integer port should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValueForType {
                expected: "integer",
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_port_fails_deserialization() {
        let err = AppConfig::load_defaults_with_args(args(&["--listener.port", "70000"]))
            .expect_err("port above u16 range should fail");
        assert!(matches!(err, ConfigError::Deserialize(_)));
    }

    #[test]
    fn rejects_unknown_keys_in_file() {
        let path = write_temp_config("[listener]\nbacklog = 5\n", "unknown-key");

        let err = AppConfig::load_from_toml_with_args(&path, Vec::new())
            .expect_err("unknown file key should fail");
        fs::remove_file(path).expect("temp config cleanup should succeed");

        assert!(matches!(err, ConfigError::Deserialize(_)));
    }

    #[test]
    fn explicit_config_path_is_consumed_before_overrides() {
        let path = write_temp_config("[listener]\nport = 7001\n", "discovery");
        let path_arg = path.to_string_lossy().to_string();

        let (config, source) = AppConfig::load_with_discovery(vec![
            CONFIG_PATH_ARG.to_owned(),
            path_arg,
            "--listener.host".to_owned(),
            "127.0.0.1".to_owned(),
        ])
        .expect("explicit config should load");
        fs::remove_file(&path).expect("temp config cleanup should succeed");

        assert_eq!(source, ConfigSource::File(path));
        assert_eq!(config.listener.port, 7001);
        assert_eq!(config.listener.host, "127.0.0.1");
    }

    #[test]
    fn explicit_config_path_requires_a_value() {
        let err = AppConfig::load_with_discovery(args(&[CONFIG_PATH_ARG]))
            .expect_err("dangling --config should fail");
        assert!(matches!(err, ConfigError::MissingValueForArg { .. }));
    }

    #[test]
    fn missing_explicit_config_file_is_an_io_error() {
        let err = AppConfig::load_with_discovery(args(&[
            CONFIG_PATH_ARG,
            "/nonexistent/lidarlink.toml",
        ]))
        .expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
