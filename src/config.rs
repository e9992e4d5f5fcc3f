use booksync_core::{Frame, ResolvePolicy, Value};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Parser, Debug)]
#[command(name = "booksync", about = "Inspect booksync frames and storage backends")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "booksync.toml")]
    pub config: String,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Storage location (overrides config file)
    #[arg(long)]
    pub location: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the registered storage providers
    Providers,
    /// Draw the next values of a named counter
    Counter {
        #[arg(long)]
        name: String,

        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Build a frame from path=value assignments and print it
    Slots {
        #[arg(long = "set", value_name = "PATH=VALUE")]
        assignments: Vec<String>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_logging")]
    pub logging: LoggingConfig,

    #[serde(default = "default_session")]
    pub session: SessionConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    /// Options handed to the backend before the session begins.
    #[serde(default)]
    pub backend: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_location")]
    pub location: String,

    #[serde(default)]
    pub ignore_lock: bool,

    #[serde(default = "default_create")]
    pub create_if_nonexistent: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RegistryConfig {
    #[serde(default)]
    pub resolve_policy: ResolvePolicy,
}

fn default_logging() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        json: false,
    }
}

fn default_session() -> SessionConfig {
    SessionConfig {
        location: default_location(),
        ignore_lock: false,
        create_if_nonexistent: default_create(),
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_location() -> String {
    "mem://".to_string()
}

fn default_create() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: default_logging(),
            session: default_session(),
            registry: RegistryConfig::default(),
            backend: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Reads the config file named on the command line, falling back to
    /// defaults when it is missing, then applies CLI overrides.
    pub fn load(cli: &CliArgs) -> Self {
        let mut config = match Self::from_file(&cli.config) {
            Ok(config) => config,
            Err(ConfigError::Read { .. }) => Config::default(),
            Err(e) => {
                eprintln!("Warning: {}", e);
                Config::default()
            }
        };

        // CLI overrides
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref location) = cli.location {
            config.session.location = location.clone();
        }

        config
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// The `[backend]` table as a configuration frame.
    pub fn backend_options(&self) -> Frame {
        self.backend
            .iter()
            .map(|(key, value)| (key.clone(), toml_to_value(value)))
            .collect()
    }
}

fn toml_to_value(value: &toml::Value) -> Value {
    match value {
        toml::Value::Integer(i) => Value::Int64(*i),
        toml::Value::Float(f) => Value::Double(*f),
        toml::Value::Boolean(b) => Value::Int64(i64::from(*b)),
        toml::Value::String(s) => Value::String(s.clone()),
        toml::Value::Datetime(dt) => {
            let text = dt.to_string();
            match OffsetDateTime::parse(&text, &Rfc3339) {
                Ok(ts) => Value::Timestamp(ts),
                Err(_) => Value::String(text),
            }
        }
        toml::Value::Array(items) => Value::List(items.iter().map(toml_to_value).collect()),
        toml::Value::Table(table) => Value::Frame(
            table
                .iter()
                .map(|(key, value)| (key.clone(), toml_to_value(value)))
                .collect(),
        ),
    }
}
