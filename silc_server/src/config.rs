use silc_network::config::ServerConfig;
use silc_network::errors::ConfigError;
use std::collections::HashMap;
use tracing_core::LevelFilter;
use std::{
    path::{
        Path,
        PathBuf,
    },
    fs,
};

#[derive(Clone,Debug,serde::Serialize,serde::Deserialize)]
#[serde(rename_all="lowercase")]
pub enum BuiltinLogTarget
{
    Stdout,
    Stderr,
}

#[derive(Clone,Debug,serde::Serialize,serde::Deserialize)]
#[serde(untagged)]
pub enum LogTarget
{
    File { filename: PathBuf },
    Builtin(BuiltinLogTarget),
}

#[derive(Clone,Copy,Debug,PartialEq,serde::Serialize,serde::Deserialize)]
#[serde(rename_all ="lowercase")]
pub enum LogLevel
{
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

#[derive(Clone,Debug,serde::Deserialize)]
pub struct LogEntry
{
    pub target: LogTarget,
    #[serde(default)]
    pub modules: Vec<String>,
    pub level: Option<LogLevel>,
}

#[derive(Clone,Debug,serde::Deserialize)]
#[serde(rename_all="kebab-case")]
pub struct LoggingConfig
{
    pub dir: PathBuf,
    pub default_level: Option<LogLevel>,
    #[serde(default)]
    pub module_levels: HashMap<String, LogLevel>,
    pub targets: Vec<LogEntry>,
}

fn default_tick_interval() -> u64
{
    1
}

/// Everything `silcd` reads from its config file: the protocol core's
/// settings, how often the timers run, and where the logs go
#[derive(Clone,Debug,serde::Deserialize)]
#[serde(rename_all="kebab-case")]
pub struct FileConfig
{
    pub server: ServerConfig,
    /// Seconds between runs of the pending-command and expiry timers
    #[serde(default = "default_tick_interval")]
    pub tick_interval: u64,
    pub log: LoggingConfig,
}

impl FileConfig
{
    pub fn load_file(filename: impl AsRef<Path>) -> Result<Self, ConfigError>
    {
        let text = fs::read_to_string(filename)?;
        Self::from_json5(&text)
    }

    pub fn from_json5(text: &str) -> Result<Self, ConfigError>
    {
        Ok(json5::from_str(text)?)
    }
}

impl From<LogLevel> for LevelFilter
{
    fn from(arg: LogLevel) -> LevelFilter
    {
        match arg
        {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info  => LevelFilter::INFO,
            LogLevel::Warn  => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Off   => LevelFilter::OFF,
        }
    }
}
