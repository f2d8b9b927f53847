//! Builds the tracing subscriber described by the `log` section of the
//! server config file.

use crate::config::*;
use tracing_subscriber::{
    filter::{filter_fn, Targets},
    prelude::*,
    registry::LookupSpan,
    Layer,
};
use tracing_core::LevelFilter;
use tracing::{Level, Subscriber};

use std::{
    io::Error as IoError,
    path::Path,
};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Which events one log target records
#[derive(Debug, Clone)]
struct TargetFilter
{
    max_level: LevelFilter,
    /// Module path prefixes; empty records every module
    modules: Vec<String>,
}

impl TargetFilter
{
    fn new(entry: &LogEntry) -> Self
    {
        Self {
            max_level: entry.level.map_or(LevelFilter::TRACE, LevelFilter::from),
            modules: entry.modules.clone(),
        }
    }

    /// Events without a module path are always let through
    fn allows(&self, level: &Level, module: Option<&str>) -> bool
    {
        if *level > self.max_level
        {
            return false;
        }
        match module
        {
            Some(module) if !self.modules.is_empty() => self.modules.iter().any(|prefix| module.starts_with(prefix.as_str())),
            _ => true,
        }
    }
}

/// The formatting layer writing to one target, before any filtering
fn writer_layer<S>(target: &LogTarget, dir: &Path) -> Result<BoxedLayer<S>, IoError>
    where S: Subscriber + Send + Sync,
          for<'span> S: LookupSpan<'span>,
{
    let layer = tracing_subscriber::fmt::layer();
    Ok(match target
    {
        LogTarget::File { filename } =>
        {
            std::fs::create_dir_all(dir)?;
            layer.with_writer(tracing_appender::rolling::daily(dir, filename)).with_ansi(false).boxed()
        }
        LogTarget::Builtin(BuiltinLogTarget::Stdout) => layer.with_writer(std::io::stdout).boxed(),
        LogTarget::Builtin(BuiltinLogTarget::Stderr) => layer.with_writer(std::io::stderr).boxed(),
    })
}

fn target_layer<S>(entry: &LogEntry, dir: &Path) -> Result<BoxedLayer<S>, IoError>
    where S: Subscriber + Send + Sync,
          for<'span> S: LookupSpan<'span>,
{
    let target_filter = TargetFilter::new(entry);
    let filter = filter_fn(move |metadata| target_filter.allows(metadata.level(), metadata.module_path()));
    Ok(writer_layer(&entry.target, dir)?.with_filter(filter).boxed())
}

/// Build the subscriber described by the `log` section of the config. The
/// caller installs it.
pub fn build_subscriber(conf: LoggingConfig) -> Result<impl Subscriber + Send + Sync, IoError>
{
    let layers = conf
        .targets
        .iter()
        .map(|entry| target_layer(entry, &conf.dir))
        .collect::<Result<Vec<_>, _>>()?;

    // Only trims noisy modules; each target applies its own level
    let global = Targets::new()
        .with_default(conf.default_level.unwrap_or(LogLevel::Trace))
        .with_targets(conf.module_levels);

    Ok(tracing_subscriber::registry().with(global).with(layers))
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::collections::HashMap;

    fn entry(modules: &[&str], level: Option<LogLevel>) -> LogEntry
    {
        LogEntry {
            target: LogTarget::Builtin(BuiltinLogTarget::Stderr),
            modules: modules.iter().map(|m| m.to_string()).collect(),
            level,
        }
    }

    #[test]
    fn target_filter_checks_level_and_module()
    {
        let filter = TargetFilter::new(&entry(&["silc_network::server"], Some(LogLevel::Info)));

        assert!(filter.allows(&Level::WARN, Some("silc_network::server::notify")));
        assert!(!filter.allows(&Level::DEBUG, Some("silc_network::server::notify")));
        assert!(!filter.allows(&Level::ERROR, Some("silc_server::node")));
        assert!(filter.allows(&Level::INFO, None));
    }

    #[test]
    fn unrestricted_target_takes_everything()
    {
        let filter = TargetFilter::new(&entry(&[], None));
        assert!(filter.allows(&Level::TRACE, Some("anything")));
    }

    #[test]
    fn builtin_targets_build()
    {
        let conf = LoggingConfig {
            dir: std::env::temp_dir(),
            default_level: Some(LogLevel::Debug),
            module_levels: HashMap::from([("silc_network".to_string(), LogLevel::Trace)]),
            targets: vec![
                LogEntry { target: LogTarget::Builtin(BuiltinLogTarget::Stdout), modules: Vec::new(), level: None },
                entry(&["silc_server"], Some(LogLevel::Warn)),
            ],
        };

        let subscriber = build_subscriber(conf).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("logging through a built subscriber");
        });
    }
}
