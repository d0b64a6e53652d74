//! Load a settings object from the config locations.

use std::{env, error::Error, path::PathBuf};

use config::{Config, Environment, File};
use eyre::{eyre, Context, Result};

use super::{RawSettings, Settings};

/// Prefix of the environment variables read as settings.
const ENV_PREFIX: &str = "INGEST";
/// Separator of nested keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Deserialize and validate the settings from the config locations.
pub fn load_settings() -> Result<Settings> {
    let mut base_config_sources = vec![];
    let mut builder = Config::builder();

    // Always load the default config files (`./config/*.json`), if any
    let config_dir = PathBuf::from("./config");
    if config_dir.is_dir() {
        let mut entries = config_dir
            .read_dir()
            .context("Failed to open config directory")?
            .collect::<std::io::Result<Vec<_>>>()
            .context("Failed to list config directory")?;
        entries.sort_by_key(|e| e.path());
        for entry in entries {
            let entry_path = entry.path();
            if !entry_path.is_file() {
                continue;
            }
            if entry_path.extension().and_then(|s| s.to_str()) == Some("json") {
                base_config_sources.push(format!("{:?}", entry_path));
                builder = builder.add_source(File::from(entry_path));
            }
        }
    }

    // Load a set of additional user specified config files
    let config_file_paths: Vec<String> = env::var("CONFIG_FILES")
        .map(|s| {
            s.split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    for path in &config_file_paths {
        let p = PathBuf::from(path);
        if p.is_file() {
            if p.extension() == Some("json".as_ref()) {
                builder = builder.add_source(File::from(p));
            } else {
                return Err(eyre!(
                    "Provided config path via CONFIG_FILES is of an unsupported type ({p:?})"
                ));
            }
        } else if !p.exists() {
            return Err(eyre!(
                "Provided config path via CONFIG_FILES does not exist ({p:?})"
            ));
        } else {
            return Err(eyre!(
                "Provided config path via CONFIG_FILES is not a file ({p:?})"
            ));
        }
    }

    let config_deserializer = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        )
        .build()
        .context("Failed to load config sources")?;

    let raw_config = config_deserializer
        .try_deserialize::<RawSettings>()
        .or_else(|err| {
            let mut err = if let Some(source_err) = err.source() {
                let source = format!("Config error source: {source_err}");
                Err(err).context(source)
            } else {
                Err(err.into())
            };

            for cfg_path in base_config_sources.iter().chain(config_file_paths.iter()) {
                err = err.with_context(|| format!("Config loaded: {cfg_path}"));
            }
            err.context("Config deserialization error")
        })?;

    Settings::try_from(raw_config).context("Invalid settings")
}
