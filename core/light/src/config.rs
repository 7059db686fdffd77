use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use lxs_interfaces::{ConfigConsumer, ConfigProviderInterface};
use parking_lot::Mutex;
use toml::{Table, Value};
use tracing::{error, warn};

/// The implementation of a configuration loader that uses the `toml` backend.
///
/// Every component reads its own top-level table, named by its [`ConfigConsumer::KEY`].
#[derive(Default)]
pub struct TomlConfigProvider {
    /// Everything loaded or handed out so far, so the effective configuration can be
    /// written back.
    table: Mutex<Table>,
}

impl Clone for TomlConfigProvider {
    fn clone(&self) -> Self {
        Self {
            table: Mutex::new(self.table.lock().clone()),
        }
    }
}

impl TomlConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(content: &str) -> Result<Self> {
        let table = toml::from_str::<Table>(content).context("could not parse config as toml")?;
        Ok(Self {
            table: Mutex::new(table),
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow!(
                "The configuration file '{}' does not exist.",
                path.to_string_lossy()
            ));
        }

        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "IO: Could not load the configuration file '{}'.",
                path.to_string_lossy()
            )
        })?;

        Self::parse(&content).with_context(|| {
            format!(
                "Could not parse the configuration file '{}'.",
                path.to_string_lossy()
            )
        })
    }

    /// Override the configuration of `T`.
    pub fn inject<T: ConfigConsumer>(&self, config: T::Config) -> Result<()> {
        let value = Value::try_from(&config)
            .with_context(|| format!("could not serialize the '{}' config", T::KEY))?;
        self.table.lock().insert(T::KEY.to_owned(), value);
        Ok(())
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(&path, self.serialize_config()).with_context(|| {
            format!(
                "Could not write the configuration file: {}",
                path.as_ref().to_string_lossy()
            )
        })
    }

    pub fn into_inner(&self) -> Table {
        self.table.lock().clone()
    }
}

impl ConfigProviderInterface for TomlConfigProvider {
    fn get<S: ConfigConsumer>(&self) -> S::Config {
        tracing::trace!("Getting the config for {}", std::any::type_name::<S>());

        let mut table = self.table.lock();

        let item: S::Config = match table.get(S::KEY) {
            Some(v) => match v.clone().try_into() {
                Ok(item) => item,
                Err(e) => {
                    warn!("invalid '{}' config, using defaults: {e}", S::KEY);
                    S::Config::default()
                },
            },

            // If the key is not found, use the default config.
            None => S::Config::default(),
        };

        // Amend the internal table with the parsed or default item to be serialized later.
        match Value::try_from(&item) {
            Ok(value) => {
                table.insert(S::KEY.into(), value);
            },
            Err(e) => error!("could not serialize the '{}' config: {e}", S::KEY),
        }

        item
    }

    fn serialize_config(&self) -> String {
        toml::to_string(&*self.table.lock()).unwrap_or_else(|e| {
            error!("failed to serialize config: {e}");
            String::new()
        })
    }
}
