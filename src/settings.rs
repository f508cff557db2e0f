use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub const DEFAULT_LEDGER_URL: &str = "http://localhost:8000/api";

#[derive(Debug, Deserialize)]
pub struct Ledger {
    pub url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub ledger: Ledger,
}

impl Settings {
    /// Loads `path` (optional) on top of the defaults. `TIOWICHO_LEDGER__URL`
    /// and friends override both.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("ledger.url", DEFAULT_LEDGER_URL)?
            .set_default("ledger.timeout_secs", 10)?
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("TIOWICHO")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }
}
