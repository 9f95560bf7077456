use anyhow::{Context, Result};
use std::{net::SocketAddr, path::PathBuf, str::FromStr};

/// Runtime settings, read from the environment (a `.env` file is loaded first
/// by `main`).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub database: PathBuf,
    /// Frames queued per connection before forwarding to it starts failing.
    pub outbound_buffer: usize,
    /// Largest page a history request may ask for.
    pub history_max_count: i64,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            database: PathBuf::from(home_dir).join(".souk").join("chat.db"),
            outbound_buffer: 64,
            history_max_count: 100,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            bind: parse_var(&lookup, "SOUK_BIND")?.unwrap_or(defaults.bind),
            database: lookup("SOUK_DATABASE")
                .map(PathBuf::from)
                .unwrap_or(defaults.database),
            outbound_buffer: parse_var(&lookup, "SOUK_OUTBOUND_BUFFER")?
                .unwrap_or(defaults.outbound_buffer),
            history_max_count: parse_var(&lookup, "SOUK_HISTORY_MAX_COUNT")?
                .unwrap_or(defaults.history_max_count),
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {name}: {raw:?}"))
        })
        .transpose()
}
