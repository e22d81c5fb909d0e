use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bind address
    pub bind_addr: String,

    /// Port to listen on (0 lets the OS pick one)
    pub port: u16,

    /// Log level
    pub log_level: String,

    /// Period of the server cron timer in milliseconds
    pub cron_interval_ms: u64,

    /// Maximum number of simultaneously connected clients
    pub max_clients: usize,

    /// TCP nodelay
    pub tcp_nodelay: bool,

    /// Longest inline command accepted before a terminator is seen
    pub max_inline_len: usize,

    /// Largest single bulk element accepted in an array command
    pub max_bulk_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            port: 6379,
            log_level: "info".to_string(),
            cron_interval_ms: 100,
            max_clients: 10000,
            tcp_nodelay: true,
            max_inline_len: 4 * 1024,
            max_bulk_len: 4 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use godis_rs::Config;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = Config::from_file("godis.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cron_interval_ms == 0 {
            anyhow::bail!("cron_interval_ms must be > 0");
        }

        if self.max_clients == 0 {
            anyhow::bail!("max_clients must be > 0");
        }

        if self.max_inline_len == 0 || self.max_bulk_len == 0 {
            anyhow::bail!("protocol limits must be > 0");
        }

        Ok(())
    }
}
