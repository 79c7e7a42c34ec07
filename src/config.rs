use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Maximum number of simultaneously open connections
    pub max_open: usize,

    /// Scratch buffer size for each socket read during a tick
    pub read_buffer_size: usize,

    /// Ceiling of the readiness poll issued per tick, in milliseconds
    pub poll_budget_ms: u64,

    /// TCP nodelay
    pub tcp_nodelay: bool,

    /// Log level (consumed by the host when initializing tracing)
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_open: 1024,
            read_buffer_size: 16 * 1024, // 16KB
            poll_budget_ms: 1,
            tcp_nodelay: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use nbredis::Config;
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let config = Config::from_file("config.toml")?;
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
        if self.max_open == 0 {
            anyhow::bail!("max_open must be > 0");
        }

        if self.read_buffer_size < 1024 {
            anyhow::bail!("read_buffer_size must be >= 1024");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_max_open() {
        let config = Config {
            max_open: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tiny_read_buffer() {
        let config = Config {
            read_buffer_size: 512,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
