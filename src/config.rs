//! Settings of a run, read once at start-up
//!
//! Everything has a built-in default, a config file only needs the keys it changes:
//!
//! ```toml
//! [source]
//! host = "photos.local"
//! timeout_secs = 10
//!
//! [retry]
//! max_retries = 3
//!
//! [pins]
//! power_enable = false
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::codec::FrameFormat;
use crate::pipeline::{PipelineOptions, RetryPolicy};
use crate::source::{ImageSource, LocalFileSource, NetworkSource};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config {}", path.display())]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// The file is not valid TOML or has unknown keys
    #[error("failed to parse config {}", path.display())]
    Parse {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },
    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where frames come from
    pub source: SourceConfig,
    /// Acquisition retry
    pub retry: RetryConfig,
    /// Display cycle behaviour
    pub panel: PanelConfig,
    /// Wiring of the HAT
    pub pins: PinConfig,
}

/// Frame source settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// HTTP host
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// Resource path on the server
    pub path: String,
    /// Bound for the whole request in seconds
    pub timeout_secs: u64,
    /// Read this file instead of asking the server
    pub file: Option<PathBuf>,
    /// Payload format
    pub format: FrameFormat,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            host: "localhost".into(),
            port: 3000,
            path: "/bmp".into(),
            timeout_secs: 30,
            file: None,
            format: FrameFormat::Image,
        }
    }
}

/// Retry settings for acquisition
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Extra attempts after a transient failure
    pub max_retries: u32,
    /// Wait before the first retry in milliseconds
    pub backoff_ms: u64,
    /// Growth of the wait per retry
    pub multiplier: f64,
    /// Longest single wait in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        RetryConfig {
            max_retries: policy.max_retries,
            backoff_ms: policy.backoff.as_millis() as u64,
            multiplier: policy.multiplier,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

/// Display cycle settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PanelConfig {
    /// Blank the panel before showing the frame
    pub clear_before_display: bool,
    /// Pause after the refresh in milliseconds
    pub settle_ms: u64,
    /// Upper bound of a single busy wait in seconds
    pub busy_timeout_secs: u64,
    /// Busy line poll interval in milliseconds
    pub poll_ms: u32,
    /// Error diffusion while quantizing
    pub dither: bool,
}

impl Default for PanelConfig {
    fn default() -> Self {
        PanelConfig {
            clear_before_display: true,
            settle_ms: 3_000,
            busy_timeout_secs: 60,
            poll_ms: 10,
            dither: false,
        }
    }
}

/// SPI device and BCM line numbers, defaults match the Waveshare HAT on a Raspberry Pi
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PinConfig {
    /// spidev node
    pub spi_device: PathBuf,
    /// SPI clock
    pub spi_hz: u32,
    /// GPIO character device
    pub gpiochip: PathBuf,
    /// Reset line
    pub rst: u32,
    /// Data/command line
    pub dc: u32,
    /// Busy line (input)
    pub busy: u32,
    /// Power enable line
    pub pwr: u32,
    /// Older HATs have no power enable line
    pub power_enable: bool,
}

impl Default for PinConfig {
    fn default() -> Self {
        PinConfig {
            spi_device: "/dev/spidev0.0".into(),
            spi_hz: 4_000_000,
            gpiochip: "/dev/gpiochip0".into(),
            rst: 17,
            dc: 25,
            busy: 24,
            pwr: 18,
            power_enable: true,
        }
    }
}

impl Config {
    /// Reads and validates a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that can not work
    pub fn validate(&self) -> Result<(), ConfigError> {
        let source = &self.source;
        if source.file.is_none() {
            if source.host.is_empty() {
                return Err(ConfigError::Invalid("source.host must not be empty".into()));
            }
            if source.port == 0 {
                return Err(ConfigError::Invalid("source.port must not be 0".into()));
            }
        }
        if source.timeout_secs == 0 {
            return Err(ConfigError::Invalid("source.timeout_secs must be at least 1".into()));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry.multiplier must be a finite number >= 1, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.max_backoff_ms < self.retry.backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.max_backoff_ms ({}) must not be below retry.backoff_ms ({})",
                self.retry.max_backoff_ms, self.retry.backoff_ms
            )));
        }
        if self.panel.busy_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "panel.busy_timeout_secs must be at least 1".into(),
            ));
        }
        if self.panel.poll_ms == 0 {
            return Err(ConfigError::Invalid("panel.poll_ms must be at least 1".into()));
        }

        let pins = &self.pins;
        let mut lines = vec![("rst", pins.rst), ("dc", pins.dc), ("busy", pins.busy)];
        if pins.power_enable {
            lines.push(("pwr", pins.pwr));
        }
        for (i, (name, line)) in lines.iter().enumerate() {
            if let Some((other, _)) = lines[i + 1..].iter().find(|(_, l)| l == line) {
                return Err(ConfigError::Invalid(format!(
                    "pins.{name} and pins.{other} both use line {line}"
                )));
            }
        }
        Ok(())
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }

    /// Bound of a single busy wait
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.panel.busy_timeout_secs)
    }

    /// The configured acquisition source
    pub fn image_source(&self) -> Box<dyn ImageSource> {
        match &self.source.file {
            Some(path) => Box::new(LocalFileSource::new(path)),
            None => Box::new(NetworkSource::new(
                &self.source.host,
                self.source.port,
                &self.source.path,
                self.timeout(),
            )),
        }
    }

    /// Options of the display cycle
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            clear_before_display: self.panel.clear_before_display,
            retry: RetryPolicy {
                max_retries: self.retry.max_retries,
                backoff: Duration::from_millis(self.retry.backoff_ms),
                multiplier: self.retry.multiplier,
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
            settle: Duration::from_millis(self.panel.settle_ms),
            format: self.source.format,
            dither: self.panel.dither,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_the_hat() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.source.host, "localhost");
        assert_eq!(config.source.port, 3000);
        assert_eq!(config.source.path, "/bmp");
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!((config.pins.rst, config.pins.dc, config.pins.busy), (17, 25, 24));
        assert_eq!(config.pipeline_options(), PipelineOptions::default());
        assert_eq!(config.image_source().describe(), "http://localhost:3000/bmp");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write(
            r#"
            [source]
            host = "photos.local"
            format = "packed"
            path = "/esp32/frame"

            [retry]
            max_retries = 3
            backoff_ms = 250
            max_backoff_ms = 1000
            "#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.source.host, "photos.local");
        assert_eq!(config.source.port, 3000);
        assert_eq!(config.source.format, FrameFormat::Packed);

        let options = config.pipeline_options();
        assert_eq!(options.retry.max_retries, 3);
        assert_eq!(options.retry.backoff, Duration::from_millis(250));
        assert_eq!(options.retry.max_backoff, Duration::from_secs(1));
        assert_eq!(options.format, FrameFormat::Packed);
        assert!(options.clear_before_display);
    }

    #[test]
    fn file_source_wins_over_network() {
        let file = write("[source]\nfile = \"/srv/frame.bmp\"\n");
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.image_source().describe(), "/srv/frame.bmp");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write("[source]\nhots = \"typo\"\n");
        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(&dir.path().join("frame.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn out_of_range_values() {
        for text in [
            "[source]\nport = 0\n",
            "[source]\ntimeout_secs = 0\n",
            "[retry]\nmultiplier = 0.5\n",
            "[retry]\nbackoff_ms = 5000\nmax_backoff_ms = 1000\n",
            "[panel]\nbusy_timeout_secs = 0\n",
            "[pins]\ndc = 17\n",
        ] {
            let file = write(text);
            assert!(
                matches!(Config::load(file.path()), Err(ConfigError::Invalid(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn power_line_can_be_disabled() {
        let file = write("[pins]\npower_enable = false\npwr = 17\n");
        let config = Config::load(file.path()).unwrap();
        assert!(!config.pins.power_enable);
    }
}
