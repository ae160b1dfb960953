//! Link configuration.
//!
//! A [`LinkConfig`] selects the transport and carries the Link's own
//! options. It can be built in code, parsed from free-form `key=value`
//! arguments, or loaded from JSON.
//!
//! # Argument Grammar
//!
//! | Key | Meaning | Default |
//! |-----|---------|---------|
//! | `type` | `com`, `server`, `client` or `pool` | required |
//! | `port` | TCP port, or device name for `com` | `5555` |
//! | `speed` | Serial baud rate | `9600` |
//! | `format` | Compact serial format code, e.g. `8e2` | `8` (8N1) |
//! | `ip` | Remote host for `client` | required for `client` |
//! | `max` | Pool capacity | `10` |
//! | `timeout` | Debounce window in milliseconds | `100` (`1000` at ≤ 4800 baud) |
//!
//! # Example
//!
//! ```
//! use linkport::config::{LinkConfig, PortConfig};
//!
//! let config = LinkConfig::from_args(["type=server", "port=1234"]).unwrap();
//! assert_eq!(config.port, PortConfig::Server { port: 1234 });
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::DEFAULT_CAPACITY;
use crate::error::{Error, Result};
use crate::transport::{DEFAULT_MAX_CONNECTIONS, DEFAULT_TCP_PORT};

// ============================================================================
// Constants
// ============================================================================

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default debounce window.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// Debounce window for slow serial lines.
pub const SLOW_LINE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Highest baud rate that still counts as a slow line.
const SLOW_LINE_MAX_BAUD: u32 = 4800;

// ============================================================================
// Serial Format
// ============================================================================

/// Serial parity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
    /// Parity bit always set.
    Mark,
    /// Parity bit always clear.
    Space,
}

/// Serial stop bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// No stop bit.
    None,
    /// One stop bit.
    #[default]
    One,
    /// One and a half stop bits.
    OnePointFive,
    /// Two stop bits.
    Two,
}

/// Character framing of a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialFormat {
    /// Data bits per character, 5 to 8.
    pub data_bits: u8,
    /// Parity mode.
    pub parity: Parity,
    /// Stop bits.
    pub stop_bits: StopBits,
}

impl Default for SerialFormat {
    fn default() -> Self {
        Self {
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl SerialFormat {
    /// Parses a compact format code.
    ///
    /// The first character is the data bit count (5 to 8, anything else
    /// means 8). The second selects parity (`m`, `o`, `e`, `s`, anything else
    /// means none). The third selects stop bits (`0` none, `2` two, anything
    /// else one). Any fourth character forces one and a half stop bits.
    ///
    /// Never fails: unrecognized characters fall back to 8N1 defaults.
    #[must_use]
    pub fn parse(code: &str) -> Self {
        let mut format = Self::default();
        let mut chars = code.chars();

        let Some(first) = chars.next() else {
            return format;
        };
        format.data_bits = match first.to_digit(10) {
            Some(bits @ 5..=8) => bits as u8,
            _ => 8,
        };

        let Some(second) = chars.next() else {
            return format;
        };
        format.parity = match second.to_ascii_lowercase() {
            'm' => Parity::Mark,
            'o' => Parity::Odd,
            'e' => Parity::Even,
            's' => Parity::Space,
            _ => Parity::None,
        };

        let Some(third) = chars.next() else {
            return format;
        };
        format.stop_bits = match third {
            '0' => StopBits::None,
            '2' => StopBits::Two,
            _ => StopBits::One,
        };

        if chars.next().is_some() {
            format.stop_bits = StopBits::OnePointFive;
        }

        format
    }
}

// ============================================================================
// Port Configuration
// ============================================================================

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub device: String,
    /// Baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Character framing.
    #[serde(default)]
    pub format: SerialFormat,
}

impl SerialConfig {
    /// Creates a config with 9600 baud 8N1.
    #[must_use]
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            format: SerialFormat::default(),
        }
    }

    /// Sets the baud rate.
    #[inline]
    #[must_use]
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Sets the framing.
    #[inline]
    #[must_use]
    pub fn with_format(mut self, format: SerialFormat) -> Self {
        self.format = format;
        self
    }
}

/// Transport selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortConfig {
    /// Serial line.
    #[serde(rename = "com")]
    Serial(SerialConfig),
    /// Single-peer TCP server.
    Server {
        /// Listen port.
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
    /// Single TCP client.
    Client {
        /// Remote host.
        ip: String,
        /// Remote port.
        #[serde(default = "default_tcp_port")]
        port: u16,
    },
    /// Pooled multi-peer TCP server.
    Pool {
        /// Listen port.
        #[serde(default = "default_tcp_port")]
        port: u16,
        /// Maximum concurrent peers.
        #[serde(default = "default_max_connections")]
        max_connections: usize,
    },
}

impl PortConfig {
    /// Debounce window suited to this transport.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::Serial(serial) if serial.baud_rate <= SLOW_LINE_MAX_BAUD => SLOW_LINE_TIMEOUT,
            _ => DEFAULT_TIMEOUT,
        }
    }
}

// ============================================================================
// LinkOptions
// ============================================================================

/// Options for the Link itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Debounce window.
    pub timeout: Duration,
    /// Per-source capacity of the coalescing buffer.
    pub buffer_capacity: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkOptions {
    /// Creates options with a 100ms window and 1024-byte buffers.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            buffer_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Sets the debounce window.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the coalescing buffer capacity.
    #[inline]
    #[must_use]
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }
}

// ============================================================================
// LinkConfig
// ============================================================================

/// Complete configuration for one Link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Transport selection.
    #[serde(flatten)]
    pub port: PortConfig,
    /// Debounce override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Coalescing buffer capacity.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for LinkConfig {
    /// Single-peer TCP server on port 5555.
    fn default() -> Self {
        Self::new(PortConfig::Server {
            port: DEFAULT_TCP_PORT,
        })
    }
}

impl LinkConfig {
    /// Wraps a port selection with default Link options.
    #[must_use]
    pub fn new(port: PortConfig) -> Self {
        Self {
            port,
            timeout_ms: None,
            buffer_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Parses `key=value` arguments.
    ///
    /// Keys are matched case-insensitively and the first occurrence wins.
    /// Tokens without `=` and unknown keys are ignored. Numbers that fail to
    /// parse fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `type` is missing or unknown, if a
    /// `client` has no `ip`, or if a `com` link has no device in `port`.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args = Args::parse(args);

        let kind = args
            .get("type")
            .ok_or_else(|| Error::config("missing 'type' argument"))?
            .to_ascii_lowercase();

        let port = match kind.as_str() {
            "com" => {
                let device = args
                    .get("port")
                    .filter(|device| !device.is_empty())
                    .ok_or_else(|| Error::config("serial link needs a device in 'port'"))?;
                let format = args
                    .get("format")
                    .map(|code| SerialFormat::parse(&code.to_ascii_lowercase()))
                    .unwrap_or_default();
                PortConfig::Serial(SerialConfig {
                    device: device.to_string(),
                    baud_rate: args.number("speed", DEFAULT_BAUD_RATE),
                    format,
                })
            }
            "server" => PortConfig::Server {
                port: args.number("port", DEFAULT_TCP_PORT),
            },
            "client" => PortConfig::Client {
                ip: args
                    .get("ip")
                    .ok_or_else(|| Error::config("client link needs an 'ip' argument"))?
                    .to_string(),
                port: args.number("port", DEFAULT_TCP_PORT),
            },
            "pool" => PortConfig::Pool {
                port: args.number("port", DEFAULT_TCP_PORT),
                max_connections: args.number("max", DEFAULT_MAX_CONNECTIONS),
            },
            other => return Err(Error::config(format!("unknown link type '{other}'"))),
        };

        Ok(Self {
            port,
            timeout_ms: args.get("timeout").and_then(|v| v.parse().ok()),
            buffer_capacity: DEFAULT_CAPACITY,
        })
    }

    /// Parses a JSON configuration.
    ///
    /// ```
    /// use linkport::config::LinkConfig;
    ///
    /// let config = LinkConfig::from_json(r#"{"type": "pool", "port": 1234}"#).unwrap();
    /// assert_eq!(config.options().timeout.as_millis(), 100);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the document does not describe a link.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Link options derived from this configuration.
    #[must_use]
    pub fn options(&self) -> LinkOptions {
        let timeout = self
            .timeout_ms
            .map_or_else(|| self.port.default_timeout(), Duration::from_millis);
        LinkOptions::new()
            .with_timeout(timeout)
            .with_buffer_capacity(self.buffer_capacity)
    }
}

// ============================================================================
// Argument Table
// ============================================================================

/// Parsed `key=value` tokens, keys lower-cased.
struct Args(Vec<(String, String)>);

impl Args {
    fn parse<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pairs = args
            .into_iter()
            .filter_map(|token| {
                let (key, value) = token.as_ref().split_once('=')?;
                Some((key.trim().to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect();
        Self(pairs)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn number<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_buffer_capacity() -> usize {
    DEFAULT_CAPACITY
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_defaults() {
        assert_eq!(SerialFormat::parse(""), SerialFormat::default());
        assert_eq!(SerialFormat::parse("8"), SerialFormat::default());
    }

    #[test]
    fn test_format_full_code() {
        let format = SerialFormat::parse("7e2");
        assert_eq!(format.data_bits, 7);
        assert_eq!(format.parity, Parity::Even);
        assert_eq!(format.stop_bits, StopBits::Two);
    }

    #[test]
    fn test_format_out_of_range_data_bits() {
        assert_eq!(SerialFormat::parse("9").data_bits, 8);
        assert_eq!(SerialFormat::parse("4o").data_bits, 8);
        assert_eq!(SerialFormat::parse("xo").parity, Parity::Odd);
    }

    #[test]
    fn test_format_parity_and_stop_variants() {
        assert_eq!(SerialFormat::parse("8m").parity, Parity::Mark);
        assert_eq!(SerialFormat::parse("8s").parity, Parity::Space);
        assert_eq!(SerialFormat::parse("8n").parity, Parity::None);
        assert_eq!(SerialFormat::parse("8n0").stop_bits, StopBits::None);
        assert_eq!(SerialFormat::parse("8n1").stop_bits, StopBits::One);
        assert_eq!(SerialFormat::parse("8n2x").stop_bits, StopBits::OnePointFive);
    }

    #[test]
    fn test_args_server() {
        let config = LinkConfig::from_args(["type=server", "port=1234"]).expect("config");
        assert_eq!(config.port, PortConfig::Server { port: 1234 });
        assert_eq!(config.options().timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_args_keys_case_insensitive() {
        let config = LinkConfig::from_args(["TYPE=Client", "IP=Example.Host", "Port=80"])
            .expect("config");
        assert_eq!(
            config.port,
            PortConfig::Client {
                ip: "Example.Host".to_string(),
                port: 80
            }
        );
    }

    #[test]
    fn test_args_serial() {
        let config =
            LinkConfig::from_args(["type=com", "port=/dev/ttyUSB0", "speed=2400", "format=7O"])
                .expect("config");
        let PortConfig::Serial(serial) = &config.port else {
            panic!("expected serial config");
        };
        assert_eq!(serial.device, "/dev/ttyUSB0");
        assert_eq!(serial.baud_rate, 2400);
        assert_eq!(serial.format.data_bits, 7);
        assert_eq!(serial.format.parity, Parity::Odd);
        assert_eq!(config.options().timeout, SLOW_LINE_TIMEOUT);
    }

    #[test]
    fn test_args_fast_serial_uses_default_timeout() {
        let config =
            LinkConfig::from_args(["type=com", "port=COM3", "speed=115200"]).expect("config");
        assert_eq!(config.options().timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_args_bad_numbers_fall_back() {
        let config = LinkConfig::from_args(["type=server", "port=abc"]).expect("config");
        assert_eq!(
            config.port,
            PortConfig::Server {
                port: DEFAULT_TCP_PORT
            }
        );

        let config =
            LinkConfig::from_args(["type=com", "port=COM1", "speed=fast"]).expect("config");
        let PortConfig::Serial(serial) = config.port else {
            panic!("expected serial config");
        };
        assert_eq!(serial.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_args_pool_and_timeout() {
        let config =
            LinkConfig::from_args(["type=pool", "port=1234", "max=3", "timeout=250", "junk"])
                .expect("config");
        assert_eq!(
            config.port,
            PortConfig::Pool {
                port: 1234,
                max_connections: 3
            }
        );
        assert_eq!(config.options().timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_args_first_occurrence_wins() {
        let config =
            LinkConfig::from_args(["type=server", "port=1", "port=2"]).expect("config");
        assert_eq!(config.port, PortConfig::Server { port: 1 });
    }

    #[test]
    fn test_args_errors() {
        assert!(LinkConfig::from_args(Vec::<String>::new()).is_err());
        assert!(
            LinkConfig::from_args(["type=modem"])
                .expect_err("unknown type")
                .is_config_error()
        );
        assert!(LinkConfig::from_args(["type=client", "port=80"]).is_err());
        assert!(LinkConfig::from_args(["type=com", "speed=9600"]).is_err());
    }

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.port, PortConfig::Server { port: 5555 });
        assert_eq!(config.options(), LinkOptions::new());
    }

    #[test]
    fn test_json_config() {
        let config = LinkConfig::from_json(
            r#"{"type": "com", "device": "COM4", "format": {"data_bits": 7, "parity": "even", "stop_bits": "two"}, "timeout_ms": 50}"#,
        )
        .expect("config");
        let PortConfig::Serial(serial) = &config.port else {
            panic!("expected serial config");
        };
        assert_eq!(serial.device, "COM4");
        assert_eq!(serial.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(serial.format.parity, Parity::Even);
        assert_eq!(config.options().timeout, Duration::from_millis(50));

        let json = serde_json::to_string(&config).expect("serialize");
        assert_eq!(LinkConfig::from_json(&json).expect("reparse"), config);
    }

    #[test]
    fn test_json_rejects_unknown_type() {
        let err = LinkConfig::from_json(r#"{"type": "modem"}"#).expect_err("invalid");
        assert!(matches!(err, Error::Json(_)));
    }
}
