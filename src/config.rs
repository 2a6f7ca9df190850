//! Host Configuration
//!
//! Per-turn resource limits and handshake tokens.
//!
//! Values come from defaults, optionally overridden through environment
//! variables:
//!
//! - `UNDERWORLD_TURN_MS`         (default: 1000)
//! - `UNDERWORLD_MAX_LINE_LEN`    (default: 1024)
//! - `UNDERWORLD_MAX_RECV_SIZE`   (default: 65536)
//! - `UNDERWORLD_MAX_RECV_LINES`  (default: 256)
//! - `UNDERWORLD_HANDSHAKE_SYN`   (default: "SYN")
//! - `UNDERWORLD_HANDSHAKE_ACK`   (default: "ACK")

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Sentinel line a player sends to end its turn early.
pub const END_OF_TURN: &str = "end";

/// Per-turn resource limits enforced on every player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnLimits {
    /// How long players may think each turn.
    pub turn_duration: Duration,
    /// Maximum bytes read for a single line.
    pub max_line_len: usize,
    /// Maximum cumulative bytes of pending input per turn.
    pub max_pending_bytes: usize,
    /// Maximum number of input lines per turn.
    pub max_lines_per_turn: usize,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            turn_duration: Duration::from_secs(1),
            max_line_len: 1024,
            max_pending_bytes: 64 * 1024,
            max_lines_per_turn: 256,
        }
    }
}

/// Configuration for a match host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Resource limits.
    pub limits: TurnLimits,
    /// Token sent to every player right after connecting.
    pub handshake_syn: String,
    /// Token a player must answer with on its first line.
    pub handshake_ack: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            limits: TurnLimits::default(),
            handshake_syn: "SYN".to_string(),
            handshake_ack: "ACK".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("Invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Raw value.
        value: String,
    },

    /// A limit that must be positive is zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Handshake token is empty or spans lines.
    #[error("Handshake tokens must be non-empty single-line text")]
    BadToken,
}

impl HostConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary variable source, falling back to
    /// defaults for missing keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let turn_ms = read_or(&lookup, "UNDERWORLD_TURN_MS", defaults.limits.turn_duration.as_millis() as u64)?;

        let config = Self {
            limits: TurnLimits {
                turn_duration: Duration::from_millis(turn_ms),
                max_line_len: read_or(&lookup, "UNDERWORLD_MAX_LINE_LEN", defaults.limits.max_line_len)?,
                max_pending_bytes: read_or(&lookup, "UNDERWORLD_MAX_RECV_SIZE", defaults.limits.max_pending_bytes)?,
                max_lines_per_turn: read_or(&lookup, "UNDERWORLD_MAX_RECV_LINES", defaults.limits.max_lines_per_turn)?,
            },
            handshake_syn: lookup("UNDERWORLD_HANDSHAKE_SYN").unwrap_or(defaults.handshake_syn),
            handshake_ack: lookup("UNDERWORLD_HANDSHAKE_ACK").unwrap_or(defaults.handshake_ack),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that would kick or time out every player.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.turn_duration.is_zero() {
            return Err(ConfigError::Zero("turn duration"));
        }
        if self.limits.max_line_len == 0 {
            return Err(ConfigError::Zero("maximum line length"));
        }
        if self.limits.max_pending_bytes == 0 {
            return Err(ConfigError::Zero("maximum pending bytes"));
        }
        if self.limits.max_lines_per_turn == 0 {
            return Err(ConfigError::Zero("maximum lines per turn"));
        }
        for token in [&self.handshake_syn, &self.handshake_ack] {
            if token.trim().is_empty() || token.contains('\n') {
                return Err(ConfigError::BadToken);
            }
        }
        Ok(())
    }
}

fn read_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        }),
        None => Ok(default),
    }
}
