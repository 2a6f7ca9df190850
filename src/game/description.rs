//! Match Description
//!
//! JSON file naming the players and carrying game-specific settings:
//!
//! ```json
//! {
//!   "players": [
//!     {"type": "process", "exeName": "./bot --fast", "stderr": "bot0.err"},
//!     {"type": "socket", "family": "inet", "addr": ["127.0.0.1", 7000]}
//!   ],
//!   "turns": 50
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::network::connection::PlayerDescriptor;

/// Description loading errors.
#[derive(Debug, Error)]
pub enum DescriptionError {
    /// File could not be read.
    #[error("Cannot read {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File is not a valid description.
    #[error("Invalid match description: {0}")]
    Parse(#[from] serde_json::Error),

    /// No players listed.
    #[error("Match description lists no players")]
    NoPlayers,
}

/// A match: who plays, plus settings for the game engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDescription {
    /// Players, in index order.
    pub players: Vec<PlayerDescriptor>,
    /// Every other field, left to the game engine.
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl MatchDescription {
    /// Load and check a description file.
    pub fn load(path: &Path) -> Result<Self, DescriptionError> {
        let text = fs::read_to_string(path).map_err(|source| DescriptionError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Parse and check a description.
    pub fn from_json(text: &str) -> Result<Self, DescriptionError> {
        let description: Self = serde_json::from_str(text)?;
        if description.players.is_empty() {
            return Err(DescriptionError::NoPlayers);
        }
        Ok(description)
    }

    /// Read an unsigned game setting.
    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(Value::as_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::connection::{SocketFamily, SocketTarget};

    #[test]
    fn test_parse_with_settings() {
        let description = MatchDescription::from_json(r#"{
            "players": [
                {"type": "process", "exeName": "./bot"},
                {"type": "socket", "family": "inet", "addr": "127.0.0.1:7000"}
            ],
            "turns": 12,
            "map": "caves"
        }"#)
        .unwrap();

        assert_eq!(description.players.len(), 2);
        assert_eq!(description.players[1], PlayerDescriptor::Socket {
            family: SocketFamily::Inet,
            addr: SocketTarget::Text("127.0.0.1:7000".to_string()),
        });
        assert_eq!(description.setting_u64("turns"), Some(12));
        assert_eq!(description.setting_u64("map"), None);
        assert_eq!(description.settings["map"], "caves");
        assert!(!description.settings.contains_key("players"));
    }

    #[test]
    fn test_no_players() {
        let result = MatchDescription::from_json(r#"{"players": []}"#);
        assert!(matches!(result, Err(DescriptionError::NoPlayers)));
    }

    #[test]
    fn test_missing_players() {
        let result = MatchDescription::from_json(r#"{"turns": 3}"#);
        assert!(matches!(result, Err(DescriptionError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = MatchDescription::load(Path::new("/nonexistent/match.json"));
        assert!(matches!(result, Err(DescriptionError::Read { .. })));
    }
}
