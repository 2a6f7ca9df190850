//! Tally Game
//!
//! Reference engine bundled with the host. Every non-empty line a player
//! sends during a turn scores one point. After the configured number of
//! turns the best tally among players still in the match wins; shared best
//! tallies draw and everyone else loses. A player that ever missed a move
//! is recorded as kicked.
//!
//! Messages sent to players:
//! - first turn: `tally <index> <players> <turns>`
//! - later turns: `score <turn> <tally>`

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::debug;

use crate::core::state::PlayerState;
use crate::game::description::MatchDescription;
use crate::game::engine::{GameEngine, TurnReply};

/// Turns played when the description does not say.
pub const DEFAULT_TURNS: u32 = 10;

/// Persisted match results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TallyResults {
    /// Turns processed.
    pub turns: u32,
    /// Points per player.
    pub scores: Vec<u32>,
    /// Final states, once decided.
    pub states: Vec<PlayerState>,
}

/// Line-counting game.
#[derive(Debug, Clone)]
pub struct TallyEngine {
    turns: u32,
    turn: u32,
    scores: Vec<u32>,
    out: Vec<bool>,
    states: Vec<PlayerState>,
}

impl TallyEngine {
    /// Create a game for `players` lasting `turns` turns.
    pub fn new(players: usize, turns: u32) -> Self {
        Self {
            turns: turns.max(1),
            turn: 0,
            scores: vec![0; players],
            out: vec![false; players],
            states: Vec::new(),
        }
    }

    /// Create a game from a match description's `turns` field.
    pub fn from_description(description: &MatchDescription) -> Self {
        let turns = description
            .setting_u64("turns")
            .and_then(|t| u32::try_from(t).ok())
            .unwrap_or(DEFAULT_TURNS);
        Self::new(description.players.len(), turns)
    }

    /// Points per player.
    pub fn scores(&self) -> &[u32] {
        &self.scores
    }

    /// Turns processed so far.
    pub fn turn(&self) -> u32 {
        self.turn
    }

    fn score(input: &str) -> u32 {
        input.lines().filter(|line| !line.trim().is_empty()).count() as u32
    }

    fn verdicts(&self) -> Vec<PlayerState> {
        let best = self
            .scores
            .iter()
            .zip(&self.out)
            .filter(|(_, out)| !**out)
            .map(|(score, _)| *score)
            .max();
        let leaders = self
            .scores
            .iter()
            .zip(&self.out)
            .filter(|(score, out)| !**out && Some(**score) == best)
            .count();

        self.scores
            .iter()
            .zip(&self.out)
            .map(|(score, out)| match (*out, Some(*score) == best) {
                (true, _) => PlayerState::Kicked,
                (false, true) if leaders == 1 => PlayerState::Won,
                (false, true) => PlayerState::Draw,
                (false, false) => PlayerState::Lost,
            })
            .collect()
    }
}

impl GameEngine for TallyEngine {
    fn initial_messages(&mut self) -> Vec<String> {
        let players = self.scores.len();
        (0..players)
            .map(|index| format!("tally {} {} {}\n", index, players, self.turns))
            .collect()
    }

    fn process_turn(&mut self, moves: &[Option<String>]) -> anyhow::Result<Vec<TurnReply>> {
        anyhow::ensure!(
            moves.len() == self.scores.len(),
            "expected {} moves, got {}",
            self.scores.len(),
            moves.len()
        );
        self.turn += 1;

        for (index, input) in moves.iter().enumerate() {
            match input {
                Some(text) => self.scores[index] += Self::score(text),
                None => self.out[index] = true,
            }
        }
        debug!("Tally after turn {}: {:?}", self.turn, self.scores);

        if self.turn < self.turns {
            return Ok(self
                .scores
                .iter()
                .map(|score| TurnReply::think(format!("score {} {}\n", self.turn, score)))
                .collect());
        }

        self.states = self.verdicts();
        Ok(self.states.iter().copied().map(TurnReply::finish).collect())
    }

    fn save_results(&self, destination: &Path) -> anyhow::Result<()> {
        let results = TallyResults {
            turns: self.turn,
            scores: self.scores.clone(),
            states: self.states.clone(),
        };
        let json = serde_json::to_string_pretty(&results)?;
        fs::write(destination, json)
            .with_context(|| format!("writing {}", destination.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moves(texts: &[Option<&str>]) -> Vec<Option<String>> {
        texts.iter().map(|t| t.map(str::to_string)).collect()
    }

    #[test]
    fn test_initial_messages() {
        let mut engine = TallyEngine::new(2, 3);
        assert_eq!(engine.initial_messages(), vec!["tally 0 2 3\n", "tally 1 2 3\n"]);
    }

    #[test]
    fn test_blank_lines_score_nothing() {
        assert_eq!(TallyEngine::score(""), 0);
        assert_eq!(TallyEngine::score("a\n\n  \nb\n"), 2);
        assert_eq!(TallyEngine::score("x"), 1);
    }

    #[test]
    fn test_keeps_thinking_until_last_turn() {
        let mut engine = TallyEngine::new(2, 2);
        let replies = engine.process_turn(&moves(&[Some("a\n"), Some("")])).unwrap();
        assert_eq!(replies, vec![TurnReply::think("score 1 1\n"), TurnReply::think("score 1 0\n")]);

        let replies = engine.process_turn(&moves(&[Some(""), Some("b\nc\n")])).unwrap();
        assert_eq!(replies[0].state, PlayerState::Lost);
        assert_eq!(replies[1].state, PlayerState::Won);
        assert_eq!(engine.scores(), &[1, 2]);
    }

    #[test]
    fn test_tie_is_draw() {
        let mut engine = TallyEngine::new(3, 1);
        let replies = engine
            .process_turn(&moves(&[Some("a\n"), Some("b\n"), Some("")]))
            .unwrap();
        let states: Vec<_> = replies.iter().map(|r| r.state).collect();
        assert_eq!(states, vec![PlayerState::Draw, PlayerState::Draw, PlayerState::Lost]);
    }

    #[test]
    fn test_dropped_player_cannot_win() {
        let mut engine = TallyEngine::new(2, 2);
        engine.process_turn(&moves(&[Some("a\nb\nc\n"), Some("d\n")])).unwrap();
        let replies = engine.process_turn(&moves(&[None, Some("")])).unwrap();
        assert_eq!(replies[0].state, PlayerState::Kicked);
        assert_eq!(replies[1].state, PlayerState::Won);
    }

    #[test]
    fn test_everyone_dropped() {
        let mut engine = TallyEngine::new(2, 1);
        let replies = engine.process_turn(&moves(&[None, None])).unwrap();
        assert!(replies.iter().all(|r| r.state == PlayerState::Kicked));
    }

    #[test]
    fn test_wrong_move_count() {
        let mut engine = TallyEngine::new(2, 1);
        assert!(engine.process_turn(&moves(&[Some("a")])).is_err());
    }

    #[test]
    fn test_turns_from_description() {
        let description = MatchDescription::from_json(
            r#"{"players": [{"type": "process", "exeName": "a"}], "turns": 4}"#,
        )
        .unwrap();
        let mut engine = TallyEngine::from_description(&description);
        assert_eq!(engine.initial_messages(), vec!["tally 0 1 4\n"]);

        let description = MatchDescription::from_json(
            r#"{"players": [{"type": "process", "exeName": "a"}]}"#,
        )
        .unwrap();
        let mut engine = TallyEngine::from_description(&description);
        assert_eq!(engine.initial_messages(), vec![format!("tally 0 1 {}\n", DEFAULT_TURNS)]);
    }

    #[test]
    fn test_save_results() {
        let mut engine = TallyEngine::new(2, 1);
        engine.process_turn(&moves(&[Some("x\n"), None])).unwrap();

        let path = std::env::temp_dir().join(format!("tally-results-{}.json", std::process::id()));
        engine.save_results(&path).unwrap();
        let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(saved["turns"], 1);
        assert_eq!(saved["scores"][0], 1);
        assert_eq!(saved["states"][0], "won");
        assert_eq!(saved["states"][1], "kicked");
    }
}
