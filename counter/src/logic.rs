//! Counter logic.

use crate::error::AppError;
use async_trait::async_trait;
use foldstore_engine::{BoxError, Logic};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Commands a user can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Add,
    Subtract,
    ResetNegative,
}

impl FromStr for Command {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Command::Add),
            "subtract" => Ok(Command::Subtract),
            "reset-negative" => Ok(Command::ResetNegative),
            other => Err(AppError::UnknownCommand(other.to_string())),
        }
    }
}

/// What a command did. Stored in the log and replayed on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Add { value: i64 },
    Subtract { value: i64 },
    Replace { value: i64 },
    Nothing,
}

/// Counter whose add/subtract amount is fixed at startup.
#[derive(Debug, Clone)]
pub struct Counter {
    step: i64,
}

impl Counter {
    pub fn new(step: i64) -> Self {
        Self { step }
    }
}

#[async_trait]
impl Logic for Counter {
    type State = i64;
    type Command = Command;
    type Outcome = Outcome;

    fn initial(&self) -> i64 {
        0
    }

    async fn script(&self, state: &i64, command: &Command) -> Result<Outcome, BoxError> {
        Ok(match command {
            Command::Add => Outcome::Add { value: self.step },
            Command::Subtract => Outcome::Subtract { value: self.step },
            Command::ResetNegative if *state < 0 => Outcome::Replace { value: 0 },
            Command::ResetNegative => Outcome::Nothing,
        })
    }

    fn reduce(&self, state: &i64, outcome: &Outcome) -> i64 {
        match outcome {
            Outcome::Add { value } => state + value,
            Outcome::Subtract { value } => state - value,
            Outcome::Replace { value } => *value,
            Outcome::Nothing => *state,
        }
    }
}
