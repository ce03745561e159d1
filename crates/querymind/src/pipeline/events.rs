//! Staged events emitted by the streaming pipeline and the phase machine
//! that orders them.

use std::fmt;

use serde::Serialize;

use crate::db::NormalizedRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Preparing,
    Parsing,
    Executing,
    Processing,
    Explaining,
    Done,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Preparing => "preparing",
            Phase::Parsing => "parsing",
            Phase::Executing => "executing",
            Phase::Processing => "processing",
            Phase::Explaining => "explaining",
            Phase::Done => "done",
            Phase::Error => "error",
        }
    }

    /// The only phase that may follow this one on the success path.
    pub fn successor(self) -> Option<Phase> {
        match self {
            Phase::Preparing => Some(Phase::Parsing),
            Phase::Parsing => Some(Phase::Executing),
            Phase::Executing => Some(Phase::Processing),
            Phase::Processing => Some(Phase::Explaining),
            Phase::Explaining => Some(Phase::Done),
            Phase::Done | Phase::Error => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the NDJSON stream: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StagedEvent {
    Status(Phase),
    Sql(String),
    Results(Vec<NormalizedRow>),
    AnswerChunk(String),
    Error(String),
    Done,
}

impl StagedEvent {
    pub fn to_ndjson(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid phase transition from {from:?} to {to}")]
pub struct InvalidTransition {
    pub from: Option<Phase>,
    pub to: Phase,
}

/// PREPARING → PARSING → EXECUTING → PROCESSING → EXPLAINING → DONE, with
/// ERROR reachable from every non-terminal phase.
#[derive(Debug, Default)]
pub struct PhaseMachine {
    current: Option<Phase>,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Phase> {
        self.current
    }

    pub fn is_finished(&self) -> bool {
        self.current.map(Phase::is_terminal).unwrap_or(false)
    }

    /// Move to `next` and return its status event.
    pub fn advance(&mut self, next: Phase) -> Result<StagedEvent, InvalidTransition> {
        let allowed = match self.current {
            None => next == Phase::Preparing,
            Some(phase) => phase.successor() == Some(next),
        };
        if !allowed {
            return Err(InvalidTransition {
                from: self.current,
                to: next,
            });
        }
        self.current = Some(next);
        Ok(StagedEvent::Status(next))
    }

    /// Enter the absorbing error phase. Returns `None` once terminal, so at
    /// most one error event is ever produced.
    pub fn fail(&mut self, message: impl Into<String>) -> Option<StagedEvent> {
        if self.is_finished() {
            return None;
        }
        self.current = Some(Phase::Error);
        Some(StagedEvent::Error(message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        assert_eq!(
            serde_json::to_value(StagedEvent::Status(Phase::Parsing)).unwrap(),
            json!({"type": "status", "data": "parsing"})
        );
        assert_eq!(
            serde_json::to_value(StagedEvent::AnswerChunk("3 orders".into())).unwrap(),
            json!({"type": "answer_chunk", "data": "3 orders"})
        );
        assert_eq!(serde_json::to_value(StagedEvent::Done).unwrap(), json!({"type": "done"}));
        assert!(StagedEvent::Done.to_ndjson().unwrap().ends_with('\n'));
    }

    #[test]
    fn test_success_path() {
        let mut machine = PhaseMachine::new();
        for phase in [
            Phase::Preparing,
            Phase::Parsing,
            Phase::Executing,
            Phase::Processing,
            Phase::Explaining,
            Phase::Done,
        ] {
            assert_eq!(machine.advance(phase).unwrap(), StagedEvent::Status(phase));
        }
        assert!(machine.is_finished());
        assert!(machine.fail("late").is_none());
    }

    #[test]
    fn test_rejects_skipped_phase() {
        let mut machine = PhaseMachine::new();
        assert!(machine.advance(Phase::Parsing).is_err());
        machine.advance(Phase::Preparing).unwrap();
        let err = machine.advance(Phase::Executing).unwrap_err();
        assert_eq!(err.from, Some(Phase::Preparing));
    }

    #[test]
    fn test_error_is_absorbing() {
        let mut machine = PhaseMachine::new();
        machine.advance(Phase::Preparing).unwrap();
        assert_eq!(machine.fail("boom"), Some(StagedEvent::Error("boom".into())));
        assert!(machine.fail("again").is_none());
        assert!(machine.advance(Phase::Parsing).is_err());
    }
}
