//! Session blueprints and the factories that produce them

use super::SessionError;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Creation-time parameters passed to a kind's factory
pub type KindParams = Map<String, Value>;

/// Declares one participant of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSpec {
    pub role: String,
    pub description: String,
    /// Runs the tools other participants propose
    pub executor: bool,
    /// Takes conversational turns
    pub speaks: bool,
}

impl ParticipantSpec {
    /// Speaks and proposes tool calls
    pub fn proposer(role: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            description: description.into(),
            executor: false,
            speaks: true,
        }
    }

    /// Executes proposed calls; never takes a conversational turn
    pub fn executor(role: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            description: description.into(),
            executor: true,
            speaks: false,
        }
    }

    /// Proposes and executes its own calls
    pub fn solo(role: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            description: description.into(),
            executor: true,
            speaks: true,
        }
    }
}

/// How the next speaker is chosen after a plain reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpeakerSelection {
    #[default]
    RoundRobin,
    /// Ask the model which role should speak next
    Manager,
}

/// Everything needed to build a session of one kind
#[derive(Debug, Clone, Default)]
pub struct SessionBlueprint {
    pub participants: Vec<ParticipantSpec>,
    /// Shared instructions given to every speaking participant
    pub guidelines: String,
    /// Names from the tool catalog
    pub allowed_tools: Vec<String>,
    pub speaker_selection: SpeakerSelection,
    /// Overrides the engine-wide round ceiling
    pub max_round: Option<usize>,
}

impl SessionBlueprint {
    pub fn new(guidelines: impl Into<String>) -> Self {
        Self {
            guidelines: guidelines.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn participant(mut self, spec: ParticipantSpec) -> Self {
        self.participants.push(spec);
        self
    }

    #[must_use]
    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.allowed_tools.push(name.into());
        self
    }

    #[must_use]
    pub fn speaker_selection(mut self, selection: SpeakerSelection) -> Self {
        self.speaker_selection = selection;
        self
    }

    #[must_use]
    pub fn max_round(mut self, max_round: usize) -> Self {
        self.max_round = Some(max_round);
        self
    }

    pub(crate) fn validate(&self, kind: &str, has_tools: bool) -> Result<(), SessionError> {
        let invalid = |reason: String| SessionError::InvalidBlueprint {
            kind: kind.to_string(),
            reason,
        };

        if !self.participants.iter().any(|p| p.speaks) {
            return Err(invalid("no participant takes conversational turns".into()));
        }

        let executors = self.participants.iter().filter(|p| p.executor).count();
        if executors > 1 {
            return Err(invalid(format!("{executors} executors declared, at most one allowed")));
        }
        if has_tools && executors == 0 {
            return Err(invalid("tools are allowed but no participant executes them".into()));
        }

        let mut seen = HashSet::new();
        for spec in &self.participants {
            if spec.role.trim().is_empty() {
                return Err(invalid("participant role must not be empty".into()));
            }
            if !seen.insert(spec.role.as_str()) {
                return Err(invalid(format!("role `{}` declared twice", spec.role)));
            }
        }

        if self.max_round == Some(0) {
            return Err(invalid("max_round must be positive".into()));
        }
        Ok(())
    }
}

/// Builds a blueprint from creation-time parameters
pub trait SessionFactory: Send + Sync {
    fn blueprint(&self, params: &KindParams) -> SessionBlueprint;
}

impl<F> SessionFactory for F
where
    F: Fn(&KindParams) -> SessionBlueprint + Send + Sync,
{
    fn blueprint(&self, params: &KindParams) -> SessionBlueprint {
        self(params)
    }
}
