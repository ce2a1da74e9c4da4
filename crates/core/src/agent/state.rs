use std::fmt::{self, Display};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::AgentError;

/// What an agent is doing right now.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AgentStage {
    /// Not running.
    #[default]
    Idle,
    /// Waiting for the model.
    ModelThinking,
    /// Waiting for tool calls to finish.
    RunningTools,
}

impl Display for AgentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStage::Idle => write!(f, "idle"),
            AgentStage::ModelThinking => write!(f, "thinking"),
            AgentStage::RunningTools => write!(f, "running tools"),
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the agent out of [`AgentStage::Idle`] for the duration of a run.
///
/// Dropping the guard, including when the run is cancelled, returns the
/// agent to idle.
pub(crate) struct StageGuard<'a> {
    stage: &'a Mutex<AgentStage>,
}

impl<'a> StageGuard<'a> {
    pub fn enter(stage: &'a Mutex<AgentStage>) -> Result<Self, AgentError> {
        let mut current = lock(stage);
        if *current != AgentStage::Idle {
            return Err(AgentError::Busy);
        }
        *current = AgentStage::ModelThinking;
        Ok(Self { stage })
    }

    pub fn set(&self, next: AgentStage) {
        let mut current = lock(self.stage);
        if *current != next {
            trace!("agent stage: {} -> {next}", *current);
            *current = next;
        }
    }
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.set(AgentStage::Idle);
    }
}
