use std::fmt;

/// Progress of a verification run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    /// Index of the check being evaluated
    Running(usize),
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "NotStarted"),
            RunState::Running(index) => write!(f, "Running({})", index),
            RunState::Completed => write!(f, "Completed"),
        }
    }
}

impl RunState {
    /// Only ever moves forward: NotStarted -> Running(0..n) -> Completed.
    pub fn can_advance_to(&self, next: RunState) -> bool {
        match (self, next) {
            (RunState::NotStarted, RunState::Running(0)) => true,
            (RunState::NotStarted, RunState::Completed) => true,
            (RunState::Running(i), RunState::Running(j)) => j == i + 1,
            (RunState::Running(_), RunState::Completed) => true,
            _ => false,
        }
    }
}
