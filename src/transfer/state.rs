//! Unit-of-work lifecycle
//!
//! ```text
//! OPEN → COMMITTED
//!   ↓
//! ABORTED
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitOfWorkState {
    /// Transaction begun, statements in flight
    Open,

    /// Terminal: all statements committed together
    Committed,

    /// Terminal: rolled back, nothing from this unit is visible
    Aborted,
}

impl UnitOfWorkState {
    /// Next state once the statements have run
    pub fn finish(self, statements_ok: bool) -> Self {
        match self {
            UnitOfWorkState::Open if statements_ok => UnitOfWorkState::Committed,
            UnitOfWorkState::Open => UnitOfWorkState::Aborted,
            terminal => terminal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitOfWorkState::Open => "OPEN",
            UnitOfWorkState::Committed => "COMMITTED",
            UnitOfWorkState::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish() {
        assert_eq!(UnitOfWorkState::Open.finish(true), UnitOfWorkState::Committed);
        assert_eq!(UnitOfWorkState::Open.finish(false), UnitOfWorkState::Aborted);
        // Terminal states never move
        assert_eq!(UnitOfWorkState::Aborted.finish(true), UnitOfWorkState::Aborted);
        assert_eq!(UnitOfWorkState::Committed.finish(false), UnitOfWorkState::Committed);
    }

    #[test]
    fn test_display() {
        assert_eq!(UnitOfWorkState::Committed.to_string(), "COMMITTED");
    }
}
