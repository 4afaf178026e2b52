use serde::{Deserialize, Serialize};
use std::fmt;

/// Submission status, covering both in-flight states and terminal verdicts.
///
/// Terminal verdicts are final: once one is written the pipeline never
/// touches the submission again. A re-queued id restarts from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Compiling,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    JudgeInternalError,
}

impl Status {
    /// Whether this status is a final verdict.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending | Status::Running | Status::Compiling)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Compiling => "compiling",
            Status::Accepted => "accepted",
            Status::WrongAnswer => "wrong_answer",
            Status::TimeLimitExceeded => "time_limit_exceeded",
            Status::MemoryLimitExceeded => "memory_limit_exceeded",
            Status::RuntimeError => "runtime_error",
            Status::CompilationError => "compilation_error",
            Status::JudgeInternalError => "judge_internal_error",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(!Status::Compiling.is_terminal());
        assert!(Status::Accepted.is_terminal());
        assert!(Status::WrongAnswer.is_terminal());
        assert!(Status::JudgeInternalError.is_terminal());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&Status::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"time_limit_exceeded\"");
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Status::TimeLimitExceeded);
    }
}
