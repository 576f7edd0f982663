use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;
use std::time::{Duration, SystemTime};

/// Supervisor lifecycle for one application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    Running,
    Stopping,
    WaitingToRestart,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Stopping => write!(f, "stopping"),
            SupervisorState::WaitingToRestart => write!(f, "waiting-restart"),
            SupervisorState::Stopped => write!(f, "stopped"),
        }
    }
}

/// How a child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitCode {
    Code(i32),
    Signal(i32),
    Unknown,
}

impl ExitCode {
    pub fn success(&self) -> bool {
        matches!(self, ExitCode::Code(0))
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitCode::Code(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitCode::Signal(signal);
            }
        }

        ExitCode::Unknown
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitCode::Code(code) => write!(f, "code {}", code),
            ExitCode::Signal(signal) => write!(f, "signal {}", signal),
            ExitCode::Unknown => write!(f, "unknown"),
        }
    }
}

/// Something the monitor observed about a running instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    Exited(ExitCode),
    MemoryThresholdExceeded(u64),
}

/// One running occurrence of a supervised application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub pid: u32,
    pub started_at: SystemTime,
    pub last_exit_code: Option<ExitCode>,
    pub memory_usage_bytes: u64,
    pub restart_count: u32,
}

impl ProcessInstance {
    pub fn new(pid: u32, restart_count: u32) -> Self {
        Self {
            pid,
            started_at: SystemTime::now(),
            last_exit_code: None,
            memory_usage_bytes: 0,
            restart_count,
        }
    }

    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.started_at)
            .unwrap_or(Duration::from_secs(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(SupervisorState::Running.to_string(), "running");
        assert_eq!(SupervisorState::WaitingToRestart.to_string(), "waiting-restart");
        assert_eq!(SupervisorState::Stopped.to_string(), "stopped");
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_from_status() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(ExitCode::from(ExitStatus::from_raw(0)), ExitCode::Code(0));
        assert_eq!(ExitCode::from(ExitStatus::from_raw(1 << 8)), ExitCode::Code(1));
        // Killed by SIGKILL
        assert_eq!(ExitCode::from(ExitStatus::from_raw(9)), ExitCode::Signal(9));
    }

    #[test]
    fn test_new_instance() {
        let instance = ProcessInstance::new(42, 3);
        assert_eq!(instance.pid, 42);
        assert_eq!(instance.restart_count, 3);
        assert!(instance.last_exit_code.is_none());
        assert_eq!(instance.memory_usage_bytes, 0);
    }
}
