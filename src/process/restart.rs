use crate::config::RestartPolicy;
use crate::process::types::{ProcessEvent, SupervisorState};
use std::time::Duration;

/// What the supervisor should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do
    None,
    /// Bring the running child down (graceful, then forceful)
    Terminate,
    /// Wait this long, then call `on_restart_due`
    ScheduleRestart(Duration),
    /// Launch a new instance
    Launch,
    /// Supervision is over
    Halt,
}

/// Restart policy state machine for one application.
///
/// The engine never touches processes itself; it only turns events into
/// actions, so the watcher task stays the single place that launches.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    policy: RestartPolicy,
    state: SupervisorState,
    restart_count: u32,
    /// A memory breach already asked for termination of this instance
    memory_restart_pending: bool,
}

impl PolicyEngine {
    /// Engine for an instance that has just been launched
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            state: SupervisorState::Running,
            restart_count: 0,
            memory_restart_pending: false,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn on_event(&mut self, event: ProcessEvent) -> Action {
        match (self.state, event) {
            (SupervisorState::Stopping, ProcessEvent::Exited(_)) => {
                self.state = SupervisorState::Stopped;
                Action::Halt
            }
            (SupervisorState::Running, ProcessEvent::Exited(_)) => {
                self.memory_restart_pending = false;
                self.after_exit()
            }
            (SupervisorState::Running, ProcessEvent::MemoryThresholdExceeded(_)) => {
                if self.memory_restart_pending {
                    Action::None
                } else {
                    self.memory_restart_pending = true;
                    Action::Terminate
                }
            }
            _ => Action::None,
        }
    }

    /// A launch attempt failed before a child was running
    pub fn on_launch_failed(&mut self) -> Action {
        match self.state {
            SupervisorState::Running => self.after_exit(),
            _ => Action::None,
        }
    }

    /// The restart delay has elapsed
    pub fn on_restart_due(&mut self) -> Action {
        match self.state {
            SupervisorState::WaitingToRestart => {
                self.state = SupervisorState::Running;
                self.restart_count += 1;
                Action::Launch
            }
            _ => Action::None,
        }
    }

    /// The operator asked for the application to stop
    pub fn request_stop(&mut self) -> Action {
        match self.state {
            SupervisorState::Running => {
                self.state = SupervisorState::Stopping;
                Action::Terminate
            }
            // Suppresses the pending restart
            SupervisorState::WaitingToRestart => {
                self.state = SupervisorState::Stopped;
                Action::Halt
            }
            SupervisorState::Stopping | SupervisorState::Stopped => Action::None,
        }
    }

    fn after_exit(&mut self) -> Action {
        if self.policy.auto_restart {
            self.state = SupervisorState::WaitingToRestart;
            Action::ScheduleRestart(self.policy.restart_delay)
        } else {
            self.state = SupervisorState::Stopped;
            Action::Halt
        }
    }
}
