use crate::error::{Result, TetherError};
use crate::process::types::{ExitCode, ProcessEvent, ProcessInstance};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::Child;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Source of resident memory readings for a PID
pub trait MemorySampler: Send {
    /// Resident set size in bytes, or `None` if the process is gone
    fn sample(&mut self, pid: u32) -> Option<u64>;
}

/// Reads resident memory through `sysinfo`
pub struct SysinfoSampler {
    system: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for SysinfoSampler {
    fn sample(&mut self, pid: u32) -> Option<u64> {
        let sys_pid = sysinfo::Pid::from_u32(pid);
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        self.system.process(sys_pid).map(|p| p.memory())
    }
}

/// Watches one instance: its exit and, if a threshold is set, its memory.
///
/// `next_event` yields events in the order they occur. Once `Exited` has
/// been returned the monitor is finished and only yields `None`.
pub struct Monitor {
    child: Child,
    instance: ProcessInstance,
    sampler: Box<dyn MemorySampler>,
    threshold: Option<u64>,
    ticker: Option<Interval>,
    finished: bool,
}

impl Monitor {
    pub fn new(
        child: Child,
        instance: ProcessInstance,
        sampler: Box<dyn MemorySampler>,
        sample_interval: Duration,
        threshold: Option<u64>,
    ) -> Self {
        // No threshold, nothing to sample
        let ticker = threshold.map(|_| {
            let mut ticker = interval_at(Instant::now() + sample_interval, sample_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        Self {
            child,
            instance,
            sampler,
            threshold,
            ticker,
            finished: false,
        }
    }

    pub fn instance(&self) -> &ProcessInstance {
        &self.instance
    }

    /// Wait for the next event on this instance
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        if self.finished {
            return None;
        }

        loop {
            tokio::select! {
                status = self.child.wait() => {
                    let code = match status {
                        Ok(status) => ExitCode::from(status),
                        Err(e) => {
                            warn!("Failed to wait on PID {}: {}", self.instance.pid, e);
                            ExitCode::Unknown
                        }
                    };
                    self.finished = true;
                    self.instance.last_exit_code = Some(code);
                    return Some(ProcessEvent::Exited(code));
                }
                _ = tick(&mut self.ticker) => {
                    let Some(bytes) = self.sampler.sample(self.instance.pid) else {
                        continue;
                    };
                    self.instance.memory_usage_bytes = bytes;
                    debug!("PID {} resident memory: {} bytes", self.instance.pid, bytes);

                    if let Some(limit) = self.threshold {
                        if bytes > limit {
                            return Some(ProcessEvent::MemoryThresholdExceeded(bytes));
                        }
                    }
                }
            }
        }
    }

    /// Send `stop_signal`, wait up to `timeout`, then SIGKILL.
    ///
    /// If the stop signal cannot be delivered the child is killed at once.
    /// The exit itself is left for `next_event` to report.
    pub async fn terminate(&mut self, stop_signal: Signal, timeout: Duration) -> Result<()> {
        if self.finished || matches!(self.child.try_wait(), Ok(Some(_))) {
            return Ok(());
        }

        let pid = self.instance.pid;

        info!("Sending {} to PID {}", stop_signal, pid);
        if let Err(e) = send_signal(Pid::from_raw(pid as i32), stop_signal) {
            warn!("{}; killing PID {} instead", e, pid);
            return self.kill().await;
        }

        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("PID {} exited with {:?}", pid, status);
                Ok(())
            }
            Ok(Err(e)) => Err(TetherError::StopError(
                pid.to_string(),
                format!("Wait failed: {}", e),
            )),
            Err(_) => {
                warn!(
                    "PID {} did not exit within {:?}, sending SIGKILL",
                    pid, timeout
                );
                self.kill().await
            }
        }
    }

    /// SIGKILL through the child handle, then reap it
    async fn kill(&mut self) -> Result<()> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Exited on its own in the meantime
            Err(_) if matches!(self.child.try_wait(), Ok(Some(_))) => Ok(()),
            Err(e) => Err(TetherError::StopError(
                self.instance.pid.to_string(),
                format!("SIGKILL failed: {}", e),
            )),
        }
    }

    /// Hand back the sampler and the final instance record
    pub fn finish(self) -> (ProcessInstance, Box<dyn MemorySampler>) {
        (self.instance, self.sampler)
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn send_signal(pid: Pid, sig: Signal) -> Result<()> {
    match signal::kill(pid, sig) {
        // Already gone
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(TetherError::SignalError(format!(
            "Failed to send {} to {}: {}",
            sig, pid, e
        ))),
    }
}

/// Map a configured signal name to a signal
pub fn parse_signal(signal_name: &str) -> Result<Signal> {
    match signal_name {
        "SIGTERM" => Ok(Signal::SIGTERM),
        "SIGINT" => Ok(Signal::SIGINT),
        "SIGQUIT" => Ok(Signal::SIGQUIT),
        "SIGKILL" => Ok(Signal::SIGKILL),
        "SIGHUP" => Ok(Signal::SIGHUP),
        "SIGUSR1" => Ok(Signal::SIGUSR1),
        "SIGUSR2" => Ok(Signal::SIGUSR2),
        _ => Err(TetherError::SignalError(format!(
            "Invalid signal name: {}. Must be one of: SIGTERM, SIGINT, SIGQUIT, SIGKILL, SIGHUP, SIGUSR1, SIGUSR2",
            signal_name
        ))),
    }
}
