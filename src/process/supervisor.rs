use crate::config::{AppConfig, LogTargets, ProcessSpec, RestartPolicy, RuntimeEnv};
use crate::error::{Result, TetherError};
use crate::logs::{LogRouter, RouterHandle};
use crate::process::monitor::{parse_signal, MemorySampler, Monitor, SysinfoSampler};
use crate::process::restart::{Action, PolicyEngine};
use crate::process::spawner::{check_working_directory, launch};
use crate::process::types::{ExitCode, ProcessEvent, SupervisorState};
use nix::sys::signal::Signal;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long to wait for a dead child's pipes to drain into the logs
const LOG_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Point-in-time view of one supervised application
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub name: String,
    pub state: SupervisorState,
    /// PID of the live instance, if any
    pub pid: Option<u32>,
    /// Launch attempts, including failed ones
    pub launches: u32,
    pub restart_count: u32,
    /// Terminations caused by the memory threshold
    pub memory_restarts: u32,
    pub last_exit_code: Option<ExitCode>,
    pub memory_usage_bytes: u64,
    /// Most recent launch failure
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: SupervisorState::Running,
            pid: None,
            launches: 0,
            restart_count: 0,
            memory_restarts: 0,
            last_exit_code: None,
            memory_usage_bytes: 0,
            last_error: None,
        }
    }
}

/// Supervises a single application from one watcher task.
///
/// The task is the only place that launches, so restarts of the same
/// application are strictly serialized.
pub struct Supervisor {
    spec: ProcessSpec,
    env: RuntimeEnv,
    policy: RestartPolicy,
    logs: LogTargets,
    stop_signal: Signal,
    kill_timeout: Duration,
    sample_interval: Duration,
    /// Lent to the monitor of the live instance
    sampler: Option<Box<dyn MemorySampler>>,
}

impl Supervisor {
    pub fn new(app: &AppConfig) -> Result<Self> {
        app.validate()?;
        let stop = app.stop_policy();

        Ok(Self {
            spec: app.process_spec()?,
            env: app.env.clone(),
            policy: app.restart_policy()?,
            logs: app.log_targets()?,
            stop_signal: parse_signal(&stop.signal)?,
            kill_timeout: stop.kill_timeout,
            sample_interval: stop.memory_check_interval,
            sampler: Some(Box::new(SysinfoSampler::new())),
        })
    }

    /// Replace the memory sampler
    pub fn with_sampler(mut self, sampler: Box<dyn MemorySampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    /// Start the watcher task
    pub fn spawn(self) -> SupervisorHandle {
        let name = self.spec.name.clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::new(&name));

        let task = tokio::spawn(self.run(stop_rx, status_tx));

        SupervisorHandle {
            name,
            stop_tx,
            status_rx,
            task,
        }
    }

    async fn run(
        mut self,
        mut stop_rx: watch::Receiver<bool>,
        status_tx: watch::Sender<StatusSnapshot>,
    ) -> StatusSnapshot {
        let mut engine = PolicyEngine::new(self.policy.clone());
        info!("Supervising '{}'", self.spec.name);

        loop {
            status_tx.send_modify(|s| {
                s.state = engine.state();
                s.launches += 1;
                s.restart_count = engine.restart_count();
            });

            let action = match self.start_instance(engine.restart_count()).await {
                Ok((monitor, router)) => {
                    let action = self
                        .watch_instance(monitor, &mut engine, &mut stop_rx, &status_tx)
                        .await;
                    router.finish(LOG_DRAIN_GRACE).await;
                    action
                }
                Err(e) => {
                    error!("Failed to launch '{}': {}", self.spec.name, e);
                    status_tx.send_modify(|s| s.last_error = Some(e.to_string()));
                    engine.on_launch_failed()
                }
            };

            status_tx.send_modify(|s| s.state = engine.state());

            let Action::ScheduleRestart(delay) = action else {
                break;
            };

            info!("Restarting '{}' in {:?}", self.spec.name, delay);
            tokio::select! {
                biased;
                _ = stop_rx.changed() => {
                    info!("Stop requested for '{}' while waiting to restart", self.spec.name);
                    engine.request_stop();
                }
                _ = tokio::time::sleep(delay) => {
                    engine.on_restart_due();
                }
            }

            if engine.state() == SupervisorState::Stopped {
                break;
            }
        }

        info!("Stopped supervising '{}'", self.spec.name);
        status_tx.send_modify(|s| {
            s.state = engine.state();
            s.pid = None;
        });
        let report = status_tx.borrow().clone();
        report
    }

    /// Open the logs, spawn the child, and hook both up to a monitor
    async fn start_instance(&mut self, restart_count: u32) -> Result<(Monitor, RouterHandle)> {
        // Opening default log paths must not create a missing working directory
        check_working_directory(&self.spec.working_directory)?;
        // Logs first: an unwritable log path must abort before spawning
        let router = LogRouter::open(&self.logs).await?;
        let mut launched = launch(&self.spec, &self.env).await?;
        launched.instance.restart_count = restart_count;

        let stdout = launched
            .child
            .stdout
            .take()
            .ok_or_else(|| TetherError::Internal("stdout pipe missing".to_string()))?;
        let stderr = launched
            .child
            .stderr
            .take()
            .ok_or_else(|| TetherError::Internal("stderr pipe missing".to_string()))?;
        let router = router.attach(stdout, stderr);

        info!(
            "Started '{}' (PID {}, restarts: {})",
            self.spec.name, launched.instance.pid, restart_count
        );

        let sampler = self
            .sampler
            .take()
            .unwrap_or_else(|| Box::new(SysinfoSampler::new()));
        let monitor = Monitor::new(
            launched.child,
            launched.instance,
            sampler,
            self.sample_interval,
            self.policy.max_memory_bytes,
        );

        Ok((monitor, router))
    }

    /// Drive one instance until the policy says restart or halt
    async fn watch_instance(
        &mut self,
        mut monitor: Monitor,
        engine: &mut PolicyEngine,
        stop_rx: &mut watch::Receiver<bool>,
        status_tx: &watch::Sender<StatusSnapshot>,
    ) -> Action {
        let pid = monitor.instance().pid;
        status_tx.send_modify(|s| {
            s.pid = Some(pid);
            s.last_error = None;
        });

        let mut stop_seen = false;
        let action = loop {
            let event = tokio::select! {
                // A stop racing an exit wins, so the exit is not taken for a crash
                biased;
                _ = stop_rx.changed(), if !stop_seen => {
                    stop_seen = true;
                    info!("Stop requested for '{}'", self.spec.name);
                    if engine.request_stop() == Action::Terminate {
                        status_tx.send_modify(|s| s.state = SupervisorState::Stopping);
                        if !self.terminate(&mut monitor).await {
                            // No exit will ever be reported; dropping the monitor kills on drop
                            break engine.on_event(ProcessEvent::Exited(ExitCode::Unknown));
                        }
                    }
                    continue;
                }
                event = monitor.next_event() => event,
            };

            let event = event.unwrap_or(ProcessEvent::Exited(ExitCode::Unknown));
            match event {
                ProcessEvent::Exited(code) => {
                    info!("'{}' (PID {}) exited with {}", self.spec.name, pid, code);
                }
                ProcessEvent::MemoryThresholdExceeded(bytes) => {
                    warn!(
                        "'{}' (PID {}) uses {} bytes, above the {:?} byte limit",
                        self.spec.name, pid, bytes, self.policy.max_memory_bytes
                    );
                }
            }

            let action = engine.on_event(event);
            let usage = monitor.instance().memory_usage_bytes;
            status_tx.send_modify(|s| s.memory_usage_bytes = usage);

            match action {
                Action::Terminate => {
                    status_tx.send_modify(|s| s.memory_restarts += 1);
                    self.terminate(&mut monitor).await;
                }
                Action::ScheduleRestart(_) | Action::Halt => break action,
                Action::None | Action::Launch => {}
            }
        };

        let (instance, sampler) = monitor.finish();
        self.sampler = Some(sampler);

        debug!(
            "Instance of '{}' ran for {:?}",
            self.spec.name,
            instance.uptime()
        );
        status_tx.send_modify(|s| {
            s.pid = None;
            s.last_exit_code = instance.last_exit_code;
        });

        action
    }

    /// False if the child could not be brought down
    async fn terminate(&mut self, monitor: &mut Monitor) -> bool {
        match monitor.terminate(self.stop_signal, self.kill_timeout).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to terminate '{}': {}", self.spec.name, e);
                false
            }
        }
    }
}

/// Control handle for a running supervisor
pub struct SupervisorHandle {
    name: String,
    stop_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<StatusSnapshot>,
    task: JoinHandle<StatusSnapshot>,
}

impl SupervisorHandle {
    /// Latest published status
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    /// Wait until the status satisfies `predicate`
    pub async fn wait_for<F>(&mut self, predicate: F) -> Result<StatusSnapshot>
    where
        F: FnMut(&StatusSnapshot) -> bool,
    {
        let snapshot = self.status_rx.wait_for(predicate).await.map_err(|_| {
            TetherError::Internal(format!("supervisor for '{}' has exited", self.name))
        })?;
        Ok(snapshot.clone())
    }

    /// Stop the application and wait for the watcher task to finish
    pub async fn stop(self) -> Result<StatusSnapshot> {
        // Fails only if the task already ended, which is fine
        let _ = self.stop_tx.send(true);
        self.task
            .await
            .map_err(|e| TetherError::Internal(format!("supervisor for '{}': {}", self.name, e)))
    }
}
