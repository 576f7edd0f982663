// CLI module - Operator-facing command-line interface

mod output;

use crate::config::{AppConfig, Ecosystem, MemoryThreshold};
use crate::error::{Result, TetherError};
use crate::process::{Supervisor, SupervisorHandle, SupervisorState};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

pub use output::print_error;

/// Tether - keep a process running, restart it, route its logs
#[derive(Parser)]
#[command(name = "tether")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise every app in a config file until interrupted
    Run {
        /// Path to a .toml or .json config file
        config: PathBuf,

        /// Only supervise the named apps
        #[arg(short, long)]
        only: Vec<String>,

        /// Extra environment variables for every app (KEY=VALUE format)
        #[arg(short, long)]
        env: Vec<String>,
    },

    /// Supervise a single script given on the command line
    Start {
        /// Path to the script or executable to run
        script: PathBuf,

        /// Name for the app (defaults to script name)
        #[arg(short, long)]
        name: Option<String>,

        /// Runtime the script is handed to, e.g. python3
        #[arg(short, long)]
        interpreter: Option<String>,

        /// Working directory for the app
        #[arg(short, long)]
        cwd: Option<PathBuf>,

        /// Environment variables (KEY=VALUE format)
        #[arg(short, long)]
        env: Vec<String>,

        /// Restart when resident memory exceeds this size (e.g. 500M)
        #[arg(long)]
        max_memory_restart: Option<String>,

        /// Delay before restarting, in milliseconds
        #[arg(long, default_value = "0")]
        restart_delay: u64,

        /// Do not restart the app when it exits
        #[arg(long)]
        no_autorestart: bool,

        /// Write stderr into the stdout log
        #[arg(long)]
        merge_logs: bool,

        /// Arguments to pass to the script
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Validate a config file and show the resolved apps
    Check {
        /// Path to a .toml or .json config file
        config: PathBuf,
    },
}

impl Cli {
    /// Run the CLI application
    pub async fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute().await
    }

    /// Execute the parsed command
    async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run { config, only, env } => {
                let ecosystem = Ecosystem::from_file(&config)?;
                let extra_env = parse_env_vars(&env)?;
                let apps = select_apps(ecosystem.apps, &only)?
                    .into_iter()
                    .map(|mut app| {
                        app.env.extend(extra_env.clone());
                        app
                    })
                    .collect();
                supervise(apps).await
            }

            Commands::Start {
                script,
                name,
                interpreter,
                cwd,
                env,
                max_memory_restart,
                restart_delay,
                no_autorestart,
                merge_logs,
                args,
            } => {
                let name = name.unwrap_or_else(|| {
                    script
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "app".to_string())
                });

                let mut app = AppConfig::new(name, script);
                app.interpreter = interpreter;
                app.cwd = cwd;
                app.env = parse_env_vars(&env)?;
                app.max_memory_restart = max_memory_restart.map(MemoryThreshold::Text);
                app.restart_delay = restart_delay;
                app.autorestart = !no_autorestart;
                app.merge_logs = merge_logs;
                app.args = args;

                let ecosystem = Ecosystem::from_apps(vec![app])?;
                supervise(ecosystem.apps).await
            }

            Commands::Check { config } => {
                let ecosystem = Ecosystem::from_file(&config)?;
                output::print_app_table(&ecosystem.apps);
                output::print_success_msg(&format!("{} is valid", config.display()));
                Ok(())
            }
        }
    }
}

/// Supervise `apps` until a shutdown signal or until every app has stopped
async fn supervise(apps: Vec<AppConfig>) -> Result<()> {
    // Build every supervisor before starting any, so a bad app starts none
    let supervisors = apps
        .iter()
        .map(Supervisor::new)
        .collect::<Result<Vec<_>>>()?;

    let mut handles: Vec<SupervisorHandle> =
        supervisors.into_iter().map(Supervisor::spawn).collect();

    output::print_info(&format!(
        "Supervising {} app(s); press Ctrl-C to stop",
        handles.len()
    ));

    tokio::select! {
        res = shutdown_signal() => {
            res?;
            info!("Shutdown signal received, stopping all apps");
        }
        _ = wait_all_stopped(&mut handles) => {
            info!("All apps have stopped");
        }
    }

    let mut reports = Vec::with_capacity(handles.len());
    for handle in handles {
        reports.push(handle.stop().await?);
    }

    output::print_report_table(&reports);
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

async fn wait_all_stopped(handles: &mut [SupervisorHandle]) {
    for handle in handles.iter_mut() {
        // Err means the task is gone, which counts as stopped
        let _ = handle
            .wait_for(|s| s.state == SupervisorState::Stopped)
            .await;
    }
}

/// Keep only the apps named in `only` (all of them when it is empty)
fn select_apps(apps: Vec<AppConfig>, only: &[String]) -> Result<Vec<AppConfig>> {
    if only.is_empty() {
        return Ok(apps);
    }

    for name in only {
        if !apps.iter().any(|app| &app.name == name) {
            return Err(TetherError::ConfigError(format!(
                "No app named '{}' in config",
                name
            )));
        }
    }

    Ok(apps
        .into_iter()
        .filter(|app| only.contains(&app.name))
        .collect())
}

/// Parse environment variables from KEY=VALUE format
fn parse_env_vars(env_vars: &[String]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();

    for env_str in env_vars {
        if let Some((key, value)) = env_str.split_once('=') {
            map.insert(key.to_string(), value.to_string());
        } else {
            return Err(TetherError::ConfigError(format!(
                "Invalid environment variable format: '{}'. Expected KEY=VALUE",
                env_str
            )));
        }
    }

    Ok(map)
}
