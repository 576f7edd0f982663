mod size;
mod timestamp;

pub use size::{parse_memory_size, MemoryThreshold};
pub use timestamp::TimestampFormat;

use crate::error::{Result, TetherError};
use crate::process::monitor::parse_signal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variables layered over the supervisor's own environment
pub type RuntimeEnv = HashMap<String, String>;

/// One application entry, using the PM2 ecosystem option names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name (unique identifier)
    #[serde(default)]
    pub name: String,

    /// Program or entry point to run
    #[serde(default)]
    pub script: PathBuf,

    /// Runtime the script is handed to, e.g. `python3`
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Extra arguments after the script
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the child
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Whether to restart the child after it exits
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,

    /// Filesystem-triggered restarts are not supported; kept for compatibility
    #[serde(default)]
    pub watch: bool,

    /// Resident memory threshold that triggers a restart
    #[serde(default)]
    pub max_memory_restart: Option<MemoryThreshold>,

    /// Delay before a restart (in milliseconds)
    #[serde(default)]
    pub restart_delay: u64,

    /// Stdout log file (also the merged log when `merge_logs` is set)
    #[serde(default)]
    pub out_file: Option<PathBuf>,

    /// Stderr log file
    #[serde(default)]
    pub error_file: Option<PathBuf>,

    /// Route stderr into the stdout log file
    #[serde(default)]
    pub merge_logs: bool,

    /// Timestamp prefix format for log lines
    #[serde(default = "default_log_date_format")]
    pub log_date_format: String,

    /// Environment variables for the child
    #[serde(default)]
    pub env: RuntimeEnv,

    /// Grace period after the stop signal before SIGKILL (in milliseconds)
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout: u64,

    /// Signal to send on stop
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// How often resident memory is sampled (in milliseconds)
    #[serde(default = "default_memory_check_interval")]
    pub memory_check_interval: u64,
}

// Default value functions for serde
fn default_autorestart() -> bool {
    true
}

fn default_log_date_format() -> String {
    "YYYY-MM-DD HH:mm:ss".to_string()
}

fn default_kill_timeout() -> u64 {
    1600
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_memory_check_interval() -> u64 {
    5000
}

/// What to launch and where
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    pub name: String,
    pub command: PathBuf,
    pub interpreter: Option<String>,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
}

/// When and how to restart
#[derive(Debug, Clone, PartialEq)]
pub struct RestartPolicy {
    pub auto_restart: bool,
    pub restart_delay: Duration,
    pub max_memory_bytes: Option<u64>,
}

/// Where the child's output goes
#[derive(Debug, Clone, PartialEq)]
pub struct LogTargets {
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub merge_streams: bool,
    pub timestamp_format: TimestampFormat,
}

/// How a running child is brought down and watched
#[derive(Debug, Clone, PartialEq)]
pub struct StopPolicy {
    pub signal: String,
    pub kill_timeout: Duration,
    pub memory_check_interval: Duration,
}

impl AppConfig {
    /// Minimal config for `script` with every other option at its default
    pub fn new(name: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
            interpreter: None,
            args: Vec::new(),
            cwd: None,
            autorestart: default_autorestart(),
            watch: false,
            max_memory_restart: None,
            restart_delay: 0,
            out_file: None,
            error_file: None,
            merge_logs: false,
            log_date_format: default_log_date_format(),
            env: RuntimeEnv::new(),
            kill_timeout: default_kill_timeout(),
            stop_signal: default_stop_signal(),
            memory_check_interval: default_memory_check_interval(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TetherError::MissingConfigField("name".to_string()));
        }

        if self.script.as_os_str().is_empty() {
            return Err(TetherError::MissingConfigField("script".to_string()));
        }

        if let Some(ref interpreter) = self.interpreter {
            if interpreter.trim().is_empty() {
                return Err(TetherError::ConfigValidationError(
                    "interpreter must not be empty when set".to_string(),
                ));
            }
        }

        if let Some(ref threshold) = self.max_memory_restart {
            threshold.to_bytes()?;
        }

        parse_signal(&self.stop_signal).map_err(|e| {
            TetherError::ConfigValidationError(format!("Invalid stop_signal: {}", e))
        })?;

        if self.memory_check_interval == 0 {
            return Err(TetherError::ConfigValidationError(
                "memory_check_interval must be greater than zero".to_string(),
            ));
        }

        TimestampFormat::parse(&self.log_date_format)?;

        Ok(())
    }

    /// Working directory, defaulting to the supervisor's own
    pub fn working_directory(&self) -> Result<PathBuf> {
        match self.cwd {
            Some(ref cwd) => Ok(cwd.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    pub fn process_spec(&self) -> Result<ProcessSpec> {
        Ok(ProcessSpec {
            name: self.name.clone(),
            command: self.script.clone(),
            interpreter: self.interpreter.clone(),
            args: self.args.clone(),
            working_directory: self.working_directory()?,
        })
    }

    pub fn restart_policy(&self) -> Result<RestartPolicy> {
        let max_memory_bytes = match self.max_memory_restart {
            Some(ref threshold) => Some(threshold.to_bytes()?),
            None => None,
        };

        Ok(RestartPolicy {
            auto_restart: self.autorestart,
            restart_delay: Duration::from_millis(self.restart_delay),
            max_memory_bytes,
        })
    }

    /// Log targets; relative paths are resolved against the working directory
    pub fn log_targets(&self) -> Result<LogTargets> {
        let cwd = self.working_directory()?;
        let resolve = |path: &Option<PathBuf>, suffix: &str| match path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => cwd.join(p),
            None => cwd.join("logs").join(format!("{}-{}.log", self.name, suffix)),
        };

        Ok(LogTargets {
            stdout_path: resolve(&self.out_file, "out"),
            stderr_path: resolve(&self.error_file, "error"),
            merge_streams: self.merge_logs,
            timestamp_format: TimestampFormat::parse(&self.log_date_format)?,
        })
    }

    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            signal: self.stop_signal.clone(),
            kill_timeout: Duration::from_millis(self.kill_timeout),
            memory_check_interval: Duration::from_millis(self.memory_check_interval),
        }
    }

    /// Expand environment variables in configuration fields
    fn expand_env_vars(&mut self) {
        self.script = expand_env_in_path(&self.script);

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(expand_env_in_path(cwd));
        }
        if let Some(ref out) = self.out_file {
            self.out_file = Some(expand_env_in_path(out));
        }
        if let Some(ref err) = self.error_file {
            self.error_file = Some(expand_env_in_path(err));
        }

        self.args = self
            .args
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();

        // Values only
        self.env = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }
}

/// A loaded configuration file: every application it declares
#[derive(Debug, Clone)]
pub struct Ecosystem {
    pub apps: Vec<AppConfig>,
}

/// The ecosystem layout: `{ apps = [...] }`
#[derive(Deserialize)]
struct AppsFile {
    apps: Vec<AppConfig>,
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Toml,
    Json,
}

impl Format {
    fn from_path(path: &Path) -> Result<Self> {
        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        match extension {
            "toml" => Ok(Format::Toml),
            "json" => Ok(Format::Json),
            _ => Err(TetherError::InvalidConfig(format!(
                "Unsupported file format: {}. Use .toml or .json",
                extension
            ))),
        }
    }

    fn parse<T: DeserializeOwned>(self, contents: &str) -> Result<T> {
        match self {
            Format::Toml => toml::from_str(contents)
                .map_err(|e| TetherError::InvalidConfig(format!("Failed to parse TOML: {}", e))),
            Format::Json => serde_json::from_str(contents)
                .map_err(|e| TetherError::InvalidConfig(format!("Failed to parse JSON: {}", e))),
        }
    }

    /// Whether the document uses the ecosystem layout
    fn has_apps_key(self, contents: &str) -> Result<bool> {
        Ok(match self {
            Format::Toml => self.parse::<toml::Table>(contents)?.contains_key("apps"),
            Format::Json => self
                .parse::<serde_json::Value>(contents)?
                .get("apps")
                .is_some(),
        })
    }
}

impl Ecosystem {
    /// Load applications from a `.toml` or `.json` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TetherError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let format = Format::from_path(path)?;

        // Pick the layout first so a bad field inside `apps` is reported as such
        let apps = if format.has_apps_key(&contents)? {
            format.parse::<AppsFile>(&contents)?.apps
        } else {
            vec![format.parse::<AppConfig>(&contents)?]
        };

        Self::from_apps(apps)
    }

    /// Expand, validate and de-duplicate a set of applications
    pub fn from_apps(apps: Vec<AppConfig>) -> Result<Self> {
        if apps.is_empty() {
            return Err(TetherError::InvalidConfig(
                "No application configuration found".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut expanded = Vec::with_capacity(apps.len());

        for mut app in apps {
            app.expand_env_vars();
            app.validate()?;

            if !seen.insert(app.name.clone()) {
                return Err(TetherError::DuplicateApp(app.name));
            }

            if app.watch {
                tracing::warn!(
                    "App '{}' sets watch=true; file watching is not supported and will be ignored",
                    app.name
                );
            }

            expanded.push(app);
        }

        Ok(Self { apps: expanded })
    }
}

/// Expand `$VAR` and `${VAR}` references from the supervisor's environment.
///
/// A name runs over `[A-Za-z0-9_]`; references to unset variables are kept
/// as written.
fn expand_env_in_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        // (name, bytes consumed after the `$`)
        let (name, consumed) = match after.strip_prefix('{') {
            Some(braced) => match braced.find('}') {
                Some(end) if is_var_name(&braced[..end]) => (&braced[..end], end + 2),
                _ => ("", 0),
            },
            None => {
                let end = after
                    .find(|c: char| !is_var_char(c))
                    .unwrap_or(after.len());
                (&after[..end], end)
            }
        };

        let token = &rest[pos..pos + 1 + consumed];
        match (!name.is_empty()).then(|| std::env::var(name)) {
            Some(Ok(value)) => result.push_str(&value),
            _ => result.push_str(token),
        }
        rest = &rest[pos + 1 + consumed..];
    }

    result.push_str(rest);
    result
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_var_char)
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}
