use crate::config::{ProcessSpec, RuntimeEnv};
use crate::error::LaunchError;
use crate::process::types::ProcessInstance;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};

/// A freshly spawned child and its instance record
#[derive(Debug)]
pub struct Launched {
    /// The child process handle
    pub child: Child,

    /// Instance record for the new child
    pub instance: ProcessInstance,
}

/// Spawn the child described by `spec`.
///
/// The working directory is checked first, then the command is resolved:
/// with an interpreter the script becomes its first argument, otherwise the
/// script itself is executed. The child inherits the supervisor environment
/// with `env` layered on top; stdout and stderr are piped for the log router.
pub async fn launch(
    spec: &ProcessSpec,
    env: &RuntimeEnv,
) -> std::result::Result<Launched, LaunchError> {
    check_working_directory(&spec.working_directory)?;

    let cwd = &spec.working_directory;
    let program;
    let mut command = match interpreter(spec) {
        Some(interpreter) => {
            let script = resolve_against(cwd, &spec.command);
            if !script.exists() {
                return Err(LaunchError::NotFound(script));
            }
            program = PathBuf::from(interpreter);
            let mut command = Command::new(interpreter);
            command.arg(&spec.command);
            command
        }
        None => {
            program = if has_separator(&spec.command) {
                resolve_against(cwd, &spec.command)
            } else {
                spec.command.clone()
            };
            Command::new(&program)
        }
    };

    command
        .args(&spec.args)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| match e.kind() {
        ErrorKind::NotFound => LaunchError::NotFound(program.clone()),
        ErrorKind::PermissionDenied => LaunchError::PermissionDenied(program.clone()),
        _ => LaunchError::Spawn(program.clone(), e),
    })?;

    let pid = child.id().ok_or_else(|| {
        LaunchError::Spawn(
            program.clone(),
            std::io::Error::new(ErrorKind::Other, "child exited before its pid was read"),
        )
    })?;

    tracing::debug!(
        "Spawned '{}' as PID {} in {}",
        spec.name,
        pid,
        cwd.display()
    );

    Ok(Launched {
        child,
        instance: ProcessInstance::new(pid, 0),
    })
}

/// `interpreter: "none"` is the PM2 spelling for running the script directly
fn interpreter(spec: &ProcessSpec) -> Option<&str> {
    spec.interpreter
        .as_deref()
        .filter(|i| !i.is_empty() && *i != "none")
}

pub(crate) fn check_working_directory(dir: &Path) -> std::result::Result<(), LaunchError> {
    let bad = |reason: String| LaunchError::BadWorkingDirectory {
        path: dir.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(dir).map_err(|e| bad(e.to_string()))?;
    if !metadata.is_dir() {
        return Err(bad("not a directory".to_string()));
    }

    std::fs::read_dir(dir).map_err(|e| bad(format!("not readable: {}", e)))?;

    Ok(())
}

fn resolve_against(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn has_separator(path: &Path) -> bool {
    path.components().count() > 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn create_test_spec(command: &str, cwd: &Path) -> ProcessSpec {
        ProcessSpec {
            name: "test".to_string(),
            command: PathBuf::from(command),
            interpreter: None,
            args: vec![],
            working_directory: cwd.to_path_buf(),
        }
    }

    #[tokio::test]
    async fn test_launch_simple_process() {
        let temp_dir = TempDir::new().unwrap();
        let spec = create_test_spec("/bin/echo", temp_dir.path());

        let launched = launch(&spec, &HashMap::new()).await.unwrap();
        assert!(launched.instance.pid > 0);
        assert_eq!(launched.instance.restart_count, 0);
        assert!(launched.child.stdout.is_some());
        assert!(launched.child.stderr.is_some());
    }

    #[tokio::test]
    async fn test_launch_searches_path_for_bare_names() {
        let temp_dir = TempDir::new().unwrap();
        let spec = create_test_spec("sh", temp_dir.path());

        assert!(launch(&spec, &HashMap::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_launch_with_interpreter() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("main.sh"), "echo hi\n").unwrap();

        let mut spec = create_test_spec("main.sh", temp_dir.path());
        spec.interpreter = Some("sh".to_string());

        let mut launched = launch(&spec, &HashMap::new()).await.unwrap();
        let status = launched.child.wait().await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_launch_merges_env() {
        let temp_dir = TempDir::new().unwrap();
        let mut spec = create_test_spec("/bin/sh", temp_dir.path());
        spec.args = vec![
            "-c".to_string(),
            "test \"$NODE_ENV\" = production && test -n \"$PATH\"".to_string(),
        ];

        let mut env = HashMap::new();
        env.insert("NODE_ENV".to_string(), "production".to_string());

        let mut launched = launch(&spec, &env).await.unwrap();
        let status = launched.child.wait().await.unwrap();
        assert!(status.success(), "child should see both RuntimeEnv and inherited vars");
    }

    #[tokio::test]
    async fn test_launch_nonexistent_command() {
        let temp_dir = TempDir::new().unwrap();
        let spec = create_test_spec("/nonexistent/binary", temp_dir.path());

        let result = launch(&spec, &HashMap::new()).await;
        assert!(matches!(result, Err(LaunchError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_launch_missing_script_for_interpreter() {
        let temp_dir = TempDir::new().unwrap();
        let mut spec = create_test_spec("missing.py", temp_dir.path());
        spec.interpreter = Some("python3".to_string());

        let result = launch(&spec, &HashMap::new()).await;
        match result {
            Err(LaunchError::NotFound(path)) => assert!(path.ends_with("missing.py")),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_launch_non_executable_script() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("plain.txt"), "not a program").unwrap();
        let spec = create_test_spec("./plain.txt", temp_dir.path());

        let result = launch(&spec, &HashMap::new()).await;
        assert!(matches!(result, Err(LaunchError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_launch_invalid_working_directory() {
        let spec = create_test_spec("/bin/echo", Path::new("/nonexistent/directory"));

        let result = launch(&spec, &HashMap::new()).await;
        assert!(matches!(
            result,
            Err(LaunchError::BadWorkingDirectory { .. })
        ));
    }

    #[tokio::test]
    async fn test_launch_working_directory_is_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("file");
        std::fs::write(&file, "").unwrap();
        let spec = create_test_spec("/bin/echo", &file);

        let result = launch(&spec, &HashMap::new()).await;
        assert!(matches!(
            result,
            Err(LaunchError::BadWorkingDirectory { .. })
        ));
    }
}
