// Integration test for configuration file support

use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tether::config::Ecosystem;
use tether::error::TetherError;

#[test]
fn test_load_toml_config_single_app() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("tether.toml");

    let toml_content = r#"
        name = "bot"
        script = "main.py"
        interpreter = "python3"
        cwd = "/srv/bot"
        autorestart = true
        max_memory_restart = "500M"
        restart_delay = 5000
        error_file = "logs/err.log"
        out_file = "logs/out.log"
        log_date_format = "YYYY-MM-DD HH:mm Z"

        [env]
        NODE_ENV = "production"
    "#;

    fs::write(&config_path, toml_content).unwrap();

    let ecosystem = Ecosystem::from_file(&config_path).unwrap();
    assert_eq!(ecosystem.apps.len(), 1);

    let app = &ecosystem.apps[0];
    assert_eq!(app.name, "bot");
    assert_eq!(app.script, PathBuf::from("main.py"));
    assert_eq!(app.interpreter.as_deref(), Some("python3"));
    assert_eq!(app.env.get("NODE_ENV"), Some(&"production".to_string()));

    let policy = app.restart_policy().unwrap();
    assert!(policy.auto_restart);
    assert_eq!(policy.restart_delay, Duration::from_millis(5000));
    assert_eq!(policy.max_memory_bytes, Some(500_000_000));

    let targets = app.log_targets().unwrap();
    assert_eq!(targets.stdout_path, PathBuf::from("/srv/bot/logs/out.log"));
    assert_eq!(targets.stderr_path, PathBuf::from("/srv/bot/logs/err.log"));
    assert!(!targets.merge_streams);
}

#[test]
fn test_load_toml_config_multiple_apps() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("tether.toml");

    let toml_content = r#"
        [[apps]]
        name = "web"
        script = "/usr/bin/node"
        args = ["server.js"]

        [[apps]]
        name = "worker"
        script = "worker.py"
        interpreter = "python3"
        autorestart = false
        max_memory_restart = 536870912
    "#;

    fs::write(&config_path, toml_content).unwrap();

    let ecosystem = Ecosystem::from_file(&config_path).unwrap();
    assert_eq!(ecosystem.apps.len(), 2);

    assert_eq!(ecosystem.apps[0].name, "web");
    assert_eq!(ecosystem.apps[0].args, vec!["server.js"]);
    assert!(ecosystem.apps[0].autorestart);

    assert_eq!(ecosystem.apps[1].name, "worker");
    assert!(!ecosystem.apps[1].autorestart);
    assert_eq!(
        ecosystem.apps[1].restart_policy().unwrap().max_memory_bytes,
        Some(536870912)
    );
}

#[test]
fn test_load_json_ecosystem() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("ecosystem.json");

    let json_content = r#"
        {
            "apps": [
                {
                    "name": "api",
                    "script": "api.js",
                    "interpreter": "node",
                    "merge_logs": true,
                    "out_file": "/var/log/api.log",
                    "kill_timeout": 3000,
                    "env": { "PORT": "8080" }
                },
                {
                    "name": "cron",
                    "script": "./cron.sh",
                    "watch": true
                }
            ]
        }
    "#;

    fs::write(&config_path, json_content).unwrap();

    let ecosystem = Ecosystem::from_file(&config_path).unwrap();
    assert_eq!(ecosystem.apps.len(), 2);

    let api = &ecosystem.apps[0];
    assert_eq!(api.env.get("PORT"), Some(&"8080".to_string()));
    assert_eq!(api.stop_policy().kill_timeout, Duration::from_millis(3000));

    let targets = api.log_targets().unwrap();
    assert!(targets.merge_streams);
    assert_eq!(targets.stdout_path, PathBuf::from("/var/log/api.log"));

    // Accepted but has no effect
    assert!(ecosystem.apps[1].watch);
}

#[test]
fn test_default_log_paths_follow_cwd() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("tether.json");

    fs::write(
        &config_path,
        r#"{ "name": "bot", "script": "bot.sh", "cwd": "/opt/bot" }"#,
    )
    .unwrap();

    let ecosystem = Ecosystem::from_file(&config_path).unwrap();
    let targets = ecosystem.apps[0].log_targets().unwrap();
    assert_eq!(targets.stdout_path, PathBuf::from("/opt/bot/logs/bot-out.log"));
    assert_eq!(targets.stderr_path, PathBuf::from("/opt/bot/logs/bot-error.log"));
}

#[test]
fn test_env_expansion_in_paths() {
    std::env::set_var("TETHER_TEST_APP_ROOT", "/opt/expanded");

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("tether.toml");

    fs::write(
        &config_path,
        r#"
            name = "expanded"
            script = "${TETHER_TEST_APP_ROOT}/run.sh"
            cwd = "$TETHER_TEST_APP_ROOT"
        "#,
    )
    .unwrap();

    let ecosystem = Ecosystem::from_file(&config_path).unwrap();
    assert_eq!(ecosystem.apps[0].script, PathBuf::from("/opt/expanded/run.sh"));
    assert_eq!(ecosystem.apps[0].cwd, Some(PathBuf::from("/opt/expanded")));
}

#[test]
fn test_duplicate_app_names_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("tether.toml");

    fs::write(
        &config_path,
        r#"
            [[apps]]
            name = "same"
            script = "/bin/true"

            [[apps]]
            name = "same"
            script = "/bin/false"
        "#,
    )
    .unwrap();

    let result = Ecosystem::from_file(&config_path);
    assert!(matches!(result, Err(TetherError::DuplicateApp(name)) if name == "same"));
}

#[test]
fn test_invalid_memory_threshold_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("tether.json");

    fs::write(
        &config_path,
        r#"{ "name": "bot", "script": "bot.sh", "max_memory_restart": "lots" }"#,
    )
    .unwrap();

    let result = Ecosystem::from_file(&config_path);
    assert!(matches!(result, Err(TetherError::InvalidMemorySize(_, _))));
}

#[test]
fn test_unsupported_extension_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("tether.yaml");
    fs::write(&config_path, "name: bot").unwrap();

    let result = Ecosystem::from_file(&config_path);
    assert!(matches!(result, Err(TetherError::InvalidConfig(_))));
}

#[test]
fn test_missing_file_rejected() {
    let result = Ecosystem::from_file(&PathBuf::from("/nonexistent/tether.toml"));
    assert!(matches!(result, Err(TetherError::ConfigError(_))));
}
