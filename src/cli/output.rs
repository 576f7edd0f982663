// Output formatting and display for CLI

use crate::config::AppConfig;
use crate::process::{ExitCode, StatusSnapshot, SupervisorState};
use colored::*;
use std::time::Duration;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print the resolved configuration of each application
pub fn print_app_table(apps: &[AppConfig]) {
    #[derive(Tabled)]
    struct AppRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Command")]
        command: String,
        #[tabled(rename = "Cwd")]
        cwd: String,
        #[tabled(rename = "Autorestart")]
        autorestart: String,
        #[tabled(rename = "Delay")]
        delay: String,
        #[tabled(rename = "Max Memory")]
        max_memory: String,
        #[tabled(rename = "Logs")]
        logs: String,
    }

    let rows: Vec<AppRow> = apps
        .iter()
        .map(|app| {
            let command = match app.interpreter {
                Some(ref interpreter) => format!("{} {}", interpreter, app.script.display()),
                None => app.script.display().to_string(),
            };
            let max_memory = app
                .restart_policy()
                .ok()
                .and_then(|p| p.max_memory_bytes)
                .map(format_memory)
                .unwrap_or_else(|| "-".to_string());
            let logs = match app.log_targets() {
                Ok(t) if t.merge_streams => format!("{} (merged)", t.stdout_path.display()),
                Ok(t) => format!("{}\n{}", t.stdout_path.display(), t.stderr_path.display()),
                Err(_) => "-".to_string(),
            };

            AppRow {
                name: truncate(&app.name, 20),
                command: truncate(&command, 40),
                cwd: app
                    .cwd
                    .as_ref()
                    .map(|c| c.display().to_string())
                    .unwrap_or_else(|| ".".to_string()),
                autorestart: if app.autorestart { "yes" } else { "no" }.to_string(),
                delay: format_duration(&Duration::from_millis(app.restart_delay)),
                max_memory,
                logs,
            }
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
    println!(
        "{}",
        format!("Total: {} app(s)", apps.len()).dimmed().italic()
    );
}

/// Print the final status of each supervised application
pub fn print_report_table(reports: &[StatusSnapshot]) {
    #[derive(Tabled)]
    struct ReportRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "State")]
        state: String,
        #[tabled(rename = "Launches")]
        launches: String,
        #[tabled(rename = "Restarts")]
        restarts: String,
        #[tabled(rename = "Memory Restarts")]
        memory_restarts: String,
        #[tabled(rename = "Last Exit")]
        last_exit: String,
        #[tabled(rename = "Memory")]
        memory: String,
    }

    let rows: Vec<ReportRow> = reports
        .iter()
        .map(|r| ReportRow {
            name: truncate(&r.name, 20),
            state: format_state_colored(&r.state),
            launches: r.launches.to_string(),
            restarts: r.restart_count.to_string(),
            memory_restarts: r.memory_restarts.to_string(),
            last_exit: format_exit(r.last_exit_code.as_ref()),
            memory: format_memory(r.memory_usage_bytes),
        })
        .collect();

    let mut table = Table::new(rows);
    table
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    println!("\n{}\n", table);
}

/// Format a supervisor state with color coding
fn format_state_colored(state: &SupervisorState) -> String {
    match state {
        SupervisorState::Running => state.to_string().green().to_string(),
        SupervisorState::WaitingToRestart => state.to_string().yellow().to_string(),
        SupervisorState::Stopping => state.to_string().yellow().to_string(),
        SupervisorState::Stopped => state.to_string().bright_black().to_string(),
    }
}

fn format_exit(code: Option<&ExitCode>) -> String {
    match code {
        None => "-".to_string(),
        Some(code) if code.success() => code.to_string().green().to_string(),
        Some(code) => code.to_string().red().to_string(),
    }
}

/// Format a duration in human-readable format
fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_millis();
    let secs = duration.as_secs();

    if millis < 1000 {
        format!("{}ms", millis)
    } else if secs < 60 {
        if millis % 1000 == 0 {
            format!("{}s", secs)
        } else {
            format!("{:.1}s", duration.as_secs_f64())
        }
    } else if secs < 3600 {
        let mins = secs / 60;
        let secs = secs % 60;
        if secs > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}m", mins)
        }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins > 0 {
            format!("{}h {}m", hours, mins)
        } else {
            format!("{}h", hours)
        }
    }
}

/// Format memory in the same decimal units `max_memory_restart` uses
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1_000;
    const MB: u64 = KB * 1_000;
    const GB: u64 = MB * 1_000;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Truncate a string to a maximum length
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::from_millis(0)), "0ms");
        assert_eq!(format_duration(&Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(&Duration::from_millis(5000)), "5s");
        assert_eq!(format_duration(&Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(&Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(&Duration::from_secs(3700)), "1h 1m");
    }

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory(512), "512B");
        assert_eq!(format_memory(2_000), "2.0KB");
        assert_eq!(format_memory(500_000_000), "500.0MB");
        assert_eq!(format_memory(3_000_000_000), "3.00GB");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a very long string", 10), "this is...");
    }

    #[test]
    fn test_format_exit() {
        colored::control::set_override(false);
        assert_eq!(format_exit(None), "-");
        assert_eq!(format_exit(Some(&ExitCode::Code(0))), "code 0");
        assert_eq!(format_exit(Some(&ExitCode::Signal(9))), "signal 9");
    }
}
