//! Real tmux transport. All `send-keys` literal sends use `-l` so shell
//! metacharacters in a trigger or inbox path are never interpreted.

use super::{ControlKey, MultiplexerAdapter, PaneInfo, SplitOpts};
use crate::error::AdapterError;
use async_trait::async_trait;
use std::process::{Command, Output};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 100;

fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS * (1 << attempt.saturating_sub(1));
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos());
    let pct = 75 + (nanos % 51) as u64;
    Duration::from_millis(base * pct / 100)
}

fn command_failed(reason: impl Into<String>) -> AdapterError {
    AdapterError::CommandFailed { reason: reason.into() }
}

fn run(args: &[&str]) -> Result<Output, AdapterError> {
    Command::new("tmux")
        .args(args)
        .output()
        .map_err(|e| command_failed(format!("failed to invoke tmux {args:?}: {e}")))
}

fn run_ok(args: &[&str]) -> Result<String, AdapterError> {
    let output = run(args)?;
    if !output.status.success() {
        return Err(command_failed(format!(
            "tmux {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Adapter driving a real tmux server via the `tmux` CLI.
#[derive(Debug, Clone, Default)]
pub struct TmuxAdapter;

#[async_trait]
impl MultiplexerAdapter for TmuxAdapter {
    async fn list_panes(&self, target: &str) -> Result<Vec<PaneInfo>, AdapterError> {
        let stdout = run_ok(&[
            "list-panes",
            "-t",
            target,
            "-F",
            "#{pane_id}\t#{pane_current_command}\t#{pane_start_command}",
        ])?;
        Ok(stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(|line| {
                let mut parts = line.splitn(3, '\t');
                PaneInfo {
                    pane_id: parts.next().unwrap_or_default().to_string(),
                    current_command: parts.next().unwrap_or_default().to_string(),
                    start_command: parts.next().unwrap_or_default().to_string(),
                }
            })
            .collect())
    }

    async fn split_pane(&self, target: &str, opts: &SplitOpts) -> Result<String, AdapterError> {
        let mut args: Vec<String> = vec!["split-window".into(), "-t".into(), target.into()];
        args.push(if opts.vertical { "-v".into() } else { "-h".into() });
        if let Some(pct) = opts.size_percent {
            args.push("-p".into());
            args.push(pct.to_string());
        }
        args.push("-P".into());
        args.push("-F".into());
        args.push("#{pane_id}".into());
        if let Some(cmd) = &opts.start_command {
            args.push(cmd.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let pane_id = run_ok(&arg_refs)?;
        Ok(pane_id.trim().to_string())
    }

    async fn kill_pane(&self, pane_id: &str) -> Result<(), AdapterError> {
        let output = run(&["kill-pane", "-t", pane_id])?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("can't find pane") {
            return Ok(());
        }
        Err(command_failed(format!("kill-pane {pane_id} failed: {stderr}")))
    }

    async fn send_keys_literal(&self, pane_id: &str, text: &str) -> Result<(), AdapterError> {
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match run_ok(&["send-keys", "-t", pane_id, "-l", text]) {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff_with_jitter(attempt)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| command_failed("unknown send-keys failure")))
    }

    async fn send_keys_control(&self, pane_id: &str, key: ControlKey) -> Result<(), AdapterError> {
        let key_arg = match key {
            ControlKey::SubmitLine => "Enter",
            ControlKey::Interrupt => "C-c",
            ControlKey::Tab => "Tab",
        };
        let mut last_err = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match run_ok(&["send-keys", "-t", pane_id, key_arg]) {
                Ok(_) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(backoff_with_jitter(attempt)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| command_failed("unknown send-keys control failure")))
    }

    async fn capture_pane(&self, pane_id: &str, last_n_lines: u32) -> Result<String, AdapterError> {
        run_ok(&[
            "capture-pane",
            "-p",
            "-t",
            pane_id,
            "-S",
            &format!("-{last_n_lines}"),
        ])
    }

    async fn is_pane_alive(&self, pane_id: &str) -> Result<bool, AdapterError> {
        let output = run(&["display-message", "-p", "-t", pane_id, "#{pane_id}"])?;
        Ok(output.status.success())
    }

    async fn get_pane_pid(&self, pane_id: &str) -> Result<Option<u32>, AdapterError> {
        let output = run(&["display-message", "-p", "-t", pane_id, "#{pane_pid}"])?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().parse().ok())
    }

    async fn current_leader_pane_id(&self) -> Result<Option<String>, AdapterError> {
        Ok(std::env::var("TMUX_PANE").ok().filter(|v| !v.is_empty()))
    }
}
