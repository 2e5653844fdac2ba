//! Shared helpers for the integration tests.

#![allow(dead_code)]

pub mod fake_vcs;

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use checkpoint_lib::checkpoint::{CheckpointConfig, CheckpointEvent, CheckpointService};
use tokio::sync::broadcast;

pub use fake_vcs::FakeVcs;

/// Ten numbered lines, the baseline content of `web/app.ts`.
pub const APP_TS: &str =
    "line 1\nline 2\nline 3\nline 4\nline 5\nline 6\nline 7\nline 8\nline 9\nline 10\n";

pub fn config_for(dir: &Path) -> CheckpointConfig {
    CheckpointConfig::for_project(dir)
}

pub async fn fake_service(dir: &Path, fake: Arc<FakeVcs>) -> CheckpointService {
    fake_service_with(config_for(dir), fake).await
}

pub async fn fake_service_with(config: CheckpointConfig, fake: Arc<FakeVcs>) -> CheckpointService {
    CheckpointService::new(config, fake)
        .await
        .expect("service over fake repository")
}

/// Everything currently queued on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<CheckpointEvent>) -> Vec<CheckpointEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn event_names(events: &[CheckpointEvent]) -> Vec<&'static str> {
    events.iter().map(CheckpointEvent::name).collect()
}

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Runs git in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Fresh repository on `main` with a local identity.
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "--quiet"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(dir, &["config", "user.name", "Checkpoint Tests"]);
    git(dir, &["config", "user.email", "tests@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

pub fn write_file(dir: &Path, path: &str, content: &str) {
    let file = dir.join(path);
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(file, content).unwrap();
}

pub fn read_file(dir: &Path, path: &str) -> Option<String> {
    std::fs::read_to_string(dir.join(path)).ok()
}
