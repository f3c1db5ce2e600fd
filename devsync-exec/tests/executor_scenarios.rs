//! Executor behaviour against a real shell.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::Duration;

use devsync_core::{config, resolve, CommandSpec};
use devsync_exec::{CommandExecutor, ConsoleSink, PromptMode, ShellRunner};
use tempfile::TempDir;

const CONFIG: &str = r#"
email: dev@example.com
rules:
  "deploy/*":
    - echo deploy >> trace.log
    - echo deploy >> trace.log
  "**/*.js":
    - manualOverride:
        - echo manual >> trace.log
    - skipIf:
        testFor: ["echo deploy >> trace.log"]
        commands:
          - echo skipped-block >> trace.log
  "package.json":
    - skipIf:
        testFor: ["npm ci"]
        commands:
          - echo install >> trace.log
"#;

fn trace(dir: &TempDir) -> Vec<String> {
    fs::read_to_string(dir.path().join("trace.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn resolved_queue_runs_in_order_with_modifiers() {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config::parse(CONFIG, Path::new("inline.yaml")).expect("config");
    let changed = vec![
        "deploy/app.sh".to_string(),
        "web/index.js".to_string(),
        "package.json".to_string(),
    ];
    let queue = resolve(&changed, &cfg.rules, cfg.match_policy());

    let runner = ShellRunner::new(Duration::from_secs(10));
    let sink = ConsoleSink::new(PromptMode::AssumeYes);
    let report = CommandExecutor::new(&runner, &sink, dir.path())
        .with_skip_if_mode(cfg.skip_if_mode)
        .run(&queue);

    assert_eq!(trace(&dir), ["deploy", "manual", "install"]);
    assert_eq!(report.skipped.len(), 2, "repeat literal and guarded block");
    assert!(report.failed.is_empty());
}

#[test]
fn failing_command_does_not_abort_the_cycle() {
    let dir = TempDir::new().expect("tempdir");
    let runner = ShellRunner::new(Duration::from_secs(10));
    let sink = ConsoleSink::new(PromptMode::AssumeNo);
    let report = CommandExecutor::new(&runner, &sink, dir.path()).run(&[
        CommandSpec::literal("exit 7"),
        CommandSpec::literal("echo after >> trace.log"),
    ]);

    assert_eq!(report.failed, ["exit 7"]);
    assert_eq!(trace(&dir), ["after"]);
}

#[test]
fn timed_out_command_is_treated_as_failed() {
    let dir = TempDir::new().expect("tempdir");
    let runner = ShellRunner::new(Duration::from_millis(200));
    let sink = ConsoleSink::new(PromptMode::AssumeNo);
    let report = CommandExecutor::new(&runner, &sink, dir.path()).run(&[
        CommandSpec::literal("sleep 5"),
        CommandSpec::literal("echo next >> trace.log"),
    ]);

    assert_eq!(report.failed, ["sleep 5"]);
    assert_eq!(trace(&dir), ["next"]);
}
