//! `devsync match <files...> [--json]`: dry-run the rule engine.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use devsync_core::{rules, CommandSpec, MatchPolicy};

use super::Workspace;

/// Show which commands a set of changed files would trigger.
#[derive(Args, Debug)]
pub struct MatchArgs {
    /// Changed paths, relative to the repository root.
    #[arg(required = true)]
    pub files: Vec<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct MatchReport<'a> {
    policy: &'static str,
    files: &'a [String],
    matches: Vec<MatchJson<'a>>,
    commands: Vec<CommandSpec>,
    invalid_rules: Vec<InvalidRuleJson<'a>>,
}

#[derive(Serialize)]
struct MatchJson<'a> {
    rule: &'a str,
    file: &'a str,
    commands: &'a [CommandSpec],
}

#[derive(Serialize)]
struct InvalidRuleJson<'a> {
    rule: &'a str,
    reason: &'a str,
}

#[derive(Tabled)]
struct MatchRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "rule")]
    rule: String,
    #[tabled(rename = "matched file")]
    file: String,
    #[tabled(rename = "kind")]
    kind: &'static str,
    #[tabled(rename = "command")]
    command: String,
}

impl MatchArgs {
    pub fn run(self, workspace: &Workspace) -> Result<()> {
        let (_, config) = workspace.load_config()?;
        let policy = config.match_policy();
        let fired = rules::matches(&self.files, &config.rules, policy);

        let report = MatchReport {
            policy: policy_label(policy),
            files: &self.files,
            commands: fired
                .iter()
                .flat_map(|m| m.rule.commands.iter().cloned())
                .collect(),
            matches: fired
                .iter()
                .map(|m| MatchJson {
                    rule: m.rule.pattern.raw(),
                    file: m.file,
                    commands: &m.rule.commands,
                })
                .collect(),
            invalid_rules: config
                .rules
                .invalid()
                .map(|(rule, reason)| InvalidRuleJson { rule, reason })
                .collect(),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render match JSON")?
            );
            return Ok(());
        }

        print_table(&report);
        Ok(())
    }
}

fn policy_label(policy: MatchPolicy) -> &'static str {
    match policy {
        MatchPolicy::EveryRule => "every_rule",
        MatchPolicy::MatchOnce => "match_once",
    }
}

fn print_table(report: &MatchReport<'_>) {
    for invalid in &report.invalid_rules {
        eprintln!(
            "{} rule '{}' never matches: {}",
            "warning:".yellow().bold(),
            invalid.rule,
            invalid.reason
        );
    }

    if report.commands.is_empty() {
        println!("{}", "No rules match these files.".dimmed());
        return;
    }

    let rows: Vec<MatchRow> = report
        .matches
        .iter()
        .flat_map(|m| m.commands.iter().map(move |spec| (m.rule, m.file, spec)))
        .enumerate()
        .map(|(idx, (rule, file, spec))| MatchRow {
            index: idx + 1,
            rule: rule.to_string(),
            file: file.to_string(),
            kind: spec.kind(),
            command: spec.commands().join("\n"),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    println!(
        "{} command entries from {} rules ({})",
        report.commands.len(),
        report.matches.len(),
        report.policy
    );
}
