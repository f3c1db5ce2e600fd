//! Rule resolution properties over whole tables.

use devsync_core::{config, resolve, CommandSpec, MatchPolicy, Rule, RuleTable};
use rstest::rstest;
use std::path::Path;

fn lit(cmd: &str) -> CommandSpec {
    CommandSpec::literal(cmd)
}

fn files(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

/// Rule `i` runs the single command `rule-i`.
fn numbered(patterns: &[&str]) -> RuleTable {
    patterns
        .iter()
        .enumerate()
        .map(|(i, p)| Rule::new(p, vec![lit(&format!("rule-{i}"))]))
        .collect()
}

fn index_of(cmd: &CommandSpec) -> usize {
    cmd.to_string()
        .trim_start_matches("rule-")
        .parse()
        .expect("numbered command")
}

#[rstest]
#[case(&["a.txt", "b/*", "**/*.js", "c.txt"], &["lib/x.js", "c.txt", "a.txt"])]
#[case(&["**/*.rs", "src/*", "src/main.rs"], &["src/main.rs"])]
#[case(&["x/*", "y/*", "x/**/*.md", "*.bad"], &["y/a", "x/b/c.md", "x/q"])]
#[case(&["docs/*"], &["src/lib.rs"])]
fn matched_rules_keep_table_order(
    #[case] patterns: &[&str],
    #[case] changed: &[&str],
    #[values(MatchPolicy::EveryRule, MatchPolicy::MatchOnce)] policy: MatchPolicy,
) {
    let table = numbered(patterns);
    let out = resolve(&files(changed), &table, policy);
    let order: Vec<usize> = out.iter().map(index_of).collect();
    let mut sorted = order.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(order, sorted, "rule order violated for {patterns:?} / {changed:?}");
}

#[test]
fn deploy_directory_scenario() {
    let table = RuleTable::new(vec![Rule::new("deploy/*", vec![lit("echo a")])]);
    let out = resolve(&files(&["deploy/x.txt"]), &table, MatchPolicy::EveryRule);
    assert_eq!(out, vec![lit("echo a")]);
}

#[test]
fn exact_and_recursive_scenario() {
    let table = RuleTable::new(vec![
        Rule::new("a.txt", vec![lit("echo a")]),
        Rule::new("**/*.js", vec![lit("echo b")]),
    ]);
    let out = resolve(
        &files(&["a.txt", "lib/x.js"]),
        &table,
        MatchPolicy::EveryRule,
    );
    assert_eq!(out, vec![lit("echo a"), lit("echo b")]);
}

#[test]
fn loaded_table_resolves_modifier_blocks_verbatim() {
    let yaml = "email: a@b.c\nrules:\n  deploy/*:\n    - npm ci\n    - manualOverride: [./release.sh]\n";
    let config = config::parse(yaml, Path::new("devsync.yaml")).expect("parse");
    let out = resolve(&files(&["deploy/app.js"]), &config.rules, config.match_policy());
    assert_eq!(
        out,
        vec![
            lit("npm ci"),
            CommandSpec::ManualOverride(vec!["./release.sh".into()])
        ]
    );
}
