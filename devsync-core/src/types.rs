//! Domain types for DevSync rule tables and configuration.
//!
//! The YAML surface for a command entry is loosely shaped (a bare string or a
//! single-key modifier map). It is resolved once, at load time, into the
//! closed [`CommandSpec`] enum so execution never branches on shape.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pattern::Pattern;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// One entry of a rule's command list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCommand", into = "RawCommand")]
pub enum CommandSpec {
    /// A shell command line, de-duplicated within a cycle.
    Literal(String),
    /// Each command is confirmed by the operator before it runs.
    ManualOverride(Vec<String>),
    /// Conditional block, skipped depending on what already ran.
    SkipIf {
        test_for: BTreeSet<String>,
        commands: Vec<String>,
    },
    /// Detached, fire-and-forget commands.
    Parallel(Vec<String>),
}

impl CommandSpec {
    pub fn literal(command: impl Into<String>) -> Self {
        Self::Literal(command.into())
    }

    /// Short label used in notifications and dry-run output.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandSpec::Literal(_) => "run",
            CommandSpec::ManualOverride(_) => "manual",
            CommandSpec::SkipIf { .. } => "skip-if",
            CommandSpec::Parallel(_) => "parallel",
        }
    }

    /// Every command string this entry may invoke, in order.
    pub fn commands(&self) -> Vec<&str> {
        match self {
            CommandSpec::Literal(cmd) => vec![cmd.as_str()],
            CommandSpec::ManualOverride(cmds) | CommandSpec::Parallel(cmds) => {
                cmds.iter().map(String::as_str).collect()
            }
            CommandSpec::SkipIf { commands, .. } => commands.iter().map(String::as_str).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSpec::Literal(cmd) => f.write_str(cmd),
            CommandSpec::SkipIf { test_for, commands } => write!(
                f,
                "skip-if [{}]: {}",
                test_for.iter().cloned().collect::<Vec<_>>().join(", "),
                commands.join(" && ")
            ),
            other => write!(f, "{}: {}", other.kind(), other.commands().join(" && ")),
        }
    }
}

/// Wire form of a command entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawCommand {
    Literal(String),
    Block(RawBlock),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBlock {
    #[serde(
        rename = "manualOverride",
        alias = "manual_override",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    manual_override: Option<Vec<String>>,
    #[serde(
        rename = "skipIf",
        alias = "skip_if",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    skip_if: Option<RawSkipIf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parallel: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSkipIf {
    #[serde(rename = "testFor", alias = "test_for", default)]
    test_for: Vec<String>,
    #[serde(default)]
    commands: Vec<String>,
}

impl TryFrom<RawCommand> for CommandSpec {
    type Error = ConfigError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let block = match raw {
            RawCommand::Literal(cmd) => {
                if cmd.trim().is_empty() {
                    return Err(ConfigError::Command("empty command string".to_string()));
                }
                return Ok(CommandSpec::Literal(cmd));
            }
            RawCommand::Block(block) => block,
        };

        match (block.manual_override, block.skip_if, block.parallel) {
            (Some(cmds), None, None) => Ok(CommandSpec::ManualOverride(non_empty(cmds)?)),
            (None, Some(skip), None) => Ok(CommandSpec::SkipIf {
                test_for: skip.test_for.into_iter().collect(),
                commands: non_empty(skip.commands)?,
            }),
            (None, None, Some(cmds)) => Ok(CommandSpec::Parallel(non_empty(cmds)?)),
            _ => Err(ConfigError::Command(
                "modifier block needs exactly one of `manualOverride`, `skipIf`, `parallel`"
                    .to_string(),
            )),
        }
    }
}

fn non_empty(cmds: Vec<String>) -> Result<Vec<String>, ConfigError> {
    if cmds.iter().any(|c| c.trim().is_empty()) {
        return Err(ConfigError::Command(
            "empty command string in modifier block".to_string(),
        ));
    }
    Ok(cmds)
}

impl From<CommandSpec> for RawCommand {
    fn from(spec: CommandSpec) -> Self {
        match spec {
            CommandSpec::Literal(cmd) => RawCommand::Literal(cmd),
            CommandSpec::ManualOverride(cmds) => RawCommand::Block(RawBlock {
                manual_override: Some(cmds),
                ..RawBlock::default()
            }),
            CommandSpec::SkipIf { test_for, commands } => RawCommand::Block(RawBlock {
                skip_if: Some(RawSkipIf {
                    test_for: test_for.into_iter().collect(),
                    commands,
                }),
                ..RawBlock::default()
            }),
            CommandSpec::Parallel(cmds) => RawCommand::Block(RawBlock {
                parallel: Some(cmds),
                ..RawBlock::default()
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A (pattern, command-list) entry of the rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub pattern: Pattern,
    pub commands: Vec<CommandSpec>,
}

impl Rule {
    pub fn new(pattern: &str, commands: Vec<CommandSpec>) -> Self {
        Self {
            pattern: Pattern::parse(pattern),
            commands,
        }
    }
}

/// Ordered rule table. Order is both match order and run order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable(Vec<Rule>);

impl RuleTable {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self(rules)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rules that can never match, with the reason each was rejected.
    pub fn invalid(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|rule| rule.pattern.invalid_reason().map(|r| (rule.pattern.raw(), r)))
    }
}

impl FromIterator<Rule> for RuleTable {
    fn from_iter<T: IntoIterator<Item = Rule>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a RuleTable {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// How a `skipIf` block's `testFor` list is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkipIfMode {
    /// Skip when any listed command already ran.
    #[default]
    Any,
    /// Skip only when every listed command already ran.
    All,
}

impl fmt::Display for SkipIfMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipIfMode::Any => write!(f, "any"),
            SkipIfMode::All => write!(f, "all"),
        }
    }
}

/// Whether a changed file can trigger more than one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    /// Every rule matching any changed file fires.
    #[default]
    EveryRule,
    /// The first rule to match a file consumes it.
    MatchOnce,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;

/// Fully validated configuration for one working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The only commit author allowed to trigger commands.
    pub email: String,
    pub interval_secs: u64,
    pub match_once: bool,
    pub skip_if_mode: SkipIfMode,
    /// Upper bound on any single external process call.
    pub step_timeout_secs: u64,
    pub rules: RuleTable,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs.max(1))
    }

    pub fn match_policy(&self) -> MatchPolicy {
        if self.match_once {
            MatchPolicy::MatchOnce
        } else {
            MatchPolicy::EveryRule
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<CommandSpec, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[test]
    fn bare_string_is_literal() {
        assert_eq!(parse("echo a").unwrap(), CommandSpec::literal("echo a"));
    }

    #[test]
    fn modifier_blocks_resolve_to_variants() {
        assert_eq!(
            parse("manualOverride: [npm publish]").unwrap(),
            CommandSpec::ManualOverride(vec!["npm publish".into()])
        );
        assert_eq!(
            parse("parallel: [npm start, npm test]").unwrap(),
            CommandSpec::Parallel(vec!["npm start".into(), "npm test".into()])
        );
        let skip = parse("skipIf:\n  testFor: [npm ci]\n  commands: [npm i]\n").unwrap();
        assert_eq!(
            skip,
            CommandSpec::SkipIf {
                test_for: BTreeSet::from(["npm ci".to_string()]),
                commands: vec!["npm i".into()],
            }
        );
    }

    #[test]
    fn snake_case_aliases_are_accepted() {
        let skip = parse("skip_if:\n  test_for: [a]\n  commands: [b]\n").unwrap();
        assert!(matches!(skip, CommandSpec::SkipIf { .. }));
        let manual = parse("manual_override: [x]").unwrap();
        assert!(matches!(manual, CommandSpec::ManualOverride(_)));
    }

    #[test]
    fn ambiguous_or_unknown_blocks_are_rejected() {
        assert!(parse("parallel: [a]\nmanualOverride: [b]\n").is_err());
        assert!(parse("separateTab: [a]").is_err());
        assert!(parse("{}").is_err());
        assert!(parse("''").is_err());
    }

    #[test]
    fn skip_if_without_test_for_defaults_to_empty() {
        let skip = parse("skipIf:\n  commands: [b]\n").unwrap();
        match skip {
            CommandSpec::SkipIf { test_for, .. } => assert!(test_for.is_empty()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn command_spec_serializes_back_to_wire_form() {
        let spec = CommandSpec::Parallel(vec!["npm start".into()]);
        let yaml = serde_yaml::to_string(&spec).expect("serialize");
        assert!(yaml.contains("parallel"));
        assert_eq!(parse(&yaml).unwrap(), spec);
    }

    #[test]
    fn config_durations_are_clamped_to_one_second() {
        let config = Config {
            email: "dev@example.com".into(),
            interval_secs: 0,
            match_once: true,
            skip_if_mode: SkipIfMode::All,
            step_timeout_secs: 0,
            rules: RuleTable::default(),
        };
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.step_timeout(), Duration::from_secs(1));
        assert_eq!(config.match_policy(), MatchPolicy::MatchOnce);
    }
}
