//! DevSync core library: rule tables, pattern matching, configuration.
//!
//! Public API surface:
//! - [`types`]: commands, rules, config and policy types
//! - [`pattern`]: rule-key compilation and matching
//! - [`rules`]: changed files → ordered command list
//! - [`config`]: `devsync.yaml` load / scaffold
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod pattern;
pub mod rules;
pub mod types;

pub use config::{ConfigProvider, FileConfig};
pub use error::ConfigError;
pub use pattern::{Pattern, PatternKind};
pub use rules::{resolve, RuleMatch};
pub use types::{CommandSpec, Config, MatchPolicy, Rule, RuleTable, SkipIfMode};
