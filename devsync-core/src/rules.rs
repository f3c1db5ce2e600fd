//! Rule resolution: changed files + ordered rule table → ordered command list.
//!
//! Output keeps rule order and is not de-duplicated; de-duplication of
//! literal commands belongs to the executor because modifier blocks may
//! legitimately repeat a command across rules.

use std::collections::HashSet;

use crate::types::{CommandSpec, MatchPolicy, Rule, RuleTable};

/// A rule that fired, and the changed file that fired it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch<'a> {
    pub rule: &'a Rule,
    pub file: &'a str,
}

/// Resolve `changed` against `table` and flatten the matched command lists.
pub fn resolve(changed: &[String], table: &RuleTable, policy: MatchPolicy) -> Vec<CommandSpec> {
    matches(changed, table, policy)
        .into_iter()
        .flat_map(|m| m.rule.commands.iter().cloned())
        .collect()
}

/// The rules that fire for `changed`, in table order.
///
/// Under [`MatchPolicy::MatchOnce`] the first file a rule matches is consumed
/// and cannot fire a later rule. The caller's slice is never modified.
pub fn matches<'a>(
    changed: &'a [String],
    table: &'a RuleTable,
    policy: MatchPolicy,
) -> Vec<RuleMatch<'a>> {
    let mut consumed = HashSet::<usize>::new();
    let mut fired = Vec::new();

    for rule in table {
        let hit = changed
            .iter()
            .enumerate()
            .filter(|(idx, _)| !consumed.contains(idx))
            .find(|(_, file)| rule.pattern.matches(file));

        let Some((idx, file)) = hit else { continue };
        if policy == MatchPolicy::MatchOnce {
            consumed.insert(idx);
        }
        fired.push(RuleMatch {
            rule,
            file: file.as_str(),
        });
    }

    fired
}
