//! Selector (tag) matching.

use std::collections::BTreeSet;

use waypoint_core::{Delegate, DelegateTask};

/// Outcome of matching a task's selectors against a delegate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorMatch {
    /// The task requires selectors but the delegate has no tags at all.
    pub no_tags: bool,
    /// Every required selector the delegate lacks.
    pub missing: Vec<String>,
}

impl SelectorMatch {
    pub fn is_match(&self) -> bool {
        !self.no_tags && self.missing.is_empty()
    }
}

/// Tags a delegate answers to: its own tags, plus its host and delegate
/// name when `with_host_and_name` is set. Trimmed, lower-cased, no blanks.
pub fn effective_tags(delegate: &Delegate, with_host_and_name: bool) -> BTreeSet<String> {
    let names = [delegate.host_name.as_str(), delegate.delegate_name.as_str()];
    let extra = if with_host_and_name { &names[..] } else { &[][..] };

    delegate
        .tags
        .iter()
        .map(String::as_str)
        .chain(extra.iter().copied())
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// Check every required selector of `task` against `delegate`.
///
/// All selectors are checked so the result lists every mismatch.
pub fn match_selectors(
    delegate: &Delegate,
    task: &DelegateTask,
    with_host_and_name: bool,
) -> SelectorMatch {
    let required = task.required_selectors();
    if required.is_empty() {
        return SelectorMatch::default();
    }

    let tags = effective_tags(delegate, with_host_and_name);
    let missing: Vec<String> = required
        .into_iter()
        .filter(|selector| !tags.contains(selector))
        .collect();

    SelectorMatch {
        no_tags: tags.is_empty(),
        missing,
    }
}
