use std::collections::HashMap;

use crate::intent::{ComponentName, Intent};
use crate::intent_filter::IntentFilter;
use crate::rule::Rule;

/// Per-dispatch-kind candidate index.
///
/// Rules live in an arena; the three indices (intent filters bucketed by
/// action, component names, match-all) hold arena indices, which double as
/// the rule identity used for phase-1 deduplication. Built once by the
/// loader and immutable afterwards.
#[derive(Debug, Default)]
pub struct FirewallResolver {
    rules: Vec<Rule>,
    /// Every registered intent-filter pattern with its owning rule.
    filters: Vec<(IntentFilter, usize)>,
    /// Filter indices bucketed by declared action.
    by_action: HashMap<String, Vec<usize>>,
    /// Filters declaring no action: only an action-less intent can pass
    /// them, so they are consulted only for action-less intents.
    actionless: Vec<usize>,
    by_component: HashMap<ComponentName, Vec<usize>>,
    match_all: Vec<usize>,
}

impl FirewallResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Rule) {
        let rule_idx = self.rules.len();
        if rule.match_all() {
            self.match_all.push(rule_idx);
            self.rules.push(rule);
            return;
        }
        for filter in rule.intent_filters() {
            let filter_idx = self.filters.len();
            if filter.actions().is_empty() {
                self.actionless.push(filter_idx);
            } else {
                for action in filter.actions() {
                    self.by_action
                        .entry(action.clone())
                        .or_default()
                        .push(filter_idx);
                }
            }
            self.filters.push((filter.clone(), rule_idx));
        }
        for component in rule.component_filters() {
            self.by_component
                .entry(component.clone())
                .or_default()
                .push(rule_idx);
        }
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Phase 1: every rule whose index admits this dispatch, deduplicated by
    /// rule identity, in insertion order of discovery.
    ///
    /// Intent-filter candidates are admitted by the full filter semantics;
    /// the action buckets only prune the filters worth testing. Component
    /// and match-all candidates are appended afterwards, skipping rules
    /// already collected.
    pub fn candidate_rules(
        &self,
        intent: Option<&Intent>,
        resolved_type: Option<&str>,
        component: Option<&ComponentName>,
    ) -> Vec<&Rule> {
        let mut seen = vec![false; self.rules.len()];
        let mut candidates = Vec::new();

        if let Some(intent) = intent {
            let mut admit = |filter_idx: usize| {
                let (filter, rule_idx) = &self.filters[filter_idx];
                if !seen[*rule_idx] && filter.matches(intent, resolved_type) {
                    seen[*rule_idx] = true;
                    candidates.push(&self.rules[*rule_idx]);
                }
            };
            match intent.action() {
                Some(action) => {
                    if let Some(bucket) = self.by_action.get(action) {
                        for &idx in bucket {
                            admit(idx);
                        }
                    }
                }
                None => {
                    // No action to bucket on: every filter is a candidate.
                    for idx in 0..self.filters.len() {
                        admit(idx);
                    }
                }
            }
        }

        if let Some(component) = component {
            if let Some(bucket) = self.by_component.get(component) {
                for &rule_idx in bucket {
                    if !seen[rule_idx] {
                        seen[rule_idx] = true;
                        candidates.push(&self.rules[rule_idx]);
                    }
                }
            }
        }

        for &rule_idx in &self.match_all {
            if !seen[rule_idx] {
                seen[rule_idx] = true;
                candidates.push(&self.rules[rule_idx]);
            }
        }

        candidates
    }
}
