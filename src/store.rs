use std::sync::{Arc, RwLock};

use crate::resolver::FirewallResolver;
use crate::rule::{Rule, RuleKind};

/// One immutable generation of rules: four candidate indices for the intent
/// dispatch kinds plus the flat package-rule list (package queries carry no
/// intent, so no index helps there).
#[derive(Debug, Default)]
pub struct RuleStore {
    activity: FirewallResolver,
    broadcast: FirewallResolver,
    service: FirewallResolver,
    provider: FirewallResolver,
    package_rules: Vec<Rule>,
}

/// Per-kind rule totals for the load summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleCounts {
    pub activity: usize,
    pub broadcast: usize,
    pub service: usize,
    pub provider: usize,
    pub package: usize,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: Vec<(RuleKind, Rule)>) -> Self {
        let mut store = Self::new();
        for (kind, rule) in rules {
            match kind {
                RuleKind::Activity => store.activity.add_rule(rule),
                RuleKind::Broadcast => store.broadcast.add_rule(rule),
                RuleKind::Service => store.service.add_rule(rule),
                RuleKind::Provider => store.provider.add_rule(rule),
                RuleKind::Package => store.package_rules.push(rule),
            }
        }
        store
    }

    /// The candidate index for an intent dispatch kind; `Package` has none.
    pub fn resolver(&self, kind: RuleKind) -> Option<&FirewallResolver> {
        match kind {
            RuleKind::Activity => Some(&self.activity),
            RuleKind::Broadcast => Some(&self.broadcast),
            RuleKind::Service => Some(&self.service),
            RuleKind::Provider => Some(&self.provider),
            RuleKind::Package => None,
        }
    }

    pub fn package_rules(&self) -> &[Rule] {
        &self.package_rules
    }

    pub fn counts(&self) -> RuleCounts {
        RuleCounts {
            activity: self.activity.rule_count(),
            broadcast: self.broadcast.rule_count(),
            service: self.service.rule_count(),
            provider: self.provider.rule_count(),
            package: self.package_rules.len(),
        }
    }
}

/// Owning handle to the live store.
///
/// Dispatches clone the `Arc` once at entry and keep using that snapshot;
/// `publish` swaps the whole generation in one store, so no dispatch ever
/// sees a mix of old and new resolvers. In-flight snapshots keep the old
/// generation alive until their dispatch finishes.
#[derive(Debug)]
pub struct StoreHandle {
    current: RwLock<Arc<RuleStore>>,
}

impl StoreHandle {
    pub fn new(store: RuleStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
        }
    }

    pub fn snapshot(&self) -> Arc<RuleStore> {
        self.current
            .read()
            .expect("rule store lock poisoned")
            .clone()
    }

    pub fn publish(&self, store: RuleStore) {
        *self.current.write().expect("rule store lock poisoned") = Arc::new(store);
    }
}
