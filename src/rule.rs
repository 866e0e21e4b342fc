use serde::Serialize;

use crate::filter::{CallContext, Filter, PackageQuery};
use crate::intent::ComponentName;
use crate::intent_filter::IntentFilter;
use crate::provider::FirewallCtx;

/// The kind of inter-component call a rule governs, fixed by its XML tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Activity,
    Broadcast,
    Service,
    Provider,
    Package,
}

impl RuleKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "activity" => Some(RuleKind::Activity),
            "broadcast" => Some(RuleKind::Broadcast),
            "service" => Some(RuleKind::Service),
            "provider" => Some(RuleKind::Provider),
            "package" => Some(RuleKind::Package),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            RuleKind::Activity => "activity",
            RuleKind::Broadcast => "broadcast",
            RuleKind::Service => "service",
            RuleKind::Provider => "provider",
            RuleKind::Package => "package",
        }
    }
}

/// What a matching rule contributes to the verdict. The enforcement path
/// reads `block`/`log`; the query path reads `block_query`/`log_query`, so
/// one rule can be blocked to invoke yet visible to query, or the reverse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleEffects {
    pub block: bool,
    pub log: bool,
    pub block_query: bool,
    pub log_query: bool,
}

/// A named condition over dispatches plus the effects to apply on match.
///
/// The intent and component filters are phase-1 admission patterns; the
/// condition tree is the phase-2 test. A `match_all` rule carries no
/// filters and is a candidate for every dispatch of its kind.
#[derive(Debug)]
pub struct Rule {
    package_name: Option<String>,
    effects: RuleEffects,
    match_all: bool,
    condition: Filter,
    intent_filters: Vec<IntentFilter>,
    component_filters: Vec<ComponentName>,
}

impl Rule {
    pub fn new(
        package_name: Option<String>,
        effects: RuleEffects,
        match_all: bool,
        condition: Filter,
        intent_filters: Vec<IntentFilter>,
        component_filters: Vec<ComponentName>,
    ) -> Self {
        Self {
            package_name,
            effects,
            match_all,
            condition,
            intent_filters,
            component_filters,
        }
    }

    pub fn effects(&self) -> RuleEffects {
        self.effects
    }

    pub fn match_all(&self) -> bool {
        self.match_all
    }

    pub fn intent_filters(&self) -> &[IntentFilter] {
        &self.intent_filters
    }

    pub fn component_filters(&self) -> &[ComponentName] {
        &self.component_filters
    }

    /// Full phase-2 test for an intent dispatch: the package scope gates
    /// first, then the condition tree.
    pub fn matches(&self, ctx: &FirewallCtx<'_>, call: &CallContext<'_>) -> bool {
        if let Some(package) = &self.package_name {
            let scoped = call
                .resolved_component
                .is_some_and(|c| c.package() == package);
            if !scoped {
                return false;
            }
        }
        self.condition.matches(ctx, call)
    }

    /// Phase-2 test for a package-visibility query.
    pub fn matches_package(&self, ctx: &FirewallCtx<'_>, query: &PackageQuery<'_>) -> bool {
        if let Some(package) = &self.package_name {
            if package != query.target_package {
                return false;
            }
        }
        self.condition.matches_package(ctx, query)
    }
}
