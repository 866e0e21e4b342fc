use std::borrow::Cow;

use globset::GlobMatcher;
use regex::Regex;

use crate::intent::{ComponentName, DataUri, Intent};
use crate::intent_filter::IntentFilter;
use crate::provider::{FirewallCtx, FIRST_APPLICATION_UID, ROOT_UID, SYSTEM_UID};

// ---------------------------------------------------------------------------
// Evaluation subjects
// ---------------------------------------------------------------------------

/// Everything the dispatcher knows about one intent dispatch.
#[derive(Clone, Copy)]
pub struct CallContext<'a> {
    pub resolved_component: Option<&'a ComponentName>,
    pub intent: Option<&'a Intent>,
    pub caller_uid: u32,
    pub caller_pid: u32,
    pub resolved_type: Option<&'a str>,
    pub receiving_uid: u32,
    pub user_id: u32,
}

/// One package-visibility query.
#[derive(Clone, Copy)]
pub struct PackageQuery<'a> {
    pub target_package: &'a str,
    pub caller_uid: u32,
    pub target_uid: u32,
    pub user_id: u32,
}

// ---------------------------------------------------------------------------
// String leaves
// ---------------------------------------------------------------------------

/// Matching mode of a string leaf.
///
/// `Pattern` uses glob grammar (`*`, `?`, `[...]`, with `*` crossing any
/// character including separators); `Regex` is anchored and must match the
/// whole subject.
#[derive(Debug, Clone)]
pub enum StringOp {
    Equals(String),
    StartsWith(String),
    Contains(String),
    Pattern(GlobMatcher),
    Regex(Regex),
}

impl StringOp {
    /// A missing subject matches only `equals` or `contains` with an empty
    /// literal.
    pub fn matches(&self, subject: Option<&str>) -> bool {
        match subject {
            None => match self {
                StringOp::Equals(literal) | StringOp::Contains(literal) => literal.is_empty(),
                _ => false,
            },
            Some(value) => match self {
                StringOp::Equals(literal) => value == literal,
                StringOp::StartsWith(literal) => value.starts_with(literal.as_str()),
                StringOp::Contains(literal) => value.contains(literal.as_str()),
                StringOp::Pattern(glob) => glob.is_match(value),
                StringOp::Regex(regex) => regex.is_match(value),
            },
        }
    }
}

/// Which dispatch attribute a string leaf inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringAttribute {
    Action,
    Component,
    ComponentName,
    ComponentPackage,
    Data,
    Host,
    MimeType,
    Scheme,
    Path,
    Ssp,
}

impl StringAttribute {
    fn value<'c>(&self, call: &CallContext<'c>) -> Option<Cow<'c, str>> {
        let data = |f: fn(&DataUri) -> Option<&str>| {
            call.intent.and_then(Intent::data).and_then(f).map(Cow::Borrowed)
        };
        match self {
            StringAttribute::Action => {
                call.intent.and_then(Intent::action).map(Cow::Borrowed)
            }
            StringAttribute::Component => {
                call.resolved_component.map(|c| Cow::Owned(c.flatten()))
            }
            StringAttribute::ComponentName => {
                call.resolved_component.map(|c| Cow::Borrowed(c.class_name()))
            }
            StringAttribute::ComponentPackage => {
                call.resolved_component.map(|c| Cow::Borrowed(c.package()))
            }
            StringAttribute::Data => call
                .intent
                .and_then(Intent::data)
                .map(|d| Cow::Borrowed(d.as_str())),
            StringAttribute::Host => data(DataUri::host),
            StringAttribute::MimeType => call.resolved_type.map(|t| {
                if t.bytes().any(|b| b.is_ascii_uppercase()) {
                    Cow::Owned(t.to_ascii_lowercase())
                } else {
                    Cow::Borrowed(t)
                }
            }),
            StringAttribute::Scheme => data(DataUri::scheme),
            StringAttribute::Path => data(DataUri::path),
            StringAttribute::Ssp => data(DataUri::scheme_specific_part),
        }
    }

    /// The only attribute with a subject on the package-query path is the
    /// target package itself.
    fn package_value<'c>(&self, query: &PackageQuery<'c>) -> Option<Cow<'c, str>> {
        match self {
            StringAttribute::ComponentPackage => Some(Cow::Borrowed(query.target_package)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StringFilter {
    pub attribute: StringAttribute,
    pub op: StringOp,
}

// ---------------------------------------------------------------------------
// Uid classification
// ---------------------------------------------------------------------------

/// Caller/target classification used by `sender` and `target` predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UidClass {
    /// Signed with the platform certificates.
    Signature,
    /// A system uid: below the first application uid, or root.
    System,
    /// Neither of the above.
    User,
}

impl UidClass {
    fn matches_uid(&self, ctx: &FirewallCtx<'_>, uid: u32) -> bool {
        match self {
            UidClass::Signature => ctx.signatures_match(uid, SYSTEM_UID),
            UidClass::System => uid_is_system(uid),
            UidClass::User => !uid_is_system(uid) && !ctx.signatures_match(uid, SYSTEM_UID),
        }
    }
}

fn uid_is_system(uid: u32) -> bool {
    uid < FIRST_APPLICATION_UID || uid == ROOT_UID
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Matches the data URI's port against an inclusive range; either bound may
/// be open. A data-less intent or port-less URI never matches.
#[derive(Debug, Clone, Copy)]
pub struct PortFilter {
    pub min: Option<u16>,
    pub max: Option<u16>,
}

impl PortFilter {
    fn matches(&self, data: Option<&DataUri>) -> bool {
        let Some(port) = data.and_then(DataUri::port) else {
            return false;
        };
        port >= self.min.unwrap_or(u16::MIN) && port <= self.max.unwrap_or(u16::MAX)
    }
}

// ---------------------------------------------------------------------------
// The predicate tree
// ---------------------------------------------------------------------------

/// One node of a rule's condition tree.
///
/// Both evaluation operations answer plain booleans; a predicate that
/// cannot evaluate (no intent on the package path, a failed provider call)
/// answers false and leaves the verdict to other rules.
#[derive(Debug, Clone)]
pub enum Filter {
    /// All children match; empty is vacuously true.
    And(Vec<Filter>),
    /// Any child matches; empty is false.
    Or(Vec<Filter>),
    Not(Box<Filter>),
    StringMatch(StringFilter),
    /// The intent carries the named category.
    Category(String),
    Sender(UidClass),
    Target(UidClass),
    /// The caller's uid is backed by the named package.
    SenderPackage(String),
    /// The resolved target belongs to the named package.
    TargetPackage(String),
    /// The caller passes the host's component-permission check.
    SenderPermission(String),
    /// The target uid holds the named permission.
    TargetPermission(String),
    Port(PortFilter),
    /// Full intent-filter semantics as a predicate.
    IntentFilter(Box<IntentFilter>),
    /// Exact resolved-component match.
    Component(ComponentName),
    /// Device-provisioned state equals the expected value.
    Provisioned(bool),
}

impl Filter {
    pub fn matches(&self, ctx: &FirewallCtx<'_>, call: &CallContext<'_>) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|f| f.matches(ctx, call)),
            Filter::Or(children) => children.iter().any(|f| f.matches(ctx, call)),
            Filter::Not(child) => !child.matches(ctx, call),
            Filter::StringMatch(sf) => sf.op.matches(sf.attribute.value(call).as_deref()),
            Filter::Category(name) => call.intent.is_some_and(|i| i.has_category(name)),
            Filter::Sender(class) => class.matches_uid(ctx, call.caller_uid),
            Filter::Target(class) => class.matches_uid(ctx, call.receiving_uid),
            Filter::SenderPackage(name) => ctx.uid_holds_package(call.caller_uid, name),
            Filter::TargetPackage(name) => call
                .resolved_component
                .is_some_and(|c| c.package() == name),
            Filter::SenderPermission(permission) => ctx.check_component_permission(
                permission,
                call.caller_pid,
                call.caller_uid,
                call.receiving_uid,
                false,
            ),
            Filter::TargetPermission(permission) => {
                ctx.uid_has_permission(permission, call.receiving_uid)
            }
            Filter::Port(pf) => pf.matches(call.intent.and_then(Intent::data)),
            Filter::IntentFilter(f) => call
                .intent
                .is_some_and(|i| f.matches(i, call.resolved_type)),
            Filter::Component(cn) => call.resolved_component.is_some_and(|c| c == cn),
            Filter::Provisioned(expected) => ctx.device_provisioned() == *expected,
        }
    }

    pub fn matches_package(&self, ctx: &FirewallCtx<'_>, query: &PackageQuery<'_>) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|f| f.matches_package(ctx, query)),
            Filter::Or(children) => children.iter().any(|f| f.matches_package(ctx, query)),
            Filter::Not(child) => !child.matches_package(ctx, query),
            Filter::StringMatch(sf) => {
                sf.op.matches(sf.attribute.package_value(query).as_deref())
            }
            // Intent-shaped predicates have no subject on this path.
            Filter::Category(_) | Filter::Port(_) | Filter::IntentFilter(_) | Filter::Component(_) => {
                false
            }
            Filter::Sender(class) => class.matches_uid(ctx, query.caller_uid),
            Filter::Target(class) => class.matches_uid(ctx, query.target_uid),
            Filter::SenderPackage(name) => ctx.uid_holds_package(query.caller_uid, name),
            Filter::TargetPackage(name) => query.target_package == name,
            Filter::SenderPermission(permission) => {
                ctx.check_component_permission(permission, 0, query.caller_uid, query.target_uid, false)
            }
            Filter::TargetPermission(permission) => {
                ctx.uid_has_permission(permission, query.target_uid)
            }
            Filter::Provisioned(expected) => ctx.device_provisioned() == *expected,
        }
    }
}
