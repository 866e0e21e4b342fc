use globset::GlobMatcher;

use crate::intent::{DataUri, Intent};

// ---------------------------------------------------------------------------
// Path and authority patterns
// ---------------------------------------------------------------------------

/// Pattern over a URI path or scheme-specific part.
#[derive(Debug, Clone)]
pub enum PathPattern {
    Literal(String),
    Prefix(String),
    Glob(GlobMatcher),
}

impl PathPattern {
    pub fn matches(&self, subject: &str) -> bool {
        match self {
            PathPattern::Literal(p) => subject == p,
            PathPattern::Prefix(p) => subject.starts_with(p.as_str()),
            PathPattern::Glob(g) => g.is_match(subject),
        }
    }
}

/// A host entry, optionally wildcarded (`*.example.com`) and optionally
/// pinned to a port.
#[derive(Debug, Clone)]
pub struct AuthorityEntry {
    host: String,
    wild: bool,
    port: Option<u16>,
}

impl AuthorityEntry {
    /// `host` may carry a leading `*.` to match any subdomain. Hosts are
    /// compared case-insensitively; we lowercase once here.
    pub fn new(host: &str, port: Option<u16>) -> Self {
        let lowered = host.to_ascii_lowercase();
        match lowered.strip_prefix("*.") {
            Some(suffix) => Self {
                host: suffix.to_string(),
                wild: true,
                port,
            },
            None => Self {
                host: lowered,
                wild: false,
                port,
            },
        }
    }

    pub fn matches(&self, host: &str, port: Option<u16>) -> bool {
        if let Some(expected) = self.port {
            if port != Some(expected) {
                return false;
            }
        }
        if self.wild {
            // `*.x.y` admits `x.y` itself and any `a.x.y`.
            host == self.host
                || host
                    .strip_suffix(self.host.as_str())
                    .is_some_and(|rest| rest.ends_with('.'))
        } else {
            host == self.host
        }
    }
}

// ---------------------------------------------------------------------------
// IntentFilter
// ---------------------------------------------------------------------------

/// An intent-filter pattern: the cheap phase-1 admission test for rules.
///
/// Matching implements the platform's semantics for the attributes rule
/// files use:
/// - an intent carrying an action matches only a filter declaring it; an
///   action-less intent skips the action test;
/// - every category on the intent must be declared by the filter;
/// - data/type matching requires a declared scheme (with ssp or
///   authority/path narrowing) when schemes are declared, admits the bare
///   `content`/`file`/empty schemes for type-only filters, and supports
///   `type/*` and `*/*` MIME wildcards.
#[derive(Debug, Clone, Default)]
pub struct IntentFilter {
    actions: Vec<String>,
    categories: Vec<String>,
    schemes: Vec<String>,
    ssps: Vec<PathPattern>,
    authorities: Vec<AuthorityEntry>,
    paths: Vec<PathPattern>,
    types: Vec<String>,
}

impl IntentFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_action(&mut self, action: impl Into<String>) {
        self.actions.push(action.into());
    }

    pub fn add_category(&mut self, category: impl Into<String>) {
        self.categories.push(category.into());
    }

    pub fn add_scheme(&mut self, scheme: &str) {
        self.schemes.push(scheme.to_ascii_lowercase());
    }

    pub fn add_ssp(&mut self, pattern: PathPattern) {
        self.ssps.push(pattern);
    }

    pub fn add_authority(&mut self, entry: AuthorityEntry) {
        self.authorities.push(entry);
    }

    pub fn add_path(&mut self, pattern: PathPattern) {
        self.paths.push(pattern);
    }

    pub fn add_type(&mut self, mime: &str) {
        self.types.push(mime.to_ascii_lowercase());
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn matches(&self, intent: &Intent, resolved_type: Option<&str>) -> bool {
        if let Some(action) = intent.action() {
            if !self.actions.iter().any(|a| a == action) {
                return false;
            }
        }
        for category in intent.categories() {
            if !self.categories.iter().any(|c| c == category) {
                return false;
            }
        }
        self.match_data(resolved_type, intent.data())
    }

    fn match_data(&self, resolved_type: Option<&str>, data: Option<&DataUri>) -> bool {
        if self.types.is_empty() && self.schemes.is_empty() {
            // A filter with no data constraints only admits data-less intents.
            return resolved_type.is_none() && data.is_none();
        }

        if !self.schemes.is_empty() {
            let Some(data) = data else { return false };
            let scheme = data.scheme().unwrap_or("");
            if !self.schemes.iter().any(|s| s == scheme) {
                return false;
            }
            if !self.ssps.is_empty() {
                let ssp = data.scheme_specific_part().unwrap_or("");
                if !self.ssps.iter().any(|p| p.matches(ssp)) {
                    return false;
                }
            } else {
                if !self.authorities.is_empty() {
                    let matched = data
                        .host()
                        .is_some_and(|h| self.authorities.iter().any(|a| a.matches(h, data.port())));
                    if !matched {
                        return false;
                    }
                }
                if !self.paths.is_empty() {
                    let matched = data
                        .path()
                        .is_some_and(|p| self.paths.iter().any(|pp| pp.matches(p)));
                    if !matched {
                        return false;
                    }
                }
            }
        } else if let Some(data) = data {
            // Type-only filter: the schemes a bare MIME intent can carry.
            if !matches!(data.scheme().unwrap_or(""), "" | "content" | "file") {
                return false;
            }
        }

        if !self.types.is_empty() {
            let Some(ty) = resolved_type else { return false };
            let ty = ty.to_ascii_lowercase();
            if !self.types.iter().any(|t| mime_match(t, &ty)) {
                return false;
            }
        } else if resolved_type.is_some() {
            return false;
        }
        true
    }
}

/// Match a declared MIME entry against a concrete type. The declared side
/// may be `*`, `*/*`, or `base/*`; the concrete side is a full `base/sub`.
fn mime_match(declared: &str, concrete: &str) -> bool {
    if declared == "*" || declared == "*/*" {
        return true;
    }
    if let Some(base) = declared.strip_suffix("/*") {
        return concrete
            .split_once('/')
            .is_some_and(|(concrete_base, _)| concrete_base == base);
    }
    declared == concrete
}
