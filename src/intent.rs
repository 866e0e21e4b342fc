use std::collections::BTreeSet;
use std::fmt;

// ---------------------------------------------------------------------------
// ComponentName
// ---------------------------------------------------------------------------

/// A fully-qualified component: the owning package plus the class within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentName {
    package: String,
    class: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    /// Parse a flattened `package/class` string.
    ///
    /// A class beginning with `.` is shorthand relative to the package, so
    /// `com.x/.Cls` names the class `com.x.Cls`. Returns `None` when either
    /// side of the `/` is empty or the separator is missing.
    pub fn unflatten(s: &str) -> Option<Self> {
        let (package, class) = s.split_once('/')?;
        if package.is_empty() || class.is_empty() {
            return None;
        }
        let class = if let Some(rest) = class.strip_prefix('.') {
            if rest.is_empty() {
                return None;
            }
            format!("{package}.{rest}")
        } else {
            class.to_string()
        };
        Some(Self {
            package: package.to_string(),
            class,
        })
    }

    /// `package/class`, always using the full class name.
    pub fn flatten(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }

    /// `package/.Suffix` when the class lives inside the package, otherwise
    /// the full form. This is the shape used in audit records.
    pub fn flatten_short(&self) -> String {
        if let Some(rest) = self.class.strip_prefix(self.package.as_str()) {
            if rest.starts_with('.') {
                return format!("{}/{}", self.package, rest);
            }
        }
        self.flatten()
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.class)
    }
}

// ---------------------------------------------------------------------------
// DataUri
// ---------------------------------------------------------------------------

/// A dispatch payload URI, split into the pieces rule predicates inspect.
///
/// Parsing is best-effort and never fails: intents routinely carry opaque
/// URIs (`tel:555`, `package:com.x`) as well as hierarchical ones, and an
/// unrecognized shape simply leaves the structured fields empty. Scheme and
/// host are lowercased per URI normalization rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    raw: String,
    scheme: Option<String>,
    ssp: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
}

impl DataUri {
    pub fn parse(raw: &str) -> Self {
        let mut uri = Self {
            raw: raw.to_string(),
            scheme: None,
            ssp: None,
            host: None,
            port: None,
            path: None,
        };

        let Some((scheme, rest)) = split_scheme(raw) else {
            return uri;
        };
        uri.scheme = Some(scheme.to_ascii_lowercase());
        uri.ssp = Some(strip_fragment(rest).to_string());

        let Some(hier) = rest.strip_prefix("//") else {
            return uri;
        };
        let authority_end = hier
            .find(['/', '?', '#'])
            .unwrap_or(hier.len());
        let authority = &hier[..authority_end];
        let after = &hier[authority_end..];

        // Drop any userinfo before splitting host and port.
        let host_port = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        match host_port.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !port.is_empty() => {
                uri.host = Some(host.to_ascii_lowercase());
                uri.port = port.parse().ok();
            }
            _ => {
                if !host_port.is_empty() {
                    uri.host = Some(host_port.to_ascii_lowercase());
                }
            }
        }

        if after.starts_with('/') {
            let path_end = after.find(['?', '#']).unwrap_or(after.len());
            uri.path = Some(after[..path_end].to_string());
        }
        uri
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Everything after `scheme:`, excluding any fragment.
    pub fn scheme_specific_part(&self) -> Option<&str> {
        self.ssp.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

/// Split `scheme:rest`, accepting only syntactically valid scheme names
/// (alpha followed by alphanumerics, `+`, `-`, `.`).
fn split_scheme(s: &str) -> Option<(&str, &str)> {
    let colon = s.find(':')?;
    let scheme = &s[..colon];
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        return None;
    }
    Some((scheme, &s[colon + 1..]))
}

fn strip_fragment(s: &str) -> &str {
    s.split_once('#').map_or(s, |(before, _)| before)
}

// ---------------------------------------------------------------------------
// Intent
// ---------------------------------------------------------------------------

/// The structured payload of one inter-component dispatch.
///
/// The resolved MIME type is not carried here: the dispatcher resolves it
/// separately and passes it alongside the intent on every check.
#[derive(Debug, Clone, Default)]
pub struct Intent {
    action: Option<String>,
    categories: BTreeSet<String>,
    data: Option<DataUri>,
    component: Option<ComponentName>,
    flags: u32,
}

impl Intent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into());
        self
    }

    pub fn with_data(mut self, uri: &str) -> Self {
        self.data = Some(DataUri::parse(uri));
        self
    }

    pub fn with_component(mut self, component: ComponentName) -> Self {
        self.component = Some(component);
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(String::as_str)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }

    pub fn data(&self) -> Option<&DataUri> {
        self.data.as_ref()
    }

    pub fn component(&self) -> Option<&ComponentName> {
        self.component.as_ref()
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }
}
