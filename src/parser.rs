use globset::{Glob, GlobMatcher};
use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;

use crate::filter::{Filter, PortFilter, StringAttribute, StringFilter, StringOp, UidClass};
use crate::intent::ComponentName;
use crate::intent_filter::{AuthorityEntry, IntentFilter, PathPattern};
use crate::rule::{Rule, RuleEffects, RuleKind};

/// Errors raised while reading a rule file. Variants surfacing inside one
/// rule discard that rule only; anything outside a rule discards the file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed xml: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed attribute: {0}")]
    Attr(#[from] AttrError),
    #[error("expected a <rules> document root")]
    MissingRoot,
    #[error("unexpected root element <{0}>")]
    UnexpectedRoot(String),
    #[error("document ended before </rules>")]
    UnexpectedEof,
    #[error("unknown filter element <{0}>")]
    UnknownElement(String),
    #[error("unknown attribute `{attribute}` on <{element}>")]
    UnknownAttribute { element: String, attribute: String },
    #[error("<{element}> requires a `{attribute}` attribute")]
    MissingAttribute { element: String, attribute: String },
    #[error("<{0}> does not take child elements")]
    UnexpectedChildren(String),
    #[error("<not> requires exactly one child filter, found {0}")]
    NotArity(usize),
    #[error("<{0}> requires exactly one match-type attribute")]
    BadStringOp(String),
    #[error("invalid component name `{0}`")]
    InvalidComponent(String),
    #[error("matchall rules cannot carry intent-filter or component-filter children")]
    MatchAllWithFilter,
    #[error("invalid glob pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
    #[error("invalid regex `{pattern}`: {source}")]
    Regex {
        pattern: String,
        source: regex::Error,
    },
    #[error("invalid port `{0}`")]
    InvalidPort(String),
    #[error("unknown sender/target class `{0}`")]
    UnknownUidClass(String),
}

/// The result of one file: the rules that parsed, plus the errors of rules
/// that were dropped under per-rule isolation.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub rules: Vec<(RuleKind, Rule)>,
    pub dropped: Vec<ParseError>,
}

/// Parse one rule document.
///
/// The root must be `<rules>`; unknown top-level elements are skipped
/// silently; known rule elements that fail to parse are recorded in
/// `dropped` and the remainder of the file is still read. Structural
/// problems outside a rule fail the whole document.
pub fn parse_rules_document(xml: &str) -> Result<ParseOutcome, ParseError> {
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                if e.name().as_ref() == b"rules" {
                    break;
                }
                return Err(ParseError::UnexpectedRoot(tag_name(&e)));
            }
            Event::Empty(e) => {
                return if e.name().as_ref() == b"rules" {
                    Ok(ParseOutcome::default())
                } else {
                    Err(ParseError::UnexpectedRoot(tag_name(&e)))
                };
            }
            Event::Eof => return Err(ParseError::MissingRoot),
            Event::Decl(_) | Event::Text(_) | Event::Comment(_) | Event::DocType(_)
            | Event::PI(_) => {}
            Event::End(_) | Event::CData(_) => return Err(ParseError::MissingRoot),
        }
    }

    let mut outcome = ParseOutcome::default();
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let tag = tag_name(&e);
                // Capture the whole subtree first so a bad rule cannot
                // desynchronize the outer document scan.
                let inner = reader.read_text(e.name())?;
                collect_rule(&mut outcome, &tag, &e, &inner);
            }
            Event::Empty(e) => {
                let tag = tag_name(&e);
                collect_rule(&mut outcome, &tag, &e, "");
            }
            Event::End(_) => break,
            Event::Eof => return Err(ParseError::UnexpectedEof),
            _ => {}
        }
    }
    Ok(outcome)
}

fn collect_rule(outcome: &mut ParseOutcome, tag: &str, e: &BytesStart, inner: &str) {
    let Some(kind) = RuleKind::from_tag(tag) else {
        return;
    };
    match parse_rule(e, inner) {
        Ok(rule) => outcome.rules.push((kind, rule)),
        Err(err) => {
            tracing::warn!(rule = tag, error = %err, "discarding malformed rule");
            outcome.dropped.push(err);
        }
    }
}

fn parse_rule(e: &BytesStart, inner: &str) -> Result<Rule, ParseError> {
    let element = tag_name(e);
    let mut package_name = None;
    let mut effects = RuleEffects::default();
    let mut match_all = false;
    for (key, value) in attrs(e)? {
        match key.as_str() {
            "pkgName" => package_name = Some(value),
            "block" => effects.block = parse_bool(&value),
            "log" => effects.log = parse_bool(&value),
            "blockquery" => effects.block_query = parse_bool(&value),
            "logquery" => effects.log_query = parse_bool(&value),
            "matchall" => match_all = parse_bool(&value),
            _ => {
                return Err(ParseError::UnknownAttribute {
                    element,
                    attribute: key,
                })
            }
        }
    }

    let mut conditions = Vec::new();
    let mut intent_filters = Vec::new();
    let mut component_filters = Vec::new();

    let mut reader = Reader::from_str(inner);
    loop {
        match reader.read_event()? {
            Event::Start(child) => {
                let text = reader.read_text(child.name())?;
                rule_child(
                    &child,
                    &text,
                    match_all,
                    &mut conditions,
                    &mut intent_filters,
                    &mut component_filters,
                )?;
            }
            Event::Empty(child) => {
                rule_child(
                    &child,
                    "",
                    match_all,
                    &mut conditions,
                    &mut intent_filters,
                    &mut component_filters,
                )?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(Rule::new(
        package_name,
        effects,
        match_all,
        Filter::And(conditions),
        intent_filters,
        component_filters,
    ))
}

fn rule_child(
    e: &BytesStart,
    inner: &str,
    match_all: bool,
    conditions: &mut Vec<Filter>,
    intent_filters: &mut Vec<IntentFilter>,
    component_filters: &mut Vec<ComponentName>,
) -> Result<(), ParseError> {
    let tag = tag_name(e);
    match tag.as_str() {
        "intent-filter" => {
            if match_all {
                return Err(ParseError::MatchAllWithFilter);
            }
            intent_filters.push(parse_intent_filter(e, inner)?);
        }
        "component-filter" => {
            if match_all {
                return Err(ParseError::MatchAllWithFilter);
            }
            require_no_children(&tag, inner)?;
            let name = single_attr(e, &tag, "name")?;
            let component = ComponentName::unflatten(&name)
                .ok_or(ParseError::InvalidComponent(name))?;
            component_filters.push(component);
        }
        _ => conditions.push(parse_filter_element(e, inner)?),
    }
    Ok(())
}

fn parse_filter_element(e: &BytesStart, inner: &str) -> Result<Filter, ParseError> {
    let tag = tag_name(e);
    match tag.as_str() {
        "and" => {
            require_no_attrs(e, &tag)?;
            Ok(Filter::And(parse_filter_children(inner)?))
        }
        "or" => {
            require_no_attrs(e, &tag)?;
            Ok(Filter::Or(parse_filter_children(inner)?))
        }
        "not" => {
            require_no_attrs(e, &tag)?;
            let mut children = parse_filter_children(inner)?;
            if children.len() != 1 {
                return Err(ParseError::NotArity(children.len()));
            }
            Ok(Filter::Not(Box::new(children.remove(0))))
        }
        "action" => string_leaf(e, inner, &tag, StringAttribute::Action),
        "component-name" => string_leaf(e, inner, &tag, StringAttribute::ComponentName),
        "component-package" => string_leaf(e, inner, &tag, StringAttribute::ComponentPackage),
        "data" => string_leaf(e, inner, &tag, StringAttribute::Data),
        "host" => string_leaf(e, inner, &tag, StringAttribute::Host),
        "mime-type" => string_leaf(e, inner, &tag, StringAttribute::MimeType),
        "scheme" => string_leaf(e, inner, &tag, StringAttribute::Scheme),
        "path" => string_leaf(e, inner, &tag, StringAttribute::Path),
        "ssp" => string_leaf(e, inner, &tag, StringAttribute::Ssp),
        "component" => parse_component_element(e, inner),
        "category" => {
            require_no_children(&tag, inner)?;
            Ok(Filter::Category(single_attr(e, &tag, "name")?))
        }
        "sender" => {
            require_no_children(&tag, inner)?;
            Ok(Filter::Sender(parse_uid_class(&single_attr(e, &tag, "type")?)?))
        }
        "target" => {
            require_no_children(&tag, inner)?;
            Ok(Filter::Target(parse_uid_class(&single_attr(e, &tag, "type")?)?))
        }
        "sender-package" => {
            require_no_children(&tag, inner)?;
            Ok(Filter::SenderPackage(single_attr(e, &tag, "name")?))
        }
        "target-package" => {
            require_no_children(&tag, inner)?;
            Ok(Filter::TargetPackage(single_attr(e, &tag, "name")?))
        }
        "sender-permission" => {
            require_no_children(&tag, inner)?;
            Ok(Filter::SenderPermission(single_attr(e, &tag, "name")?))
        }
        "target-permission" => {
            require_no_children(&tag, inner)?;
            Ok(Filter::TargetPermission(single_attr(e, &tag, "name")?))
        }
        "port" => parse_port(e, inner),
        "intent-filter" => Ok(Filter::IntentFilter(Box::new(parse_intent_filter(e, inner)?))),
        "provisioned" => {
            require_no_children(&tag, inner)?;
            Ok(Filter::Provisioned(parse_bool(&single_attr(e, &tag, "value")?)))
        }
        _ => Err(ParseError::UnknownElement(tag)),
    }
}

fn parse_filter_children(inner: &str) -> Result<Vec<Filter>, ParseError> {
    let mut reader = Reader::from_str(inner);
    let mut children = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(child) => {
                let text = reader.read_text(child.name())?;
                children.push(parse_filter_element(&child, &text)?);
            }
            Event::Empty(child) => children.push(parse_filter_element(&child, "")?),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(children)
}

fn string_leaf(
    e: &BytesStart,
    inner: &str,
    element: &str,
    attribute: StringAttribute,
) -> Result<Filter, ParseError> {
    require_no_children(element, inner)?;
    let op = string_op_from_attrs(element, attrs(e)?)?;
    Ok(Filter::StringMatch(StringFilter { attribute, op }))
}

fn string_op_from_attrs(
    element: &str,
    attrs: Vec<(String, String)>,
) -> Result<StringOp, ParseError> {
    let mut op = None;
    for (key, value) in attrs {
        let parsed = match key.as_str() {
            "equals" => StringOp::Equals(value),
            "starts-with" => StringOp::StartsWith(value),
            "contains" => StringOp::Contains(value),
            "pattern" => StringOp::Pattern(compile_glob(&value)?),
            "regex" => StringOp::Regex(compile_regex(&value)?),
            _ => {
                return Err(ParseError::UnknownAttribute {
                    element: element.to_string(),
                    attribute: key,
                })
            }
        };
        if op.replace(parsed).is_some() {
            return Err(ParseError::BadStringOp(element.to_string()));
        }
    }
    op.ok_or_else(|| ParseError::BadStringOp(element.to_string()))
}

/// `component` carries either a `name` attribute (exact resolved-component
/// match) or one string-match attribute over the flattened component.
fn parse_component_element(e: &BytesStart, inner: &str) -> Result<Filter, ParseError> {
    require_no_children("component", inner)?;
    let attrs = attrs(e)?;
    if let [(key, name)] = attrs.as_slice() {
        if key == "name" {
            let component = ComponentName::unflatten(name)
                .ok_or_else(|| ParseError::InvalidComponent(name.clone()))?;
            return Ok(Filter::Component(component));
        }
    }
    let op = string_op_from_attrs("component", attrs)?;
    Ok(Filter::StringMatch(StringFilter {
        attribute: StringAttribute::Component,
        op,
    }))
}

fn parse_port(e: &BytesStart, inner: &str) -> Result<Filter, ParseError> {
    require_no_children("port", inner)?;
    let mut min = None;
    let mut max = None;
    for (key, value) in attrs(e)? {
        let port: u16 = value
            .parse()
            .map_err(|_| ParseError::InvalidPort(value.clone()))?;
        match key.as_str() {
            "equals" => {
                min = Some(port);
                max = Some(port);
            }
            "min" => min = Some(port),
            "max" => max = Some(port),
            _ => {
                return Err(ParseError::UnknownAttribute {
                    element: "port".to_string(),
                    attribute: key,
                })
            }
        }
    }
    Ok(Filter::Port(PortFilter { min, max }))
}

fn parse_intent_filter(e: &BytesStart, inner: &str) -> Result<IntentFilter, ParseError> {
    require_no_attrs(e, "intent-filter")?;
    let mut filter = IntentFilter::new();
    let mut reader = Reader::from_str(inner);
    loop {
        match reader.read_event()? {
            Event::Start(child) => {
                let text = reader.read_text(child.name())?;
                require_no_children(&tag_name(&child), &text)?;
                intent_filter_child(&mut filter, &child)?;
            }
            Event::Empty(child) => intent_filter_child(&mut filter, &child)?,
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(filter)
}

fn intent_filter_child(filter: &mut IntentFilter, e: &BytesStart) -> Result<(), ParseError> {
    let tag = tag_name(e);
    match tag.as_str() {
        "action" => filter.add_action(single_attr(e, &tag, "name")?),
        "category" | "cat" => filter.add_category(single_attr(e, &tag, "name")?),
        "data" => {
            let mut host = None;
            let mut port = None;
            for (key, value) in attrs(e)? {
                match key.as_str() {
                    "scheme" => filter.add_scheme(&value),
                    "host" => host = Some(value),
                    "port" => {
                        port = Some(
                            value
                                .parse()
                                .map_err(|_| ParseError::InvalidPort(value.clone()))?,
                        )
                    }
                    "path" => filter.add_path(PathPattern::Literal(value)),
                    "pathPrefix" => filter.add_path(PathPattern::Prefix(value)),
                    "pathPattern" => filter.add_path(PathPattern::Glob(compile_glob(&value)?)),
                    "ssp" => filter.add_ssp(PathPattern::Literal(value)),
                    "sspPrefix" => filter.add_ssp(PathPattern::Prefix(value)),
                    "sspPattern" => filter.add_ssp(PathPattern::Glob(compile_glob(&value)?)),
                    "mimeType" => filter.add_type(&value),
                    _ => {
                        return Err(ParseError::UnknownAttribute {
                            element: tag,
                            attribute: key,
                        })
                    }
                }
            }
            match (host, port) {
                (Some(host), port) => filter.add_authority(AuthorityEntry::new(&host, port)),
                (None, Some(_)) => {
                    return Err(ParseError::MissingAttribute {
                        element: tag,
                        attribute: "host".to_string(),
                    })
                }
                (None, None) => {}
            }
        }
        _ => return Err(ParseError::UnknownElement(tag)),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Small helpers
// ---------------------------------------------------------------------------

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn attrs(e: &BytesStart) -> Result<Vec<(String, String)>, ParseError> {
    let mut out = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        out.push((key, value));
    }
    Ok(out)
}

fn single_attr(e: &BytesStart, element: &str, attribute: &str) -> Result<String, ParseError> {
    let mut found = None;
    for (key, value) in attrs(e)? {
        if key == attribute {
            found = Some(value);
        } else {
            return Err(ParseError::UnknownAttribute {
                element: element.to_string(),
                attribute: key,
            });
        }
    }
    found.ok_or_else(|| ParseError::MissingAttribute {
        element: element.to_string(),
        attribute: attribute.to_string(),
    })
}

fn require_no_attrs(e: &BytesStart, element: &str) -> Result<(), ParseError> {
    if let Some((key, _)) = attrs(e)?.into_iter().next() {
        return Err(ParseError::UnknownAttribute {
            element: element.to_string(),
            attribute: key,
        });
    }
    Ok(())
}

fn require_no_children(element: &str, inner: &str) -> Result<(), ParseError> {
    if inner.trim().is_empty() {
        Ok(())
    } else {
        Err(ParseError::UnexpectedChildren(element.to_string()))
    }
}

/// `"true"` in any case is true; anything else, including absence, is false.
fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher, ParseError> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|source| ParseError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Regexes match the whole subject, so anchor them at compile time.
fn compile_regex(pattern: &str) -> Result<Regex, ParseError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| ParseError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}

fn parse_uid_class(value: &str) -> Result<UidClass, ParseError> {
    match value {
        "signature" => Ok(UidClass::Signature),
        "system" => Ok(UidClass::System),
        "user" => Ok(UidClass::User),
        _ => Err(ParseError::UnknownUidClass(value.to_string())),
    }
}
