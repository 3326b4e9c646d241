use crate::directory::entry::{AttributeValue, LdapEntry};
use crate::DirectoryError;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum LdapFilter {
    Present(String),                    // (attr=*)
    Equality(String, String),           // (attr=value)
    Substring(String, SubstringFilter), // (attr=ini*any*fin)
    GreaterOrEqual(String, String),     // (attr>=value)
    LessOrEqual(String, String),        // (attr<=value)
    Approximate(String, String),        // (attr~=value)
    Extensible(ExtensibleFilter),       // (attr:dn:rule:=value)
    And(Vec<LdapFilter>),               // (&(f1)(f2))
    Or(Vec<LdapFilter>),                // (|(f1)(f2))
    Not(Box<LdapFilter>),               // (!(f))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubstringFilter {
    pub initial: Option<String>,
    pub any: Vec<String>,
    pub final_: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtensibleFilter {
    pub attribute: Option<String>,
    pub matching_rule: Option<String>,
    pub value: String,
    pub dn_attributes: bool,
}

impl LdapFilter {
    pub fn matches(&self, entry: &LdapEntry) -> bool {
        match self {
            LdapFilter::Present(attr) => {
                attr.eq_ignore_ascii_case("objectClass") || entry.has_attribute(attr)
            }

            LdapFilter::Equality(attr, value) => entry
                .get_attribute(attr)
                .map(|attribute| attribute.contains(value))
                .unwrap_or(false),

            LdapFilter::Substring(attr, substring) => entry
                .get_attribute(attr)
                .map(|attribute| {
                    attribute
                        .values
                        .iter()
                        .any(|v| substring.matches(&v.as_string()))
                })
                .unwrap_or(false),

            LdapFilter::GreaterOrEqual(attr, value) => {
                compare_values(entry, attr, value, |ord| ord.is_ge())
            }

            LdapFilter::LessOrEqual(attr, value) => {
                compare_values(entry, attr, value, |ord| ord.is_le())
            }

            LdapFilter::Approximate(attr, value) => entry
                .get_attribute(attr)
                .map(|attribute| {
                    attribute
                        .values
                        .iter()
                        .any(|v| approximate_match(&v.as_string(), value))
                })
                .unwrap_or(false),

            LdapFilter::Extensible(extensible) => extensible.matches(entry),

            LdapFilter::And(filters) => filters.iter().all(|f| f.matches(entry)),

            LdapFilter::Or(filters) => filters.iter().any(|f| f.matches(entry)),

            LdapFilter::Not(filter) => !filter.matches(entry),
        }
    }

    /// Lowercased names of every attribute the filter looks at.
    pub fn referenced_attributes(&self) -> HashSet<String> {
        let mut attributes = HashSet::new();
        self.collect_attributes(&mut attributes);
        attributes
    }

    fn collect_attributes(&self, attributes: &mut HashSet<String>) {
        match self {
            LdapFilter::Present(attr)
            | LdapFilter::Equality(attr, _)
            | LdapFilter::Substring(attr, _)
            | LdapFilter::GreaterOrEqual(attr, _)
            | LdapFilter::LessOrEqual(attr, _)
            | LdapFilter::Approximate(attr, _) => {
                attributes.insert(attr.to_lowercase());
            }
            LdapFilter::Extensible(ext) => {
                if let Some(attr) = &ext.attribute {
                    attributes.insert(attr.to_lowercase());
                }
            }
            LdapFilter::And(filters) | LdapFilter::Or(filters) => {
                for filter in filters {
                    filter.collect_attributes(attributes);
                }
            }
            LdapFilter::Not(filter) => filter.collect_attributes(attributes),
        }
    }
}

impl fmt::Display for LdapFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LdapFilter::Present(attr) => write!(f, "({}=*)", attr),
            LdapFilter::Equality(attr, value) => {
                write!(f, "({}={})", attr, escape_filter_value(value))
            }
            LdapFilter::Substring(attr, sub) => {
                write!(f, "({}=", attr)?;
                if let Some(initial) = &sub.initial {
                    write!(f, "{}", escape_filter_value(initial))?;
                }
                write!(f, "*")?;
                for any in &sub.any {
                    write!(f, "{}*", escape_filter_value(any))?;
                }
                if let Some(final_) = &sub.final_ {
                    write!(f, "{}", escape_filter_value(final_))?;
                }
                write!(f, ")")
            }
            LdapFilter::GreaterOrEqual(attr, value) => {
                write!(f, "({}>={})", attr, escape_filter_value(value))
            }
            LdapFilter::LessOrEqual(attr, value) => {
                write!(f, "({}<={})", attr, escape_filter_value(value))
            }
            LdapFilter::Approximate(attr, value) => {
                write!(f, "({}~={})", attr, escape_filter_value(value))
            }
            LdapFilter::Extensible(ext) => {
                write!(f, "(")?;
                if let Some(attr) = &ext.attribute {
                    write!(f, "{}", attr)?;
                }
                if ext.dn_attributes {
                    write!(f, ":dn")?;
                }
                if let Some(rule) = &ext.matching_rule {
                    write!(f, ":{}", rule)?;
                }
                write!(f, ":={})", escape_filter_value(&ext.value))
            }
            LdapFilter::And(filters) => {
                write!(f, "(&")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            LdapFilter::Or(filters) => {
                write!(f, "(|")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                write!(f, ")")
            }
            LdapFilter::Not(filter) => write!(f, "(!{})", filter),
        }
    }
}

impl SubstringFilter {
    pub fn matches(&self, value: &str) -> bool {
        let mut pattern = String::new();

        if let Some(initial) = &self.initial {
            pattern.push_str(&regex::escape(initial));
        }
        pattern.push_str(".*");

        for any in &self.any {
            pattern.push_str(&regex::escape(any));
            pattern.push_str(".*");
        }

        if let Some(final_) = &self.final_ {
            pattern.push_str(&regex::escape(final_));
        }

        Regex::new(&format!("(?is)^{}$", pattern))
            .map(|re| re.is_match(value))
            .unwrap_or(false)
    }
}

impl ExtensibleFilter {
    pub fn matches(&self, entry: &LdapEntry) -> bool {
        let attribute_match = match &self.attribute {
            Some(attr) => entry
                .get_attribute(attr)
                .map(|a| a.values.iter().any(|v| self.matches_value(v)))
                .unwrap_or(false),
            None => false,
        };

        attribute_match || (self.dn_attributes && self.matches_dn_components(entry))
    }

    fn matches_value(&self, value: &AttributeValue) -> bool {
        match self.matching_rule.as_deref() {
            Some("2.5.13.5") | Some("caseExactMatch") => value.as_string() == self.value,
            _ => value.matches(&self.value),
        }
    }

    fn matches_dn_components(&self, entry: &LdapEntry) -> bool {
        entry.dn.rdns().iter().any(|rdn| {
            let type_matches = self
                .attribute
                .as_deref()
                .map(|attr| attr.eq_ignore_ascii_case(rdn.attr_type()))
                .unwrap_or(true);
            type_matches && self.matches_value(&AttributeValue::String(rdn.value()))
        })
    }
}

fn compare_values<F>(entry: &LdapEntry, attr: &str, assertion: &str, accept: F) -> bool
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    let Some(attribute) = entry.get_attribute(attr) else {
        return false;
    };

    attribute.values.iter().any(|v| {
        let value = v.as_string();
        let ordering = match (value.parse::<i64>(), assertion.parse::<i64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => value.to_lowercase().cmp(&assertion.to_lowercase()),
        };
        accept(ordering)
    })
}

// Whitespace and case insensitive containment
fn approximate_match(value: &str, pattern: &str) -> bool {
    let squash = |s: &str| {
        s.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    };
    squash(value).contains(&squash(pattern))
}

fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '*' => escaped.push_str("\\2a"),
            '(' => escaped.push_str("\\28"),
            ')' => escaped.push_str("\\29"),
            '\\' => escaped.push_str("\\5c"),
            '\0' => escaped.push_str("\\00"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_filter_value(value: &str) -> crate::Result<String> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    DirectoryError::InvalidFilter(format!("bad escape sequence in {:?}", value))
                })?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Parses an RFC 4515 string filter. A bare item without the surrounding
/// parentheses (`uid=jdoe`) is accepted too.
pub fn parse_ldap_filter(filter_str: &str) -> crate::Result<LdapFilter> {
    let trimmed = filter_str.trim();
    if trimmed.is_empty() {
        return Err(DirectoryError::InvalidFilter("empty filter".to_string()));
    }

    let wrapped;
    let text = if trimmed.starts_with('(') {
        trimmed
    } else {
        wrapped = format!("({})", trimmed);
        &wrapped
    };

    let mut parser = FilterParser {
        text,
        pos: 0,
        depth: 0,
    };
    let filter = parser.parse_filter()?;
    if parser.pos != text.len() {
        return Err(DirectoryError::InvalidFilter(format!(
            "unexpected trailing characters in {}",
            filter_str
        )));
    }
    Ok(filter)
}

/// Nesting limit for filters, shared by the string parser and the wire decoder.
pub const MAX_FILTER_DEPTH: usize = 64;

struct FilterParser<'a> {
    text: &'a str,
    pos: usize,
    depth: usize,
}

impl FilterParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> crate::Result<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(DirectoryError::InvalidFilter(format!(
                "expected '{}' at offset {} in {}",
                byte as char, self.pos, self.text
            )))
        }
    }

    fn parse_filter(&mut self) -> crate::Result<LdapFilter> {
        if self.depth >= MAX_FILTER_DEPTH {
            return Err(DirectoryError::InvalidFilter(format!(
                "filter nested deeper than {} levels",
                MAX_FILTER_DEPTH
            )));
        }
        self.depth += 1;
        let filter = self.parse_nested();
        self.depth -= 1;
        filter
    }

    fn parse_nested(&mut self) -> crate::Result<LdapFilter> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                LdapFilter::And(self.parse_filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                LdapFilter::Or(self.parse_filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                LdapFilter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => {
                return Err(DirectoryError::InvalidFilter(format!(
                    "unbalanced parentheses in {}",
                    self.text
                )))
            }
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn parse_filter_list(&mut self) -> crate::Result<Vec<LdapFilter>> {
        let mut filters = Vec::new();
        while self.peek() == Some(b'(') {
            filters.push(self.parse_filter()?);
        }
        Ok(filters)
    }

    fn parse_item(&mut self) -> crate::Result<LdapFilter> {
        let rest = &self.text[self.pos..];
        let end = rest.find(')').ok_or_else(|| {
            DirectoryError::InvalidFilter(format!("unbalanced parentheses in {}", self.text))
        })?;
        let item = &rest[..end];
        if item.contains('(') {
            return Err(DirectoryError::InvalidFilter(format!(
                "unescaped '(' in {}",
                item
            )));
        }
        self.pos += end;
        parse_simple_item(item)
    }
}

fn parse_simple_item(item: &str) -> crate::Result<LdapFilter> {
    let eq = item.find('=').ok_or_else(|| {
        DirectoryError::InvalidFilter(format!("missing '=' in {}", item))
    })?;
    let raw_value = &item[eq + 1..];

    let (attr_end, kind) = match item[..eq].chars().last() {
        Some('~') => (eq - 1, '~'),
        Some('>') => (eq - 1, '>'),
        Some('<') => (eq - 1, '<'),
        Some(':') => (eq - 1, ':'),
        _ => (eq, '='),
    };
    let attr = &item[..attr_end];

    if kind == ':' {
        return parse_extensible(attr, raw_value);
    }

    validate_attribute(attr, item)?;
    let attr = attr.to_string();

    match kind {
        '~' => Ok(LdapFilter::Approximate(attr, unescape_filter_value(raw_value)?)),
        '>' => Ok(LdapFilter::GreaterOrEqual(attr, unescape_filter_value(raw_value)?)),
        '<' => Ok(LdapFilter::LessOrEqual(attr, unescape_filter_value(raw_value)?)),
        _ if raw_value == "*" => Ok(LdapFilter::Present(attr)),
        _ if raw_value.contains('*') => {
            let parts: Vec<&str> = raw_value.split('*').collect();
            let last = parts.len() - 1;
            let optional = |s: &str| -> crate::Result<Option<String>> {
                if s.is_empty() {
                    Ok(None)
                } else {
                    unescape_filter_value(s).map(Some)
                }
            };
            let any = parts[1..last]
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| unescape_filter_value(s))
                .collect::<crate::Result<Vec<_>>>()?;
            Ok(LdapFilter::Substring(
                attr,
                SubstringFilter {
                    initial: optional(parts[0])?,
                    any,
                    final_: optional(parts[last])?,
                },
            ))
        }
        _ => Ok(LdapFilter::Equality(attr, unescape_filter_value(raw_value)?)),
    }
}

// Left side of `:=` is [attr][:dn][:rule]
fn parse_extensible(left: &str, raw_value: &str) -> crate::Result<LdapFilter> {
    let mut parts = left.split(':');
    let attribute = parts
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut dn_attributes = false;
    let mut matching_rule = None;
    for part in parts {
        if part.eq_ignore_ascii_case("dn") {
            dn_attributes = true;
        } else if !part.is_empty() {
            matching_rule = Some(part.to_string());
        }
    }

    if attribute.is_none() && matching_rule.is_none() {
        return Err(DirectoryError::InvalidFilter(format!(
            "extensible match needs an attribute or a matching rule: {}:={}",
            left, raw_value
        )));
    }

    Ok(LdapFilter::Extensible(ExtensibleFilter {
        attribute,
        matching_rule,
        value: unescape_filter_value(raw_value)?,
        dn_attributes,
    }))
}

fn validate_attribute(attr: &str, item: &str) -> crate::Result<()> {
    let valid = !attr.is_empty()
        && attr
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ';');
    if valid {
        Ok(())
    } else {
        Err(DirectoryError::InvalidFilter(format!(
            "invalid attribute description in {}",
            item
        )))
    }
}
