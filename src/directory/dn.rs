use crate::DirectoryError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// One `type=value` component of a DN.
///
/// Multi-valued RDNs (`cn=a+sn=b`) are kept as a single component whose value
/// carries the `+` remainder verbatim.
#[derive(Debug, Clone)]
pub struct Rdn {
    up_name: String,
    attr_type: String,
    value: String,
}

impl Rdn {
    pub fn attr_type(&self) -> &str {
        &self.attr_type
    }

    /// The value with DN escapes removed.
    pub fn value(&self) -> String {
        unescape_value(&self.value)
    }

    pub fn up_name(&self) -> &str {
        &self.up_name
    }

    fn normalized(&self) -> String {
        format!(
            "{}={}",
            self.attr_type.to_lowercase(),
            self.value.trim().to_lowercase()
        )
    }
}

/// A parsed distinguished name.
///
/// The user provided form is kept for display; equality, hashing and the
/// ancestry checks all work on the normalized form.
#[derive(Debug, Clone)]
pub struct Dn {
    up_name: String,
    normalized: String,
    rdns: Vec<Rdn>,
}

impl Dn {
    pub fn parse(input: &str) -> crate::Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut rdns = Vec::new();
        for component in split_unescaped(trimmed, ',') {
            rdns.push(parse_rdn(component, input)?);
        }

        Ok(Self::from_rdns(rdns))
    }

    /// The empty DN naming the root DSE.
    pub fn root() -> Self {
        Self {
            up_name: String::new(),
            normalized: String::new(),
            rdns: Vec::new(),
        }
    }

    fn from_rdns(rdns: Vec<Rdn>) -> Self {
        let up_name = rdns
            .iter()
            .map(|rdn| rdn.up_name.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let normalized = rdns
            .iter()
            .map(Rdn::normalized)
            .collect::<Vec<_>>()
            .join(",");
        Self {
            up_name,
            normalized,
            rdns,
        }
    }

    pub fn up_name(&self) -> &str {
        &self.up_name
    }

    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            return None;
        }
        Some(Self::from_rdns(self.rdns[1..].to_vec()))
    }

    /// Builds `rdn,self`.
    pub fn child(&self, rdn: &str) -> crate::Result<Dn> {
        if self.is_root() {
            return Dn::parse(rdn);
        }
        Dn::parse(&format!("{},{}", rdn, self.up_name))
    }

    /// True when `self` sits strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Dn) -> bool {
        if self.rdns.len() <= ancestor.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - ancestor.rdns.len();
        self.rdns[offset..]
            .iter()
            .zip(&ancestor.rdns)
            .all(|(a, b)| a.normalized() == b.normalized())
    }

    pub fn is_child_of(&self, parent: &Dn) -> bool {
        self.rdns.len() == parent.rdns.len() + 1 && self.is_descendant_of(parent)
    }

    /// `self` equals `other` or lies below it.
    pub fn is_within(&self, other: &Dn) -> bool {
        self == other || self.is_descendant_of(other)
    }
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.up_name)
    }
}

impl FromStr for Dn {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dn::parse(s)
    }
}

fn parse_rdn(component: &str, input: &str) -> crate::Result<Rdn> {
    let component = component.trim();
    if component.is_empty() {
        return Err(DirectoryError::InvalidDn(format!(
            "empty RDN in '{}'",
            input
        )));
    }

    let eq_pos = find_unescaped(component, '=').ok_or_else(|| {
        DirectoryError::InvalidDn(format!("RDN '{}' has no '=' in '{}'", component, input))
    })?;

    let attr_type = component[..eq_pos].trim();
    let value = component[eq_pos + 1..].trim();

    if attr_type.is_empty() || !attr_type.chars().all(is_attr_type_char) {
        return Err(DirectoryError::InvalidDn(format!(
            "invalid attribute type '{}' in '{}'",
            attr_type, input
        )));
    }

    Ok(Rdn {
        up_name: format!("{}={}", attr_type, value),
        attr_type: attr_type.to_string(),
        value: value.to_string(),
    })
}

fn is_attr_type_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == ';'
}

fn find_unescaped(s: &str, needle: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == needle {
            return Some(i);
        }
    }
    None
}

fn split_unescaped(s: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == separator {
            parts.push(&s[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&s[start..]);
    parts
}

// Handles both `\,` style and `\2C` hex escapes.
fn unescape_value(value: &str) -> String {
    let mut bytes = Vec::with_capacity(value.len());
    let raw = value.as_bytes();
    let mut i = 0;

    while i < raw.len() {
        if raw[i] == b'\\' && i + 1 < raw.len() {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            match hex {
                Some(byte) => {
                    bytes.push(byte);
                    i += 3;
                }
                None => {
                    bytes.push(raw[i + 1]);
                    i += 2;
                }
            }
        } else {
            bytes.push(raw[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_dn() {
        let dn = Dn::parse("uid=jdoe,ou=people,dc=example,dc=org").unwrap();
        assert_eq!(dn.len(), 4);
        assert_eq!(dn.rdn().unwrap().attr_type(), "uid");
        assert_eq!(dn.rdn().unwrap().value(), "jdoe");
        assert_eq!(dn.up_name(), "uid=jdoe,ou=people,dc=example,dc=org");
    }

    #[test]
    fn test_normalization_ignores_case_and_spaces() {
        let a = Dn::parse("CN=John Doe, DC=Example ,dc=ORG").unwrap();
        let b = Dn::parse("cn=john doe,dc=example,dc=org").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.normalized(), "cn=john doe,dc=example,dc=org");
        assert_eq!(a.up_name(), "CN=John Doe,DC=Example,dc=ORG");
    }

    #[test]
    fn test_escaped_comma_stays_in_value() {
        let dn = Dn::parse(r"cn=Doe\, John,dc=example,dc=org").unwrap();
        assert_eq!(dn.len(), 3);
        assert_eq!(dn.rdn().unwrap().value(), "Doe, John");

        let hex = Dn::parse(r"cn=Doe\2C John,dc=example,dc=org").unwrap();
        assert_eq!(hex.rdn().unwrap().value(), "Doe, John");
    }

    #[test]
    fn test_parent_and_child() {
        let dn = Dn::parse("uid=jdoe,ou=people,dc=example,dc=org").unwrap();
        let parent = dn.parent().unwrap();
        assert_eq!(parent.up_name(), "ou=people,dc=example,dc=org");
        assert!(dn.is_child_of(&parent));

        let child = parent.child("uid=other").unwrap();
        assert_eq!(child.up_name(), "uid=other,ou=people,dc=example,dc=org");
        assert!(Dn::root().parent().is_none());
    }

    #[test]
    fn test_descendants() {
        let suffix = Dn::parse("dc=example,dc=org").unwrap();
        let user = Dn::parse("uid=jdoe,ou=people,dc=example,dc=org").unwrap();
        let other = Dn::parse("uid=jdoe,dc=example,dc=com").unwrap();
        // A suffix match on the raw string must not count
        let lookalike = Dn::parse("dc=anexample,dc=org").unwrap();

        assert!(user.is_descendant_of(&suffix));
        assert!(!user.is_child_of(&suffix));
        assert!(!other.is_descendant_of(&suffix));
        assert!(!lookalike.is_descendant_of(&suffix));
        assert!(!suffix.is_descendant_of(&suffix));
        assert!(suffix.is_within(&suffix));
        assert!(suffix.is_descendant_of(&Dn::root()));
    }

    #[test]
    fn test_root_dn() {
        let root = Dn::parse("").unwrap();
        assert!(root.is_root());
        assert_eq!(root.to_string(), "");
    }

    #[test]
    fn test_invalid_dns() {
        assert!(matches!(
            Dn::parse("dc=example,,dc=org"),
            Err(DirectoryError::InvalidDn(_))
        ));
        assert!(matches!(
            Dn::parse("example"),
            Err(DirectoryError::InvalidDn(_))
        ));
        assert!(matches!(
            Dn::parse("=value,dc=org"),
            Err(DirectoryError::InvalidDn(_))
        ));
        assert!("dc=example,dc=org".parse::<Dn>().is_ok());
    }
}
