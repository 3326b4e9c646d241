use super::dn::Dn;
use crate::DirectoryError;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;

const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%SZ";

const OPERATIONAL_ATTRIBUTES: &[&str] = &[
    "createtimestamp",
    "modifytimestamp",
    "creatorsname",
    "modifiersname",
    "entryuuid",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeSyntax {
    String,
    Binary,
    Dn,
    GeneralizedTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Binary(Vec<u8>),
    Dn(String),
    GeneralizedTime(DateTime<Utc>),
}

impl AttributeValue {
    /// Builds a value read off the wire or out of LDIF, picking the syntax
    /// from the attribute name.
    pub fn from_bytes(name: &str, bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(s) => Self::from_string(name, s),
            Err(e) => AttributeValue::Binary(e.into_bytes()),
        }
    }

    pub fn from_string(name: &str, value: String) -> Self {
        match guess_attribute_syntax(name) {
            AttributeSyntax::Dn => AttributeValue::Dn(value),
            AttributeSyntax::GeneralizedTime => {
                match NaiveDateTime::parse_from_str(&value, GENERALIZED_TIME_FORMAT) {
                    Ok(naive) => AttributeValue::GeneralizedTime(naive.and_utc()),
                    Err(_) => AttributeValue::String(value),
                }
            }
            _ => AttributeValue::String(value),
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            AttributeValue::String(s) => s.clone(),
            AttributeValue::Binary(b) => String::from_utf8_lossy(b).into_owned(),
            AttributeValue::Dn(dn) => dn.clone(),
            AttributeValue::GeneralizedTime(dt) => dt.format(GENERALIZED_TIME_FORMAT).to_string(),
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            AttributeValue::Binary(b) => b.clone(),
            other => other.as_string().into_bytes(),
        }
    }

    /// Equality as used by filters, compare and modify: DN values compare in
    /// normalized form, binary values byte for byte, everything else ignoring
    /// ASCII case.
    pub fn matches(&self, assertion: &str) -> bool {
        match self {
            AttributeValue::Dn(dn) => match (Dn::parse(dn), Dn::parse(assertion)) {
                (Ok(a), Ok(b)) => a == b,
                _ => dn.eq_ignore_ascii_case(assertion),
            },
            AttributeValue::Binary(b) => b.as_slice() == assertion.as_bytes(),
            other => other.as_string().eq_ignore_ascii_case(assertion),
        }
    }

    pub fn syntax(&self) -> AttributeSyntax {
        match self {
            AttributeValue::String(_) => AttributeSyntax::String,
            AttributeValue::Binary(_) => AttributeSyntax::Binary,
            AttributeValue::Dn(_) => AttributeSyntax::Dn,
            AttributeValue::GeneralizedTime(_) => AttributeSyntax::GeneralizedTime,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LdapAttribute {
    pub name: String,
    pub values: Vec<AttributeValue>,
    pub syntax: AttributeSyntax,
}

impl LdapAttribute {
    pub fn contains(&self, assertion: &str) -> bool {
        self.values.iter().any(|v| v.matches(assertion))
    }

    pub fn is_operational(&self) -> bool {
        is_operational_attribute(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModificationOp {
    Add,
    Delete,
    Replace,
}

/// A single change applied by `modify`.
#[derive(Debug, Clone, PartialEq)]
pub struct Modification {
    pub op: ModificationOp,
    pub attribute: String,
    pub values: Vec<AttributeValue>,
}

impl Modification {
    pub fn new(op: ModificationOp, attribute: &str, values: &[&str]) -> Self {
        Self {
            op,
            attribute: attribute.to_string(),
            values: values
                .iter()
                .map(|v| AttributeValue::from_string(attribute, v.to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LdapEntry {
    pub dn: Dn,
    pub attributes: HashMap<String, LdapAttribute>,
    pub object_classes: Vec<String>,
}

impl LdapEntry {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attributes: HashMap::new(),
            object_classes: Vec::new(),
        }
    }

    /// Sets an attribute, replacing any previous values.
    pub fn add_attribute(
        &mut self,
        name: String,
        values: Vec<AttributeValue>,
        syntax: AttributeSyntax,
    ) {
        let key = name.to_lowercase();
        self.attributes.insert(
            key.clone(),
            LdapAttribute {
                name,
                values,
                syntax,
            },
        );
        self.sync_object_classes(&key);
    }

    /// Appends string values, skipping ones already present.
    pub fn add_values(&mut self, name: &str, values: &[&str]) {
        for value in values {
            self.put_value(name, AttributeValue::from_string(name, value.to_string()));
        }
    }

    pub fn put_value(&mut self, name: &str, value: AttributeValue) {
        let key = name.to_lowercase();
        let attr = self
            .attributes
            .entry(key.clone())
            .or_insert_with(|| LdapAttribute {
                name: name.to_string(),
                values: Vec::new(),
                syntax: value.syntax(),
            });
        if !attr.values.contains(&value) {
            attr.values.push(value);
        }
        self.sync_object_classes(&key);
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<LdapAttribute> {
        let key = name.to_lowercase();
        let removed = self.attributes.remove(&key);
        self.sync_object_classes(&key);
        removed
    }

    pub fn get_attribute(&self, name: &str) -> Option<&LdapAttribute> {
        self.attributes.get(&name.to_lowercase())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(&name.to_lowercase())
    }

    pub fn first_value(&self, name: &str) -> Option<String> {
        self.get_attribute(name)
            .and_then(|attr| attr.values.first())
            .map(AttributeValue::as_string)
    }

    pub fn has_object_class(&self, object_class: &str) -> bool {
        self.object_classes
            .iter()
            .any(|oc| oc.eq_ignore_ascii_case(object_class))
    }

    pub fn matches_dn(&self, dn: &str) -> bool {
        Dn::parse(dn).map(|dn| dn == self.dn).unwrap_or(false)
    }

    pub fn apply(&mut self, modification: &Modification) -> crate::Result<()> {
        let name = modification.attribute.as_str();
        match modification.op {
            ModificationOp::Add => {
                for value in &modification.values {
                    self.put_value(name, value.clone());
                }
            }
            ModificationOp::Replace => {
                if modification.values.is_empty() {
                    self.remove_attribute(name);
                } else {
                    let syntax = modification.values[0].syntax();
                    self.add_attribute(name.to_string(), modification.values.clone(), syntax);
                }
            }
            ModificationOp::Delete => {
                if modification.values.is_empty() {
                    self.remove_attribute(name).ok_or_else(|| {
                        DirectoryError::NoSuchAttribute(format!("{} on {}", name, self.dn))
                    })?;
                } else {
                    self.remove_values(name, &modification.values)?;
                }
            }
        }
        Ok(())
    }

    fn remove_values(&mut self, name: &str, values: &[AttributeValue]) -> crate::Result<()> {
        let key = name.to_lowercase();
        let attr = self.attributes.get_mut(&key).ok_or_else(|| {
            DirectoryError::NoSuchAttribute(format!("{} on {}", name, self.dn))
        })?;

        for value in values {
            let assertion = value.as_string();
            let position = attr
                .values
                .iter()
                .position(|v| v.matches(&assertion))
                .ok_or_else(|| {
                    DirectoryError::NoSuchAttribute(format!("{}={} on {}", name, assertion, self.dn))
                })?;
            attr.values.remove(position);
        }

        if attr.values.is_empty() {
            self.attributes.remove(&key);
        }
        self.sync_object_classes(&key);
        Ok(())
    }

    fn sync_object_classes(&mut self, key: &str) {
        if key != "objectclass" {
            return;
        }
        self.object_classes = self
            .attributes
            .get("objectclass")
            .map(|attr| attr.values.iter().map(AttributeValue::as_string).collect())
            .unwrap_or_default();
    }
}

pub fn is_operational_attribute(name: &str) -> bool {
    let lower = name.to_lowercase();
    OPERATIONAL_ATTRIBUTES.contains(&lower.as_str())
}

fn guess_attribute_syntax(name: &str) -> AttributeSyntax {
    match name.to_lowercase().as_str() {
        "member" | "uniquemember" | "memberof" | "manager" | "owner" | "seealso"
        | "creatorsname" | "modifiersname" => AttributeSyntax::Dn,
        "createtimestamp" | "modifytimestamp" => AttributeSyntax::GeneralizedTime,
        "jpegphoto" | "usercertificate" | "usercertificate;binary" => AttributeSyntax::Binary,
        _ => AttributeSyntax::String,
    }
}
