use super::resolve_location;
use crate::directory::{AttributeValue, Dn, LdapEntry, Modification, ModificationOp};
use crate::DirectoryError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fs;

/// One record of an LDIF file.
#[derive(Debug, Clone)]
pub enum LdifRecord {
    /// A content record or a `changetype: add` record.
    Add(LdapEntry),
    Delete(Dn),
    Modify {
        dn: Dn,
        modifications: Vec<Modification>,
    },
}

impl LdifRecord {
    pub fn dn(&self) -> &Dn {
        match self {
            LdifRecord::Add(entry) => &entry.dn,
            LdifRecord::Delete(dn) => dn,
            LdifRecord::Modify { dn, .. } => dn,
        }
    }
}

// An unfolded line and the 1-based number of the physical line it started on
type Line = (usize, String);

fn ldif_error(line: usize, message: impl Into<String>) -> DirectoryError {
    DirectoryError::Ldif {
        line,
        message: message.into(),
    }
}

/// Parses LDIF content (RFC 2849) into records.
pub fn parse_ldif(content: &str) -> crate::Result<Vec<LdifRecord>> {
    let mut records = Vec::new();
    for (index, block) in split_records(content)?.into_iter().enumerate() {
        let block = if index == 0 {
            strip_version(block)?
        } else {
            block
        };
        if !block.is_empty() {
            records.push(parse_record(&block)?);
        }
    }
    Ok(records)
}

fn split_records(content: &str) -> crate::Result<Vec<Vec<Line>>> {
    let mut records = Vec::new();
    let mut current: Vec<Line> = Vec::new();
    let mut in_comment = false;

    for (index, raw) in content.lines().enumerate() {
        let number = index + 1;
        let raw = raw.strip_suffix('\r').unwrap_or(raw);

        if let Some(continuation) = raw.strip_prefix(' ') {
            if in_comment {
                continue;
            }
            match current.last_mut() {
                Some((_, line)) => line.push_str(continuation),
                None => return Err(ldif_error(number, "continuation line without a preceding line")),
            }
            continue;
        }

        in_comment = raw.starts_with('#');
        if in_comment {
            continue;
        }

        if raw.trim().is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }

        current.push((number, raw.to_string()));
    }

    if !current.is_empty() {
        records.push(current);
    }
    Ok(records)
}

fn strip_version(mut block: Vec<Line>) -> crate::Result<Vec<Line>> {
    let Some((number, first)) = block.first() else {
        return Ok(block);
    };
    if let Some(version) = first.strip_prefix("version:") {
        if version.trim() != "1" {
            return Err(ldif_error(*number, format!("unsupported LDIF version {}", version.trim())));
        }
        block.remove(0);
    }
    Ok(block)
}

/// Splits `attr: value`, `attr:: base64` and `attr:< url` lines.
fn parse_attr_value(number: usize, line: &str) -> crate::Result<(String, Vec<u8>)> {
    let colon = line
        .find(':')
        .ok_or_else(|| ldif_error(number, format!("missing ':' in {:?}", line)))?;
    let name = line[..colon].trim();
    if name.is_empty() {
        return Err(ldif_error(number, "missing attribute name"));
    }

    let rest = &line[colon + 1..];
    let value = if let Some(encoded) = rest.strip_prefix(':') {
        BASE64
            .decode(encoded.trim())
            .map_err(|e| ldif_error(number, format!("invalid base64 value for {}: {}", name, e)))?
    } else if let Some(url) = rest.strip_prefix('<') {
        let url = url.trim();
        if !url.starts_with("file:") {
            return Err(ldif_error(number, format!("unsupported URL {}", url)));
        }
        let path = resolve_location(url).map_err(|e| ldif_error(number, e.to_string()))?;
        fs::read(path)
            .map_err(|e| ldif_error(number, format!("cannot read {}: {}", url, e)))?
    } else {
        rest.trim_start().as_bytes().to_vec()
    };

    Ok((name.to_string(), value))
}

fn parse_dn(number: usize, line: &str) -> crate::Result<Dn> {
    let (name, value) = parse_attr_value(number, line)?;
    if !name.eq_ignore_ascii_case("dn") {
        return Err(ldif_error(number, format!("record must start with dn:, found {}", name)));
    }
    let value = String::from_utf8(value).map_err(|_| ldif_error(number, "DN is not UTF-8"))?;
    Dn::parse(&value).map_err(|e| ldif_error(number, e.to_string()))
}

fn parse_record(block: &[Line]) -> crate::Result<LdifRecord> {
    let (dn_line, dn_text) = &block[0];
    let dn = parse_dn(*dn_line, dn_text)?;

    let mut lines = block[1..]
        .iter()
        .filter(|(_, line)| !line.to_ascii_lowercase().starts_with("control:"))
        .peekable();

    let change_type = match lines.peek() {
        Some((number, line)) if line.to_ascii_lowercase().starts_with("changetype:") => {
            let (_, value) = parse_attr_value(*number, line)?;
            let number = *number;
            lines.next();
            Some((number, String::from_utf8_lossy(&value).trim().to_lowercase()))
        }
        _ => None,
    };

    let rest: Vec<&Line> = lines.collect();
    match change_type {
        None => parse_content(dn, &rest),
        Some((_, kind)) if kind == "add" => parse_content(dn, &rest),
        Some((_, kind)) if kind == "delete" => match rest.first() {
            Some((line, _)) => Err(ldif_error(*line, "delete record cannot carry attributes")),
            None => Ok(LdifRecord::Delete(dn)),
        },
        Some((_, kind)) if kind == "modify" => parse_modify(dn, &rest),
        Some((number, kind)) => Err(ldif_error(number, format!("unsupported changetype {}", kind))),
    }
}

fn parse_content(dn: Dn, lines: &[&Line]) -> crate::Result<LdifRecord> {
    let mut entry = LdapEntry::new(dn);
    for (number, line) in lines {
        let (name, value) = parse_attr_value(*number, line)?;
        let value = AttributeValue::from_bytes(&name, value);
        entry.put_value(&name, value);
    }
    Ok(LdifRecord::Add(entry))
}

fn parse_modify(dn: Dn, lines: &[&Line]) -> crate::Result<LdifRecord> {
    let mut modifications = Vec::new();
    let mut current: Option<Modification> = None;

    for (number, line) in lines {
        if line.trim() == "-" {
            match current.take() {
                Some(modification) => modifications.push(modification),
                None => return Err(ldif_error(*number, "'-' without a modification")),
            }
            continue;
        }

        let (name, value) = parse_attr_value(*number, line)?;
        match current.as_mut() {
            None => {
                let op = match name.to_lowercase().as_str() {
                    "add" => ModificationOp::Add,
                    "delete" => ModificationOp::Delete,
                    "replace" => ModificationOp::Replace,
                    other => {
                        return Err(ldif_error(*number, format!("unknown modify operation {}", other)))
                    }
                };
                let attribute = String::from_utf8(value)
                    .map_err(|_| ldif_error(*number, "attribute name is not UTF-8"))?;
                current = Some(Modification {
                    op,
                    attribute: attribute.trim().to_string(),
                    values: Vec::new(),
                });
            }
            Some(modification) => {
                if !name.eq_ignore_ascii_case(&modification.attribute) {
                    return Err(ldif_error(
                        *number,
                        format!("expected {} values, found {}", modification.attribute, name),
                    ));
                }
                modification.values.push(AttributeValue::from_bytes(&name, value));
            }
        }
    }

    if let Some(modification) = current {
        modifications.push(modification);
    }

    Ok(LdifRecord::Modify { dn, modifications })
}
