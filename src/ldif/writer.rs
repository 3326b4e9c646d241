use crate::directory::{AttributeValue, LdapEntry};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

const MAX_LINE_WIDTH: usize = 76;

/// Renders entries as LDIF content records, in the order given.
pub fn write_entries(entries: &[LdapEntry]) -> String {
    let mut out = String::from("version: 1\n");
    for entry in entries {
        out.push('\n');
        write_entry(entry, &mut out);
    }
    out
}

pub fn write_entry(entry: &LdapEntry, out: &mut String) {
    write_line(out, "dn", entry.dn.up_name().as_bytes());

    let mut attributes: Vec<_> = entry.attributes.values().collect();
    attributes.sort_by_key(|attr| {
        (
            !attr.name.eq_ignore_ascii_case("objectClass"),
            attr.name.to_lowercase(),
        )
    });

    for attr in attributes {
        for value in &attr.values {
            let bytes = match value {
                AttributeValue::Binary(bytes) => bytes.clone(),
                other => other.as_string().into_bytes(),
            };
            write_line(out, &attr.name, &bytes);
        }
    }
}

fn write_line(out: &mut String, name: &str, value: &[u8]) {
    let line = match std::str::from_utf8(value) {
        Ok(text) if is_safe_string(text) => format!("{}: {}", name, text),
        _ => format!("{}:: {}", name, BASE64.encode(value)),
    };
    fold_line(out, &line);
}

/// RFC 2849 SAFE-STRING: ASCII without NUL, CR or LF, not starting with
/// space, ':' or '<' and not ending with space.
fn is_safe_string(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let bytes = value.as_bytes();
    let safe_init = !matches!(bytes[0], b' ' | b':' | b'<');
    let safe_chars = bytes
        .iter()
        .all(|&b| b.is_ascii() && !matches!(b, b'\0' | b'\r' | b'\n'));
    safe_init && safe_chars && !value.ends_with(' ')
}

// Values written here are ASCII so byte offsets are char boundaries
fn fold_line(out: &mut String, line: &str) {
    if line.len() <= MAX_LINE_WIDTH {
        out.push_str(line);
        out.push('\n');
        return;
    }

    out.push_str(&line[..MAX_LINE_WIDTH]);
    out.push('\n');
    let mut rest = &line[MAX_LINE_WIDTH..];
    while !rest.is_empty() {
        let take = rest.len().min(MAX_LINE_WIDTH - 1);
        out.push(' ');
        out.push_str(&rest[..take]);
        out.push('\n');
        rest = &rest[take..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Dn;
    use crate::ldif::{parse_ldif, LdifRecord};

    fn entry() -> LdapEntry {
        let mut entry = LdapEntry::new(Dn::parse("uid=jdoe,dc=example,dc=org").unwrap());
        entry.add_values("sn", &["Doe"]);
        entry.add_values("objectClass", &["top", "person"]);
        entry.add_values("description", &["été", " leading space", "x".repeat(200).as_str()]);
        entry.put_value("jpegPhoto", AttributeValue::Binary(vec![0, 1, 2, 0xff]));
        entry
    }

    #[test]
    fn test_output_shape() {
        let ldif = write_entries(&[entry()]);
        let lines: Vec<&str> = ldif.lines().collect();

        assert_eq!(lines[0], "version: 1");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "dn: uid=jdoe,dc=example,dc=org");
        assert_eq!(lines[3], "objectClass: top");
        assert!(lines.contains(&"description:: w6l0w6k="));
        assert!(lines.iter().all(|l| l.len() <= MAX_LINE_WIDTH));
        assert!(lines.iter().any(|l| l.starts_with(' ')));
    }

    #[test]
    fn test_written_entries_parse_back() {
        let original = entry();
        let records = parse_ldif(&write_entries(&[original.clone()])).unwrap();
        let LdifRecord::Add(parsed) = &records[0] else {
            panic!("Expected content record");
        };

        assert_eq!(parsed.dn, original.dn);
        let description = parsed.get_attribute("description").unwrap();
        assert!(description.values.contains(&AttributeValue::String(" leading space".to_string())));
        assert!(description.values.contains(&AttributeValue::String("x".repeat(200))));
        assert_eq!(
            parsed.get_attribute("jpegPhoto").unwrap().values[0],
            AttributeValue::Binary(vec![0, 1, 2, 0xff])
        );
    }

    #[test]
    fn test_safe_strings() {
        assert!(is_safe_string("plain value"));
        assert!(!is_safe_string(":starts with colon"));
        assert!(!is_safe_string("<starts with angle"));
        assert!(!is_safe_string("trailing "));
        assert!(!is_safe_string("line\nbreak"));
        assert!(!is_safe_string("ünïcode"));
    }
}
