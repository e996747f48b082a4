//! Distinguished name helpers.
//!
//! Only the small subset of RFC 4514 the tool relies on is implemented:
//! splitting into RDNs with backslash escapes, case-insensitive
//! comparison and ancestry checks.

use crate::error::TopologyError;

/// The administrative data store suffix.
pub const ADMIN_DATA_SUFFIX: &str = "cn=admin data";

/// The schema suffix.
pub const SCHEMA_SUFFIX: &str = "cn=schema";

/// The replication changelog suffix.
pub const REPLICATION_CHANGES_SUFFIX: &str = "dc=replicationchanges";

/// Suffixes that are never offered in interactive pick lists.
pub const INTERNAL_SUFFIXES: [&str; 3] = [
    ADMIN_DATA_SUFFIX,
    SCHEMA_SUFFIX,
    REPLICATION_CHANGES_SUFFIX,
];

/// Split a DN into its RDN components, honouring `\` escapes.
pub fn split_rdns(dn: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in dn.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            ',' | ';' => {
                parts.push(dn[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = dn[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

fn normalize_rdn(rdn: &str) -> String {
    match rdn.split_once('=') {
        Some((attr, value)) => format!(
            "{}={}",
            attr.trim().to_ascii_lowercase(),
            value.trim().to_lowercase()
        ),
        None => rdn.trim().to_lowercase(),
    }
}

/// Normalized form used for every DN comparison.
pub fn normalize(dn: &str) -> String {
    split_rdns(dn)
        .into_iter()
        .map(normalize_rdn)
        .collect::<Vec<_>>()
        .join(",")
}

/// Case and whitespace insensitive DN equality.
pub fn dn_eq(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// The immediate parent of a DN, `None` for a single-RDN DN.
pub fn parent(dn: &str) -> Option<String> {
    let rdns = split_rdns(dn);
    if rdns.len() <= 1 {
        return None;
    }
    Some(rdns[1..].join(","))
}

/// True when `dn` is `base` or lies below it.
pub fn is_descendant_or_self(dn: &str, base: &str) -> bool {
    let dn = split_rdns(dn)
        .into_iter()
        .map(normalize_rdn)
        .collect::<Vec<_>>();
    let base = split_rdns(base)
        .into_iter()
        .map(normalize_rdn)
        .collect::<Vec<_>>();
    if base.is_empty() {
        return true;
    }
    dn.len() >= base.len() && dn[dn.len() - base.len()..] == base[..]
}

/// True when `dn` is strictly one level below `base`.
pub fn is_child(dn: &str, base: &str) -> bool {
    split_rdns(dn).len() == split_rdns(base).len() + 1 && is_descendant_or_self(dn, base)
}

/// Escape a value so that it can be used as an RDN attribute value.
pub fn escape_rdn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        match c {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(c);
            }
            '#' if i == 0 => out.push_str("\\#"),
            _ => out.push(c),
        }
    }
    out
}

/// Undo [`escape_rdn_value`].
pub fn unescape_rdn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// The unescaped value of the first RDN.
pub fn first_rdn_value(dn: &str) -> Option<String> {
    let rdns = split_rdns(dn);
    let first = rdns.first()?;
    let (_, value) = first.split_once('=')?;
    Some(unescape_rdn_value(value.trim()))
}

fn valid_attribute_type(attr: &str) -> bool {
    let mut chars = attr.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ';')
        }
        Some(c) if c.is_ascii_digit() => attr.chars().all(|c| c.is_ascii_digit() || c == '.'),
        _ => false,
    }
}

/// Validate DN syntax: every RDN must be `type=value` with a non-empty value.
pub fn validate(dn: &str) -> Result<(), TopologyError> {
    let invalid = || TopologyError::InvalidDn { dn: dn.to_string() };
    if dn.trim().is_empty() || dn.trim_end().ends_with('\\') {
        return Err(invalid());
    }
    for rdn in split_rdns(dn) {
        for ava in rdn.split('+') {
            let (attr, value) = ava.split_once('=').ok_or_else(invalid)?;
            if !valid_attribute_type(attr.trim()) || value.trim().is_empty() {
                return Err(invalid());
            }
        }
    }
    Ok(())
}

/// True for the administrative, schema and changelog suffixes.
pub fn is_internal_suffix(dn: &str) -> bool {
    INTERNAL_SUFFIXES.iter().any(|s| dn_eq(s, dn))
}
