//! Syntactic email address checks.
//!
//! Deliberately lighter than RFC 5322: `local@domain`, a single `@`, no
//! whitespace, and a dotted domain without empty labels. Deliverability is the
//! provider's call.

/// Normalize an address: trim surrounding whitespace and lower-case the domain.
///
/// Returns `None` if the address is not syntactically valid.
pub fn normalize_address(raw: &str) -> Option<String> {
    let address = raw.trim();

    if address.is_empty() || address.chars().any(char::is_whitespace) {
        return None;
    }

    let (local, domain) = address.split_once('@')?;

    if local.is_empty() || domain.contains('@') {
        return None;
    }

    if !domain.contains('.') || domain.split('.').any(str::is_empty) {
        return None;
    }

    Some(format!("{}@{}", local, domain.to_lowercase()))
}
