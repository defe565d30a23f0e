//! Identifier checks for values that end up in service requests.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Rejection;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._:-]+$").expect("identifier regex"));

/// Accept tree ids, host names and device ids made of `[A-Za-z0-9._:-]`.
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), Rejection> {
    if IDENTIFIER_RE.is_match(value) {
        return Ok(());
    }
    Err(Rejection::InvalidIdentifier {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_ids() {
        for id in ["tree-01", "sunri-pi1", "device1", "10.0.0.4:5555", "a_b.c"] {
            validate_identifier("id", id).expect(id);
        }
    }

    #[test]
    fn rejects_empty_and_path_like_ids() {
        for id in ["", "bad/id", "with space", "../x"] {
            let err = validate_identifier("tree", id).unwrap_err();
            assert!(err.to_string().starts_with("tree must be"), "{id}");
        }
    }
}
