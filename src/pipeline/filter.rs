//! Content filter — banned-term containment check.

/// Result of checking a code/link pair against the banned-term list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    /// Rejected; `term` is the first banned term found.
    Reject { term: String },
}

impl FilterVerdict {
    pub fn is_reject(&self) -> bool {
        matches!(self, FilterVerdict::Reject { .. })
    }
}

/// Case-insensitive substring test of `code`, then `link`, against
/// `banned` (lowercase terms). The first hit wins.
pub fn check(code: &str, link: &str, banned: &[String]) -> FilterVerdict {
    for field in [code, link] {
        if let Some(term) = find_banned(field, banned) {
            return FilterVerdict::Reject {
                term: term.to_string(),
            };
        }
    }
    FilterVerdict::Accept
}

/// First term of `banned` contained in `text`, ignoring case.
pub fn find_banned<'a>(text: &str, banned: &'a [String]) -> Option<&'a str> {
    if text.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    banned
        .iter()
        .find(|term| !term.is_empty() && lower.contains(term.as_str()))
        .map(String::as_str)
}
