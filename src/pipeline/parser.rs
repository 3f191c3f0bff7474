//! Message classifier — free text to `ParsedCode`.
//!
//! Two layouts are recognised, tried in order:
//! 1. `keyword / code / link`: first line equals a configured keyword
//! 2. `code / link`: the fallback, applied to the first two lines
//!
//! Anything else is rejected. Parsing is pure; the keyword set comes from
//! the caller's snapshot.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::pipeline::types::{GrammarTag, ParsedCode};

/// Word characters (Unicode letters incl. Turkish/extended Latin, digits,
/// underscore) and hyphens, whole line.
static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w-]+$").expect("code pattern compiles"));

/// Optional scheme, optional `www.`, dotted domain labels, optional path.
static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:https?://)?(?:www\.)?[a-z0-9][-a-z0-9]*(?:\.[a-z0-9][-a-z0-9]*)+(?:/\S*)?$",
    )
    .expect("link pattern compiles")
});

/// Whether `s` is a valid code.
pub fn is_code(s: &str) -> bool {
    CODE_RE.is_match(s)
}

/// Whether `s` looks like a link. No liveness check.
pub fn is_link(s: &str) -> bool {
    LINK_RE.is_match(s)
}

/// Classify a message. `keywords` must be lowercase.
pub fn parse(text: &str, keywords: &HashSet<String>) -> Option<ParsedCode> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    if lines.len() < 2 {
        return None;
    }

    if lines.len() >= 3 {
        let keyword = lines[0].to_lowercase();
        if keywords.contains(&keyword) && is_code(lines[1]) && is_link(lines[2]) {
            return Some(ParsedCode {
                code: lines[1].to_string(),
                link: lines[2].to_string(),
                grammar: GrammarTag::Keyword(keyword),
            });
        }
    }

    if is_code(lines[0]) && is_link(lines[1]) {
        return Some(ParsedCode {
            code: lines[0].to_string(),
            link: lines[1].to_string(),
            grammar: GrammarTag::Bare,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keywords(words: &[&str]) -> HashSet<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn keyword_layout() {
        let parsed = parse("ELIT\nPROMO123\nhttps://x.com/y", &keywords(&["elit"])).unwrap();
        assert_eq!(parsed.code, "PROMO123");
        assert_eq!(parsed.link, "https://x.com/y");
        assert_eq!(parsed.grammar, GrammarTag::Keyword("elit".into()));
    }

    #[test]
    fn bare_layout() {
        let parsed = parse("PROMO123\nhttps://x.com/y", &keywords(&["elit"])).unwrap();
        assert_eq!(parsed.code, "PROMO123");
        assert_eq!(parsed.link, "https://x.com/y");
        assert_eq!(parsed.grammar, GrammarTag::Bare);
    }

    #[test]
    fn single_line_is_rejected() {
        assert!(parse("short", &keywords(&[])).is_none());
        assert!(parse("  \n short \n\n", &keywords(&[])).is_none());
    }

    #[test]
    fn unknown_keyword_falls_back_and_fails() {
        // "OTHER" is a valid code but "PROMO123" is not a link.
        assert!(parse("OTHER\nPROMO123\nhttps://x.com/y", &keywords(&["elit"])).is_none());
    }

    #[test]
    fn keyword_layout_with_bad_code_falls_back_to_bare() {
        // "elit" followed by a link on line 1 parses as bare code "ELIT".
        let parsed = parse("ELIT\nwww.site.com\nnot a link", &keywords(&["elit"])).unwrap();
        assert_eq!(parsed.code, "ELIT");
        assert_eq!(parsed.link, "www.site.com");
        assert_eq!(parsed.grammar, GrammarTag::Bare);
    }

    #[test]
    fn blank_lines_and_padding_are_ignored() {
        let parsed = parse("\n  KOD-2024  \n\n  site.com/path?x=1  \n", &keywords(&[])).unwrap();
        assert_eq!(parsed.code, "KOD-2024");
        assert_eq!(parsed.link, "site.com/path?x=1");
    }

    #[test]
    fn turkish_letters_in_code() {
        assert!(is_code("ŞANSLI_ÇARK"));
        assert!(is_code("güneş-10"));
        assert!(!is_code("two words"));
        assert!(!is_code("promo!"));
    }

    #[test]
    fn link_grammar() {
        assert!(is_link("https://x.com/y"));
        assert!(is_link("HTTP://WWW.Example.COM"));
        assert!(is_link("sub.domain.example.org/a/b"));
        assert!(!is_link("localhost"));
        assert!(!is_link("ftp://x.com"));
        assert!(!is_link("https://x.com/has space"));
        assert!(!is_link("-bad.com"));
    }

    #[test]
    fn dotted_keyword_matches_case_insensitively() {
        // Turkish dotted capital I lowercases to "i̇".
        let kw = keywords(&["eli\u{307}t"]);
        let parsed = parse("ELİT\nKOD1\nsite.com", &kw).unwrap();
        assert_eq!(parsed.grammar, GrammarTag::Keyword("eli\u{307}t".into()));
    }

    #[test]
    fn parse_is_deterministic() {
        let kw = keywords(&["grand"]);
        let text = "grand\nBONUS50\nhttps://grand.bet/promo";
        let first = parse(text, &kw);
        for _ in 0..10 {
            assert_eq!(parse(text, &kw), first);
        }
    }
}
