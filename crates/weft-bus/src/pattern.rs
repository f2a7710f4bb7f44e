//! Topic patterns with hierarchical wildcards.

use weft_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    /// `*` matches exactly one non-empty token.
    Single,
    /// `#` matches one or more trailing tokens.
    Rest,
}

/// A compiled topic pattern.
///
/// Patterns are dot-separated tokens where `*` matches exactly one token
/// and a trailing `#` matches one or more tokens. Matching is deterministic
/// and allocation-free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    tokens: Vec<Token>,
}

impl Pattern {
    /// Compile a pattern, validating its token structure.
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(Error::invalid_argument("pattern cannot be empty"));
        }

        let parts: Vec<&str> = pattern.split('.').collect();
        let mut tokens = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            let token = match *part {
                "" => {
                    return Err(Error::invalid_argument(format!(
                        "pattern '{pattern}' contains an empty token"
                    )));
                }
                "*" => Token::Single,
                "#" => {
                    if index + 1 != parts.len() {
                        return Err(Error::invalid_argument(format!(
                            "pattern '{pattern}' uses '#' before the final token"
                        )));
                    }
                    Token::Rest
                }
                literal => Token::Literal(literal.to_owned()),
            };
            tokens.push(token);
        }

        Ok(Self {
            raw: pattern.to_owned(),
            tokens,
        })
    }

    /// The source text this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `topic` is accepted by this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        if topic.is_empty() {
            return false;
        }
        let parts: Vec<&str> = topic.split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return false;
        }

        for (index, token) in self.tokens.iter().enumerate() {
            match token {
                Token::Rest => {
                    // One or more remaining topic tokens.
                    return parts.len() > index;
                }
                Token::Single => {
                    if index >= parts.len() {
                        return false;
                    }
                }
                Token::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return false;
                    }
                }
            }
        }

        parts.len() == self.tokens.len()
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let pattern = Pattern::compile("event.user.login").unwrap();
        assert!(pattern.matches("event.user.login"));
        assert!(!pattern.matches("event.user.logout"));
        assert!(!pattern.matches("event.user"));
        assert!(!pattern.matches("event.user.login.extra"));
    }

    #[test]
    fn test_single_wildcard() {
        let pattern = Pattern::compile("event.user.*").unwrap();
        assert!(pattern.matches("event.user.login"));
        assert!(pattern.matches("event.user.logout"));
        assert!(!pattern.matches("event.user"));
        assert!(!pattern.matches("event.user.login.extra"));
        assert!(!pattern.matches("event.order.placed"));
    }

    #[test]
    fn test_trailing_hash_matches_one_or_more() {
        let pattern = Pattern::compile("event.#").unwrap();
        assert!(pattern.matches("event.user"));
        assert!(pattern.matches("event.user.login"));
        assert!(pattern.matches("event.system.startup.complete"));
        assert!(!pattern.matches("event"));
        assert!(!pattern.matches("other.user.login"));
    }

    #[test]
    fn test_wildcard_in_the_middle() {
        let pattern = Pattern::compile("user.*.created").unwrap();
        assert!(pattern.matches("user.admin.created"));
        assert!(!pattern.matches("user.created"));
        assert!(!pattern.matches("user.admin.deleted"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(Pattern::compile("").is_err());
        assert!(Pattern::compile("event..user").is_err());
        assert!(Pattern::compile(".event").is_err());
        assert!(Pattern::compile("event.").is_err());
        assert!(Pattern::compile("event.#.user").is_err());
    }

    #[test]
    fn test_topics_with_empty_tokens_never_match() {
        let pattern = Pattern::compile("event.#").unwrap();
        assert!(!pattern.matches("event..login"));
        assert!(!pattern.matches(""));
    }

    #[test]
    fn test_matching_is_deterministic() {
        let pattern = Pattern::compile("a.*.c.#").unwrap();
        for _ in 0..3 {
            assert!(pattern.matches("a.b.c.d"));
            assert!(pattern.matches("a.x.c.d.e"));
            assert!(!pattern.matches("a.b.c"));
        }
    }
}
