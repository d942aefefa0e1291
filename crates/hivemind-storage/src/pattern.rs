//! Glob key patterns.
//!
//! `keys()` accepts shell-style globs (`*`, `?`, `[...]`). Key-value backends
//! match them directly; the relational backend narrows with SQL `LIKE` first
//! and then applies the same matcher, so every backend agrees on results.

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{StorageError, StorageResult};

/// A compiled key pattern.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    matcher: GlobMatcher,
}

impl KeyPattern {
    /// Compile a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the pattern is empty or malformed.
    pub fn new(pattern: &str) -> StorageResult<Self> {
        if pattern.is_empty() {
            return Err(StorageError::InvalidKey("pattern must not be empty".into()));
        }
        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .backslash_escape(true)
            .build()
            .map_err(|e| StorageError::InvalidKey(format!("{pattern}: {e}")))?;
        Ok(Self {
            raw: pattern.to_string(),
            matcher: glob.compile_matcher(),
        })
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `key` matches.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.matcher.is_match(key)
    }

    /// A SQL `LIKE` pattern (escape character `\`) that matches a superset of
    /// this glob. Character classes widen to `_`.
    #[must_use]
    pub fn to_like(&self) -> String {
        let mut out = String::with_capacity(self.raw.len());
        let mut chars = self.raw.chars();
        while let Some(c) = chars.next() {
            match c {
                '*' => out.push('%'),
                '?' => out.push('_'),
                '[' => {
                    for inner in chars.by_ref() {
                        if inner == ']' {
                            break;
                        }
                    }
                    out.push('_');
                },
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        push_like_literal(&mut out, escaped);
                    }
                },
                other => push_like_literal(&mut out, other),
            }
        }
        out
    }
}

fn push_like_literal(out: &mut String, c: char) {
    if matches!(c, '%' | '_' | '\\') {
        out.push('\\');
    }
    out.push(c);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_and_question() {
        let p = KeyPattern::new("ctx_*").unwrap();
        assert!(p.matches("ctx_abc"));
        assert!(p.matches("ctx_"));
        assert!(!p.matches("mcp:ctx_abc"));

        let p = KeyPattern::new("mcp:agent:?:history").unwrap();
        assert!(p.matches("mcp:agent:a:history"));
        assert!(!p.matches("mcp:agent:ab:history"));
    }

    #[test]
    fn test_star_crosses_separators() {
        let p = KeyPattern::new("mcp:*").unwrap();
        assert!(p.matches("mcp:agent:a1/x:history"));
    }

    #[test]
    fn test_character_class() {
        let p = KeyPattern::new("node_[ab]").unwrap();
        assert!(p.matches("node_a"));
        assert!(!p.matches("node_c"));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(KeyPattern::new("").is_err());
    }

    #[test]
    fn test_like_translation_escapes_sql_wildcards() {
        assert_eq!(KeyPattern::new("ctx_*").unwrap().to_like(), "ctx\\_%");
        assert_eq!(KeyPattern::new("a%b?").unwrap().to_like(), "a\\%b_");
        assert_eq!(KeyPattern::new("n[xyz]*").unwrap().to_like(), "n_%");
    }
}
