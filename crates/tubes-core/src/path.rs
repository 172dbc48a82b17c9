//! Channel path patterns.
//!
//! A pattern is a `/`-separated list of segments. A segment is a literal, a
//! named parameter (`:name`) capturing the matching path segment, or a
//! wildcard (`*`) matching any single non-empty segment without capturing.
//! Patterns never span a variable number of segments.

use std::collections::HashMap;
use std::fmt;
use tubes_protocol::{PARAM_PREFIX, PATH_SEPARATOR, WILDCARD};

/// Parameters captured by a successful match, keyed by parameter name.
pub type Params = HashMap<String, String>;

/// One segment of a compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw == WILDCARD {
            Segment::Wildcard
        } else if let Some(name) = raw.strip_prefix(PARAM_PREFIX) {
            Segment::Param(name.to_string())
        } else {
            Segment::Literal(raw.to_string())
        }
    }
}

/// A compiled channel pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Compile a pattern string.
    #[must_use]
    pub fn parse(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let segments = raw.split(PATH_SEPARATOR).map(Segment::parse).collect();
        Self { raw, segments }
    }

    /// Get the pattern as registered.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Get the compiled segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Check if the pattern contains parameter or wildcard segments.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Match a concrete path against this pattern.
    ///
    /// Returns the captured parameters on success. A path equal to the
    /// registration string itself always matches and captures nothing.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<Params> {
        if self.raw == path {
            return Some(Params::new());
        }

        let mut params = Params::new();
        let mut parts = path.split(PATH_SEPARATOR);

        for segment in &self.segments {
            let part = parts.next()?;
            match segment {
                Segment::Literal(expected) => {
                    if expected != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
                Segment::Wildcard => {
                    if part.is_empty() {
                        return None;
                    }
                }
            }
        }

        // Path has more segments than the pattern
        if parts.next().is_some() {
            return None;
        }

        Some(params)
    }

    /// Check if a concrete path matches this pattern.
    #[must_use]
    pub fn is_match(&self, path: &str) -> bool {
        self.matches(path).is_some()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Join a prefix and a channel name with exactly one separator.
#[must_use]
pub fn join(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches(PATH_SEPARATOR);
    let name = name.trim_start_matches(PATH_SEPARATOR);
    match (prefix.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}{PATH_SEPARATOR}{name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_segments() {
        let pattern = PathPattern::parse("example/:id/*");
        assert_eq!(
            pattern.segments(),
            &[
                Segment::Literal("example".to_string()),
                Segment::Param("id".to_string()),
                Segment::Wildcard,
            ]
        );
        assert!(!pattern.is_static());
        assert!(PathPattern::parse("example/path").is_static());
    }

    #[test]
    fn test_simple_path() {
        let pattern = PathPattern::parse("example/path/simple");

        assert!(pattern.is_match("example/path/simple"));
        assert!(!pattern.is_match("example"));
        assert!(!pattern.is_match("example/path"));
        assert!(!pattern.is_match("example/path/simple2"));
        assert!(!pattern.is_match("example/path/simple/more"));
    }

    #[test]
    fn test_params_are_captured() {
        let pattern = PathPattern::parse("example/:var1/path/:var2/:var3");

        let params = pattern.matches("example/foo/path/bar/blah123").unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params["var1"], "foo");
        assert_eq!(params["var2"], "bar");
        assert_eq!(params["var3"], "blah123");

        assert!(pattern.matches("example/foo/pathX/bar/blah123").is_none());
    }

    #[test]
    fn test_wildcard() {
        let pattern = PathPattern::parse("example/*/path");

        let params = pattern.matches("example/var1/path").unwrap();
        assert!(params.is_empty());
        assert!(pattern.is_match("example/*/path"));
        assert!(!pattern.is_match("example/var1/pathX"));
        assert!(!pattern.is_match("example//path"));
        assert!(!pattern.is_match("example/a/b/path"));
    }

    #[test]
    fn test_exact_registration_string_captures_nothing() {
        let pattern = PathPattern::parse("rooms/:room");
        assert!(pattern.matches("rooms/:room").unwrap().is_empty());
        assert_eq!(pattern.matches("rooms/lobby").unwrap()["room"], "lobby");
    }

    #[test]
    fn test_join() {
        assert_eq!(join("chat", "users"), "chat/users");
        assert_eq!(join("chat/", "/users"), "chat/users");
        assert_eq!(join("/chat", ":room/users"), "/chat/:room/users");
        assert_eq!(join("chat", ""), "chat");
        assert_eq!(join("", "users"), "users");
    }
}
