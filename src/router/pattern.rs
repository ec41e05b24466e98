//! Compiled route patterns: `METHOD /path/with/{var}` segments.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl PartialEq for Segment {
    /// Two `Param` segments are equal regardless of the captured name: only
    /// the literal-vs-param shape matters for duplicate-registration checks.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Segment::Literal(a), Segment::Literal(b)) => a == b,
            (Segment::Param(_), Segment::Param(_)) => true,
            _ => false,
        }
    }
}

/// A compiled `METHOD /path` pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    method: String,
    raw_path: String,
    segments: Vec<Segment>,
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method && self.segments == other.segments
    }
}
impl Eq for Pattern {}

impl Pattern {
    /// Compiles `"GET /users/{id}"` into method + segments.
    ///
    /// Two patterns with the same method and the same segment shape
    /// (literal-vs-param, ignoring param names) are considered identical for
    /// duplicate-registration purposes.
    pub fn compile(spec: &str) -> Result<Self> {
        let mut parts = spec.trim().splitn(2, char::is_whitespace);
        let method = parts
            .next()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| Error::programmer_error(format!("malformed route pattern: {spec:?}")))?;
        let path = parts
            .next()
            .map(str::trim)
            .filter(|p| p.starts_with('/'))
            .ok_or_else(|| Error::programmer_error(format!("malformed route pattern: {spec:?}")))?;

        let segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                if let Some(name) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Segment::Param(name.to_owned())
                } else {
                    Segment::Literal(segment.to_owned())
                }
            })
            .collect();

        Ok(Self {
            method: method.to_ascii_uppercase(),
            raw_path: path.to_owned(),
            segments,
        })
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    /// Matches a method + path against this pattern, returning extracted
    /// path parameters on success.
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> Option<Vec<(String, String)>> {
        if !self.method.eq_ignore_ascii_case(method) {
            return None;
        }
        let request_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if request_segments.len() != self.segments.len() {
            return None;
        }
        let mut params = Vec::new();
        for (pattern_segment, request_segment) in self.segments.iter().zip(request_segments.iter()) {
            match pattern_segment {
                Segment::Literal(literal) => {
                    if literal != request_segment {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    params.push((name.clone(), (*request_segment).to_owned()));
                }
            }
        }
        Some(params)
    }
}
