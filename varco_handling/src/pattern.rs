// Copyright (C) 2023 Tristan Gerritsen <tristan@thewoosh.org>
// All Rights Reserved.

use strum_macros::AsRefStr;

/// A compiled route path pattern.
///
/// A pattern is either the catch-all `/*`, or a `/`-separated sequence of
/// segments where every segment is a literal or a named `<placeholder>`.
/// Validation happens at registration time so that matching is infallible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathPattern {
    /// The literal `/*`: matches every path.
    Wildcard,
    Segments(Vec<Segment>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Parameter(String),
}

#[derive(Clone, Debug, PartialEq, Eq, AsRefStr)]
pub enum PatternError {
    MustStartWithSlash,
    EmptySegment,
    MalformedPlaceholder,
    DuplicatePlaceholder,
}

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl std::error::Error for PatternError {}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        if pattern == "/*" {
            return Ok(Self::Wildcard);
        }

        if !pattern.starts_with('/') {
            return Err(PatternError::MustStartWithSlash);
        }

        let raw_segments: Vec<&str> = pattern.split('/').skip(1).collect();
        let last_index = raw_segments.len().saturating_sub(1);

        let mut segments = Vec::with_capacity(raw_segments.len());
        let mut seen_names: Vec<&str> = Vec::new();

        for (index, raw) in raw_segments.iter().enumerate() {
            if raw.is_empty() {
                // A trailing slash is tolerated; interior empties are not.
                if index == last_index {
                    continue;
                }
                return Err(PatternError::EmptySegment);
            }

            if let Some(name) = raw.strip_prefix('<') {
                let Some(name) = name.strip_suffix('>') else {
                    return Err(PatternError::MalformedPlaceholder);
                };
                if name.is_empty() || name.contains(['<', '>']) {
                    return Err(PatternError::MalformedPlaceholder);
                }
                if seen_names.contains(&name) {
                    return Err(PatternError::DuplicatePlaceholder);
                }
                seen_names.push(name);
                segments.push(Segment::Parameter(name.to_string()));
            } else if raw.contains(['<', '>']) {
                return Err(PatternError::MalformedPlaceholder);
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }

        Ok(Self::Segments(segments))
    }

    /// Match a request path, binding placeholder values. Empty path
    /// segments (doubled or trailing slashes) are ignored on both sides.
    #[must_use]
    pub fn matches(&self, path: &str, case_insensitive: bool) -> Option<Vec<(String, String)>> {
        let segments = match self {
            Self::Wildcard => return Some(Vec::new()),
            Self::Segments(segments) => segments,
        };

        let path_segments: Vec<&str> = path.split('/').filter(|segment| !segment.is_empty()).collect();
        if path_segments.len() != segments.len() {
            return None;
        }

        let mut params = Vec::new();
        for (pattern_segment, path_segment) in segments.iter().zip(path_segments) {
            match pattern_segment {
                Segment::Literal(literal) => {
                    let matched = if case_insensitive {
                        literal.eq_ignore_ascii_case(path_segment)
                    } else {
                        literal == path_segment
                    };
                    if !matched {
                        return None;
                    }
                }
                Segment::Parameter(name) => {
                    params.push((name.clone(), path_segment.to_string()));
                }
            }
        }

        Some(params)
    }

    /// A normalized rendering where every placeholder collapses to `<>`;
    /// two patterns with equal shapes match exactly the same paths.
    #[must_use]
    pub fn shape(&self) -> String {
        match self {
            Self::Wildcard => "/*".to_string(),
            Self::Segments(segments) => {
                let mut shape = String::new();
                for segment in segments {
                    shape.push('/');
                    match segment {
                        Segment::Literal(literal) => shape.push_str(literal),
                        Segment::Parameter(_) => shape.push_str("<>"),
                    }
                }
                if shape.is_empty() {
                    shape.push('/');
                }
                shape
            }
        }
    }
}
