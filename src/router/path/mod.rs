pub mod compiled;
pub mod trie;

use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Parameter name under which a trailing wildcard capture is bound.
pub const WILDCARD: &str = "*";

/// Errors raised while compiling a route pattern.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("Pattern '{pattern}' must start with '/'.")]
    MissingLeadingSlash { pattern: String },

    #[error("Pattern '{pattern}' contains a parameter without a name.")]
    EmptyParamName { pattern: String },

    #[error("Pattern '{pattern}' declares parameter '{name}' more than once.")]
    DuplicateParam { pattern: String, name: String },

    #[error("Pattern '{pattern}' has a wildcard before its final segment.")]
    WildcardNotLast { pattern: String },

    #[error("Pattern '{pattern}' has an optional parameter followed by a required segment.")]
    OptionalNotTrailing { pattern: String },
}

impl PatternError {
    #[inline]
    pub(crate) fn missing_leading_slash(pattern: impl Into<String>) -> Self {
        Self::MissingLeadingSlash {
            pattern: pattern.into(),
        }
    }

    #[inline]
    pub(crate) fn empty_param_name(pattern: impl Into<String>) -> Self {
        Self::EmptyParamName {
            pattern: pattern.into(),
        }
    }

    #[inline]
    pub(crate) fn duplicate_param(pattern: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DuplicateParam {
            pattern: pattern.into(),
            name: name.into(),
        }
    }

    #[inline]
    pub(crate) fn wildcard_not_last(pattern: impl Into<String>) -> Self {
        Self::WildcardNotLast {
            pattern: pattern.into(),
        }
    }

    #[inline]
    pub(crate) fn optional_not_trailing(pattern: impl Into<String>) -> Self {
        Self::OptionalNotTrailing {
            pattern: pattern.into(),
        }
    }
}

/// One `/`-delimited unit of a compiled route pattern.
///
/// # Behavior
/// - `Literal` segments must match the request segment exactly (an empty literal
///   comes from a trailing slash and matches an empty request segment).
/// - `Param` segments match exactly one non-empty request segment.
/// - `OptionalParam` segments behave like `Param` but may be absent.
/// - `Wildcard` matches the rest of the path, including further `/`, and may be empty.
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub enum Segment {
    Literal(String),
    Param(String),
    OptionalParam(String),
    Wildcard,
}

impl Segment {
    /// Match priority of the segment kind at a single position. Lower wins.
    pub(crate) fn rank(&self) -> u8 {
        match self {
            Segment::Literal(_) => 0,
            Segment::Param(_) | Segment::OptionalParam(_) => 1,
            Segment::Wildcard => 2,
        }
    }

    /// Name this segment binds in the match result, if any.
    pub fn param_name(&self) -> Option<&str> {
        match self {
            Segment::Literal(_) => None,
            Segment::Param(name) | Segment::OptionalParam(name) => Some(name),
            Segment::Wildcard => Some(WILDCARD),
        }
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Literal(text) => write!(f, "{}", text),
            Segment::Param(name) => write!(f, ":{}", name),
            Segment::OptionalParam(name) => write!(f, ":{}?", name),
            Segment::Wildcard => write!(f, "*"),
        }
    }
}

/// Renders compiled segments back into their canonical pattern string.
pub fn render(segments: &[Segment]) -> String {
    let mut rendered = String::new();
    for segment in segments {
        rendered.push('/');
        rendered.push_str(&segment.to_string());
    }
    rendered
}

/// Compiles a route pattern into its ordered segments.
///
/// # Parameters
/// - `pattern`: Route pattern such as `/users/:id/posts/*`. The empty pattern is
///   treated as `/`.
///
/// # Returns
/// The segments in path order, or a `PatternError` describing the first problem found.
///
/// # Behavior
/// A trailing `/` produces a final empty literal, so `/users/` and `/users` are
/// different routes. Optional parameters may only be followed by other optional
/// parameters.
pub fn compile(pattern: &str) -> Result<Vec<Segment>, PatternError> {
    let pattern = if pattern.is_empty() { "/" } else { pattern };
    let rest = pattern
        .strip_prefix('/')
        .ok_or_else(|| PatternError::missing_leading_slash(pattern))?;

    let raw_segments: Vec<&str> = rest.split('/').collect();
    let last = raw_segments.len() - 1;
    let mut names: Vec<&str> = Vec::new();
    let mut segments = Vec::with_capacity(raw_segments.len());
    let mut seen_optional = false;

    for (index, raw) in raw_segments.into_iter().enumerate() {
        let segment = if raw == WILDCARD {
            if index != last {
                return Err(PatternError::wildcard_not_last(pattern));
            }
            if names.contains(&WILDCARD) {
                return Err(PatternError::duplicate_param(pattern, WILDCARD));
            }
            names.push(WILDCARD);
            Segment::Wildcard
        } else if let Some(param) = raw.strip_prefix(':') {
            let (name, optional) = match param.strip_suffix('?') {
                Some(name) => (name, true),
                None => (param, false),
            };
            if name.is_empty() {
                return Err(PatternError::empty_param_name(pattern));
            }
            if names.contains(&name) {
                return Err(PatternError::duplicate_param(pattern, name));
            }
            names.push(name);
            if optional {
                Segment::OptionalParam(name.to_string())
            } else {
                Segment::Param(name.to_string())
            }
        } else {
            Segment::Literal(raw.to_string())
        };

        match segment {
            Segment::OptionalParam(_) => seen_optional = true,
            _ if seen_optional => return Err(PatternError::optional_not_trailing(pattern)),
            _ => {}
        }
        segments.push(segment);
    }

    log::trace!("Compiled pattern '{pattern}' into {} segments", segments.len());
    Ok(segments)
}

/// Expands trailing optional parameters into every concrete variant.
///
/// `/users/:id?` yields `/users` followed by `/users/:id`. Patterns without
/// optional parameters yield themselves.
pub fn expand_optional(segments: &[Segment]) -> Vec<Vec<Segment>> {
    let required = segments
        .iter()
        .take_while(|segment| !matches!(segment, Segment::OptionalParam(_)))
        .count();
    let mut variants = Vec::with_capacity(segments.len() - required + 1);
    for end in required..=segments.len() {
        let variant = segments[..end]
            .iter()
            .map(|segment| match segment {
                Segment::OptionalParam(name) => Segment::Param(name.clone()),
                other => other.clone(),
            })
            .collect::<Vec<_>>();
        // Dropping every segment leaves the root pattern.
        if variant.is_empty() {
            variants.push(vec![Segment::Literal(String::new())]);
        } else {
            variants.push(variant);
        }
    }
    variants
}

/// Rejects a relative pattern before it is joined onto a prefix.
///
/// Joining would otherwise turn `users` into `/api/users` and hide the mistake.
/// The empty pattern is accepted, as in [`compile`].
pub(crate) fn ensure_absolute(pattern: &str) -> Result<(), PatternError> {
    if pattern.is_empty() || pattern.starts_with('/') {
        Ok(())
    } else {
        Err(PatternError::missing_leading_slash(pattern))
    }
}

/// Normalizes a request path for matching.
///
/// Returns the path without its leading `/`, or `None` when the path is not
/// absolute. The empty path is treated as `/`.
pub fn strip_root(path: &str) -> Option<&str> {
    if path.is_empty() {
        return Some("");
    }
    path.strip_prefix('/')
}

/// Joins a mount prefix and a pattern.
///
/// `join_paths("/api", "/users")` is `/api/users`, `join_paths("/api", "/")` is
/// `/api`, and a root prefix leaves the pattern unchanged.
pub fn join_paths(base: &str, pattern: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.is_empty() {
        return if pattern.is_empty() {
            "/".to_string()
        } else {
            pattern.to_string()
        };
    }
    match pattern {
        "" | "/" => base.to_string(),
        _ if pattern.starts_with('/') => format!("{base}{pattern}"),
        _ => format!("{base}/{pattern}"),
    }
}
