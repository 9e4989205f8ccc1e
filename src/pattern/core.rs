use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{PatternErrorKind, RouterError};
use crate::router::ParamVec;

/// Name a bare `*` glob binds its capture under
pub const ANONYMOUS_GLOB: &str = "*";

/// Regex attached to a `{name:regex}` parameter
///
/// The expression is anchored on both ends when compiled, so it must match the
/// whole decoded segment value.
#[derive(Debug, Clone)]
pub struct Constraint {
    source: String,
    regex: Regex,
}

impl Constraint {
    fn compile(name: &str, source: &str) -> Result<Self, PatternErrorKind> {
        let anchored = format!("^(?:{source})$");
        let regex = Regex::new(&anchored).map_err(|e| PatternErrorKind::InvalidRegex {
            name: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// Whether `value` satisfies the constraint
    #[must_use]
    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    /// The expression as written in the template
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Constraint {}

/// One compiled path segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Exact text, compared case-sensitively against the decoded segment
    Literal(String),
    /// A named parameter matching exactly one segment
    Param {
        /// Name the value is bound under
        name: Arc<str>,
        /// Optional regex the decoded value must match
        constraint: Option<Constraint>,
    },
    /// Trailing wildcard capturing the rest of the path
    Glob(Arc<str>),
}

impl Segment {
    /// Parameter or glob name, `None` for literals
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Segment::Literal(_) => None,
            Segment::Param { name, .. } | Segment::Glob(name) => Some(&**name),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(text) => f.write_str(text),
            Segment::Param {
                name,
                constraint: None,
            } => write!(f, "{{{name}}}"),
            Segment::Param {
                name,
                constraint: Some(c),
            } => write!(f, "{{{name}:{}}}", c.as_str()),
            Segment::Glob(name) if &**name == ANONYMOUS_GLOB => f.write_str("*"),
            Segment::Glob(name) => write!(f, "{{{name}}}*"),
        }
    }
}

/// Ordering score of a pattern; greater is more specific
///
/// Compared field by field: more literal segments first, then more
/// regex-constrained parameters, then more parameters overall, and a pattern
/// without a glob ranks above one with a glob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Specificity {
    /// Number of literal segments
    pub literals: usize,
    /// Number of parameters carrying a regex constraint
    pub constrained: usize,
    /// Number of parameters (constrained or not)
    pub params: usize,
    /// Whether the pattern ends in a glob
    pub glob: bool,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.literals
            .cmp(&other.literals)
            .then(self.constrained.cmp(&other.constrained))
            .then(self.params.cmp(&other.params))
            .then(other.glob.cmp(&self.glob))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A compiled route path template
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    normalized: String,
    segments: Vec<Segment>,
    specificity: Specificity,
}

impl Pattern {
    /// Compile a path template.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::PatternSyntax`] when a glob is not last, a
    /// parameter name repeats or is malformed, braces are unbalanced, a segment
    /// mixes text and a parameter, or a constraint regex does not compile.
    pub fn compile(raw: &str) -> Result<Self, RouterError> {
        Self::parse(raw).map_err(|kind| RouterError::PatternSyntax {
            pattern: raw.to_string(),
            kind,
        })
    }

    fn parse(raw: &str) -> Result<Self, PatternErrorKind> {
        let mut segments = Vec::new();
        for token in tokenize(raw)? {
            segments.push(parse_segment(token)?);
        }

        let mut seen = HashSet::new();
        let mut specificity = Specificity::default();
        let last = segments.len().saturating_sub(1);
        for (i, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Literal(_) => specificity.literals += 1,
                Segment::Param { constraint, .. } => {
                    specificity.params += 1;
                    if constraint.is_some() {
                        specificity.constrained += 1;
                    }
                }
                Segment::Glob(_) => {
                    if i != last {
                        return Err(PatternErrorKind::GlobNotLast);
                    }
                    specificity.glob = true;
                }
            }
            if let Some(name) = segment.name() {
                if !seen.insert(name) {
                    return Err(PatternErrorKind::DuplicateParam(name.to_string()));
                }
            }
        }

        let normalized = if segments.is_empty() {
            "/".to_string()
        } else {
            segments.iter().fold(String::new(), |mut acc, s| {
                acc.push('/');
                acc.push_str(&s.to_string());
                acc
            })
        };

        Ok(Self {
            source: raw.to_string(),
            normalized,
            segments,
            specificity,
        })
    }

    /// Normalized template text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    /// Template exactly as it was registered
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compiled segments in path order
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn specificity(&self) -> Specificity {
        self.specificity
    }

    /// Whether the final segment is a glob
    #[must_use]
    pub fn has_glob(&self) -> bool {
        self.specificity.glob
    }

    /// Names bound by this pattern, in path order
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(Segment::name)
    }

    /// Whether captured values satisfy every regex constraint of the pattern
    #[must_use]
    pub fn accepts(&self, params: &ParamVec) -> bool {
        self.segments.iter().all(|segment| match segment {
            Segment::Param {
                name,
                constraint: Some(constraint),
            } => params
                .iter()
                .rfind(|(k, _)| **k == **name)
                .is_some_and(|(_, v)| constraint.is_match(v)),
            _ => true,
        })
    }

    /// Build a concrete path by substituting parameter values.
    ///
    /// Parameter values are percent-encoded; glob values are inserted as-is
    /// because they may legitimately contain `/`. Returns `None` when a value
    /// is missing or violates its constraint.
    #[must_use]
    pub fn expand(&self, values: &HashMap<&str, &str>) -> Option<String> {
        if self.segments.is_empty() {
            return Some("/".to_string());
        }
        let mut path = String::with_capacity(self.normalized.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => {
                    path.push('/');
                    path.push_str(&urlencoding::encode(text));
                }
                Segment::Param { name, constraint } => {
                    let value = values.get(&**name)?;
                    if let Some(c) = constraint {
                        if !c.is_match(value) {
                            return None;
                        }
                    }
                    path.push('/');
                    path.push_str(&urlencoding::encode(value));
                }
                Segment::Glob(name) => {
                    let value = values.get(&**name)?;
                    path.push('/');
                    path.push_str(value.trim_start_matches('/'));
                }
            }
        }
        Some(path)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Split a template on `/` outside of braces, dropping empty pieces.
///
/// Splitting only at brace depth zero keeps regexes such as `\d{2}/\d{2}`
/// intact; a backslash inside braces escapes the next character.
fn tokenize(raw: &str) -> Result<Vec<&str>, PatternErrorKind> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut escaped = false;

    for (i, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if depth > 0 => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or(PatternErrorKind::UnbalancedBraces)?;
            }
            '/' if depth == 0 => {
                if i > start {
                    tokens.push(&raw[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(PatternErrorKind::UnbalancedBraces);
    }
    if start < raw.len() {
        tokens.push(&raw[start..]);
    }
    Ok(tokens)
}

fn parse_segment(token: &str) -> Result<Segment, PatternErrorKind> {
    if token == ANONYMOUS_GLOB {
        return Ok(Segment::Glob(Arc::from(ANONYMOUS_GLOB)));
    }
    if !token.starts_with('{') {
        if token.contains(['{', '}']) {
            return Err(PatternErrorKind::MixedSegment(token.to_string()));
        }
        return Ok(Segment::Literal(token.to_string()));
    }

    let close = closing_brace(token).ok_or(PatternErrorKind::UnbalancedBraces)?;
    let inner = &token[1..close];
    let rest = &token[close + 1..];

    let (name, regex) = match inner.split_once(':') {
        Some((name, regex)) => (name, Some(regex)),
        None => (inner, None),
    };
    validate_name(name)?;

    match (rest, regex) {
        ("", _) => {
            let constraint = match regex {
                Some(src) if !src.is_empty() => Some(Constraint::compile(name, src)?),
                _ => None,
            };
            Ok(Segment::Param {
                name: Arc::from(name),
                constraint,
            })
        }
        ("*", None) => Ok(Segment::Glob(Arc::from(name))),
        _ => Err(PatternErrorKind::MixedSegment(token.to_string())),
    }
}

/// Byte index of the brace closing the one at index 0
fn closing_brace(token: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut escaped = false;
    for (i, ch) in token.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn validate_name(name: &str) -> Result<(), PatternErrorKind> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(PatternErrorKind::InvalidParamName(name.to_string()))
    }
}
