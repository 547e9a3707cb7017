use std::fmt;

use regex::Regex;

use super::resource::{ParamKind, ParamSpec};

// ── Errors ──────────────────────────────────────────────────────────────────

/// Failures while compiling a route template against its parameter specs.
#[derive(Clone)]
pub enum PatternError {
    /// Two variables with no literal text between them.
    AdjacentVariables,
    /// A `{hole}` referencing no declared parameter.
    UnknownParameter(String),
    /// Not every path-bindable parameter appears exactly once.
    ParameterCount { expected: usize, found: usize },
    /// The referenced parameter has no string-parse capability (e.g. a
    /// content body) and cannot live in a path.
    NotPathBindable(String),
    /// A query-only parameter referenced from the path.
    QueryInPath(String),
    /// An optional parameter referenced from the path.
    OptionalInPath(String),
    /// A catch-all variable somewhere other than the final position.
    CatchAllNotLast(String),
    /// Malformed template text.
    BadTemplate(String),
    /// The assembled expression failed to compile.
    Regex(String),
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::AdjacentVariables => {
                write!(f, "two variables need a literal separator between them")
            }
            PatternError::UnknownParameter(name) => {
                write!(f, "template references unknown parameter '{name}'")
            }
            PatternError::ParameterCount { expected, found } => write!(
                f,
                "template binds {found} parameter(s), the method declares {expected}"
            ),
            PatternError::NotPathBindable(name) => {
                write!(f, "parameter '{name}' cannot be bound from a path segment")
            }
            PatternError::QueryInPath(name) => {
                write!(f, "query parameter '{name}' declared in the path")
            }
            PatternError::OptionalInPath(name) => {
                write!(f, "optional parameter '{name}' declared in the path")
            }
            PatternError::CatchAllNotLast(name) => {
                write!(f, "catch-all parameter '{name}' must be the final segment")
            }
            PatternError::BadTemplate(msg) => write!(f, "malformed route template: {msg}"),
            PatternError::Regex(msg) => write!(f, "route expression failed to compile: {msg}"),
        }
    }
}

impl fmt::Debug for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for PatternError {}

// ── Pattern model ───────────────────────────────────────────────────────────

/// One element of a compiled route pattern.
pub enum Part {
    /// Literal path text (may span several segments).
    Literal(String),
    /// An indexed variable bound to a parameter.
    Var { index: usize },
}

/// A compiled route pattern: ordered literal/variable parts plus the anchored
/// regular expression that matches request paths.
///
/// Patterns are comparable by specificity: more literal text first,
/// catch-alls last.
pub struct RoutePattern {
    parts: Vec<Part>,
    regex: Regex,
    text: String,
    literal_len: usize,
    var_count: usize,
    has_catch_all: bool,
}

impl RoutePattern {
    /// Compile a template with `{index}` or `{name}` holes against the
    /// parameter list it binds.
    ///
    /// Every path-bindable parameter must appear exactly once; query, body
    /// and optional parameters must not appear at all.
    pub fn compile(template: &str, params: &[ParamSpec]) -> Result<RoutePattern, PatternError> {
        let tokens = tokenize(template)?;

        let mut parts = Vec::new();
        let mut regex_text = String::from("^");
        let mut canonical = String::new();
        let mut literal_len = 0usize;
        let mut var_count = 0usize;
        let mut has_catch_all = false;
        let mut bound = Vec::new();
        let mut previous_was_var = false;

        let token_count = tokens.len();
        for (position, token) in tokens.into_iter().enumerate() {
            match token {
                Token::Literal(text) => {
                    previous_was_var = false;
                    literal_len += text.len();
                    canonical.push_str(&text);
                    parts.push(Part::Literal(text.clone()));
                    regex_text.push_str(&regex::escape(&text));
                }
                Token::Hole(hole) => {
                    if previous_was_var {
                        return Err(PatternError::AdjacentVariables);
                    }
                    previous_was_var = true;

                    let index = resolve_hole(&hole, params)?;
                    let spec = &params[index];
                    if bound.contains(&index) {
                        return Err(PatternError::BadTemplate(format!(
                            "parameter '{}' bound twice",
                            spec.name
                        )));
                    }
                    bound.push(index);
                    if spec.optional {
                        return Err(PatternError::OptionalInPath(spec.name.to_string()));
                    }

                    let expr = match &spec.kind {
                        ParamKind::Int { .. } => r"\d+".to_string(),
                        ParamKind::Text {
                            min_len,
                            max_len,
                            pattern,
                        } => match pattern {
                            Some(custom) => format!("(?:{custom})"),
                            None => {
                                let min = min_len.unwrap_or(1);
                                match max_len {
                                    Some(max) => format!("[^/]{{{min},{max}}}"),
                                    None => format!("[^/]{{{min},}}"),
                                }
                            }
                        },
                        ParamKind::Uuid => {
                            r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}"
                                .to_string()
                        }
                        ParamKind::Enum { .. } => "[^/]+".to_string(),
                        ParamKind::CatchAll { non_empty } => {
                            if position + 1 != token_count {
                                return Err(PatternError::CatchAllNotLast(spec.name.to_string()));
                            }
                            has_catch_all = true;
                            // The catch-all owns its leading slash; give back
                            // the one the preceding literal contributed.
                            if regex_text.ends_with('/') {
                                regex_text.pop();
                            }
                            if canonical.ends_with('/') {
                                canonical.pop();
                                literal_len -= 1;
                            }
                            if *non_empty {
                                r"(?:/[^/]+)+".to_string()
                            } else {
                                r"(?:/[^/]+)*".to_string()
                            }
                        }
                        ParamKind::Query { .. } => {
                            return Err(PatternError::QueryInPath(spec.name.to_string()))
                        }
                        ParamKind::Body(_) => {
                            return Err(PatternError::NotPathBindable(spec.name.to_string()))
                        }
                    };

                    var_count += 1;
                    canonical.push_str(&format!("{{{index}}}"));
                    regex_text.push_str(&format!("(?P<p{index}>{expr})"));
                    parts.push(Part::Var { index });
                }
            }
        }

        let expected: usize = params.iter().filter(|p| p.is_path_bindable()).count();
        if bound.len() != expected {
            return Err(PatternError::ParameterCount {
                expected,
                found: bound.len(),
            });
        }

        regex_text.push('$');
        let regex = Regex::new(&regex_text).map_err(|e| PatternError::Regex(e.to_string()))?;

        Ok(RoutePattern {
            parts,
            regex,
            text: canonical,
            literal_len,
            var_count,
            has_catch_all,
        })
    }

    /// Canonical text form, e.g. `/test/{0}`.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Identity of the pattern: the compiled expression. Two patterns occupy
    /// the same endpoint position exactly when their expressions are equal,
    /// so differently-constrained variables stay distinct.
    pub fn signature(&self) -> &str {
        self.regex.as_str()
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn has_catch_all(&self) -> bool {
        self.has_catch_all
    }

    /// Match a request path, returning the named captures on success.
    pub fn captures<'t>(&self, path: &'t str) -> Option<regex::Captures<'t>> {
        self.regex.captures(path)
    }

    /// Sort key: catch-alls last, then more literal text, then fewer
    /// variables; canonical text breaks remaining ties deterministically.
    pub fn specificity_key(&self) -> (bool, std::cmp::Reverse<usize>, usize, String) {
        (
            self.has_catch_all,
            std::cmp::Reverse(self.literal_len),
            self.var_count,
            self.text.clone(),
        )
    }
}

impl fmt::Debug for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoutePattern({})", self.text)
    }
}

// ── Template tokenizer ──────────────────────────────────────────────────────

enum Token {
    Literal(String),
    Hole(String),
}

fn tokenize(template: &str) -> Result<Vec<Token>, PatternError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                let mut hole = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    hole.push(inner);
                }
                if !closed {
                    return Err(PatternError::BadTemplate("unclosed '{'".to_string()));
                }
                if hole.is_empty() {
                    return Err(PatternError::BadTemplate("empty hole".to_string()));
                }
                tokens.push(Token::Hole(hole));
            }
            '}' => return Err(PatternError::BadTemplate("stray '}'".to_string())),
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

fn resolve_hole(hole: &str, params: &[ParamSpec]) -> Result<usize, PatternError> {
    if let Ok(index) = hole.parse::<usize>() {
        if index < params.len() {
            return Ok(index);
        }
        return Err(PatternError::UnknownParameter(hole.to_string()));
    }
    params
        .iter()
        .position(|p| p.name == hole)
        .ok_or_else(|| PatternError::UnknownParameter(hole.to_string()))
}
