//! The validation engine: declarative constraint schemas attached to types,
//! value traversal with cascading, and a locale-aware violation report.
//!
//! Schemas are plain value descriptors built by the registration DSL; the
//! walker evaluates them over the value's serde representation so the same
//! engine serves every codec.

pub mod messages;

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

pub use messages::{interpolate, MessageBundles};

// ── Report ──────────────────────────────────────────────────────────────────

/// One constraint violation.
#[derive(Clone, Serialize)]
pub struct Violation {
    /// Dotted path into the validated value, e.g. `book.authors[3].company`.
    pub path: String,
    /// The raw message template, e.g. `{validation.notnull}`.
    #[serde(skip)]
    pub template: String,
    /// The interpolated, locale-resolved message.
    pub message: String,
    /// String form of the offending value.
    #[serde(rename = "invalidValue")]
    pub invalid_value: String,
}

/// The ordered collection of violations a validation pass produced.
///
/// Empty on success; validation itself never fails.
#[derive(Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ErrorSet {
    entries: Vec<Violation>,
}

impl ErrorSet {
    pub fn new() -> ErrorSet {
        ErrorSet::default()
    }

    pub fn push(&mut self, violation: Violation) {
        self.entries.push(violation);
    }

    pub fn extend(&mut self, other: ErrorSet) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.entries.iter()
    }

    /// The negotiable report body: `{"errors": [...]}`.
    pub fn to_body(&self) -> Value {
        serde_json::json!({ "errors": self.entries })
    }
}

impl std::fmt::Debug for ErrorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths: Vec<&str> = self.entries.iter().map(|v| v.path.as_str()).collect();
        write!(f, "ErrorSet({paths:?})")
    }
}

// ── Constraints ─────────────────────────────────────────────────────────────

/// A single declarative constraint on a field value.
#[derive(Clone)]
pub enum Constraint {
    /// The value must be present and not null.
    NotNull,
    /// Strings, sequences and maps must be non-empty (null also fails).
    NotEmpty,
    /// Length bounds on strings and sequences. Null passes.
    Size { min: Option<usize>, max: Option<usize> },
    /// Numeric bounds. Null and non-numbers pass.
    Range { min: Option<i64>, max: Option<i64> },
    /// A regex the string form must match. Null passes.
    Pattern(Regex),
    /// A custom predicate; `true` means valid.
    Predicate {
        name: &'static str,
        check: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
    },
}

impl Constraint {
    fn default_template(&self) -> &'static str {
        match self {
            Constraint::NotNull => "{validation.notnull}",
            Constraint::NotEmpty => "{validation.notempty}",
            Constraint::Size { .. } => "{validation.size}",
            Constraint::Range { .. } => "{validation.range}",
            Constraint::Pattern(_) => "{validation.pattern}",
            Constraint::Predicate { .. } => "{validation.invalid}",
        }
    }

    fn attrs(&self) -> Vec<(&'static str, String)> {
        match self {
            Constraint::Size { min, max } => vec![
                ("min", min.map_or_else(|| "0".to_string(), |v| v.to_string())),
                ("max", max.map_or_else(|| "unbounded".to_string(), |v| v.to_string())),
            ],
            Constraint::Range { min, max } => vec![
                ("min", min.map_or_else(|| "-inf".to_string(), |v| v.to_string())),
                ("max", max.map_or_else(|| "+inf".to_string(), |v| v.to_string())),
            ],
            Constraint::Pattern(regex) => vec![("pattern", regex.as_str().to_string())],
            _ => Vec::new(),
        }
    }

    /// Evaluate against a value; `None` means the field was absent.
    fn holds(&self, value: Option<&Value>) -> bool {
        let value = match value {
            None | Some(Value::Null) => {
                return !matches!(self, Constraint::NotNull | Constraint::NotEmpty)
            }
            Some(v) => v,
        };
        match self {
            Constraint::NotNull => true,
            Constraint::NotEmpty => match value {
                Value::String(s) => !s.is_empty(),
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
                _ => true,
            },
            Constraint::Size { min, max } => {
                let len = match value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => return true,
                };
                min.map_or(true, |m| len >= m) && max.map_or(true, |m| len <= m)
            }
            Constraint::Range { min, max } => match value.as_i64() {
                Some(n) => min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m),
                None => true,
            },
            Constraint::Pattern(regex) => match value {
                Value::String(s) => regex.is_match(s),
                _ => true,
            },
            Constraint::Predicate { check, .. } => check(value),
        }
    }
}

// ── Schema ──────────────────────────────────────────────────────────────────

/// One constraint plus its group tags and message template.
#[derive(Clone)]
struct Check {
    constraint: Constraint,
    template: String,
    groups: Vec<String>,
}

impl Check {
    fn in_group(&self, group: &str) -> bool {
        if self.groups.is_empty() {
            group == DEFAULT_GROUP
        } else {
            self.groups.iter().any(|g| g == group)
        }
    }
}

/// Constraints and cascade points declared for one field.
#[derive(Clone)]
pub struct FieldRule {
    field: String,
    checks: Vec<Check>,
    cascade: Option<Arc<Schema>>,
    each: Option<Arc<Schema>>,
}

impl FieldRule {
    pub fn new(field: impl Into<String>) -> FieldRule {
        FieldRule {
            field: field.into(),
            checks: Vec::new(),
            cascade: None,
            each: None,
        }
    }

    fn push(mut self, constraint: Constraint) -> FieldRule {
        let template = constraint.default_template().to_string();
        self.checks.push(Check {
            constraint,
            template,
            groups: Vec::new(),
        });
        self
    }

    pub fn not_null(self) -> FieldRule {
        self.push(Constraint::NotNull)
    }

    pub fn not_empty(self) -> FieldRule {
        self.push(Constraint::NotEmpty)
    }

    pub fn size(self, min: Option<usize>, max: Option<usize>) -> FieldRule {
        self.push(Constraint::Size { min, max })
    }

    pub fn range(self, min: Option<i64>, max: Option<i64>) -> FieldRule {
        self.push(Constraint::Range { min, max })
    }

    pub fn pattern(self, regex: Regex) -> FieldRule {
        self.push(Constraint::Pattern(regex))
    }

    pub fn check(self, name: &'static str, check: impl Fn(&Value) -> bool + Send + Sync + 'static) -> FieldRule {
        self.push(Constraint::Predicate {
            name,
            check: Arc::new(check),
        })
    }

    /// Override the message template of the most recently added constraint.
    pub fn message(mut self, template: impl Into<String>) -> FieldRule {
        if let Some(check) = self.checks.last_mut() {
            check.template = template.into();
        }
        self
    }

    /// Tag the most recently added constraint with validation groups.
    pub fn groups(mut self, groups: &[&str]) -> FieldRule {
        if let Some(check) = self.checks.last_mut() {
            check.groups = groups.iter().map(|g| g.to_string()).collect();
        }
        self
    }

    /// Cascade into this field's object value with the given schema.
    pub fn cascade(mut self, schema: Schema) -> FieldRule {
        self.cascade = Some(Arc::new(schema));
        self
    }

    /// Cascade into each element of this field's sequence (or each value of
    /// its map) with the given schema.
    pub fn each(mut self, schema: Schema) -> FieldRule {
        self.each = Some(Arc::new(schema));
        self
    }
}

/// The constraint descriptor attached to a type.
#[derive(Clone, Default)]
pub struct Schema {
    rules: Vec<FieldRule>,
}

impl Schema {
    pub fn new() -> Schema {
        Schema::default()
    }

    pub fn rule(mut self, rule: FieldRule) -> Schema {
        self.rules.push(rule);
        self
    }
}

/// Types that declare a validation schema.
pub trait Validate {
    fn schema() -> Schema;
}

// ── Walker ──────────────────────────────────────────────────────────────────

pub const DEFAULT_GROUP: &str = "";

/// Evaluates schemas over values and produces [`ErrorSet`]s.
pub struct Validator {
    bundles: MessageBundles,
}

impl Validator {
    pub fn new() -> Validator {
        Validator {
            bundles: MessageBundles::builtin(),
        }
    }

    pub fn with_bundles(bundles: MessageBundles) -> Validator {
        Validator { bundles }
    }

    /// Validate the default group.
    pub fn validate(
        &self,
        root: &str,
        value: &Value,
        schema: &Schema,
        locales: &[String],
    ) -> ErrorSet {
        self.validate_groups(root, value, schema, locales, &[DEFAULT_GROUP])
    }

    /// Validate the given groups in order. A constraint tagged with several
    /// requested groups is still evaluated exactly once per path.
    pub fn validate_groups(
        &self,
        root: &str,
        value: &Value,
        schema: &Schema,
        locales: &[String],
        groups: &[&str],
    ) -> ErrorSet {
        let mut errors = ErrorSet::new();
        let mut seen: HashSet<(String, usize, usize)> = HashSet::new();
        for group in groups {
            self.walk(root, value, schema, locales, group, &mut seen, &mut errors);
        }
        errors
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        path: &str,
        value: &Value,
        schema: &Schema,
        locales: &[String],
        group: &str,
        seen: &mut HashSet<(String, usize, usize)>,
        errors: &mut ErrorSet,
    ) {
        for (rule_index, rule) in schema.rules.iter().enumerate() {
            let field_path = if path.is_empty() {
                rule.field.clone()
            } else {
                format!("{path}.{}", rule.field)
            };
            let field_value = value.get(&rule.field);

            for (check_index, check) in rule.checks.iter().enumerate() {
                if !check.in_group(group) {
                    continue;
                }
                if !seen.insert((field_path.clone(), rule_index, check_index)) {
                    continue;
                }
                if !check.constraint.holds(field_value) {
                    let attrs = check.constraint.attrs();
                    let attr_refs: Vec<(&str, String)> =
                        attrs.iter().map(|(n, v)| (*n, v.clone())).collect();
                    errors.push(Violation {
                        path: field_path.clone(),
                        template: check.template.clone(),
                        message: interpolate(&check.template, &self.bundles, locales, &attr_refs),
                        invalid_value: value_text(field_value),
                    });
                }
            }

            if let Some(nested) = &rule.cascade {
                if let Some(inner @ Value::Object(_)) = field_value {
                    self.walk(&field_path, inner, nested, locales, group, seen, errors);
                }
            }
            if let Some(element) = &rule.each {
                match field_value {
                    Some(Value::Array(items)) => {
                        for (i, item) in items.iter().enumerate() {
                            self.walk(
                                &format!("{field_path}[{i}]"),
                                item,
                                element,
                                locales,
                                group,
                                seen,
                                errors,
                            );
                        }
                    }
                    Some(Value::Object(map)) => {
                        for (key, item) in map {
                            self.walk(
                                &format!("{field_path}[{key}]"),
                                item,
                                element,
                                locales,
                                group,
                                seen,
                                errors,
                            );
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

/// The report's string form of an offending value.
fn value_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
