//! Validation rules for entities created from submitted attributes.
//!
//! When a form submits attribute maps for related entities that do not exist
//! yet, each candidate is checked against the rules declared for its table
//! before anything is written.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result, ValidationError, ValidationErrorKind};
use crate::record::Record;
use crate::value::Value;

fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
}

/// Extensions accepted by [`FieldRule::Image`].
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "bmp", "svg"];

/// A single constraint on one attribute.
#[derive(Debug, Clone)]
pub enum FieldRule {
    /// Attribute must be present, non-null and (for text) non-blank.
    Required,
    /// Text must have at least this many characters.
    MinLength(usize),
    /// Text must have at most this many characters.
    MaxLength(usize),
    /// Text must match the expression.
    Pattern(Regex),
    /// Text must look like an email address.
    Email,
    /// Value must be numeric (or numeric text).
    Number,
    /// Value is a stored file name; a non-empty list restricts its extension.
    File(Vec<String>),
    /// Value is a stored image file name.
    Image,
}

impl FieldRule {
    /// Compile a pattern rule.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(FieldRule::Pattern)
            .map_err(|e| Error::config(format!("invalid regex pattern: {e}")))
    }

    fn check(&self, field: &str, value: &Value, errors: &mut ValidationError) {
        match self {
            FieldRule::Required => {
                let blank = match value {
                    Value::Null => true,
                    Value::Text(s) => s.trim().is_empty(),
                    _ => false,
                };
                if blank {
                    errors.add_required(field);
                }
            }
            // Remaining rules skip NULL; presence is Required's job.
            _ if value.is_null() => {}
            FieldRule::MinLength(min) => {
                let len = text_len(value);
                if len < *min {
                    errors.add_min_length(field, *min, len);
                }
            }
            FieldRule::MaxLength(max) => {
                let len = text_len(value);
                if len > *max {
                    errors.add_max_length(field, *max, len);
                }
            }
            FieldRule::Pattern(regex) => {
                if !regex.is_match(&value.to_string()) {
                    errors.add_pattern(field, regex.as_str());
                }
            }
            FieldRule::Email => {
                let text = value.to_string();
                if !email_regex().is_some_and(|re| re.is_match(&text)) {
                    errors.add(
                        field,
                        ValidationErrorKind::Email,
                        "must be a valid email address",
                    );
                }
            }
            FieldRule::Number => {
                if value.as_f64().is_none() {
                    errors.add(field, ValidationErrorKind::Number, "must be a number");
                }
            }
            FieldRule::File(allowed) => {
                let ext = extension(value);
                let accepted = allowed.is_empty()
                    || ext
                        .as_deref()
                        .is_some_and(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)));
                if !accepted {
                    errors.add(
                        field,
                        ValidationErrorKind::File,
                        format!("only files with these extensions are allowed: {}", allowed.join(", ")),
                    );
                }
            }
            FieldRule::Image => {
                if !extension(value).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str())) {
                    errors.add(field, ValidationErrorKind::Image, "must be an image file");
                }
            }
        }
    }
}

/// Lowercase extension of a file name, if it has one.
fn extension(value: &Value) -> Option<String> {
    let text = value.to_string();
    let name = text.rsplit(['/', '\\']).next().unwrap_or(text.as_str());
    name.rsplit_once('.')
        .map(|(stem, ext)| (stem, ext.to_ascii_lowercase()))
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| ext)
}

fn text_len(value: &Value) -> usize {
    value.to_string().chars().count()
}

/// Ordered list of `(attribute, rule)` pairs for one table.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<(String, FieldRule)>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule for an attribute.
    #[must_use]
    pub fn rule(mut self, attribute: impl Into<String>, rule: FieldRule) -> Self {
        self.rules.push((attribute.into(), rule));
        self
    }

    pub fn push(&mut self, attribute: impl Into<String>, rule: FieldRule) {
        self.rules.push((attribute.into(), rule));
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// All rules declared for `attribute`.
    pub fn rules_for<'a>(&'a self, attribute: &'a str) -> impl Iterator<Item = &'a FieldRule> {
        self.rules
            .iter()
            .filter(move |(name, _)| name == attribute)
            .map(|(_, rule)| rule)
    }

    /// Attributes that carry at least one rule, in declaration order.
    pub fn attributes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.rules {
            if !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
        names
    }

    /// Validate a record, collecting every failure.
    pub fn validate(&self, record: &Record) -> std::result::Result<(), ValidationError> {
        let mut errors = ValidationError::new();
        for (field, rule) in &self.rules {
            rule.check(field, &record.get(field), &mut errors);
        }
        errors.into_result()
    }
}
