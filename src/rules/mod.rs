//! Rename rules for canonicalizing exported artifact names.
//!
//! Exporters write verbose file names such as `yolov5n_float16.tflite`.
//! A [`RuleTable`] maps substrings of those names to short codes. Rules are
//! explicit `(pattern, replacement)` pairs, so a table cannot be misaligned
//! the way two parallel lists can.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StagehandError;

/// Quantization variants produced by a TFLite export, paired with the short
/// code each one is published under.
///
/// The order is the order of the default table and of NPU conversion jobs.
pub const QUANTIZATION_VARIANTS: [(&str, &str); 5] = [
    ("float16", "f16"),
    ("float32", "f32"),
    ("full_integer_quant", "fiq"),
    ("int8", "i8"),
    ("integer_quant", "iq"),
];

/// A single `(pattern, replacement)` rename rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct RenameRule {
    pattern: String,
    replacement: String,
}

#[derive(Deserialize)]
struct RawRule {
    pattern: String,
    #[serde(default)]
    replacement: String,
}

impl TryFrom<RawRule> for RenameRule {
    type Error = StagehandError;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        RenameRule::new(raw.pattern, raw.replacement)
    }
}

impl RenameRule {
    /// Creates a rule. The pattern must be non-empty; the replacement may be
    /// empty but must not contain a path separator or be `..`.
    pub fn new(
        pattern: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Result<Self, StagehandError> {
        let pattern = pattern.into();
        let replacement = replacement.into();
        if pattern.is_empty() {
            return Err(StagehandError::InvalidRule(
                "pattern must not be empty".to_string(),
            ));
        }
        if replacement.contains(['/', '\\']) || replacement == ".." {
            return Err(StagehandError::InvalidRule(format!(
                "replacement '{}' for '{}' must stay within the file name",
                replacement, pattern
            )));
        }
        Ok(Self {
            pattern,
            replacement,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn replacement(&self) -> &str {
        &self.replacement
    }

    /// Returns true if this rule would change `name`.
    pub fn matches(&self, name: &str) -> bool {
        name.contains(&self.pattern)
    }
}

impl fmt::Display for RenameRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.pattern, self.replacement)
    }
}

/// An ordered, non-empty sequence of rename rules.
///
/// Rules apply cumulatively: each rule sees the name as rewritten by the
/// rules before it. Matching does not stop at the first hit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RuleTable {
    rules: Vec<RenameRule>,
}

impl RuleTable {
    /// Builds a table, rejecting an empty rule list.
    pub fn new(rules: Vec<RenameRule>) -> Result<Self, StagehandError> {
        if rules.is_empty() {
            return Err(StagehandError::EmptyRuleTable);
        }
        Ok(Self { rules })
    }

    /// Builds a table from `(pattern, replacement)` pairs.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, StagehandError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let rules = pairs
            .into_iter()
            .map(|(pattern, replacement)| RenameRule::new(pattern, replacement))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(rules)
    }

    pub fn rules(&self) -> &[RenameRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Applies every rule in order to `name`.
    ///
    /// Borrows the input when no rule matches.
    pub fn apply<'a>(&self, name: &'a str) -> Cow<'a, str> {
        let mut current = Cow::Borrowed(name);
        for rule in &self.rules {
            if rule.matches(&current) {
                current = Cow::Owned(current.replace(&rule.pattern, &rule.replacement));
            }
        }
        current
    }
}

impl fmt::Display for RuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            writeln!(f, "  {}. {}", i + 1, rule)?;
        }
        Ok(())
    }
}

/// Parses the CLI form `pattern=replacement`.
///
/// The split happens at the first `=`, so replacements may contain `=`.
pub fn parse_rule(input: &str) -> Result<RenameRule, StagehandError> {
    let Some((pattern, replacement)) = input.split_once('=') else {
        return Err(StagehandError::InvalidRule(format!(
            "'{}' (expected PATTERN=REPLACEMENT)",
            input
        )));
    };
    RenameRule::new(pattern, replacement)
}

/// The default table for the TFLite quantization variants of one model.
///
/// `model_stem` is the model name without its extension; only its file-name
/// component ends up in the patterns, since that is what the exporter writes.
pub fn quantization_rules(model_stem: &str) -> Result<RuleTable, StagehandError> {
    let base = Path::new(model_stem)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| StagehandError::InvalidModelName(model_stem.to_string()))?;

    let rules = QUANTIZATION_VARIANTS
        .iter()
        .map(|(variant, code)| {
            RenameRule::new(
                format!("{base}_{variant}.tflite"),
                format!("{code}.tflite"),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;

    RuleTable::new(rules)
}
