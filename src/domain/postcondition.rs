//! Postconditions: deterministic rules gating step success.
//!
//! Each rule is a pure function over one field of a step's conformed
//! output. The verifier evaluates every declared rule and collects all
//! failures instead of stopping at the first, so a run record can report
//! every reason a step was rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A verification rule over one output field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Postcondition {
    /// Field present and non-default (non-blank string, nonzero number, true)
    Nonempty { field: String },

    /// String field contains at least one of the listed substrings
    UrlContainsAny {
        #[serde(default = "default_url_field")]
        field: String,
        values: Vec<String>,
    },

    /// Numeric field within [min, max]
    RatingRange { field: String, min: f64, max: f64 },
}

fn default_url_field() -> String {
    "url".to_string()
}

impl Postcondition {
    /// The field this rule inspects
    pub fn field(&self) -> &str {
        match self {
            Postcondition::Nonempty { field }
            | Postcondition::UrlContainsAny { field, .. }
            | Postcondition::RatingRange { field, .. } => field,
        }
    }

    /// Short rule name for reporting
    pub fn kind_name(&self) -> &'static str {
        match self {
            Postcondition::Nonempty { .. } => "nonempty",
            Postcondition::UrlContainsAny { .. } => "url_contains_any",
            Postcondition::RatingRange { .. } => "rating_range",
        }
    }

    /// Check this rule against an output record
    fn check(&self, output: &BTreeMap<String, Value>) -> Result<(), String> {
        match self {
            Postcondition::Nonempty { field } => match output.get(field) {
                None => Err(format!("field '{}' missing", field)),
                Some(Value::String(s)) if s.trim().is_empty() => {
                    Err(format!("field '{}' is blank", field))
                }
                Some(Value::Number(n)) if n.as_f64() == Some(0.0) => {
                    Err(format!("field '{}' is zero", field))
                }
                Some(Value::Bool(false)) => Err(format!("field '{}' is false", field)),
                Some(Value::Null) => Err(format!("field '{}' is null", field)),
                Some(_) => Ok(()),
            },

            Postcondition::UrlContainsAny { field, values } => {
                let url = match output.get(field) {
                    Some(Value::String(s)) => s.as_str(),
                    Some(other) => {
                        return Err(format!("field '{}' is not a string: {}", field, other))
                    }
                    None => return Err(format!("field '{}' missing", field)),
                };
                if values.iter().any(|v| url.contains(v.as_str())) {
                    Ok(())
                } else {
                    Err(format!(
                        "'{}' contains none of {:?}",
                        url, values
                    ))
                }
            }

            Postcondition::RatingRange { field, min, max } => {
                let v = match output.get(field).and_then(Value::as_f64) {
                    Some(v) => v,
                    None => return Err(format!("field '{}' missing or not numeric", field)),
                };
                if v >= *min && v <= *max {
                    Ok(())
                } else {
                    Err(format!(
                        "field '{}' = {} outside [{}, {}]",
                        field, v, min, max
                    ))
                }
            }
        }
    }
}

/// One failed rule, with enough detail to diagnose without replaying
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub rule: String,
    pub field: String,
    pub reason: String,
}

/// Outcome of checking a step output against its postconditions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub failures: Vec<FailureDetail>,
}

/// Evaluate every rule against a conformed step output.
///
/// Zero rules trivially pass: postconditions opt in to stronger
/// guarantees, their absence is not an error.
pub fn verify(
    output: &BTreeMap<String, Value>,
    postconditions: &[Postcondition],
) -> VerificationResult {
    let failures: Vec<FailureDetail> = postconditions
        .iter()
        .filter_map(|rule| {
            rule.check(output).err().map(|reason| FailureDetail {
                rule: rule.kind_name().to_string(),
                field: rule.field().to_string(),
                reason,
            })
        })
        .collect();

    VerificationResult {
        passed: failures.is_empty(),
        failures,
    }
}
