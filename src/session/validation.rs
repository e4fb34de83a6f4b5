//! Parsing of the raw reps/weight strings typed into the set form.
//!
//! Weights accept either `,` or `.` as the decimal separator and only allow
//! quarter steps after it (`.25`, `.5`, `.75`), matching the plate increments
//! the app offers.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::state::{ExerciseKind, SetResult};

const ALLOWED_FRACTIONS: [&str; 3] = ["25", "5", "75"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ValidationError {
    RepsNotInteger,
    RepsNotPositive,
    WeightMissing,
    WeightInvalid,
    WeightNotPositive,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ValidationError::RepsNotInteger => "Please enter an integer.",
            ValidationError::RepsNotPositive => "Please enter at least one rep.",
            ValidationError::WeightMissing => "Please enter a weight.",
            ValidationError::WeightInvalid => {
                "Please enter a valid weight (decimals may only be .25, .5 or .75)."
            }
            ValidationError::WeightNotPositive => "Please enter a weight greater than zero.",
        };
        f.write_str(message)
    }
}

impl std::error::Error for ValidationError {}

/// Per-field errors; a `None` field passed validation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FormErrors {
    pub reps: Option<ValidationError>,
    pub weight: Option<ValidationError>,
}

impl FormErrors {
    pub fn is_empty(&self) -> bool {
        self.reps.is_none() && self.weight.is_none()
    }
}

impl fmt::Display for FormErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.reps, self.weight) {
            (Some(reps), Some(weight)) => write!(f, "reps: {reps} weight: {weight}"),
            (Some(reps), None) => write!(f, "reps: {reps}"),
            (None, Some(weight)) => write!(f, "weight: {weight}"),
            (None, None) => f.write_str("no errors"),
        }
    }
}

impl std::error::Error for FormErrors {}

/// Raw text as entered in the set editor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SetForm {
    pub reps: String,
    #[serde(default)]
    pub weight: String,
}

impl SetForm {
    pub fn new(reps: impl Into<String>, weight: impl Into<String>) -> Self {
        Self {
            reps: reps.into(),
            weight: weight.into(),
        }
    }

    pub fn reps_only(reps: impl Into<String>) -> Self {
        Self::new(reps, String::new())
    }

    pub fn validate(&self, kind: ExerciseKind) -> Result<SetResult, FormErrors> {
        let reps = parse_reps(&self.reps);
        let weight = match kind {
            ExerciseKind::Normal => parse_weight(&self.weight).map(Some),
            ExerciseKind::Bodyweight => Ok(None),
        };

        match (reps, weight) {
            (Ok(reps), Ok(weight)) => Ok(SetResult {
                reps: Some(reps),
                weight,
            }),
            (reps, weight) => Err(FormErrors {
                reps: reps.err(),
                weight: weight.err(),
            }),
        }
    }
}

pub fn parse_reps(raw: &str) -> Result<u32, ValidationError> {
    if !is_digits(raw) {
        return Err(ValidationError::RepsNotInteger);
    }
    let reps: u32 = raw.parse().map_err(|_| ValidationError::RepsNotInteger)?;
    if reps == 0 {
        return Err(ValidationError::RepsNotPositive);
    }
    Ok(reps)
}

pub fn parse_weight(raw: &str) -> Result<f64, ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::WeightMissing);
    }

    match raw.split_once([',', '.']) {
        Some((whole, fraction)) => {
            if !is_digits(whole) || !ALLOWED_FRACTIONS.contains(&fraction) {
                return Err(ValidationError::WeightInvalid);
            }
        }
        None => {
            if !is_digits(raw) {
                return Err(ValidationError::WeightInvalid);
            }
        }
    }

    let weight: f64 = raw
        .replace(',', ".")
        .parse()
        .map_err(|_| ValidationError::WeightInvalid)?;
    if weight <= 0.0 {
        return Err(ValidationError::WeightNotPositive);
    }
    Ok(weight)
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}
