use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TriageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Xray,
    Diabetes,
    Heart,
    Cancer,
}

const DIABETES_FIELDS: &[&str] = &[
    "pregnancies",
    "glucose",
    "bp",
    "skin",
    "insulin",
    "bmi",
    "dpf",
    "age",
];

const HEART_FIELDS: &[&str] = &[
    "age", "sex", "cp", "bp", "chol", "fbs", "restecg", "thalach", "exang", "oldpeak", "slope",
    "ca", "thal",
];

const CANCER_FIELDS: &[&str] = &["radius", "texture", "perimeter", "area", "smooth"];

impl Condition {
    pub const ALL: [Condition; 4] = [
        Condition::Xray,
        Condition::Diabetes,
        Condition::Heart,
        Condition::Cancer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Xray => "xray",
            Condition::Diabetes => "diabetes",
            Condition::Heart => "heart",
            Condition::Cancer => "cancer",
        }
    }

    /// Human-facing name used in summaries and reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            Condition::Xray => "Chest X-Ray / Pneumonia Detection",
            Condition::Diabetes => "Diabetes Risk Assessment",
            Condition::Heart => "Heart Disease Risk",
            Condition::Cancer => "Breast Cancer Risk",
        }
    }

    /// Ordered feature names a tabular request must carry. Empty for image input.
    pub fn feature_names(&self) -> &'static [&'static str] {
        match self {
            Condition::Xray => &[],
            Condition::Diabetes => DIABETES_FIELDS,
            Condition::Heart => HEART_FIELDS,
            Condition::Cancer => CANCER_FIELDS,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown condition '{0}'")]
pub struct ParseConditionError(String);

impl FromStr for Condition {
    type Err = ParseConditionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "xray" | "x-ray" => Ok(Condition::Xray),
            "diabetes" => Ok(Condition::Diabetes),
            "heart" => Ok(Condition::Heart),
            "cancer" => Ok(Condition::Cancer),
            _ => Err(ParseConditionError(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityTier {
    Low,
    Moderate,
    High,
}

impl fmt::Display for SeverityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeverityTier::Low => write!(f, "LOW"),
            SeverityTier::Moderate => write!(f, "MODERATE"),
            SeverityTier::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    Routine,
    ModerateFollowup,
    Urgent,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Routine => write!(f, "ROUTINE"),
            Urgency::ModerateFollowup => write!(f, "MODERATE_FOLLOWUP"),
            Urgency::Urgent => write!(f, "URGENT"),
        }
    }
}

/// Model input: an ordered tabular vector or the raw bytes of an uploaded image.
#[derive(Debug, Clone)]
pub enum Features {
    Tabular(Vec<f64>),
    Image(Vec<u8>),
}

impl Features {
    /// Pulls the condition's fields out of a JSON object in declaration order.
    ///
    /// The first offending field decides the error: an absent key yields
    /// `MissingField`, a present but non-numeric value yields `InvalidNumeric`.
    /// Numeric strings are accepted.
    pub fn from_json(
        condition: Condition,
        body: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, TriageError> {
        let mut values = Vec::with_capacity(condition.feature_names().len());

        for name in condition.feature_names() {
            let raw = body
                .get(*name)
                .ok_or_else(|| TriageError::MissingField(name.to_string()))?;
            let value = match raw {
                serde_json::Value::Number(number) => number.as_f64(),
                serde_json::Value::String(text) => text.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|value| value.is_finite())
            .ok_or(TriageError::InvalidNumeric)?;
            values.push(value);
        }

        Ok(Features::Tabular(values))
    }
}

#[derive(Debug, Clone)]
pub struct ClassificationRequest {
    pub subject_id: String,
    pub condition: Condition,
    pub features: Features,
}

/// Secondary axis reported for cancer assessments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CancerStage {
    pub risk: &'static str,
    pub stage: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub condition: Condition,
    pub raw_probability: f64,
    pub label: String,
    pub severity_tier: SeverityTier,
    pub severity_label: String,
    pub confidence_percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<CancerStage>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TriageAdvice {
    pub urgency: Urgency,
    pub specialist: &'static str,
    pub action: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: i64,
    pub subject_id: String,
    pub condition: Condition,
    pub label: String,
    pub confidence_percent: f64,
    pub summary: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewAuditRecord<'a> {
    pub subject_id: &'a str,
    pub condition: Condition,
    pub label: &'a str,
    pub confidence_percent: f64,
    pub summary: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContactMessage {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

/// Identity a request acts under. Passed explicitly through handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub username: String,
    pub role: String,
}

pub const GUEST: &str = "guest";

impl Session {
    pub fn guest() -> Self {
        Self {
            username: GUEST.to_string(),
            role: GUEST.to_string(),
        }
    }
}

/// Short patient reference in the form `LL-XXXXXXXXXX`.
pub fn new_subject_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("LL-{}", hex[..10].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn missing_field_is_named() {
        let body = object(json!({
            "pregnancies": 2, "bp": 70, "skin": 20, "insulin": 85,
            "bmi": 25.0, "dpf": 0.5, "age": 30
        }));
        let err = Features::from_json(Condition::Diabetes, &body).unwrap_err();
        assert!(matches!(err, TriageError::MissingField(ref name) if name == "glucose"));
        assert_eq!(err.to_string(), "Missing field glucose");
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        let body = object(json!({
            "radius": 14.0, "texture": "rough", "perimeter": 90.0, "area": 600.0, "smooth": 0.1
        }));
        let err = Features::from_json(Condition::Cancer, &body).unwrap_err();
        assert!(matches!(err, TriageError::InvalidNumeric));
    }

    #[test]
    fn numeric_strings_are_accepted_in_order() {
        let body = object(json!({
            "smooth": "0.1", "area": 600, "perimeter": 90, "texture": 20, "radius": "14"
        }));
        match Features::from_json(Condition::Cancer, &body).unwrap() {
            Features::Tabular(values) => assert_eq!(values, vec![14.0, 20.0, 90.0, 600.0, 0.1]),
            Features::Image(_) => panic!("expected tabular features"),
        }
    }

    #[test]
    fn condition_round_trips_through_text() {
        for condition in Condition::ALL {
            assert_eq!(condition.as_str().parse::<Condition>().unwrap(), condition);
        }
        assert!("kidney".parse::<Condition>().is_err());
    }

    #[test]
    fn subject_ids_have_expected_shape() {
        let id = new_subject_id();
        assert!(id.starts_with("LL-"));
        assert_eq!(id.len(), 13);
    }
}
