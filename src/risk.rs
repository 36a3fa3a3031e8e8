use chrono::Utc;

use crate::error::TriageError;
use crate::models::{CancerStage, ClassificationResult, Condition, SeverityTier};

/// Outcome of mapping one probability onto a condition's threshold table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: &'static str,
    pub tier: SeverityTier,
    pub severity_label: &'static str,
    /// Probability of the predicted label, in [0, 1].
    pub confidence: f64,
    pub stage: Option<CancerStage>,
}

/// Maps a positive-class probability onto a label and severity tier.
///
/// Every band is closed on its lower bound, so a probability sitting exactly on
/// a threshold resolves to the upper tier.
pub fn classify(condition: Condition, probability: f64) -> Result<Classification, TriageError> {
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        tracing::error!(%condition, probability, "scorer returned a value outside [0, 1]");
        return Err(TriageError::InvalidScore(probability));
    }

    Ok(match condition {
        Condition::Xray => classify_xray(probability),
        Condition::Diabetes => classify_diabetes(probability),
        Condition::Heart => classify_heart(probability),
        Condition::Cancer => classify_cancer(probability),
    })
}

/// Classifies and stamps the result with the current time.
pub fn assess(condition: Condition, probability: f64) -> Result<ClassificationResult, TriageError> {
    let classification = classify(condition, probability)?;

    Ok(ClassificationResult {
        condition,
        raw_probability: probability,
        label: classification.label.to_string(),
        severity_tier: classification.tier,
        severity_label: classification.severity_label.to_string(),
        confidence_percent: classification.confidence * 100.0,
        stage: classification.stage,
        timestamp: Utc::now(),
    })
}

/// Severity of an x-ray finding, graded on the confidence of the predicted label.
pub fn xray_severity(confidence: f64) -> (&'static str, SeverityTier) {
    if confidence < 0.30 {
        ("Very Mild", SeverityTier::Low)
    } else if confidence < 0.60 {
        ("Mild", SeverityTier::Low)
    } else if confidence < 0.85 {
        ("Moderate", SeverityTier::Moderate)
    } else {
        ("Severe", SeverityTier::High)
    }
}

pub fn cancer_stage(probability: f64) -> (CancerStage, SeverityTier) {
    if probability < 0.40 {
        (
            CancerStage {
                risk: "Low Risk",
                stage: "Stage 0 / Benign",
            },
            SeverityTier::Low,
        )
    } else if probability < 0.70 {
        (
            CancerStage {
                risk: "Intermediate Risk",
                stage: "Stage I–II",
            },
            SeverityTier::Moderate,
        )
    } else {
        (
            CancerStage {
                risk: "High Risk",
                stage: "Stage III–IV",
            },
            SeverityTier::High,
        )
    }
}

fn classify_xray(probability: f64) -> Classification {
    let pneumonia = probability > 0.5;
    let confidence = if pneumonia { probability } else { 1.0 - probability };
    let (severity_label, tier) = xray_severity(confidence);

    Classification {
        label: if pneumonia { "PNEUMONIA" } else { "NORMAL" },
        tier,
        severity_label,
        confidence,
        stage: None,
    }
}

fn classify_diabetes(probability: f64) -> Classification {
    let (label, severity_label, tier) = if probability < 0.30 {
        ("Non-Diabetic", "Low Risk", SeverityTier::Low)
    } else if probability < 0.65 {
        ("Pre-Diabetic", "Moderate Risk", SeverityTier::Moderate)
    } else {
        ("Diabetic", "High Risk", SeverityTier::High)
    };

    Classification {
        label,
        tier,
        severity_label,
        confidence: label_confidence(tier == SeverityTier::Low, probability),
        stage: None,
    }
}

fn classify_heart(probability: f64) -> Classification {
    let (label, severity_label, tier) = if probability < 0.30 {
        ("Low Risk", "Mild", SeverityTier::Low)
    } else if probability < 0.60 {
        ("Moderate Risk", "Moderate", SeverityTier::Moderate)
    } else {
        ("High Risk", "Severe", SeverityTier::High)
    };

    Classification {
        label,
        tier,
        severity_label,
        confidence: label_confidence(tier == SeverityTier::Low, probability),
        stage: None,
    }
}

fn classify_cancer(probability: f64) -> Classification {
    let detected = probability >= 0.5;
    let (stage, tier) = cancer_stage(probability);

    Classification {
        label: if detected {
            "Cancer Detected"
        } else {
            "No Cancer Detected"
        },
        tier,
        severity_label: stage.risk,
        confidence: label_confidence(!detected, probability),
        stage: Some(stage),
    }
}

fn label_confidence(negative_label: bool, probability: f64) -> f64 {
    if negative_label {
        1.0 - probability
    } else {
        probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn boundaries_resolve_to_upper_tier() {
        let cases = [
            (Condition::Diabetes, 0.30, SeverityTier::Moderate),
            (Condition::Diabetes, 0.65, SeverityTier::High),
            (Condition::Heart, 0.30, SeverityTier::Moderate),
            (Condition::Heart, 0.60, SeverityTier::High),
            (Condition::Cancer, 0.40, SeverityTier::Moderate),
            (Condition::Cancer, 0.70, SeverityTier::High),
        ];

        for (condition, probability, tier) in cases {
            for _ in 0..3 {
                assert_eq!(classify(condition, probability).unwrap().tier, tier);
            }
        }
    }

    #[test]
    fn every_probability_yields_one_label() {
        for condition in Condition::ALL {
            for step in 0..=100 {
                let probability = step as f64 / 100.0;
                let result = classify(condition, probability).unwrap();
                assert!(!result.label.is_empty());
                assert!(!result.severity_label.is_empty());
                assert!((0.0..=1.0).contains(&result.confidence));
            }
        }
    }

    #[test]
    fn xray_confidence_follows_predicted_label() {
        let normal = classify(Condition::Xray, 0.2).unwrap();
        assert_eq!(normal.label, "NORMAL");
        assert!(approx(normal.confidence, 0.8));

        let pneumonia = assess(Condition::Xray, 0.92).unwrap();
        assert_eq!(pneumonia.label, "PNEUMONIA");
        assert!(approx(pneumonia.confidence_percent, 92.0));
        assert_eq!(pneumonia.severity_label, "Severe");
        assert_eq!(pneumonia.severity_tier, SeverityTier::High);
    }

    #[test]
    fn xray_half_is_normal() {
        let result = classify(Condition::Xray, 0.5).unwrap();
        assert_eq!(result.label, "NORMAL");
        assert_eq!(result.severity_label, "Mild");
    }

    #[test]
    fn xray_severity_bands() {
        assert_eq!(xray_severity(0.1).0, "Very Mild");
        assert_eq!(xray_severity(0.3).0, "Mild");
        assert_eq!(xray_severity(0.6).0, "Moderate");
        assert_eq!(xray_severity(0.9).0, "Severe");
    }

    #[test]
    fn diabetes_at_threshold_is_diabetic() {
        let result = classify(Condition::Diabetes, 0.65).unwrap();
        assert_eq!(result.label, "Diabetic");
        assert_eq!(result.severity_label, "High Risk");
        assert!(approx(result.confidence, 0.65));
    }

    #[test]
    fn heart_below_threshold_is_low_risk() {
        let result = classify(Condition::Heart, 0.29).unwrap();
        assert_eq!(result.label, "Low Risk");
        assert_eq!(result.severity_label, "Mild");
        assert_eq!(result.tier, SeverityTier::Low);
        assert!(approx(result.confidence, 0.71));
    }

    #[test]
    fn cancer_reports_presence_and_stage() {
        let result = classify(Condition::Cancer, 0.95).unwrap();
        assert_eq!(result.label, "Cancer Detected");
        let stage = result.stage.unwrap();
        assert_eq!(stage.risk, "High Risk");
        assert_eq!(stage.stage, "Stage III–IV");

        let benign = classify(Condition::Cancer, 0.1).unwrap();
        assert_eq!(benign.label, "No Cancer Detected");
        assert!(approx(benign.confidence, 0.9));
        assert_eq!(benign.stage.unwrap().stage, "Stage 0 / Benign");
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        for probability in [-0.01, 1.01, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                classify(Condition::Heart, probability),
                Err(TriageError::InvalidScore(_))
            ));
        }
    }
}
