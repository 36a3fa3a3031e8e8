use crate::models::{Condition, SeverityTier, TriageAdvice, Urgency};

pub fn specialist(condition: Condition) -> &'static str {
    match condition {
        Condition::Xray => "Pulmonologist",
        Condition::Diabetes => "Endocrinologist",
        Condition::Heart => "Cardiologist",
        Condition::Cancer => "Oncologist",
    }
}

pub fn urgency(tier: SeverityTier) -> Urgency {
    match tier {
        SeverityTier::Low => Urgency::Routine,
        SeverityTier::Moderate => Urgency::ModerateFollowup,
        SeverityTier::High => Urgency::Urgent,
    }
}

/// Recommended action for a (condition, tier) pair. Pure lookup.
pub fn advise(condition: Condition, tier: SeverityTier) -> TriageAdvice {
    let action = match (condition, tier) {
        (Condition::Xray, SeverityTier::Low) => "Routine follow-up",
        (Condition::Xray, SeverityTier::Moderate) => "Consult Pulmonologist",
        (Condition::Xray, SeverityTier::High) => "Urgent Medical Attention",
        (Condition::Diabetes, SeverityTier::Low) => "Routine follow-up",
        (Condition::Diabetes, SeverityTier::Moderate) => {
            "Consult Endocrinologist; confirm with HbA1c and fasting glucose"
        }
        (Condition::Diabetes, SeverityTier::High) => "Urgent Medical Attention",
        (Condition::Heart, SeverityTier::Low) => "Routine follow-up",
        (Condition::Heart, SeverityTier::Moderate) => "Schedule cardiology follow-up",
        (Condition::Heart, SeverityTier::High) => "Urgent Medical Attention",
        (Condition::Cancer, SeverityTier::Low) => "Routine follow-up",
        (Condition::Cancer, SeverityTier::Moderate) => "Oncology consult with imaging",
        (Condition::Cancer, SeverityTier::High) => "Urgent Medical Attention",
    };

    TriageAdvice {
        urgency: urgency(tier),
        specialist: specialist(condition),
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk;

    const TIERS: [SeverityTier; 3] = [SeverityTier::Low, SeverityTier::Moderate, SeverityTier::High];

    #[test]
    fn advice_is_total_and_pure() {
        for condition in Condition::ALL {
            for tier in TIERS {
                let first = advise(condition, tier);
                assert_eq!(first, advise(condition, tier));
                assert!(!first.action.is_empty());
                assert_eq!(first.specialist, specialist(condition));
            }
        }
    }

    #[test]
    fn urgency_tracks_tier() {
        assert_eq!(advise(Condition::Heart, SeverityTier::Low).urgency, Urgency::Routine);
        assert_eq!(
            advise(Condition::Xray, SeverityTier::Moderate),
            TriageAdvice {
                urgency: Urgency::ModerateFollowup,
                specialist: "Pulmonologist",
                action: "Consult Pulmonologist",
            }
        );
        assert_eq!(advise(Condition::Cancer, SeverityTier::High).urgency, Urgency::Urgent);
    }

    #[test]
    fn diabetic_threshold_is_urgent_endocrinology() {
        let classification = risk::classify(Condition::Diabetes, 0.65).unwrap();
        let advice = advise(Condition::Diabetes, classification.tier);
        assert_eq!(advice.specialist, "Endocrinologist");
        assert_eq!(advice.urgency, Urgency::Urgent);
    }

    #[test]
    fn severe_pneumonia_is_urgent() {
        let classification = risk::classify(Condition::Xray, 0.92).unwrap();
        assert_eq!(advise(Condition::Xray, classification.tier).urgency, Urgency::Urgent);
    }

    #[test]
    fn mild_heart_risk_is_routine() {
        let classification = risk::classify(Condition::Heart, 0.29).unwrap();
        assert_eq!(advise(Condition::Heart, classification.tier).urgency, Urgency::Routine);
    }
}
