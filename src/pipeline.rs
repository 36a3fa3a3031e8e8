use serde::Serialize;
use sqlx::SqlitePool;

use crate::db;
use crate::error::TriageError;
use crate::models::{ClassificationRequest, ClassificationResult, Condition, NewAuditRecord, TriageAdvice};
use crate::risk;
use crate::scoring::ModelRegistry;
use crate::summary::SummaryComposer;
use crate::triage;

/// Everything produced for one classification.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub subject_id: String,
    pub result: ClassificationResult,
    pub advice: TriageAdvice,
    pub summary: String,
    /// Audit row id; `None` when the store rejected the write.
    pub record_id: Option<i64>,
}

impl Outcome {
    pub fn saved(&self) -> bool {
        self.record_id.is_some()
    }
}

pub struct Pipeline {
    models: ModelRegistry,
    composer: SummaryComposer,
    pool: SqlitePool,
}

impl Pipeline {
    pub fn new(models: ModelRegistry, composer: SummaryComposer, pool: SqlitePool) -> Self {
        Self {
            models,
            composer,
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Scores the request and runs it through classification, triage,
    /// summary and audit.
    pub async fn run(&self, request: ClassificationRequest) -> Result<Outcome, TriageError> {
        let ClassificationRequest {
            subject_id,
            condition,
            features,
        } = request;

        let scorer = self.models.get(condition)?;
        let probability = tokio::task::spawn_blocking(move || scorer.score(&features))
            .await
            .map_err(|err| TriageError::Scoring(err.to_string()))??;

        self.evaluate(&subject_id, condition, probability).await
    }

    /// Runs an already computed probability through the rest of the pipeline.
    ///
    /// Only an invalid score fails the call. Summary and storage problems are
    /// absorbed: the summary degrades to a notice and the outcome is returned
    /// unsaved.
    pub async fn evaluate(
        &self,
        subject_id: &str,
        condition: Condition,
        probability: f64,
    ) -> Result<Outcome, TriageError> {
        let result = risk::assess(condition, probability)?;
        let advice = triage::advise(condition, result.severity_tier);
        let summary = self
            .composer
            .compose(condition, &result.label, result.confidence_percent)
            .await;

        let entry = NewAuditRecord {
            subject_id,
            condition,
            label: &result.label,
            confidence_percent: result.confidence_percent,
            summary: &summary,
        };
        let record_id = match db::record(&self.pool, entry).await {
            Ok(record) => Some(record.id),
            Err(err) => {
                tracing::warn!(subject_id, %condition, "classification not saved: {err}");
                None
            }
        };

        tracing::info!(
            subject_id,
            %condition,
            label = %result.label,
            severity = %result.severity_tier,
            urgency = %advice.urgency,
            "classified"
        );

        Ok(Outcome {
            subject_id: subject_id.to_string(),
            result,
            advice,
            summary,
            record_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::memory_pool;
    use crate::models::{Features, Urgency};
    use crate::scoring::testing::fixed;

    async fn pipeline(models: ModelRegistry) -> Pipeline {
        Pipeline::new(models, SummaryComposer::Template, memory_pool().await)
    }

    #[tokio::test]
    async fn run_scores_classifies_and_records() {
        let models = ModelRegistry::new().with_scorer(Condition::Diabetes, fixed(0.65));
        let pipeline = pipeline(models).await;

        let outcome = pipeline
            .run(ClassificationRequest {
                subject_id: "LL-1".to_string(),
                condition: Condition::Diabetes,
                features: Features::Tabular(vec![0.0; 8]),
            })
            .await
            .unwrap();

        assert_eq!(outcome.result.label, "Diabetic");
        assert_eq!(outcome.result.severity_label, "High Risk");
        assert_eq!(outcome.advice.specialist, "Endocrinologist");
        assert_eq!(outcome.advice.urgency, Urgency::Urgent);
        assert!(outcome.saved());

        let history = db::fetch(pipeline.pool(), Some("LL-1"), 5).await.unwrap();
        assert_eq!(history[0].id, outcome.record_id.unwrap());
        assert_eq!(history[0].summary, outcome.summary);
    }

    #[tokio::test]
    async fn missing_model_is_refused() {
        let pipeline = pipeline(ModelRegistry::new()).await;
        let err = pipeline
            .run(ClassificationRequest {
                subject_id: "LL-1".to_string(),
                condition: Condition::Heart,
                features: Features::Tabular(vec![0.0; 13]),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::ModelUnavailable(Condition::Heart)));
    }

    #[tokio::test]
    async fn invalid_score_is_not_clamped() {
        let models = ModelRegistry::new().with_scorer(Condition::Cancer, fixed(1.2));
        let pipeline = pipeline(models).await;
        let err = pipeline
            .run(ClassificationRequest {
                subject_id: "LL-1".to_string(),
                condition: Condition::Cancer,
                features: Features::Tabular(vec![0.0; 5]),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::InvalidScore(_)));
        assert!(db::fetch(pipeline.pool(), None, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_still_returns_result() {
        let pipeline = pipeline(ModelRegistry::new()).await;
        pipeline.pool().close().await;

        let outcome = pipeline.evaluate("LL-1", Condition::Xray, 0.2).await.unwrap();
        assert_eq!(outcome.result.label, "NORMAL");
        assert!((outcome.result.confidence_percent - 80.0).abs() < 1e-9);
        assert!(!outcome.saved());
    }
}
