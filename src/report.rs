use std::collections::HashMap;
use std::fmt::Write;
use std::path::Path;

use crate::models::{AuditRecord, Condition};
use crate::pipeline::Outcome;

#[derive(Debug, Clone)]
pub struct ConditionSummary {
    pub condition: Condition,
    pub count: usize,
    pub avg_confidence: f64,
}

pub fn summarize_by_condition(records: &[AuditRecord]) -> Vec<ConditionSummary> {
    let mut map: HashMap<Condition, (usize, f64)> = HashMap::new();

    for record in records {
        let entry = map.entry(record.condition).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += record.confidence_percent;
    }

    let mut summaries: Vec<ConditionSummary> = map
        .into_iter()
        .map(|(condition, (count, total))| ConditionSummary {
            condition,
            count,
            avg_confidence: if count == 0 { 0.0 } else { total / count as f64 },
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.condition.as_str().cmp(b.condition.as_str()))
    });
    summaries
}

/// Printable report for one classification.
pub fn build_result_report(outcome: &Outcome) -> String {
    let result = &outcome.result;
    let mut output = String::new();

    let _ = writeln!(output, "# {} Report", result.condition.display_name());
    let _ = writeln!(
        output,
        "Patient {} on {}",
        outcome.subject_id,
        result.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "| Parameter | Result |");
    let _ = writeln!(output, "|---|---|");
    let _ = writeln!(output, "| Result | {} |", result.label);
    let _ = writeln!(output, "| Severity | {} |", result.severity_label);
    if let Some(stage) = result.stage {
        let _ = writeln!(output, "| Probable Stage | {} |", stage.stage);
    }
    let _ = writeln!(output, "| Confidence | {:.2}% |", result.confidence_percent);
    let _ = writeln!(output, "| Urgency | {} |", outcome.advice.urgency);
    let _ = writeln!(output, "| Recommended Specialist | {} |", outcome.advice.specialist);
    let _ = writeln!(output, "| Recommended Action | {} |", outcome.advice.action);
    let _ = writeln!(output);
    let _ = writeln!(output, "{}", outcome.summary);
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "_AI-assisted output. Clinical confirmation required._"
    );

    output
}

/// Markdown history for one subject, or all subjects when `subject` is `None`.
pub fn build_history_report(subject: Option<&str>, records: &[AuditRecord]) -> String {
    let summaries = summarize_by_condition(records);
    let mut output = String::new();

    let _ = writeln!(output, "# Prediction History");
    let _ = writeln!(output, "Generated for {}", subject.unwrap_or("all patients"));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Predictions by Tool");

    if summaries.is_empty() {
        let _ = writeln!(output, "No predictions recorded.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} predictions (avg confidence {:.1}%)",
                summary.condition.display_name(),
                summary.count,
                summary.avg_confidence
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Predictions");

    if records.is_empty() {
        let _ = writeln!(output, "No predictions recorded.");
    } else {
        for record in records.iter().take(20) {
            let _ = writeln!(
                output,
                "- {} {} ({}): {} at {:.2}%",
                record.created_at.format("%Y-%m-%d %H:%M:%S"),
                record.subject_id,
                record.condition,
                record.label,
                record.confidence_percent
            );
        }
    }

    output
}

/// Writes records as CSV, one row per prediction. Summaries are left out.
pub fn write_csv(records: &[AuditRecord], path: &Path) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "id",
        "subject_id",
        "condition",
        "label",
        "confidence_percent",
        "created_at",
    ])?;

    for record in records {
        writer.write_record([
            record.id.to_string(),
            record.subject_id.clone(),
            record.condition.to_string(),
            record.label.clone(),
            format!("{:.2}", record.confidence_percent),
            record.created_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(records.len())
}
