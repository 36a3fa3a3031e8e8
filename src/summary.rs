use std::fmt::Write;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::Condition;
use crate::triage;

pub const UNAVAILABLE_PREFIX: &str = "AI summary unavailable";

/// Fixed advisory content for one condition.
struct Template {
    meaning: &'static str,
    symptoms: &'static str,
    precautions: &'static str,
    diet: &'static [&'static str],
    next_steps: &'static [&'static str],
}

const XRAY: Template = Template {
    meaning: "The chest radiograph was screened for signs of pneumonia.",
    symptoms: "Cough, fever, chest pain on breathing, shortness of breath.",
    precautions: "Rest, stay hydrated, avoid smoking and seek care if breathing worsens.",
    diet: &[
        "Warm fluids and soups.",
        "Protein-rich meals to support recovery.",
        "Fruits high in vitamin C.",
        "Avoid alcohol.",
        "Small, frequent meals if appetite is low.",
    ],
    next_steps: &[
        "24 hours: Monitor temperature and breathing.",
        "3 days: Radiologist review of the image.",
        "7 days: Follow-up imaging if symptoms persist.",
    ],
};

const DIABETES: Template = Template {
    meaning: "The model estimated the likelihood of impaired glucose regulation from the clinical values.",
    symptoms: "Thirst, frequent urination, fatigue, blurred vision.",
    precautions: "Monitor blood glucose, increase activity, modify diet.",
    diet: &[
        "Balanced breakfast with protein and fiber.",
        "Reduce refined carbs and sugars.",
        "Regular small meals and portion control.",
        "Avoid sugary drinks.",
        "Prefer complex carbs and legumes.",
    ],
    next_steps: &[
        "24 hours: Record fasting blood glucose if possible.",
        "3 days: Start a dietary log.",
        "7 days: Confirm with HbA1c and fasting glucose tests.",
    ],
};

const HEART: Template = Template {
    meaning: "The model estimated coronary disease risk from the cardiac parameters.",
    symptoms: "Chest discomfort, shortness of breath, palpitations, fatigue on exertion.",
    precautions: "Regular exercise, avoid tobacco, manage cholesterol and blood pressure.",
    diet: &[
        "Increase vegetables and whole grains.",
        "Lean proteins such as fish and poultry.",
        "Reduce saturated fats and processed foods.",
        "Limit salt and sugar.",
        "Maintain hydration.",
    ],
    next_steps: &[
        "24 hours: Keep track of symptoms.",
        "3 days: Book a cardiology consult if concerns persist.",
        "7 days: ECG and lipid profile as recommended.",
    ],
};

const CANCER: Template = Template {
    meaning: "The classifier assessed the tumour measurements for signs of malignancy.",
    symptoms: "Lump, localized pain, changes in tissue or skin.",
    precautions: "Promptly evaluate any new lumps or changes; follow-up imaging.",
    diet: &[
        "High-antioxidant fruits and vegetables.",
        "Lean proteins and whole grains.",
        "Avoid processed meats and alcohol.",
        "Maintain a healthy BMI.",
        "Ensure adequate protein intake during treatment.",
    ],
    next_steps: &[
        "24 hours: Keep records of any symptoms.",
        "3 days: Schedule an oncology consult.",
        "7 days: Biopsy and imaging if advised.",
    ],
};

fn template(condition: Condition) -> &'static Template {
    match condition {
        Condition::Xray => &XRAY,
        Condition::Diabetes => &DIABETES,
        Condition::Heart => &HEART,
        Condition::Cancer => &CANCER,
    }
}

/// Offline advisory text. Deterministic for identical inputs.
pub fn compose_template(condition: Condition, label: &str, confidence_percent: f64) -> String {
    let template = template(condition);
    let mut output = String::new();

    let _ = writeln!(output, "## {}", condition.display_name());
    let _ = writeln!(output, "Result: {label} ({confidence_percent:.1}% confidence)");
    let _ = writeln!(output);
    let _ = writeln!(output, "### Meaning of the Result");
    let _ = writeln!(output, "{}", template.meaning);
    let _ = writeln!(output);
    let _ = writeln!(output, "### Which Doctor to Consult");
    let _ = writeln!(output, "{}", triage::specialist(condition));
    let _ = writeln!(output);
    let _ = writeln!(output, "### Common Symptoms & Risks");
    let _ = writeln!(output, "{}", template.symptoms);
    let _ = writeln!(output);
    let _ = writeln!(output, "### Precautions & Safety Measures");
    let _ = writeln!(output, "{}", template.precautions);
    let _ = writeln!(output);
    let _ = writeln!(output, "### Diet Plan");
    for item in template.diet {
        let _ = writeln!(output, "- {item}");
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "### Next Steps");
    for item in template.next_steps {
        let _ = writeln!(output, "- {item}");
    }
    let _ = writeln!(output);
    let _ = write!(
        output,
        "This is an AI-based prediction. Please consult a qualified doctor for clinical interpretation."
    );

    output
}

pub fn advisory_prompt(condition: Condition, label: &str, confidence_percent: f64) -> String {
    format!(
        "You are a senior clinical doctor AI. Provide a concise patient-friendly medical advisory summary.\n\n\
         Condition: {}\n\
         Diagnosis Result: {label}\n\
         Confidence Level: {confidence_percent:.1}%\n\n\
         Include these sections with headings and short bullets:\n\n\
         1. Meaning of the Result\n\
         2. Which Doctor to Consult (specialist + urgency)\n\
         3. Common Symptoms & Risks\n\
         4. Precautions & Safety Measures\n\
         5. Diet Plan (5 bullets)\n\
         6. Next Medical Steps (24 hours, 3 days, 7 days; tests)\n\n\
         Keep tone calm and helpful.",
        condition.display_name()
    )
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

/// Forwards the advisory prompt to an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct DelegatedComposer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl DelegatedComposer {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    async fn request(&self, prompt: &str) -> anyhow::Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response: ChatResponse = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .unwrap_or_default();

        anyhow::ensure!(!text.is_empty(), "empty completion");
        Ok(text)
    }
}

#[derive(Debug, Clone)]
pub enum SummaryComposer {
    Template,
    Delegated(DelegatedComposer),
}

impl SummaryComposer {
    /// Uses the delegated strategy when an API key is configured.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        match &config.openai_api_key {
            Some(key) => Ok(SummaryComposer::Delegated(DelegatedComposer::new(
                &config.openai_base_url,
                key.clone(),
                config.openai_model.clone(),
                Duration::from_secs(config.summary_timeout_secs),
            )?)),
            None => Ok(SummaryComposer::Template),
        }
    }

    /// Never fails: a delegated error comes back as an explicit unavailable notice.
    pub async fn compose(&self, condition: Condition, label: &str, confidence_percent: f64) -> String {
        match self {
            SummaryComposer::Template => compose_template(condition, label, confidence_percent),
            SummaryComposer::Delegated(delegated) => {
                let prompt = advisory_prompt(condition, label, confidence_percent);
                match delegated.request(&prompt).await {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(%condition, "summary delegation failed: {err:#}");
                        format!("{UNAVAILABLE_PREFIX}: {err}")
                    }
                }
            }
        }
    }
}
