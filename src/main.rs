use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod config;
mod db;
mod error;
mod models;
mod pipeline;
mod report;
mod risk;
mod scoring;
mod summary;
mod triage;

use config::Config;
use models::{ClassificationRequest, Condition, Features};
use pipeline::Pipeline;
use scoring::ModelRegistry;
use summary::SummaryComposer;

#[derive(Parser)]
#[command(name = "clinical-triage")]
#[command(about = "Clinical risk classification and triage service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Serve the HTTP API
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Classify one case from a score, feature values or an image
    #[command(group(
        ArgGroup::new("input")
            .args(["probability", "features", "image"])
            .required(true)
            .multiple(false)
    ))]
    Classify {
        #[arg(long, value_enum)]
        condition: Condition,
        /// Patient reference; a new one is generated when omitted
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        probability: Option<f64>,
        #[arg(long, value_delimiter = ',')]
        features: Option<Vec<f64>>,
        #[arg(long)]
        image: Option<PathBuf>,
        /// Write a markdown report of the result
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List recorded predictions, newest first
    History {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Generate a markdown history report
    Report {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value_t = 200)]
        limit: i64,
        #[arg(long, default_value = "history.md")]
        out: PathBuf,
    },
    /// Export recorded predictions as CSV
    Export {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value_t = 10_000)]
        limit: i64,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Remove every recorded prediction of one patient
    ClearHistory {
        #[arg(long)]
        subject: String,
    },
    /// Create a user account
    AddUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "user")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let pool = db::connect(&config.database_url).await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await.context("failed to apply migrations")?;
            println!("Schema ready.");
        }
        Commands::Serve { port } => {
            db::init_db(&pool).await.context("failed to apply migrations")?;
            let models = ModelRegistry::load(&config.models_dir);
            let loaded: Vec<&str> = Condition::ALL
                .iter()
                .filter(|condition| models.is_loaded(**condition))
                .map(|condition| condition.as_str())
                .collect();
            tracing::info!("Models ready: [{}]", loaded.join(", "));

            let composer = SummaryComposer::from_config(&config)?;
            let state = Arc::new(Pipeline::new(models, composer, pool));
            let app = api::router(state);

            let addr = format!("0.0.0.0:{}", port.unwrap_or(config.port));
            tracing::info!("Listening on {}", addr);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            axum::serve(listener, app).await?;
        }
        Commands::Classify {
            condition,
            subject,
            probability,
            features,
            image,
            out,
        } => {
            let subject = subject.unwrap_or_else(models::new_subject_id);
            let composer = SummaryComposer::from_config(&config)?;

            let outcome = if let Some(probability) = probability {
                Pipeline::new(ModelRegistry::new(), composer, pool)
                    .evaluate(&subject, condition, probability)
                    .await?
            } else {
                let features = match (features, image) {
                    (Some(values), _) => Features::Tabular(values),
                    (None, Some(path)) => Features::Image(
                        std::fs::read(&path)
                            .with_context(|| format!("failed to read {}", path.display()))?,
                    ),
                    (None, None) => anyhow::bail!("one of --probability, --features or --image is required"),
                };
                let models = ModelRegistry::load(&config.models_dir);
                Pipeline::new(models, composer, pool)
                    .run(ClassificationRequest {
                        subject_id: subject.clone(),
                        condition,
                        features,
                    })
                    .await?
            };

            let result = &outcome.result;
            println!("Patient {}", outcome.subject_id);
            println!(
                "- {}: {} ({}) at {:.2}% confidence",
                condition.display_name(),
                result.label,
                result.severity_label,
                result.confidence_percent
            );
            if let Some(stage) = result.stage {
                println!("- Stage: {} ({})", stage.stage, stage.risk);
            }
            println!(
                "- {}: see {} ({})",
                outcome.advice.urgency, outcome.advice.specialist, outcome.advice.action
            );
            if !outcome.saved() {
                println!("Warning: result was not saved to history.");
            }
            println!();
            println!("{}", outcome.summary);

            if let Some(out) = out {
                std::fs::write(&out, report::build_result_report(&outcome))?;
                println!("Report written to {}.", out.display());
            }
        }
        Commands::History { subject, limit } => {
            let records = db::fetch(&pool, subject.as_deref(), limit).await?;

            if records.is_empty() {
                println!("No predictions recorded.");
                return Ok(());
            }

            for record in records.iter() {
                println!(
                    "- #{} {} {} ({}): {} at {:.2}%",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.subject_id,
                    record.condition,
                    record.label,
                    record.confidence_percent
                );
            }
        }
        Commands::Report {
            subject,
            limit,
            out,
        } => {
            let records = db::fetch(&pool, subject.as_deref(), limit).await?;
            let report = report::build_history_report(subject.as_deref(), &records);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export {
            subject,
            limit,
            csv,
        } => {
            let records = db::fetch(&pool, subject.as_deref(), limit).await?;
            let written = report::write_csv(&records, &csv)?;
            println!("Exported {written} predictions to {}.", csv.display());
        }
        Commands::ClearHistory { subject } => {
            let removed = db::clear_history(&pool, &subject).await?;
            println!("Removed {removed} predictions for {subject}.");
        }
        Commands::AddUser {
            username,
            password,
            role,
        } => {
            let session = db::create_user(&pool, &username, &password, &role).await?;
            println!("User {} created with role {}.", session.username, session.role);
        }
    }

    Ok(())
}
