use anyhow::{Context, Result};
use assist_flow::GatewayConfig;
use clap::{Parser, Subcommand};
use medical_assistant::{
    HeuristicClassifier, ImagePayload, ImagingAssistant, ImagingRequest, PrescriptionAssistant,
    PrescriptionRequest,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "medical-assistant",
    version,
    about = "Herbal prescription drafts and modality-checked medical image analysis"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Draft a herbal prescription from a symptom description
    Prescribe {
        symptoms: String,
        /// Patient context as a JSON object, e.g. '{"age": 45, "gender": "女"}'
        #[arg(long)]
        patient: Option<String>,
        /// Override the configured text model
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Analyze an image after checking it is the declared modality
    Analyze {
        image: PathBuf,
        /// One of: xray, ct, mri, ultrasound, petct
        #[arg(long, short)]
        modality: String,
        #[arg(long)]
        patient: Option<String>,
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Run only the offline modality classifier
    Classify { image: PathBuf },
}

/// LOG_FORMAT=pretty for development, JSON otherwise. Logs go to stderr so
/// stdout stays machine-readable.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "medical_assistant=info,assist_flow=info".into());

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
}

fn parse_patient(raw: Option<&str>) -> Result<Option<Value>> {
    raw.map(|text| serde_json::from_str(text).context("--patient must be valid JSON"))
        .transpose()
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Prescribe {
            symptoms,
            patient,
            model,
            max_attempts,
        } => {
            let config = GatewayConfig::from_env()?;
            let mut request = PrescriptionRequest::new(symptoms);
            request.patient_context = parse_patient(patient.as_deref())?;
            request.model = model;
            request.max_attempts = max_attempts;

            let outcome = PrescriptionAssistant::from_config(config)
                .generate(request)
                .await?;
            print_json(&outcome)
        }
        Command::Analyze {
            image,
            modality,
            patient,
            max_attempts,
        } => {
            let config = GatewayConfig::from_env()?;
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let mut request = ImagingRequest::new(ImagePayload::Bytes(bytes), modality);
            request.patient_context = parse_patient(patient.as_deref())?;
            request.max_attempts = max_attempts;

            let outcome = ImagingAssistant::from_config(config).analyze(request).await?;
            print_json(&outcome)
        }
        Command::Classify { image } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("Failed to read {}", image.display()))?;
            let classifier = HeuristicClassifier::default();
            let features = classifier.features(&bytes)?;
            let label = classifier.policy().label_for(&features);
            print_json(&json!({
                "image": image.display().to_string(),
                "detected_modality": label,
                "features": features,
            }))
        }
    }
}
