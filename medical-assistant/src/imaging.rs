use assist_flow::{
    AssistError, ChatRequest, GatewayConfig, HttpGateway, ModelGateway, Outcome, Result,
    RetryOrchestrator, VISION_TIMEOUT,
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use std::sync::Arc;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::models::{ImagingReport, ImagingRequest, Modality, ModalityLabel};
use crate::modality::{GateDecision, HeuristicClassifier, ModalityClassifier, check};
use crate::prompts::{IMAGING_SYSTEM_ROLE, imaging_prompt};
use crate::validation::{decode_image, validate_budget, validate_modality, validate_patient_context};

/// Analyzes a medical image after confirming it is the declared modality.
pub struct ImagingAssistant {
    gateway: Arc<dyn ModelGateway>,
    classifier: Arc<dyn ModalityClassifier>,
    config: GatewayConfig,
}

impl ImagingAssistant {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        classifier: Arc<dyn ModalityClassifier>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            gateway,
            classifier,
            config,
        }
    }

    /// HTTP gateway plus the default heuristic classifier.
    pub fn from_config(config: GatewayConfig) -> Self {
        Self::new(
            Arc::new(HttpGateway::new(&config)),
            Arc::new(HeuristicClassifier::default()),
            config,
        )
    }

    /// A modality mismatch is a normal result with zero confidence and no
    /// model call. Only invalid input is returned as an error.
    pub async fn analyze(&self, request: ImagingRequest) -> Result<Outcome<ImagingReport>> {
        let expected = validate_modality(&request.expected_modality)?;
        let image = decode_image(&request.image)?;
        let patient = validate_patient_context(request.patient_context.as_ref())?;
        let max_attempts = validate_budget(
            "max_attempts",
            request.max_attempts.unwrap_or(self.config.max_attempts),
        )?;

        let request_id = Uuid::new_v4();
        let span = info_span!("imaging", request_id = %request_id, expected = %expected);

        async {
            info!(image_bytes = image.len(), "Classifying image modality");
            let (image, detected) = self.classify(image).await;

            if let GateDecision::Mismatch(report) = check(detected, expected) {
                return Ok(Outcome::completed(request_id, report, 0));
            }

            let data_url = data_url(&image);
            let prompt = imaging_prompt(expected, patient.as_ref());
            let outcome: Outcome<ImagingReport> = RetryOrchestrator::new(self.gateway.as_ref())
                .with_max_attempts(max_attempts)
                .run(request_id, |_| {
                    Ok(
                        ChatRequest::text(&self.config.vision_model, IMAGING_SYSTEM_ROLE, &prompt)
                            .with_image(data_url.as_str())
                            .with_max_tokens(self.config.max_tokens)
                            .with_timeout(VISION_TIMEOUT)
                            .with_api_key(request.api_key.clone()),
                    )
                })
                .await;

            let degraded = outcome.degraded;
            let outcome = outcome.map(|report| finalize(report, expected, degraded));
            info!(
                attempts = outcome.attempts,
                degraded = outcome.degraded,
                severity = ?outcome.record.severity,
                confidence = outcome.record.confidence,
                "Image analysis ready"
            );
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Pixel statistics are CPU-bound, so they run off the async workers.
    async fn classify(&self, image: Vec<u8>) -> (Vec<u8>, Result<ModalityLabel>) {
        let classifier = Arc::clone(&self.classifier);
        tokio::task::spawn_blocking(move || {
            let detected = classifier.classify(&image);
            (image, detected)
        })
        .await
        .unwrap_or_else(|e| {
            (
                Vec::new(),
                Err(AssistError::Classification(format!(
                    "Classifier task failed: {e}"
                ))),
            )
        })
    }
}

fn data_url(image: &[u8]) -> String {
    let mime = image::guess_format(image)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/png");
    format!("data:{mime};base64,{}", STANDARD.encode(image))
}

/// Zero confidence is left to mismatches and failures; a completed
/// analysis always reports at least the floor.
fn finalize(report: ImagingReport, detected: Modality, degraded: bool) -> ImagingReport {
    let mut report = if degraded {
        ImagingReport {
            confidence: 0.0,
            ..report
        }
    } else {
        report.floor_confidence()
    };
    report.detected_modality = ModalityLabel::Detected(detected);
    report
}
