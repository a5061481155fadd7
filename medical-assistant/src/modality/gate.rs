use assist_flow::{AssistError, Result};
use serde_json::Value;
use tracing::warn;

use crate::models::{
    CONSULT_PROFESSIONAL, ImagingReport, Modality, ModalityLabel, Section, Severity,
};

/// What the imaging pipeline does after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// The image looks like the declared modality; run the vision model.
    Proceed,
    /// Terminal result; the vision model must not be called.
    Mismatch(ImagingReport),
}

/// Compare the classifier's verdict with the declared modality.
pub fn check(detected: Result<ModalityLabel>, expected: Modality) -> GateDecision {
    match detected {
        Ok(label) if label.matches(expected) => GateDecision::Proceed,
        Ok(label) => {
            warn!(detected = %label, expected = %expected, "Image modality mismatch");
            GateDecision::Mismatch(mismatch_report(label, expected, None))
        }
        Err(err) => {
            warn!(expected = %expected, error = %err, "Image could not be classified");
            GateDecision::Mismatch(mismatch_report(ModalityLabel::Unknown, expected, Some(&err)))
        }
    }
}

fn mismatch_report(
    detected: ModalityLabel,
    expected: Modality,
    failure: Option<&AssistError>,
) -> ImagingReport {
    let mut findings = Section::new();
    findings.insert(
        "modality_check".to_string(),
        Value::String(format!(
            "影像类型不匹配：检测为 {detected}，期望为 {}",
            expected.label()
        )),
    );
    findings.insert("detected".to_string(), Value::String(detected.to_string()));
    findings.insert("expected".to_string(), Value::String(expected.label().to_string()));
    if let Some(err) = failure {
        findings.insert("error".to_string(), Value::String(err.to_string()));
    }

    let mut diagnosis = Section::new();
    diagnosis.insert(
        "primary".to_string(),
        Value::String("未进行分析，上传的影像与声明的检查类型不一致".to_string()),
    );

    let mut recommendations = Section::new();
    recommendations.insert(
        "action".to_string(),
        Value::String(format!(
            "请上传 {} 影像后重试；{CONSULT_PROFESSIONAL}",
            expected.display_name()
        )),
    );

    ImagingReport {
        detected_modality: detected,
        findings,
        diagnosis,
        recommendations,
        severity: Severity::Unknown,
        confidence: 0.0,
    }
}
