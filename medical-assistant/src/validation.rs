//! Input checks that run before any network resource is touched.

use assist_flow::{AssistError, Result};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value;

use crate::models::{ImagePayload, Modality, PatientContext};

pub const MIN_SYMPTOM_CHARS: usize = 2;

/// Returns the trimmed symptom text.
pub fn validate_symptoms(symptoms: &str) -> Result<String> {
    let trimmed = symptoms.trim();
    if trimmed.is_empty() {
        return Err(AssistError::Validation(
            "Symptom description cannot be empty".to_string(),
        ));
    }
    if trimmed.chars().count() < MIN_SYMPTOM_CHARS {
        return Err(AssistError::Validation(format!(
            "Symptom description must be at least {MIN_SYMPTOM_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// The context must be a JSON object when present; `null` counts as absent.
pub fn validate_patient_context(context: Option<&Value>) -> Result<Option<PatientContext>> {
    let map = match context {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(AssistError::Validation(
                "Patient context must be an object".to_string(),
            ));
        }
    };

    let age = map.get("age").and_then(parse_age);
    let gender = map
        .get("gender")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string);
    let allergies = map.get("allergies").map(parse_allergies).unwrap_or_default();

    Ok(Some(PatientContext {
        age,
        gender,
        allergies,
    }))
}

fn parse_age(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .and_then(|age| u32::try_from(age).ok()),
        Value::String(s) => s.trim().trim_end_matches('岁').trim().parse().ok(),
        _ => None,
    }
}

fn parse_allergies(value: &Value) -> Vec<String> {
    let items: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::String(s) => s
            .split([',', '，', '、', ';', '；'])
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Decode the payload into raw image bytes.
pub fn decode_image(payload: &ImagePayload) -> Result<Vec<u8>> {
    let bytes = match payload {
        ImagePayload::Bytes(bytes) => bytes.clone(),
        ImagePayload::Base64(text) => {
            let encoded = strip_data_url(text.trim());
            if encoded.is_empty() {
                return Err(AssistError::Validation("Image payload is empty".to_string()));
            }
            let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD.decode(compact.as_bytes()).map_err(|e| {
                AssistError::Validation(format!("Image payload is not valid base64: {e}"))
            })?
        }
    };

    if bytes.is_empty() {
        return Err(AssistError::Validation("Image payload is empty".to_string()));
    }
    Ok(bytes)
}

fn strip_data_url(text: &str) -> &str {
    match text.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => text,
    }
}

pub fn validate_modality(declared: &str) -> Result<Modality> {
    declared.parse::<Modality>().map_err(AssistError::Validation)
}

pub fn validate_budget(name: &str, value: u32) -> Result<u32> {
    if value == 0 {
        return Err(AssistError::Validation(format!("{name} must be at least 1")));
    }
    Ok(value)
}
