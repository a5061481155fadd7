use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{AssistError, Result};
use crate::normalize::normalize;

/// A record parsed from model output, plus whether repair was needed.
#[derive(Debug, Clone)]
pub struct Parsed<T> {
    pub value: T,
    pub repaired: bool,
}

/// Parse model output into `T`.
///
/// The raw text is tried first; only if that fails is it normalized and tried
/// once more. The document must be a JSON object.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<Parsed<T>> {
    match parse_object(raw) {
        Ok(value) => Ok(Parsed {
            value,
            repaired: false,
        }),
        Err(first) => {
            debug!(error = %first, "Strict parse failed, normalizing model output");
            let repaired = normalize(raw);
            parse_object(&repaired)
                .map(|value| Parsed {
                    value,
                    repaired: true,
                })
                .map_err(|second| {
                    AssistError::Parse(format!("{second} (before repair: {first})"))
                })
        }
    }
}

fn parse_object<T: DeserializeOwned>(text: &str) -> std::result::Result<T, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("expected a JSON object".to_string());
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}
