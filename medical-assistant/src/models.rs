use assist_flow::{AssistError, DegradedRecord};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A string-keyed group of fields inside a generated record.
pub type Section = Map<String, Value>;

pub const DEGRADED_NOTICE: &str = "分析失败，请稍后重试";
pub const CONSULT_PROFESSIONAL: &str = "请咨询专业医师获取诊疗建议";

fn placeholder_section(key: &str, text: &str) -> Section {
    let mut section = Section::new();
    section.insert(key.to_string(), Value::String(text.to_string()));
    section
}

/// Accept an object as-is and treat `null` as an empty group. Anything else
/// is kept under a single key: arrays as `{"items": [...]}`, scalars as
/// `{"summary": "..."}`.
fn lenient_section<'de, D>(deserializer: D) -> Result<Section, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        Value::Null => Section::new(),
        Value::Array(items) => {
            let mut section = Section::new();
            section.insert("items".to_string(), Value::Array(items));
            section
        }
        Value::String(text) => placeholder_section("summary", &text),
        other => placeholder_section("summary", &other.to_string()),
    })
}

/// Render any JSON scalar as text; `null` becomes `None`.
fn value_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_text(Value::deserialize(deserializer)?).filter(|text| !text.is_empty()))
}

/// `null` is an empty list, a single object is a one-herb list, a bare
/// string names a herb, and other entries are skipped.
fn lenient_composition<'de, D>(deserializer: D) -> Result<Vec<HerbEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    };

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::Object(_) => serde_json::from_value(entry).ok(),
            Value::String(herb) if !herb.trim().is_empty() => Some(HerbEntry {
                herb,
                ..Default::default()
            }),
            _ => None,
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default)]
    pub allergies: Vec<String>,
}

/// Input for the prescription assistant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrescriptionRequest {
    pub symptoms: String,
    /// Raw patient context; must be a JSON object when present.
    #[serde(default)]
    pub patient_context: Option<Value>,
    /// Per-call credential, overriding the configured one.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl PrescriptionRequest {
    pub fn new(symptoms: impl Into<String>) -> Self {
        Self {
            symptoms: symptoms.into(),
            ..Default::default()
        }
    }

    pub fn with_patient_context(mut self, context: Value) -> Self {
        self.patient_context = Some(context);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// Image bytes as uploaded, or base64 text (optionally a `data:` URL).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePayload {
    Bytes(Vec<u8>),
    Base64(String),
}

/// Input for the imaging assistant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagingRequest {
    pub image: ImagePayload,
    /// Declared modality, e.g. `"X-ray"` or `"ct"`.
    pub expected_modality: String,
    #[serde(default)]
    pub patient_context: Option<Value>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl ImagingRequest {
    pub fn new(image: ImagePayload, expected_modality: impl Into<String>) -> Self {
        Self {
            image,
            expected_modality: expected_modality.into(),
            patient_context: None,
            api_key: None,
            max_attempts: None,
        }
    }
}

/// One herb in the formula.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HerbEntry {
    #[serde(default, deserialize_with = "lenient_text")]
    pub herb: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub dosage: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub role: String,
    #[serde(
        default,
        deserialize_with = "lenient_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub function: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub preparation: Option<String>,
}

/// Structured herbal prescription generated from symptoms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    #[serde(default, deserialize_with = "lenient_section")]
    pub syndrome_type: Section,
    #[serde(default, deserialize_with = "lenient_section")]
    pub treatment_method: Section,
    #[serde(default, deserialize_with = "lenient_section")]
    pub main_prescription: Section,
    #[serde(default, deserialize_with = "lenient_composition")]
    pub composition: Vec<HerbEntry>,
    #[serde(default, deserialize_with = "lenient_section")]
    pub usage: Section,
    #[serde(default, deserialize_with = "lenient_section")]
    pub contraindications: Section,
}

impl DegradedRecord for Prescription {
    fn degraded(failure: &AssistError) -> Self {
        let reason = format!("{DEGRADED_NOTICE}（{}）", failure.kind_label());
        Prescription {
            syndrome_type: placeholder_section("main_syndrome", &reason),
            treatment_method: placeholder_section("main_method", CONSULT_PROFESSIONAL),
            main_prescription: placeholder_section("name", CONSULT_PROFESSIONAL),
            composition: vec![HerbEntry {
                herb: DEGRADED_NOTICE.to_string(),
                dosage: "-".to_string(),
                role: "-".to_string(),
                function: Some(CONSULT_PROFESSIONAL.to_string()),
                preparation: None,
            }],
            usage: placeholder_section("administration", CONSULT_PROFESSIONAL),
            contraindications: placeholder_section(
                "warnings",
                "本结果未能生成，请勿自行用药，务必咨询专业中医师",
            ),
        }
    }
}

/// The imaging techniques a caller can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    Xray,
    Ct,
    Mri,
    Ultrasound,
    PetCt,
}

impl Modality {
    pub const ALL: [Modality; 5] = [
        Modality::Xray,
        Modality::Ct,
        Modality::Mri,
        Modality::Ultrasound,
        Modality::PetCt,
    ];

    /// Machine label used in results and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Modality::Xray => "xray",
            Modality::Ct => "ct",
            Modality::Mri => "mri",
            Modality::Ultrasound => "ultrasound",
            Modality::PetCt => "petct",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Modality::Xray => "X-ray",
            Modality::Ct => "CT",
            Modality::Mri => "MRI",
            Modality::Ultrasound => "Ultrasound",
            Modality::PetCt => "PET-CT",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Modality {
    type Err = String;

    /// Accepts labels and display names, ignoring case, spaces, `-` and `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        Modality::ALL
            .into_iter()
            .find(|m| m.label() == key)
            .ok_or_else(|| {
                format!(
                    "Unsupported modality '{}', expected one of: X-ray, CT, MRI, Ultrasound, PET-CT",
                    s
                )
            })
    }
}

impl Serialize for Modality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Modality {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Classifier output: a known modality or `unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModalityLabel {
    Detected(Modality),
    #[default]
    Unknown,
}

impl ModalityLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModalityLabel::Detected(modality) => modality.label(),
            ModalityLabel::Unknown => "unknown",
        }
    }

    pub fn matches(&self, expected: Modality) -> bool {
        *self == ModalityLabel::Detected(expected)
    }
}

impl fmt::Display for ModalityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Modality> for ModalityLabel {
    fn from(modality: Modality) -> Self {
        ModalityLabel::Detected(modality)
    }
}

impl Serialize for ModalityLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ModalityLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(raw
            .parse::<Modality>()
            .map(ModalityLabel::Detected)
            .unwrap_or(ModalityLabel::Unknown))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Unknown,
    Mild,
    Moderate,
    Severe,
    Critical,
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(match raw.trim().to_lowercase().as_str() {
            "mild" | "轻度" => Severity::Mild,
            "moderate" | "中度" => Severity::Moderate,
            "severe" | "重度" => Severity::Severe,
            "critical" | "危重" => Severity::Critical,
            _ => Severity::Unknown,
        })
    }
}

/// Numbers and numeric text are accepted. Values in (1, 100] and anything
/// written with `%` are read as percentages. Missing or unreadable values
/// become NaN so the caller can tell them apart from a real zero.
fn lenient_confidence<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let text = s.trim();
            match text.strip_suffix('%') {
                Some(percent) => percent.trim().parse::<f64>().map_or(f64::NAN, |v| v / 100.0),
                None => text.parse::<f64>().unwrap_or(f64::NAN),
            }
        }
        _ => f64::NAN,
    };
    Ok(if raw > 1.0 && raw <= 100.0 { raw / 100.0 } else { raw })
}

fn missing_confidence() -> f64 {
    f64::NAN
}

/// Structured findings for a medical image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImagingReport {
    #[serde(default)]
    pub detected_modality: ModalityLabel,
    #[serde(default, deserialize_with = "lenient_section")]
    pub findings: Section,
    #[serde(default, deserialize_with = "lenient_section")]
    pub diagnosis: Section,
    #[serde(default, deserialize_with = "lenient_section")]
    pub recommendations: Section,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default = "missing_confidence", deserialize_with = "lenient_confidence")]
    pub confidence: f64,
}

/// Lowest confidence a completed analysis reports; exactly 0.0 is reserved
/// for mismatches and failures.
pub const MIN_ANALYSIS_CONFIDENCE: f64 = 0.01;

impl ImagingReport {
    /// Keep confidence inside `[0.0, 1.0]`; anything non-finite becomes 0.0.
    pub fn clamp_confidence(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Confidence for a completed analysis: clamped into
    /// `[MIN_ANALYSIS_CONFIDENCE, 1.0]`, with missing, zero, negative or
    /// non-finite values raised to the floor.
    pub fn floor_confidence(self) -> Self {
        let mut report = self.clamp_confidence();
        report.confidence = report.confidence.max(MIN_ANALYSIS_CONFIDENCE);
        report
    }
}

impl DegradedRecord for ImagingReport {
    fn degraded(failure: &AssistError) -> Self {
        let reason = format!("{DEGRADED_NOTICE}（{}）", failure.kind_label());
        ImagingReport {
            detected_modality: ModalityLabel::Unknown,
            findings: placeholder_section("summary", &reason),
            diagnosis: placeholder_section("primary", CONSULT_PROFESSIONAL),
            recommendations: placeholder_section(
                "follow_up",
                "请将影像交由专业影像科医师阅片",
            ),
            severity: Severity::Unknown,
            confidence: 0.0,
        }
    }
}
