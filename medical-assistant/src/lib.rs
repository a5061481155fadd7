pub mod imaging;
pub mod modality;
pub mod models;
pub mod prescription;
pub mod prompts;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use imaging::ImagingAssistant;
pub use modality::{ClassifierPolicy, FeatureVector, HeuristicClassifier, ModalityClassifier};
pub use models::{
    HerbEntry, ImagePayload, ImagingReport, ImagingRequest, Modality, ModalityLabel,
    PatientContext, Prescription, PrescriptionRequest, Severity,
};
pub use prescription::PrescriptionAssistant;
