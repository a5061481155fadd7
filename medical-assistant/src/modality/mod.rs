//! Offline modality pre-check run before any vision model call.

pub mod classifier;
pub mod features;
pub mod gate;

pub use classifier::{ClassifierPolicy, HeuristicClassifier, ModalityClassifier};
pub use features::FeatureVector;
pub use gate::{GateDecision, check};
