pub mod config;
pub mod error;
pub mod gateway;
pub mod normalize;
pub mod parser;
pub mod retry;

// Re-export commonly used types
pub use config::{GatewayConfig, TEXT_TIMEOUT, VISION_TIMEOUT};
pub use error::{AssistError, FailureKind, Result};
pub use gateway::{ChatRequest, ContentPart, HttpGateway, ModelGateway};
pub use normalize::normalize;
pub use parser::{Parsed, parse_structured};
pub use retry::{AttemptState, DegradedRecord, FailureReport, Outcome, RetryOrchestrator};
