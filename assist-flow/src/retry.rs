use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::DEFAULT_MAX_ATTEMPTS;
use crate::error::{AssistError, Result};
use crate::gateway::{ChatRequest, ModelGateway};
use crate::parser::parse_structured;

/// Records that can stand in for a real answer once every attempt failed.
pub trait DegradedRecord {
    /// A fully populated record whose text tells the reader the analysis
    /// could not be completed.
    fn degraded(failure: &AssistError) -> Self;
}

/// Why the last attempt failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: String,
    pub message: String,
}

impl From<&AssistError> for FailureReport {
    fn from(error: &AssistError) -> Self {
        Self {
            kind: error.kind_label().to_string(),
            message: error.to_string(),
        }
    }
}

/// What a caller always gets back from a generation: a well-formed record and
/// an explicit signal of whether it is a real answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub request_id: Uuid,
    pub record: T,
    /// `true` when `record` is a placeholder produced after the retry budget
    /// ran out.
    pub degraded: bool,
    /// Model calls attempted (zero when the request was answered without one).
    pub attempts: u32,
    pub failure: Option<FailureReport>,
    pub generated_at: DateTime<Utc>,
}

impl<T> Outcome<T> {
    pub fn completed(request_id: Uuid, record: T, attempts: u32) -> Self {
        Self {
            request_id,
            record,
            degraded: false,
            attempts,
            failure: None,
            generated_at: Utc::now(),
        }
    }

    pub fn exhausted(request_id: Uuid, record: T, attempts: u32, failure: &AssistError) -> Self {
        Self {
            request_id,
            record,
            degraded: true,
            attempts,
            failure: Some(failure.into()),
            generated_at: Utc::now(),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            request_id: self.request_id,
            record: f(self.record),
            degraded: self.degraded,
            attempts: self.attempts,
            failure: self.failure,
            generated_at: self.generated_at,
        }
    }
}

/// States of the bounded attempt loop.
#[derive(Debug)]
pub enum AttemptState<T> {
    Attempting { attempt: u32 },
    Retrying { attempt: u32, error: AssistError },
    Succeeded { attempt: u32, record: T },
    Exhausted { attempts: u32, error: AssistError },
}

impl<T> AttemptState<T> {
    /// Transition after attempt number `attempt` (1-based) has finished.
    pub fn after_attempt(attempt: u32, max_attempts: u32, result: Result<T>) -> Self {
        match result {
            Ok(record) => AttemptState::Succeeded { attempt, record },
            Err(error) if attempt < max_attempts => AttemptState::Retrying { attempt, error },
            Err(error) => AttemptState::Exhausted {
                attempts: attempt,
                error,
            },
        }
    }
}

/// Drives build-prompt → call-model → parse until a record parses or the
/// attempt budget is spent. Attempts never overlap.
pub struct RetryOrchestrator<'a> {
    gateway: &'a dyn ModelGateway,
    max_attempts: u32,
}

impl<'a> RetryOrchestrator<'a> {
    pub fn new(gateway: &'a dyn ModelGateway) -> Self {
        Self {
            gateway,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Budget of model calls; values below one are treated as one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub async fn run<T, B>(&self, request_id: Uuid, build: B) -> Outcome<T>
    where
        T: DeserializeOwned + DegradedRecord + Send,
        B: Fn(u32) -> Result<ChatRequest> + Send + Sync,
    {
        let span = info_span!("generation", request_id = %request_id);
        self.drive(request_id, &build).instrument(span).await
    }

    async fn drive<T, B>(&self, request_id: Uuid, build: &B) -> Outcome<T>
    where
        T: DeserializeOwned + DegradedRecord + Send,
        B: Fn(u32) -> Result<ChatRequest> + Send + Sync,
    {
        let mut state = AttemptState::Attempting { attempt: 1 };

        loop {
            state = match state {
                AttemptState::Attempting { attempt } => {
                    info!(attempt, max_attempts = self.max_attempts, "Starting attempt");
                    let result = self.attempt(attempt, build).await;
                    AttemptState::after_attempt(attempt, self.max_attempts, result)
                }
                AttemptState::Retrying { attempt, error } => {
                    warn!(
                        attempt,
                        kind = error.kind_label(),
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    AttemptState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                AttemptState::Succeeded { attempt, record } => {
                    info!(attempts = attempt, "Generation succeeded");
                    return Outcome::completed(request_id, record, attempt);
                }
                AttemptState::Exhausted { attempts, error } => {
                    error!(
                        attempts,
                        kind = error.kind_label(),
                        error = %error,
                        "Retry budget exhausted, returning degraded record"
                    );
                    return Outcome::exhausted(request_id, T::degraded(&error), attempts, &error);
                }
            };
        }
    }

    async fn attempt<T, B>(&self, attempt: u32, build: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Fn(u32) -> Result<ChatRequest>,
    {
        let request = build(attempt)?;
        let raw = self.gateway.complete(&request).await?;
        let parsed = parse_structured::<T>(&raw)?;
        if parsed.repaired {
            info!("Model output needed repair before parsing");
        }
        Ok(parsed.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Note {
        #[serde(default)]
        text: String,
    }

    impl DegradedRecord for Note {
        fn degraded(_failure: &AssistError) -> Self {
            Note {
                text: "analysis failed, please retry".to_string(),
            }
        }
    }

    /// Replays canned responses in order, counting calls.
    struct ScriptedGateway {
        responses: Mutex<Vec<Result<String>>>,
        calls: AtomicU32,
    }

    impl ScriptedGateway {
        fn new(mut responses: Vec<Result<String>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn complete(&self, _request: &ChatRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(AssistError::gateway("script exhausted")))
        }
    }

    fn request(_attempt: u32) -> Result<ChatRequest> {
        Ok(ChatRequest::text("m", "s", "p"))
    }

    #[tokio::test]
    async fn test_first_valid_response_wins() {
        let gateway = ScriptedGateway::new(vec![Ok(r#"{"text":"ok"}"#.to_string())]);
        let outcome: Outcome<Note> = RetryOrchestrator::new(&gateway)
            .run(Uuid::new_v4(), request)
            .await;

        assert!(!outcome.degraded);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.record.text, "ok");
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_parse_failures_consume_attempts() {
        let gateway = ScriptedGateway::new(vec![
            Ok("not json at all".to_string()),
            Err(AssistError::gateway("HTTP 503 Service Unavailable")),
            Ok(r#"{"text":"third time"}"#.to_string()),
        ]);
        let outcome: Outcome<Note> = RetryOrchestrator::new(&gateway)
            .with_max_attempts(3)
            .run(Uuid::new_v4(), request)
            .await;

        assert!(!outcome.degraded);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.record.text, "third time");
    }

    #[tokio::test]
    async fn test_exhaustion_returns_degraded_record() {
        let gateway = ScriptedGateway::new(vec![
            Err(AssistError::gateway("operation timed out")),
            Err(AssistError::gateway("operation timed out")),
            Err(AssistError::gateway("operation timed out")),
            Ok(r#"{"text":"never reached"}"#.to_string()),
        ]);
        let outcome: Outcome<Note> = RetryOrchestrator::new(&gateway)
            .with_max_attempts(3)
            .run(Uuid::new_v4(), request)
            .await;

        assert!(outcome.degraded);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.record.text, "analysis failed, please retry");
        assert_eq!(outcome.failure.unwrap().kind, "timeout");
    }

    #[tokio::test]
    async fn test_builder_errors_count_as_failed_attempts() {
        let gateway = ScriptedGateway::new(vec![]);
        let outcome: Outcome<Note> = RetryOrchestrator::new(&gateway)
            .with_max_attempts(2)
            .run(Uuid::new_v4(), |_| Err(AssistError::Validation("bad prompt".into())))
            .await;

        assert!(outcome.degraded);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_transitions_follow_the_budget() {
        let retry: AttemptState<()> =
            AttemptState::after_attempt(1, 3, Err(AssistError::Parse("x".into())));
        assert!(matches!(retry, AttemptState::Retrying { attempt: 1, .. }));

        let exhausted: AttemptState<()> =
            AttemptState::after_attempt(3, 3, Err(AssistError::Parse("x".into())));
        assert!(matches!(exhausted, AttemptState::Exhausted { attempts: 3, .. }));

        let done = AttemptState::after_attempt(2, 3, Ok(7));
        assert!(matches!(
            done,
            AttemptState::Succeeded {
                attempt: 2,
                record: 7
            }
        ));
    }
}
