use assist_flow::{
    ChatRequest, GatewayConfig, HttpGateway, ModelGateway, Outcome, Result, RetryOrchestrator,
    TEXT_TIMEOUT,
};
use std::sync::Arc;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::models::{Prescription, PrescriptionRequest};
use crate::prompts::{PRESCRIPTION_SYSTEM_ROLE, prescription_prompt};
use crate::validation::{validate_budget, validate_patient_context, validate_symptoms};

/// Turns a symptom description into a structured herbal prescription.
pub struct PrescriptionAssistant {
    gateway: Arc<dyn ModelGateway>,
    config: GatewayConfig,
}

impl PrescriptionAssistant {
    pub fn new(gateway: Arc<dyn ModelGateway>, config: GatewayConfig) -> Self {
        Self { gateway, config }
    }

    /// Assistant talking to the configured HTTP endpoint.
    pub fn from_config(config: GatewayConfig) -> Self {
        let gateway = Arc::new(HttpGateway::new(&config));
        Self::new(gateway, config)
    }

    /// Only invalid input is returned as an error. Every model or parse
    /// failure ends in a degraded, fully populated prescription instead.
    pub async fn generate(&self, request: PrescriptionRequest) -> Result<Outcome<Prescription>> {
        let symptoms = validate_symptoms(&request.symptoms)?;
        let patient = validate_patient_context(request.patient_context.as_ref())?;
        let max_attempts = validate_budget(
            "max_attempts",
            request.max_attempts.unwrap_or(self.config.max_attempts),
        )?;
        let max_tokens = validate_budget(
            "max_tokens",
            request.max_tokens.unwrap_or(self.config.max_tokens),
        )?;

        let request_id = Uuid::new_v4();
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.config.text_model.clone());
        let prompt = prescription_prompt(&symptoms, patient.as_ref());

        let span = info_span!("prescription", request_id = %request_id, model = %model);
        async {
            info!(
                symptom_chars = symptoms.chars().count(),
                has_patient_context = patient.is_some(),
                "Generating prescription"
            );

            let outcome: Outcome<Prescription> = RetryOrchestrator::new(self.gateway.as_ref())
                .with_max_attempts(max_attempts)
                .run(request_id, |_| {
                    Ok(ChatRequest::text(&model, PRESCRIPTION_SYSTEM_ROLE, &prompt)
                        .with_max_tokens(max_tokens)
                        .with_timeout(TEXT_TIMEOUT)
                        .with_api_key(request.api_key.clone()))
                })
                .await;

            info!(
                attempts = outcome.attempts,
                degraded = outcome.degraded,
                herbs = outcome.record.composition.len(),
                "Prescription ready"
            );
            Ok(outcome)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HerbEntry;
    use crate::test_support::StubGateway;
    use assist_flow::AssistError;
    use serde_json::json;

    fn assistant(gateway: &Arc<StubGateway>) -> PrescriptionAssistant {
        PrescriptionAssistant::new(gateway.clone(), GatewayConfig::new("test-key"))
    }

    fn sample_prescription() -> serde_json::Value {
        json!({
            "syndrome_type": {"main_syndrome": "风寒表证", "analysis": "恶寒重，发热轻"},
            "treatment_method": {"main_method": "辛温解表"},
            "main_prescription": {"name": "麻黄汤", "source": "《伤寒论》"},
            "composition": [
                {"herb": "麻黄", "dosage": "9g", "role": "君", "function": "发汗解表"},
                {"herb": "桂枝", "dosage": "6g", "role": "臣"},
                {"herb": "杏仁", "dosage": "6g", "role": "佐", "preparation": "后下"},
                {"herb": "甘草", "dosage": "3g", "role": "使"}
            ],
            "usage": {"preparation_method": "水煎服", "administration": "每日一剂，分两次温服"},
            "contraindications": {"pregnancy": "孕妇慎用", "diet": "忌生冷"}
        })
    }

    #[tokio::test]
    async fn test_well_formed_reply_round_trips() {
        let body = sample_prescription();
        let gateway = Arc::new(StubGateway::replying(body.to_string()));

        let outcome = assistant(&gateway)
            .generate(PrescriptionRequest::new("恶寒发热，头身疼痛，无汗"))
            .await
            .unwrap();

        let expected: Prescription = serde_json::from_value(body).unwrap();
        assert_eq!(outcome.record, expected);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.degraded);
        assert!(outcome.failure.is_none());
        assert_eq!(gateway.calls(), 1);
        assert_eq!(
            outcome.record.composition[0],
            HerbEntry {
                herb: "麻黄".into(),
                dosage: "9g".into(),
                role: "君".into(),
                function: Some("发汗解表".into()),
                preparation: None,
            }
        );
    }

    #[tokio::test]
    async fn test_persistent_timeouts_degrade_after_three_calls() {
        let gateway = Arc::new(StubGateway::failing("Request timeout after 60s"));

        let outcome = assistant(&gateway)
            .generate(PrescriptionRequest::new("咳嗽痰多"))
            .await
            .unwrap();

        assert_eq!(gateway.calls(), 3);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.degraded);
        assert_eq!(outcome.failure.as_ref().unwrap().kind, "timeout");

        let record = &outcome.record;
        for section in [
            &record.syndrome_type,
            &record.treatment_method,
            &record.main_prescription,
            &record.usage,
            &record.contraindications,
        ] {
            assert!(!section.is_empty());
        }
        assert!(!record.composition.is_empty());
    }

    #[tokio::test]
    async fn test_fenced_reply_with_trailing_comma_parses_first_time() {
        let gateway = Arc::new(StubGateway::replying(
            "```json\n{\"syndrome_type\": {\"main_syndrome\": \"肝阳上亢\",}, \"composition\": [],}\n```",
        ));

        let outcome = assistant(&gateway)
            .generate(PrescriptionRequest::new("头晕目眩"))
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.degraded);
        assert_eq!(outcome.record.syndrome_type["main_syndrome"], "肝阳上亢");
        assert!(outcome.record.usage.is_empty());
    }

    #[tokio::test]
    async fn test_loosely_shaped_fields_do_not_cost_a_retry() {
        let replies = [
            json!({"syndrome_type": {"main_syndrome": "风寒"}, "composition": null}),
            json!({"composition": [{"herb": "麻黄", "dosage": 9, "role": "君"}]}),
            json!({"contraindications": ["孕妇慎用"], "usage": "水煎服"}),
        ];

        for reply in replies {
            let gateway = Arc::new(StubGateway::replying(reply.to_string()));
            let outcome = assistant(&gateway)
                .generate(PrescriptionRequest::new("恶寒发热"))
                .await
                .unwrap();

            assert_eq!(gateway.calls(), 1, "{reply}");
            assert_eq!(outcome.attempts, 1, "{reply}");
            assert!(!outcome.degraded, "{reply}");
        }

        let gateway = Arc::new(StubGateway::replying(
            json!({"composition": [{"herb": "麻黄", "dosage": 9}]}).to_string(),
        ));
        let outcome = assistant(&gateway)
            .generate(PrescriptionRequest::new("恶寒发热"))
            .await
            .unwrap();
        assert_eq!(outcome.record.composition[0].dosage, "9");
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let body = sample_prescription().to_string();
        let gateway = Arc::new(StubGateway::new(move |call| match call {
            1 => Err(AssistError::gateway("HTTP 503 Service Unavailable")),
            2 => Ok("我无法给出处方".to_string()),
            _ => Ok(body.clone()),
        }));

        let outcome = assistant(&gateway)
            .generate(PrescriptionRequest::new("失眠多梦"))
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert!(!outcome.degraded);
        assert_eq!(outcome.record.main_prescription["name"], "麻黄汤");
    }

    #[tokio::test]
    async fn test_two_character_symptoms_are_accepted() {
        let gateway = Arc::new(StubGateway::replying("{}"));
        let outcome = assistant(&gateway)
            .generate(PrescriptionRequest::new("头痛"))
            .await
            .unwrap();
        assert_eq!(gateway.calls(), 1);
        assert!(!outcome.degraded);
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_the_model() {
        let gateway = Arc::new(StubGateway::replying("{}"));
        let assistant = assistant(&gateway);

        let err = assistant.generate(PrescriptionRequest::new("痛")).await.unwrap_err();
        assert!(err.is_validation());

        let err = assistant
            .generate(PrescriptionRequest::new("头痛发热").with_patient_context(json!("45岁")))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = assistant
            .generate(PrescriptionRequest::new("头痛发热").with_max_attempts(0))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_request_carries_prompt_and_overrides() {
        let gateway = Arc::new(StubGateway::replying("{}"));
        let mut request = PrescriptionRequest::new("腹痛腹泻").with_patient_context(json!({
            "age": 45,
            "gender": "女",
            "allergies": ["青霉素"]
        }));
        request.api_key = Some("per-call-key".to_string());
        request.model = Some("custom-model".to_string());

        assistant(&gateway).generate(request).await.unwrap();

        let sent = gateway.last_request().unwrap();
        assert_eq!(sent.model, "custom-model");
        assert_eq!(sent.system, PRESCRIPTION_SYSTEM_ROLE);
        assert_eq!(sent.timeout, TEXT_TIMEOUT);
        assert_eq!(sent.api_key.as_deref(), Some("per-call-key"));
        let assist_flow::ContentPart::Text(prompt) = &sent.content[0] else {
            panic!("expected a text prompt");
        };
        assert!(prompt.contains("腹痛腹泻"));
        assert!(prompt.contains("患者信息: 年龄45岁，性别女，过敏史: 青霉素"));
    }
}
