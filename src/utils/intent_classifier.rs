use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

use crate::api::whatsapp_api::ImageData;

const CLASSIFIER_PROMPT: &str = r#"You are an assistant that classifies WhatsApp messages received by small businesses in Latin America. The messages come from their customers and often concern payments (bank transfer receipts, Yape/Plin captures, promises to pay, questions about outstanding balances).

Classify the message into exactly **one** intent:
• `payment` – the customer states or shows that a payment was made (transfer done, receipt/voucher attached, "ya te pagué").
• `promise` – the customer commits to paying later ("te pago el viernes", "la próxima semana te deposito").
• `query` – the customer asks about their balance, a due date, or payment details without paying or promising.
• `other` – anything else (greetings, unrelated chatter, forwarded spam).

Extract whatever payment data the message carries. Never invent values; leave a field null when the message does not state it.

Return **only** a JSON object, no markdown, no commentary:
{
  "intent": "payment" | "promise" | "query" | "other",
  "confidence": 0.0-1.0,
  "extractedData": {
    "amount": number | null,
    "currency": ISO/local code like "PEN", "USD", "MXN" | null,
    "date": "YYYY-MM-DD" | null,
    "paymentMethod": "transferencia" | "yape" | "plin" | "efectivo" | "tarjeta" | null,
    "reference": operation/receipt number | null,
    "dueDate": "YYYY-MM-DD" | null
  },
  "summary": one short sentence in Spanish describing the message,
  "requiresReview": boolean, true when a human should double-check
}

Rules:
• Amounts written as "150", "S/150", "S/ 150.50", "$150" are numeric amounts; strip the symbol. "S/" means PEN, "$" defaults to USD unless context says otherwise.
• Relative dates ("mañana", "el viernes") go to null dates — do not guess calendar dates.
• An image of a transfer receipt is intent `payment` even without text.
• When the message is ambiguous between promise and query, prefer `query` and lower the confidence.
"#;

// Fixed strings: the summary placeholder for a parsed response that carried
// none, and the summary of the fallback result.
const SUMMARY_PLACEHOLDER: &str = "Sin resumen disponible.";
const FALLBACK_SUMMARY: &str = "No se pudo analizar el mensaje automáticamente.";

static CLASSIFIER_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build classifier HTTP client")
});

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Neither text nor image was provided; the caller should have skipped
    /// classification for this message.
    #[error("classification requires text or an image")]
    MissingInput,

    /// Upstream 429. Operationally actionable, so never masked by the fallback.
    #[error("classifier provider rate limit hit")]
    RateLimited,

    /// Upstream 402: the provider account ran out of credits.
    #[error("classifier provider quota exhausted")]
    QuotaExhausted,

    #[error("classifier configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIntent {
    Payment,
    Promise,
    Query,
    Other,
}

impl MessageIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageIntent::Payment => "payment",
            MessageIntent::Promise => "promise",
            MessageIntent::Query => "query",
            MessageIntent::Other => "other",
        }
    }

    // Anything the model returns outside the four known intents lands on Other.
    fn from_loose(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("payment") => MessageIntent::Payment,
            Some("promise") => MessageIntent::Promise,
            Some("query") => MessageIntent::Query,
            _ => MessageIntent::Other,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub intent: MessageIntent,
    pub confidence: f64,
    pub extracted_data: ExtractedData,
    pub summary: String,
    pub requires_review: bool,
    /// The raw JSON the model produced, kept for the dashboard's review view.
    pub raw_output: Option<String>,
}

impl ClassificationResult {
    pub fn fallback() -> Self {
        ClassificationResult {
            intent: MessageIntent::Other,
            confidence: 0.3,
            extracted_data: ExtractedData::default(),
            summary: FALLBACK_SUMMARY.to_string(),
            requires_review: true,
            raw_output: None,
        }
    }
}

// Loose mirror of the model's JSON. Every field is optional so a partially
// conforming response still normalizes instead of falling back wholesale.
#[derive(Deserialize)]
struct RawClassification {
    #[serde(default)]
    intent: Option<String>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default, rename = "extractedData")]
    extracted_data: Option<ExtractedData>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default, rename = "requiresReview")]
    requires_review: Option<bool>,
}

/// Classify one customer message. Transport failures, non-2xx statuses other
/// than 429/402, and unparseable responses all come back as the fallback
/// result rather than an error.
pub async fn classify(
    text: Option<&str>,
    image: Option<&ImageData>,
    contact_name: Option<&str>,
    contact_phone: Option<&str>,
) -> Result<ClassificationResult, ClassifierError> {
    let has_text = text.map(|t| !t.trim().is_empty()).unwrap_or(false);
    if !has_text && image.is_none() {
        return Err(ClassifierError::MissingInput);
    }

    let api_key = std::env::var("OPENROUTER_API_KEY")
        .map_err(|_| ClassifierError::Configuration("OPENROUTER_API_KEY not set".to_string()))?;
    let api_url = std::env::var("CLASSIFIER_API_URL")
        .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
    let model = std::env::var("CLASSIFIER_MODEL")
        .unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());

    let mut context = String::new();
    if let Some(name) = contact_name {
        context.push_str(&format!("Contacto: {}\n", name));
    }
    if let Some(phone) = contact_phone {
        context.push_str(&format!("Teléfono: {}\n", phone));
    }
    let body_text = match text {
        Some(t) if has_text => format!("{}\nMensaje:\n{}", context, t),
        _ => format!("{}\nMensaje: (imagen adjunta, sin texto)", context),
    };

    let user_content = match image {
        Some(image) => {
            let data_url = format!(
                "data:{};base64,{}",
                image.mime_type,
                BASE64.encode(&image.bytes)
            );
            json!([
                { "type": "text", "text": body_text },
                { "type": "image_url", "image_url": { "url": data_url } }
            ])
        }
        None => Value::String(body_text),
    };

    let request_body = json!({
        "model": model,
        "messages": [
            { "role": "system", "content": CLASSIFIER_PROMPT },
            { "role": "user", "content": user_content }
        ],
        "temperature": 0.0,
        "max_tokens": 500
    });

    let response = match CLASSIFIER_CLIENT
        .post(format!("{}/chat/completions", api_url))
        .header("Authorization", format!("Bearer {}", api_key))
        .json(&request_body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Classifier transport failure, using fallback: {}", e);
            return Ok(ClassificationResult::fallback());
        }
    };

    match response.status().as_u16() {
        429 => return Err(ClassifierError::RateLimited),
        402 => return Err(ClassifierError::QuotaExhausted),
        status if !(200..300).contains(&status) => {
            tracing::warn!("Classifier returned status {}, using fallback", status);
            return Ok(ClassificationResult::fallback());
        }
        _ => {}
    }

    let completion: Value = match response.json().await {
        Ok(completion) => completion,
        Err(e) => {
            tracing::warn!("Classifier response body unreadable, using fallback: {}", e);
            return Ok(ClassificationResult::fallback());
        }
    };

    Ok(interpret_completion(&completion))
}

// Everything after transport: pull the assistant turn out of the completion,
// strip fences, parse, normalize. Any miss along the way is the fallback.
fn interpret_completion(completion: &Value) -> ClassificationResult {
    let content = match completion
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
    {
        Some(content) => content,
        None => {
            tracing::warn!("Classifier completion had no message content, using fallback");
            return ClassificationResult::fallback();
        }
    };

    let stripped = strip_code_fences(content);
    match serde_json::from_str::<RawClassification>(stripped) {
        Ok(raw) => normalize(raw, stripped),
        Err(e) => {
            tracing::warn!("Classifier content was not valid JSON ({}), using fallback", e);
            ClassificationResult::fallback()
        }
    }
}

fn normalize(raw: RawClassification, raw_json: &str) -> ClassificationResult {
    let confidence = normalize_confidence(raw.confidence.as_ref());
    let requires_review = if confidence < 0.7 {
        true
    } else {
        raw.requires_review.unwrap_or(false)
    };

    ClassificationResult {
        intent: MessageIntent::from_loose(raw.intent.as_deref()),
        confidence,
        extracted_data: raw.extracted_data.unwrap_or_default(),
        summary: raw
            .summary
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| SUMMARY_PLACEHOLDER.to_string()),
        requires_review,
        raw_output: Some(raw_json.to_string()),
    }
}

// Absent or non-numeric confidence becomes 0.5; numeric values outside [0,1]
// are clamped to the interval.
fn normalize_confidence(raw: Option<&Value>) -> f64 {
    match raw.and_then(|v| v.as_f64()) {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => 0.5,
    }
}

fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion_with_content(content: &str) -> Value {
        json!({
            "choices": [
                { "message": { "role": "assistant", "content": content } }
            ]
        })
    }

    #[test]
    fn confidence_above_one_is_clamped() {
        let result = interpret_completion(&completion_with_content(
            r#"{"intent":"payment","confidence":1.7}"#,
        ));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn negative_confidence_is_clamped_to_zero_and_forces_review() {
        let result = interpret_completion(&completion_with_content(
            r#"{"intent":"payment","confidence":-0.2,"requiresReview":false}"#,
        ));
        assert_eq!(result.confidence, 0.0);
        assert!(result.requires_review);
    }

    #[test]
    fn missing_confidence_defaults_to_half() {
        let result = interpret_completion(&completion_with_content(r#"{"intent":"query"}"#));
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn non_numeric_confidence_defaults_to_half() {
        let result = interpret_completion(&completion_with_content(
            r#"{"intent":"query","confidence":"high"}"#,
        ));
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn review_forced_on_under_point_seven() {
        let result = interpret_completion(&completion_with_content(
            r#"{"intent":"payment","confidence":0.55,"requiresReview":false}"#,
        ));
        assert!(result.requires_review);
    }

    #[test]
    fn review_flag_respected_at_high_confidence() {
        let flagged = interpret_completion(&completion_with_content(
            r#"{"intent":"payment","confidence":0.9,"requiresReview":true}"#,
        ));
        assert!(flagged.requires_review);

        let clean = interpret_completion(&completion_with_content(
            r#"{"intent":"payment","confidence":0.9,"requiresReview":false}"#,
        ));
        assert!(!clean.requires_review);
    }

    #[test]
    fn unknown_intent_coerced_to_other() {
        let result = interpret_completion(&completion_with_content(
            r#"{"intent":"invoice","confidence":0.9}"#,
        ));
        assert_eq!(result.intent, MessageIntent::Other);
    }

    #[test]
    fn known_intents_pass_through() {
        for (raw, expected) in [
            ("payment", MessageIntent::Payment),
            ("promise", MessageIntent::Promise),
            ("query", MessageIntent::Query),
            ("other", MessageIntent::Other),
        ] {
            let body = completion_with_content(&format!(
                r#"{{"intent":"{}","confidence":0.9}}"#,
                raw
            ));
            assert_eq!(interpret_completion(&body).intent, expected);
        }
    }

    #[test]
    fn fenced_json_is_parsed() {
        let content = "```json\n{\"intent\":\"promise\",\"confidence\":0.8}\n```";
        let result = interpret_completion(&completion_with_content(content));
        assert_eq!(result.intent, MessageIntent::Promise);
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn non_json_content_falls_back() {
        let result = interpret_completion(&completion_with_content("lo siento, no puedo"));
        assert_eq!(result.intent, MessageIntent::Other);
        assert_eq!(result.confidence, 0.3);
        assert!(result.requires_review);
        assert_eq!(result.summary, FALLBACK_SUMMARY);
    }

    #[test]
    fn completion_without_choices_falls_back() {
        let result = interpret_completion(&json!({ "error": "upstream exploded" }));
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.intent, MessageIntent::Other);
    }

    #[test]
    fn missing_summary_gets_placeholder() {
        let result = interpret_completion(&completion_with_content(
            r#"{"intent":"payment","confidence":0.9}"#,
        ));
        assert_eq!(result.summary, SUMMARY_PLACEHOLDER);
    }

    #[test]
    fn extracted_fields_pass_through() {
        let content = r#"{
            "intent": "payment",
            "confidence": 0.92,
            "extractedData": {
                "amount": 150.50,
                "currency": "PEN",
                "paymentMethod": "yape",
                "reference": "OP-991",
                "dueDate": "2024-06-15"
            },
            "summary": "Ana pagó 150.50 por Yape."
        }"#;
        let result = interpret_completion(&completion_with_content(content));
        assert_eq!(result.extracted_data.amount, Some(150.5));
        assert_eq!(result.extracted_data.currency.as_deref(), Some("PEN"));
        assert_eq!(result.extracted_data.payment_method.as_deref(), Some("yape"));
        assert_eq!(result.extracted_data.reference.as_deref(), Some("OP-991"));
        assert_eq!(result.extracted_data.due_date.as_deref(), Some("2024-06-15"));
        assert!(!result.requires_review);
    }

    #[tokio::test]
    async fn classify_requires_text_or_image() {
        let result = classify(None, None, Some("Ana"), None).await;
        assert!(matches!(result, Err(ClassifierError::MissingInput)));

        let result = classify(Some("   "), None, None, None).await;
        assert!(matches!(result, Err(ClassifierError::MissingInput)));
    }

    #[test]
    fn strip_code_fences_variants() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }
}
