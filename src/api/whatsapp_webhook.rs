use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::api::whatsapp_api::{self, ImageData};
use crate::models::domain_models::{
    Message, NewMessage, NewNotification, NewPayment, NewPaymentPromise, NewWhatsappLog, Payment,
    PaymentPromise, User,
};
use crate::utils::intent_classifier::{self, ClassificationResult, ClassifierError, MessageIntent};
use crate::AppState;

// ---------------------------------------------------------------------------
// Webhook payload (WhatsApp Business Cloud API shape)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookPayload {
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookEntry {
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookChange {
    pub field: Option<String>,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChangeValue {
    pub metadata: Option<ChangeMetadata>,
    #[serde(default)]
    pub contacts: Vec<WebhookContact>,
    #[serde(default)]
    pub messages: Vec<WebhookMessage>,
    /// Delivery/read receipts. Acknowledged and logged, never processed.
    #[serde(default)]
    pub statuses: Vec<Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChangeMetadata {
    pub display_phone_number: Option<String>,
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookContact {
    pub wa_id: Option<String>,
    pub profile: Option<ContactProfile>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContactProfile {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookMessage {
    pub id: String,
    pub from: String,
    /// Provider send time, epoch seconds in string form.
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub content: MessageContent,
}

/// One case per content kind the Cloud API tags messages with. Anything newer
/// than what we know lands on `Unsupported` instead of failing the delivery.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextBody },
    Image { image: MediaRef },
    Document { document: MediaRef },
    Audio { audio: MediaRef },
    Video { video: MediaRef },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MediaRef {
    pub id: Option<String>,
    pub mime_type: Option<String>,
    pub caption: Option<String>,
    pub filename: Option<String>,
}

/// The uniform view the rest of the pipeline consumes: a display string for
/// storage, optional classifiable text, and an optional media reference.
pub struct NormalizedContent {
    pub content_type: &'static str,
    pub display: String,
    pub text: Option<String>,
    pub media_id: Option<String>,
    pub classifiable: bool,
}

impl MessageContent {
    pub fn normalize(&self) -> NormalizedContent {
        match self {
            MessageContent::Text { text } => NormalizedContent {
                content_type: "text",
                display: text.body.clone(),
                text: Some(text.body.clone()),
                media_id: None,
                classifiable: true,
            },
            MessageContent::Image { image } => NormalizedContent {
                content_type: "image",
                display: image
                    .caption
                    .clone()
                    .unwrap_or_else(|| "[Imagen]".to_string()),
                text: image.caption.clone(),
                media_id: image.id.clone(),
                classifiable: true,
            },
            MessageContent::Document { document } => NormalizedContent {
                content_type: "document",
                display: "[Documento adjunto]".to_string(),
                text: None,
                media_id: document.id.clone(),
                classifiable: false,
            },
            MessageContent::Audio { audio } => NormalizedContent {
                content_type: "audio",
                display: "[Audio adjunto]".to_string(),
                text: None,
                media_id: audio.id.clone(),
                classifiable: false,
            },
            MessageContent::Video { video } => NormalizedContent {
                content_type: "video",
                display: "[Video adjunto]".to_string(),
                text: None,
                media_id: video.id.clone(),
                classifiable: false,
            },
            MessageContent::Unsupported => NormalizedContent {
                content_type: "other",
                display: "[Mensaje no soportado]".to_string(),
                text: None,
                media_id: None,
                classifiable: false,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

// Meta's one-time subscription handshake: echo hub.challenge back when the
// shared verify token matches.
pub async fn verify_webhook(Query(params): Query<VerifyParams>) -> (StatusCode, String) {
    let expected = std::env::var("WHATSAPP_VERIFY_TOKEN").unwrap_or_default();
    let mode_ok = params.mode.as_deref() == Some("subscribe");
    let token_ok = !expected.is_empty() && params.verify_token.as_deref() == Some(expected.as_str());

    match (mode_ok && token_ok, params.challenge) {
        (true, Some(challenge)) => (StatusCode::OK, challenge),
        _ => {
            tracing::warn!("WhatsApp webhook verification rejected");
            (StatusCode::FORBIDDEN, "Forbidden".to_string())
        }
    }
}

#[derive(Serialize, Debug)]
pub struct WebhookAck {
    pub status: &'static str,
}

/// Inbound deliveries. Acks 200 immediately and processes in the background:
/// a slow classifier call must never push the provider into retry storms.
pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> (StatusCode, [(axum::http::HeaderName, &'static str); 1], Json<WebhookAck>) {
    tracing::debug!("Received WhatsApp webhook with {} entries", payload.entry.len());

    tokio::spawn(async move {
        process_webhook_payload(&state, payload).await;
    });

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        Json(WebhookAck { status: "received" }),
    )
}

// ---------------------------------------------------------------------------
// Ingestion pipeline
// ---------------------------------------------------------------------------

pub enum IngestOutcome {
    Processed {
        message: Message,
        payment: Option<Payment>,
        promise: Option<PaymentPromise>,
    },
    /// The wa_message_id was seen before; nothing was created.
    Duplicate,
}

// Messages within a delivery are handled one at a time in delivery order; a
// failure on one never stops its siblings.
pub async fn process_webhook_payload(state: &Arc<AppState>, payload: WebhookPayload) {
    for entry in payload.entry {
        for change in entry.changes {
            process_change(state, change.value).await;
        }
    }
}

async fn process_change(state: &Arc<AppState>, value: ChangeValue) {
    let now = Utc::now().timestamp() as i32;
    let phone_number_id = value
        .metadata
        .as_ref()
        .and_then(|m| m.phone_number_id.clone());

    let user = match phone_number_id.as_deref() {
        Some(pnid) => match state.user_core.find_by_phone_number_id(pnid) {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("User lookup failed for phone_number_id {}: {}", pnid, e);
                None
            }
        },
        None => None,
    };

    for status in &value.statuses {
        let status_name = status
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown");
        let wa_message_id = status.get("id").and_then(|id| id.as_str());
        tracing::debug!("Status callback {} for {:?}", status_name, wa_message_id);
        let log = NewWhatsappLog {
            user_id: user.as_ref().map(|u| u.id),
            wa_message_id: wa_message_id.map(|id| id.to_string()),
            status: "skipped".to_string(),
            detail: Some(format!("status callback: {}", status_name)),
            error: None,
            elapsed_ms: None,
            created_at: now,
        };
        if let Err(e) = state.message_repository.log_event(&log) {
            tracing::error!("Failed to log status callback: {}", e);
        }
    }

    for message in value.messages {
        match &user {
            Some(user) => process_message(state, user, &value.contacts, message).await,
            None => {
                tracing::warn!(
                    "No user for phone_number_id {:?}, skipping message {}",
                    phone_number_id,
                    message.id
                );
                let log = NewWhatsappLog {
                    user_id: None,
                    wa_message_id: Some(message.id.clone()),
                    status: "skipped".to_string(),
                    detail: Some(format!(
                        "no user registered for phone_number_id {:?}",
                        phone_number_id
                    )),
                    error: None,
                    elapsed_ms: None,
                    created_at: now,
                };
                if let Err(e) = state.message_repository.log_event(&log) {
                    tracing::error!("Failed to log unroutable message: {}", e);
                }
            }
        }
    }
}

async fn process_message(
    state: &Arc<AppState>,
    user: &User,
    contacts: &[WebhookContact],
    message: WebhookMessage,
) {
    let start = std::time::Instant::now();
    let wa_message_id = message.id.clone();
    let now = Utc::now().timestamp() as i32;

    let (status, detail, error) = match ingest_message(state, user, contacts, message).await {
        Ok(IngestOutcome::Processed {
            message,
            payment,
            promise,
        }) => {
            tracing::info!(
                "Processed message {} (contact {}, intent {:?}, confidence {:?})",
                wa_message_id,
                message.contact_id,
                message.intent,
                message.confidence
            );
            let detail = format!(
                "contact_id={} type={} intent={} confidence={} payment={} promise={}",
                message.contact_id,
                message.content_type,
                message.intent.as_deref().unwrap_or("none"),
                message
                    .confidence
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "none".to_string()),
                payment.as_ref().map(|p| p.id.to_string()).unwrap_or_else(|| "none".to_string()),
                promise.as_ref().map(|p| p.id.to_string()).unwrap_or_else(|| "none".to_string()),
            );
            ("processed", Some(detail), None)
        }
        Ok(IngestOutcome::Duplicate) => {
            tracing::debug!("Duplicate delivery for message {}, skipped", wa_message_id);
            ("skipped", Some("duplicate wa_message_id".to_string()), None)
        }
        Err(e) => {
            tracing::error!("Failed to process message {}: {:#}", wa_message_id, e);
            ("failed", None, Some(format!("{:#}", e)))
        }
    };

    let log = NewWhatsappLog {
        user_id: Some(user.id),
        wa_message_id: Some(wa_message_id),
        status: status.to_string(),
        detail,
        error,
        elapsed_ms: Some(start.elapsed().as_millis() as i32),
        created_at: now,
    };
    if let Err(e) = state.message_repository.log_event(&log) {
        tracing::error!("Failed to write webhook event log: {}", e);
    }
}

async fn ingest_message(
    state: &Arc<AppState>,
    user: &User,
    contacts: &[WebhookContact],
    message: WebhookMessage,
) -> anyhow::Result<IngestOutcome> {
    let now = Utc::now().timestamp() as i32;

    // Cheap duplicate check first, so redeliveries never pay for another
    // classifier call. The unique index behind insert_if_new backstops races.
    if state
        .message_repository
        .exists_by_wa_message_id(&message.id)?
    {
        return Ok(IngestOutcome::Duplicate);
    }

    let profile_name = contacts
        .iter()
        .find(|c| c.wa_id.as_deref() == Some(message.from.as_str()))
        .and_then(|c| c.profile.as_ref())
        .and_then(|p| p.name.clone());
    let contact = state.contact_repository.upsert_by_phone(
        user.id,
        &message.from,
        profile_name.as_deref(),
        now,
    )?;

    let normalized = message.content.normalize();

    let mut image_data: Option<ImageData> = None;
    if user.auto_process_messages && normalized.content_type == "image" {
        if let Some(media_id) = &normalized.media_id {
            match whatsapp_api::download_media(media_id).await {
                Ok(data) => image_data = Some(data),
                // Caption-only classification still works without the binary.
                Err(e) => tracing::warn!("Media download failed for {}: {}", media_id, e),
            }
        }
    }

    let has_input = normalized.classifiable
        && (normalized.text.as_deref().map(|t| !t.trim().is_empty()).unwrap_or(false)
            || image_data.is_some());
    let classification = if user.auto_process_messages && has_input {
        match intent_classifier::classify(
            normalized.text.as_deref(),
            image_data.as_ref(),
            Some(&contact.name),
            Some(&contact.phone),
        )
        .await
        {
            Ok(result) => Some(result),
            Err(e @ (ClassifierError::RateLimited | ClassifierError::QuotaExhausted)) => {
                notify_classifier_outage(state, user.id, &e, now);
                return Err(anyhow::anyhow!("classifier unavailable: {}", e));
            }
            Err(e) => return Err(anyhow::anyhow!("classification failed: {}", e)),
        }
    } else {
        None
    };

    let sent_at = message
        .timestamp
        .as_deref()
        .and_then(|t| t.parse::<i32>().ok())
        .unwrap_or(now);
    persist_message(state, user, contact.id, &contact.name, &normalized, classification, &message.id, sent_at, now)
}

fn notify_classifier_outage(state: &Arc<AppState>, user_id: i32, error: &ClassifierError, now: i32) {
    let message = match error {
        ClassifierError::QuotaExhausted => {
            "El análisis automático de mensajes se pausó: se agotó el crédito del proveedor."
        }
        _ => "El análisis automático de mensajes está temporalmente limitado por el proveedor.",
    };
    let notification = NewNotification {
        user_id,
        notification_type: "classifier_error".to_string(),
        title: "Análisis automático interrumpido".to_string(),
        message: message.to_string(),
        read: false,
        created_at: now,
    };
    if let Err(e) = state.notification_repository.create(&notification) {
        tracing::error!("Failed to create classifier outage notification: {}", e);
    }
}

// Persistence stage: everything after classification. The classification
// lands on the message row in the same insert that establishes idempotency,
// and payment/promise rows are only derived when that insert actually won.
// The message row is stamped with the provider's send time; derived rows use
// receipt time.
#[allow(clippy::too_many_arguments)]
fn persist_message(
    state: &Arc<AppState>,
    user: &User,
    contact_id: i32,
    contact_name: &str,
    normalized: &NormalizedContent,
    classification: Option<ClassificationResult>,
    wa_message_id: &str,
    sent_at: i32,
    now: i32,
) -> anyhow::Result<IngestOutcome> {
    let confidence_int = classification
        .as_ref()
        .map(|c| (c.confidence * 100.0).round() as i32);
    let is_payment_related = classification
        .as_ref()
        .map(|c| matches!(c.intent, MessageIntent::Payment | MessageIntent::Promise))
        .unwrap_or(false);
    // Unclassified rows always go to review; so do promises with no amount.
    let requires_review = match &classification {
        None => true,
        Some(c) => {
            c.requires_review
                || (c.intent == MessageIntent::Promise && c.extracted_data.amount.is_none())
        }
    };

    let new_message = NewMessage {
        user_id: user.id,
        contact_id,
        wa_message_id: wa_message_id.to_string(),
        direction: "inbound".to_string(),
        content_type: normalized.content_type.to_string(),
        content: normalized.display.clone(),
        media_id: normalized.media_id.clone(),
        is_payment_related,
        intent: classification.as_ref().map(|c| c.intent.as_str().to_string()),
        amount: classification.as_ref().and_then(|c| c.extracted_data.amount),
        currency: classification
            .as_ref()
            .and_then(|c| c.extracted_data.currency.clone()),
        confidence: confidence_int,
        requires_review,
        classifier_output: classification.as_ref().and_then(|c| c.raw_output.clone()),
        processed_at: classification.as_ref().map(|_| now),
        created_at: sent_at,
    };

    let stored = match state.message_repository.insert_if_new(&new_message)? {
        Some(stored) => stored,
        None => return Ok(IngestOutcome::Duplicate),
    };

    let mut payment: Option<Payment> = None;
    let mut promise: Option<PaymentPromise> = None;

    if let Some(c) = &classification {
        let currency = c
            .extracted_data
            .currency
            .clone()
            .unwrap_or_else(default_currency);
        match c.intent {
            MessageIntent::Payment => {
                // No amount, no payment row: a record without an amount is
                // unactionable and review catches it instead.
                if let Some(amount) = c.extracted_data.amount {
                    let row = state.payment_repository.create_payment(&NewPayment {
                        user_id: user.id,
                        contact_id,
                        message_id: Some(stored.id),
                        amount,
                        currency: currency.clone(),
                        status: "pending".to_string(),
                        method: c.extracted_data.payment_method.clone(),
                        reference_number: c.extracted_data.reference.clone(),
                        payment_date: c.extracted_data.date.clone(),
                        confidence: confidence_int,
                        due_date: c.extracted_data.due_date.clone(),
                        created_at: now,
                        updated_at: now,
                    })?;
                    state
                        .contact_repository
                        .record_payment_detected(user.id, contact_id, amount, now)?;
                    state.notification_repository.create(&NewNotification {
                        user_id: user.id,
                        notification_type: "payment_detected".to_string(),
                        title: "Pago detectado".to_string(),
                        message: format!(
                            "Posible pago de {} {:.2} de {}. Confírmalo en el panel.",
                            currency, amount, contact_name
                        ),
                        read: false,
                        created_at: now,
                    })?;
                    payment = Some(row);
                } else {
                    tracing::debug!(
                        "Payment intent without amount on message {}, no payment created",
                        wa_message_id
                    );
                }
            }
            MessageIntent::Promise => {
                let amount = c.extracted_data.amount.unwrap_or(0.0);
                let promised_date = c
                    .extracted_data
                    .due_date
                    .clone()
                    .or_else(|| c.extracted_data.date.clone());
                let row = state.payment_repository.create_promise(&NewPaymentPromise {
                    user_id: user.id,
                    contact_id,
                    message_id: Some(stored.id),
                    amount,
                    currency: currency.clone(),
                    promised_date: promised_date.clone(),
                    status: "pending".to_string(),
                    notes: Some(c.summary.clone()),
                    created_at: now,
                    updated_at: now,
                })?;
                state.notification_repository.create(&NewNotification {
                    user_id: user.id,
                    notification_type: "promise_detected".to_string(),
                    title: "Promesa de pago".to_string(),
                    message: match promised_date {
                        Some(date) => format!(
                            "{} promete pagar {} {:.2} el {}.",
                            contact_name, currency, amount, date
                        ),
                        None => format!(
                            "{} promete pagar {} {:.2} (sin fecha).",
                            contact_name, currency, amount
                        ),
                    },
                    read: false,
                    created_at: now,
                })?;
                promise = Some(row);
            }
            MessageIntent::Query | MessageIntent::Other => {}
        }
    }

    Ok(IngestOutcome::Processed {
        message: stored,
        payment,
        promise,
    })
}

fn default_currency() -> String {
    std::env::var("DEFAULT_CURRENCY").unwrap_or_else(|_| "PEN".to_string())
}
