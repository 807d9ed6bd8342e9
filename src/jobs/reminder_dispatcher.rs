use chrono::{NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::whatsapp_api;
use crate::models::domain_models::{
    Contact, NewMessage, NewNotification, Payment, PaymentReminder, ReminderSettings,
};
use crate::utils::email_utils;
use crate::utils::reminder_templates::{self, ReminderContext};
use crate::AppState;

pub const DISPATCH_BATCH_LIMIT: i64 = 50;

// Ceiling for one reminder's delivery work. A wedged provider call must not
// stall the rest of the batch or the next tick.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct DispatchStats {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
}

struct Delivery {
    body: String,
    wa_message_id: Option<String>,
}

/// One polling tick: load due scheduled reminders, claim each, deliver, and
/// settle every claimed row as sent or failed. Row failures never abort the
/// batch, and failed rows stay failed until a human reschedules.
pub async fn dispatch_due_reminders(
    state: &Arc<AppState>,
    limit: i64,
    is_test: bool,
) -> DispatchStats {
    let now = Utc::now().timestamp() as i32;
    let mut stats = DispatchStats::default();

    let due = match state.reminder_repository.due_for_dispatch(now, limit) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!("Failed to load due reminders: {}", e);
            return stats;
        }
    };
    if due.is_empty() {
        return stats;
    }
    tracing::info!("Dispatching {} due reminders", due.len());

    for (reminder, contact, payment) in due {
        match state.reminder_repository.claim(reminder.id) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Reminder {} was claimed elsewhere, skipping", reminder.id);
                continue;
            }
            Err(e) => {
                tracing::error!("Failed to claim reminder {}: {}", reminder.id, e);
                continue;
            }
        }
        stats.processed += 1;

        let outcome = match tokio::time::timeout(
            DELIVERY_TIMEOUT,
            deliver_reminder(state, &reminder, &contact, payment.as_ref(), now, is_test),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(format!(
                "delivery timed out after {}s",
                DELIVERY_TIMEOUT.as_secs()
            )),
        };

        match outcome {
            Ok(delivery) => {
                stats.sent += 1;
                finish_sent(state, &reminder, &contact, payment.as_ref(), delivery, now);
            }
            Err(reason) => {
                stats.failed += 1;
                tracing::warn!("Reminder {} failed: {}", reminder.id, reason);
                finish_failed(state, &reminder, &contact, &reason, now);
            }
        }
    }

    tracing::info!(
        "Reminder dispatch finished: {} processed, {} sent, {} failed",
        stats.processed,
        stats.sent,
        stats.failed
    );
    stats
}

async fn deliver_reminder(
    state: &Arc<AppState>,
    reminder: &PaymentReminder,
    contact: &Contact,
    payment: Option<&Payment>,
    now: i32,
    is_test: bool,
) -> Result<Delivery, String> {
    if contact.phone.trim().is_empty() {
        return Err("contact has no phone number".to_string());
    }

    let settings = state
        .user_core
        .get_reminder_settings(reminder.user_id)
        .map_err(|e| format!("failed to load reminder settings: {}", e))?;
    let template = resolve_template(reminder, settings.as_ref());
    let body = render_body(&template, contact, payment, now);

    if is_test {
        return Ok(Delivery {
            body,
            wa_message_id: Some(format!("wamid.test.{}", Uuid::new_v4())),
        });
    }

    let user = state
        .user_core
        .find_by_id(reminder.user_id)
        .map_err(|e| format!("failed to load user {}: {}", reminder.user_id, e))?
        .ok_or_else(|| format!("user {} not found", reminder.user_id))?;

    let send_whatsapp = reminder.channel == "whatsapp" || reminder.channel == "both";
    let send_email = reminder.channel == "email" || reminder.channel == "both";

    let mut wa_message_id = None;
    if send_whatsapp {
        let phone_number_id = user
            .whatsapp_phone_number_id
            .as_deref()
            .ok_or_else(|| "user has no WhatsApp sender number configured".to_string())?;
        let id = whatsapp_api::send_text_message(phone_number_id, &contact.phone, &body).await?;
        wa_message_id = Some(id);
    }

    if send_email {
        let subject = format!("Recordatorio de pago: {}", contact.name);
        match email_utils::send_reminder_email(&user.email, &subject, &body) {
            Ok(()) => {}
            // WhatsApp is the primary leg; a failed email copy does not fail the row.
            Err(e) if wa_message_id.is_some() => {
                tracing::warn!("Reminder {} email copy failed: {}", reminder.id, e);
            }
            Err(e) => return Err(format!("email send failed: {}", e)),
        }
    }

    Ok(Delivery {
        body,
        wa_message_id,
    })
}

// Row override first, then the policy template for the type, then the
// built-in default. Blank strings count as unset.
fn resolve_template(reminder: &PaymentReminder, settings: Option<&ReminderSettings>) -> String {
    if let Some(template) = &reminder.message_template {
        if !template.trim().is_empty() {
            return template.clone();
        }
    }
    if let Some(settings) = settings {
        let policy = match reminder.reminder_type.as_str() {
            "before_due" => settings.template_before.as_ref(),
            "on_due" => settings.template_on_due.as_ref(),
            "after_due" => settings.template_after.as_ref(),
            _ => None,
        };
        if let Some(template) = policy {
            if !template.trim().is_empty() {
                return template.clone();
            }
        }
    }
    reminder_templates::default_template(&reminder.reminder_type).to_string()
}

fn render_body(template: &str, contact: &Contact, payment: Option<&Payment>, now: i32) -> String {
    // Signed distance to the due date, filled in for every reminder type. The
    // renderer prints the absolute value, so before-due templates can phrase
    // it as days remaining.
    let days_overdue = compute_days_overdue(
        payment.and_then(|p| p.due_date.as_deref()),
        now as i64,
    );
    let ctx = ReminderContext {
        contact_name: &contact.name,
        amount: payment.map(|p| p.amount),
        currency: payment.map(|p| p.currency.as_str()),
        due_date: payment.and_then(|p| p.due_date.as_deref()),
        days_overdue: Some(days_overdue),
    };
    reminder_templates::render_template(template, &ctx)
}

// Whole days elapsed since midnight UTC of the due date; 0 when the date is
// missing or unparseable.
fn compute_days_overdue(due_date: Option<&str>, now: i64) -> i64 {
    let date = match due_date.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()) {
        Some(date) => date,
        None => return 0,
    };
    let midnight = match date.and_hms_opt(0, 0, 0) {
        Some(midnight) => midnight,
        None => return 0,
    };
    (now - Utc.from_utc_datetime(&midnight).timestamp()).div_euclid(86_400)
}

fn finish_sent(
    state: &Arc<AppState>,
    reminder: &PaymentReminder,
    contact: &Contact,
    payment: Option<&Payment>,
    delivery: Delivery,
    now: i32,
) {
    if let Err(e) = state.reminder_repository.mark_sent(reminder.id, now) {
        tracing::error!("Failed to mark reminder {} sent: {}", reminder.id, e);
    }

    // The outbound copy keeps the conversation history complete. Email-only
    // rows get a synthetic id since no provider id exists.
    let wa_message_id = delivery
        .wa_message_id
        .unwrap_or_else(|| format!("local.email.{}", Uuid::new_v4()));
    let outbound = NewMessage {
        user_id: reminder.user_id,
        contact_id: reminder.contact_id,
        wa_message_id,
        direction: "outbound".to_string(),
        content_type: "text".to_string(),
        content: delivery.body,
        media_id: None,
        is_payment_related: true,
        intent: None,
        amount: payment.map(|p| p.amount),
        currency: payment.map(|p| p.currency.clone()),
        confidence: None,
        requires_review: false,
        classifier_output: None,
        processed_at: None,
        created_at: now,
    };
    if let Err(e) = state.message_repository.create_outbound(&outbound) {
        tracing::error!("Failed to persist outbound reminder message: {}", e);
    }

    let message = match payment {
        Some(p) => format!(
            "Se envió un recordatorio a {} por {} {:.2}.",
            contact.name, p.currency, p.amount
        ),
        None => format!("Se envió un recordatorio a {}.", contact.name),
    };
    let notification = NewNotification {
        user_id: reminder.user_id,
        notification_type: "reminder_sent".to_string(),
        title: "Recordatorio enviado".to_string(),
        message,
        read: false,
        created_at: now,
    };
    if let Err(e) = state.notification_repository.create(&notification) {
        tracing::error!("Failed to create reminder_sent notification: {}", e);
    }
}

fn finish_failed(
    state: &Arc<AppState>,
    reminder: &PaymentReminder,
    contact: &Contact,
    reason: &str,
    now: i32,
) {
    if let Err(e) = state.reminder_repository.mark_failed(reminder.id, reason) {
        tracing::error!("Failed to mark reminder {} failed: {}", reminder.id, e);
    }
    let notification = NewNotification {
        user_id: reminder.user_id,
        notification_type: "reminder_failed".to_string(),
        title: "Recordatorio fallido".to_string(),
        message: format!(
            "No se pudo enviar el recordatorio a {}: {}",
            contact.name, reason
        ),
        read: false,
        created_at: now,
    };
    if let Err(e) = state.notification_repository.create(&notification) {
        tracing::error!("Failed to create reminder_failed notification: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::domain_models::NewPaymentReminder;
    use crate::test_utils;

    fn reminder_row(reminder_type: &str, template: Option<&str>) -> PaymentReminder {
        PaymentReminder {
            id: 1,
            user_id: 1,
            payment_id: Some(1),
            contact_id: 1,
            reminder_type: reminder_type.to_string(),
            days_offset: -3,
            status: "scheduled".to_string(),
            scheduled_at: 0,
            sent_at: None,
            message_template: template.map(|t| t.to_string()),
            channel: "whatsapp".to_string(),
            error_message: None,
            created_at: 0,
        }
    }

    fn due_reminder(
        user_id: i32,
        payment_id: i32,
        contact_id: i32,
        scheduled_at: i32,
    ) -> NewPaymentReminder {
        NewPaymentReminder {
            user_id,
            payment_id: Some(payment_id),
            contact_id,
            reminder_type: "before_due".to_string(),
            days_offset: -3,
            status: "scheduled".to_string(),
            scheduled_at,
            message_template: None,
            channel: "whatsapp".to_string(),
            created_at: scheduled_at,
        }
    }

    #[test]
    fn template_resolution_prefers_row_then_policy_then_default() {
        let settings = test_utils::settings_template(1);
        let mut with_policy = settings.clone();
        with_policy.template_before = Some("politica {contact_name}".to_string());

        let row_override = reminder_row("before_due", Some("fila {contact_name}"));
        assert_eq!(
            resolve_template(&row_override, Some(&with_policy)),
            "fila {contact_name}"
        );

        let no_override = reminder_row("before_due", None);
        assert_eq!(
            resolve_template(&no_override, Some(&with_policy)),
            "politica {contact_name}"
        );

        // Blank policy strings fall through to the built-in text.
        let mut blank_policy = settings.clone();
        blank_policy.template_before = Some("   ".to_string());
        assert_eq!(
            resolve_template(&no_override, Some(&blank_policy)),
            reminder_templates::default_template("before_due")
        );

        assert_eq!(
            resolve_template(&no_override, None),
            reminder_templates::default_template("before_due")
        );
    }

    #[test]
    fn days_overdue_floors_and_defaults_to_zero() {
        // 2024-06-12 14:00 UTC, due 2024-06-10: 2.58 days -> 2.
        let now = 1_718_200_800;
        assert_eq!(compute_days_overdue(Some("2024-06-10"), now), 2);
        assert_eq!(compute_days_overdue(Some("garbage"), now), 0);
        assert_eq!(compute_days_overdue(None, now), 0);
    }

    #[tokio::test]
    async fn dispatch_settles_every_claimed_row() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let ana = state
            .contact_repository
            .upsert_by_phone(user.id, "51911111111", Some("Ana"), 1_718_000_000)
            .unwrap();
        let sin_telefono = state
            .contact_repository
            .upsert_by_phone(user.id, "", Some("Sin Teléfono"), 1_718_000_000)
            .unwrap();
        let bruno = state
            .contact_repository
            .upsert_by_phone(user.id, "51933333333", Some("Bruno"), 1_718_000_000)
            .unwrap();

        let p1 = test_utils::seed_payment(&state, user.id, ana.id, 150.5, Some("2024-06-15"));
        let p2 = test_utils::seed_payment(&state, user.id, sin_telefono.id, 80.0, Some("2024-06-15"));
        let p3 = test_utils::seed_payment(&state, user.id, bruno.id, 200.0, Some("2024-06-20"));

        let past = test_utils::epoch_now() - 3600;
        state
            .reminder_repository
            .create_batch(&[
                due_reminder(user.id, p1.id, ana.id, past),
                due_reminder(user.id, p2.id, sin_telefono.id, past + 1),
                due_reminder(user.id, p3.id, bruno.id, past + 2),
            ])
            .unwrap();

        let stats = dispatch_due_reminders(&state, DISPATCH_BATCH_LIMIT, true).await;
        assert_eq!(
            stats,
            DispatchStats {
                processed: 3,
                sent: 2,
                failed: 1
            }
        );

        let rows = state
            .reminder_repository
            .list_for_user(user.id, None)
            .unwrap();
        assert_eq!(rows.len(), 3);
        let sent: Vec<_> = rows.iter().filter(|r| r.status == "sent").collect();
        let failed: Vec<_> = rows.iter().filter(|r| r.status == "failed").collect();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|r| r.sent_at.is_some()));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].contact_id, sin_telefono.id);
        assert!(failed[0].error_message.as_deref().unwrap().contains("phone"));
        assert!(failed[0].sent_at.is_none());

        // Sent rows leave an outbound copy in the conversation.
        let ana_messages = state
            .message_repository
            .list_for_contact(user.id, ana.id, 10)
            .unwrap();
        assert_eq!(ana_messages.len(), 1);
        assert_eq!(ana_messages[0].direction, "outbound");
        assert!(ana_messages[0].content.contains("Ana"));
        assert!(ana_messages[0].content.contains("150.50"));

        let notifications = state
            .notification_repository
            .list_for_user(user.id, false)
            .unwrap();
        let sent_notes = notifications
            .iter()
            .filter(|n| n.notification_type == "reminder_sent")
            .count();
        let failed_notes = notifications
            .iter()
            .filter(|n| n.notification_type == "reminder_failed")
            .count();
        assert_eq!(sent_notes, 2);
        assert_eq!(failed_notes, 1);
    }

    #[tokio::test]
    async fn custom_before_due_template_renders_the_day_count() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let ana = state
            .contact_repository
            .upsert_by_phone(user.id, "51911111111", Some("Ana"), 1_718_000_000)
            .unwrap();
        let payment = test_utils::seed_payment(&state, user.id, ana.id, 150.5, Some("2999-06-15"));

        let past = test_utils::epoch_now() - 60;
        state
            .reminder_repository
            .create_batch(&[NewPaymentReminder {
                message_template: Some(
                    "Hola {contact_name}, faltan {days_overdue} días para tu pago".to_string(),
                ),
                ..due_reminder(user.id, payment.id, ana.id, past)
            }])
            .unwrap();

        let stats = dispatch_due_reminders(&state, DISPATCH_BATCH_LIMIT, true).await;
        assert_eq!(stats.sent, 1);

        let messages = state
            .message_repository
            .list_for_contact(user.id, ana.id, 10)
            .unwrap();
        let body = &messages[0].content;
        assert!(!body.contains("{days_overdue}"), "unrendered body: {}", body);
        assert!(body.starts_with("Hola Ana, faltan "));
        assert!(body.ends_with(" días para tu pago"));
    }

    #[tokio::test]
    async fn settled_rows_are_not_dispatched_again() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let contact = test_utils::seed_contact(&state, user.id, "51911111111");
        let payment = test_utils::seed_payment(&state, user.id, contact.id, 50.0, Some("2024-06-15"));

        let past = test_utils::epoch_now() - 60;
        state
            .reminder_repository
            .create_batch(&[due_reminder(user.id, payment.id, contact.id, past)])
            .unwrap();

        let first = dispatch_due_reminders(&state, DISPATCH_BATCH_LIMIT, true).await;
        assert_eq!(first.sent, 1);

        let second = dispatch_due_reminders(&state, DISPATCH_BATCH_LIMIT, true).await;
        assert_eq!(second, DispatchStats::default());
    }

    #[tokio::test]
    async fn future_and_cancelled_rows_are_left_alone() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let contact = test_utils::seed_contact(&state, user.id, "51911111111");
        let payment = test_utils::seed_payment(&state, user.id, contact.id, 50.0, Some("2024-06-15"));

        let future = test_utils::epoch_now() + 86_400;
        state
            .reminder_repository
            .create_batch(&[
                due_reminder(user.id, payment.id, contact.id, future),
                NewPaymentReminder {
                    status: "cancelled".to_string(),
                    ..due_reminder(user.id, payment.id, contact.id, test_utils::epoch_now() - 60)
                },
            ])
            .unwrap();

        let stats = dispatch_due_reminders(&state, DISPATCH_BATCH_LIMIT, true).await;
        assert_eq!(stats, DispatchStats::default());

        let rows = state
            .reminder_repository
            .list_for_user(user.id, None)
            .unwrap();
        assert!(rows.iter().all(|r| r.sent_at.is_none()));
    }
}
