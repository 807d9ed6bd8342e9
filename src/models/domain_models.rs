use diesel::prelude::*;
use serde::Serialize;

use crate::schema::contacts;
use crate::schema::messages;
use crate::schema::notifications;
use crate::schema::payment_promises;
use crate::schema::payment_reminders;
use crate::schema::payments;
use crate::schema::reminder_settings;
use crate::schema::users;
use crate::schema::whatsapp_logs;

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub id: i32,
    pub email: String,
    pub business_name: Option<String>,
    pub phone_number: Option<String>,
    pub whatsapp_phone_number_id: Option<String>, // routing key for inbound webhooks
    pub auto_process_messages: bool, // gates classification and media download
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub business_name: Option<String>,
    pub phone_number: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub auto_process_messages: bool,
    pub created_at: i32,
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = contacts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Contact {
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub phone: String, // WhatsApp address (wa_id), unique per user
    pub total_paid: f64,
    pub total_pending: f64,
    pub last_payment_at: Option<i32>,
    pub last_message_at: Option<i32>,
    pub created_at: i32,
    pub updated_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = contacts)]
pub struct NewContact {
    pub user_id: i32,
    pub name: String,
    pub phone: String,
    pub total_paid: f64,
    pub total_pending: f64,
    pub last_message_at: Option<i32>,
    pub created_at: i32,
    pub updated_at: i32,
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Message {
    pub id: i32,
    pub user_id: i32,
    pub contact_id: i32,
    pub wa_message_id: String, // provider message id, unique (idempotency gate)
    pub direction: String,     // inbound, outbound
    pub content_type: String,  // text, image, document, audio, video, other
    pub content: String,
    pub media_id: Option<String>,
    pub is_payment_related: bool,
    pub intent: Option<String>, // payment, promise, query, other
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub confidence: Option<i32>, // 0-100, normalized from the classifier's 0.0-1.0
    pub requires_review: bool,
    pub classifier_output: Option<String>, // raw classifier JSON for the dashboard
    pub processed_at: Option<i32>,
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub user_id: i32,
    pub contact_id: i32,
    pub wa_message_id: String,
    pub direction: String,
    pub content_type: String,
    pub content: String,
    pub media_id: Option<String>,
    pub is_payment_related: bool,
    pub intent: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub confidence: Option<i32>,
    pub requires_review: bool,
    pub classifier_output: Option<String>,
    pub processed_at: Option<i32>,
    pub created_at: i32,
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = payments)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Payment {
    pub id: i32,
    pub user_id: i32,
    pub contact_id: i32,
    pub message_id: Option<i32>, // null for manual entries
    pub amount: f64,
    pub currency: String,
    pub status: String, // pending, confirmed, rejected, cancelled
    pub method: Option<String>,
    pub reference_number: Option<String>,
    pub payment_date: Option<String>, // YYYY-MM-DD
    pub confidence: Option<i32>,
    pub due_date: Option<String>, // YYYY-MM-DD, presence triggers reminder scheduling
    pub confirmed_by: Option<String>,
    pub confirmed_at: Option<i32>,
    pub rejected_reason: Option<String>,
    pub created_at: i32,
    pub updated_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = payments)]
pub struct NewPayment {
    pub user_id: i32,
    pub contact_id: i32,
    pub message_id: Option<i32>,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub method: Option<String>,
    pub reference_number: Option<String>,
    pub payment_date: Option<String>,
    pub confidence: Option<i32>,
    pub due_date: Option<String>,
    pub created_at: i32,
    pub updated_at: i32,
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = payment_promises)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PaymentPromise {
    pub id: i32,
    pub user_id: i32,
    pub contact_id: i32,
    pub message_id: Option<i32>,
    pub amount: f64, // 0 when the classifier extracted no amount
    pub currency: String,
    pub promised_date: Option<String>, // YYYY-MM-DD
    pub status: String, // pending, fulfilled, expired
    pub notes: Option<String>,
    pub created_at: i32,
    pub updated_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = payment_promises)]
pub struct NewPaymentPromise {
    pub user_id: i32,
    pub contact_id: i32,
    pub message_id: Option<i32>,
    pub amount: f64,
    pub currency: String,
    pub promised_date: Option<String>,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: i32,
    pub updated_at: i32,
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = payment_reminders)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PaymentReminder {
    pub id: i32,
    pub user_id: i32,
    pub payment_id: Option<i32>,
    pub contact_id: i32,
    pub reminder_type: String, // before_due, on_due, after_due
    pub days_offset: i32,      // negative before the due date, 0 on it, positive after
    pub status: String,        // scheduled, sending, sent, failed, cancelled
    pub scheduled_at: i32,
    pub sent_at: Option<i32>,
    pub message_template: Option<String>, // per-row override, else the policy template
    pub channel: String,                  // whatsapp, email, both
    pub error_message: Option<String>,
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = payment_reminders)]
pub struct NewPaymentReminder {
    pub user_id: i32,
    pub payment_id: Option<i32>,
    pub contact_id: i32,
    pub reminder_type: String,
    pub days_offset: i32,
    pub status: String,
    pub scheduled_at: i32,
    pub message_template: Option<String>,
    pub channel: String,
    pub created_at: i32,
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = reminder_settings)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ReminderSettings {
    pub id: i32,
    pub user_id: i32,
    pub auto_remind_enabled: bool,
    pub days_before: String, // JSON array of day counts, e.g. "[3,1]"
    pub remind_on_due_date: bool,
    pub days_after: String, // JSON array of day counts, e.g. "[1,3,7]"
    pub preferred_hour: i32, // 0-23, in the settings timezone
    pub timezone: String,    // IANA name, e.g. America/Lima
    pub whatsapp_enabled: bool,
    pub email_enabled: bool,
    pub template_before: Option<String>,
    pub template_on_due: Option<String>,
    pub template_after: Option<String>,
    pub updated_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = reminder_settings)]
pub struct NewReminderSettings {
    pub user_id: i32,
    pub auto_remind_enabled: bool,
    pub days_before: String,
    pub remind_on_due_date: bool,
    pub days_after: String,
    pub preferred_hour: i32,
    pub timezone: String,
    pub whatsapp_enabled: bool,
    pub email_enabled: bool,
    pub template_before: Option<String>,
    pub template_on_due: Option<String>,
    pub template_after: Option<String>,
    pub updated_at: i32,
}

#[derive(Queryable, Selectable, Clone, Debug, Serialize)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Notification {
    pub id: i32,
    pub user_id: i32,
    pub notification_type: String, // payment_detected, promise_detected, reminder_scheduled, reminder_sent, reminder_failed, promise_expired
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub user_id: i32,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: i32,
}

#[derive(Queryable, Selectable, Clone, Debug)]
#[diesel(table_name = whatsapp_logs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WhatsappLog {
    pub id: i32,
    pub user_id: Option<i32>, // null when the message could not be routed to a user
    pub wa_message_id: Option<String>,
    pub status: String, // processed, failed, skipped
    pub detail: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: Option<i32>,
    pub created_at: i32,
}

#[derive(Insertable)]
#[diesel(table_name = whatsapp_logs)]
pub struct NewWhatsappLog {
    pub user_id: Option<i32>,
    pub wa_message_id: Option<String>,
    pub status: String,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: Option<i32>,
    pub created_at: i32,
}
