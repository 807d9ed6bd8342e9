use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use diesel::result::Error as DieselError;
use std::collections::HashSet;
use std::sync::Arc;

use crate::models::domain_models::{NewNotification, NewPaymentReminder, PaymentReminder, ReminderSettings};
use crate::AppState;

/// Widest day offset accepted on either side of the due date.
pub const MAX_DAY_OFFSET: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderKind {
    BeforeDue,
    OnDue,
    AfterDue,
}

impl ReminderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderKind::BeforeDue => "before_due",
            ReminderKind::OnDue => "on_due",
            ReminderKind::AfterDue => "after_due",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderSlot {
    pub kind: ReminderKind,
    /// Signed day offset relative to the due date: -3 fires three days before.
    pub days_offset: i32,
    /// Epoch seconds, UTC.
    pub scheduled_at: i64,
}

/// The scheduling-relevant view of a user's reminder settings.
pub struct SchedulePolicy {
    pub days_before: Vec<i64>,
    pub remind_on_due_date: bool,
    pub days_after: Vec<i64>,
    pub preferred_hour: u32,
    pub timezone: Tz,
}

impl SchedulePolicy {
    pub fn from_settings(settings: &ReminderSettings) -> Self {
        let timezone = settings.timezone.parse::<Tz>().unwrap_or_else(|_| {
            tracing::warn!(
                "Unknown timezone {:?} in reminder settings, falling back to America/Lima",
                settings.timezone
            );
            chrono_tz::America::Lima
        });
        SchedulePolicy {
            days_before: parse_day_offsets(&settings.days_before),
            remind_on_due_date: settings.remind_on_due_date,
            days_after: parse_day_offsets(&settings.days_after),
            preferred_hour: settings.preferred_hour.clamp(0, 23) as u32,
            timezone,
        }
    }
}

pub fn parse_day_offsets(raw: &str) -> Vec<i64> {
    match serde_json::from_str::<Vec<i64>>(raw) {
        Ok(days) => days,
        Err(_) => {
            tracing::warn!("Could not parse day-offset list {:?}, treating as empty", raw);
            Vec::new()
        }
    }
}

/// Materialize the firing times for one due date under one policy. Before-due
/// and on-due slots are kept only when strictly in the future; after-due slots
/// are kept unconditionally, since a payment scheduled late is genuinely
/// overdue and those reminders still apply. Offsets outside
/// `1..=MAX_DAY_OFFSET` are ignored and repeated offsets collapse to one slot.
pub fn compute_reminder_times(
    due_date: NaiveDate,
    policy: &SchedulePolicy,
    now: DateTime<Utc>,
) -> Vec<ReminderSlot> {
    let now_ts = now.timestamp();
    let mut slots: Vec<ReminderSlot> = Vec::new();
    let mut seen: HashSet<(ReminderKind, i32)> = HashSet::new();

    for days in &policy.days_before {
        if !(1..=MAX_DAY_OFFSET).contains(days) {
            continue;
        }
        let fire_ts = slot_epoch(due_date - Duration::days(*days), policy);
        if fire_ts > now_ts && seen.insert((ReminderKind::BeforeDue, -(*days as i32))) {
            slots.push(ReminderSlot {
                kind: ReminderKind::BeforeDue,
                days_offset: -(*days as i32),
                scheduled_at: fire_ts,
            });
        }
    }

    if policy.remind_on_due_date {
        let fire_ts = slot_epoch(due_date, policy);
        if fire_ts > now_ts && seen.insert((ReminderKind::OnDue, 0)) {
            slots.push(ReminderSlot {
                kind: ReminderKind::OnDue,
                days_offset: 0,
                scheduled_at: fire_ts,
            });
        }
    }

    for days in &policy.days_after {
        if !(1..=MAX_DAY_OFFSET).contains(days) {
            continue;
        }
        let fire_ts = slot_epoch(due_date + Duration::days(*days), policy);
        if seen.insert((ReminderKind::AfterDue, *days as i32)) {
            slots.push(ReminderSlot {
                kind: ReminderKind::AfterDue,
                days_offset: *days as i32,
                scheduled_at: fire_ts,
            });
        }
    }

    slots.sort_by_key(|slot| slot.scheduled_at);
    slots
}

// Preferred hour is wall-clock time in the policy's timezone; storage is UTC.
fn slot_epoch(date: NaiveDate, policy: &SchedulePolicy) -> i64 {
    let time = NaiveTime::from_hms_opt(policy.preferred_hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let naive = date.and_time(time);
    match policy.timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.timestamp(),
        LocalResult::Ambiguous(dt, _) => dt.timestamp(),
        // DST gap: the wall-clock time does not exist that day.
        LocalResult::None => Utc.from_utc_datetime(&naive).timestamp(),
    }
}

fn derive_channel(settings: &ReminderSettings) -> Option<&'static str> {
    match (settings.whatsapp_enabled, settings.email_enabled) {
        (true, true) => Some("both"),
        (true, false) => Some("whatsapp"),
        (false, true) => Some("email"),
        (false, false) => None,
    }
}

/// Generate and persist the reminder batch for a payment that acquired a due
/// date. Exits early, creating nothing, when the user has no settings row,
/// auto-reminders are off, no channel is enabled, or the payment already has a
/// non-cancelled batch.
pub fn schedule_payment_reminders(
    state: &Arc<AppState>,
    payment_id: i32,
    user_id: i32,
    contact_id: i32,
    due_date: NaiveDate,
    amount: f64,
    currency: &str,
) -> Result<Vec<PaymentReminder>, DieselError> {
    let now = Utc::now();
    let now_ts = now.timestamp() as i32;

    let settings = match state.user_core.get_reminder_settings(user_id)? {
        Some(settings) if settings.auto_remind_enabled => settings,
        _ => {
            tracing::debug!("Auto reminders off for user {}, nothing scheduled", user_id);
            return Ok(Vec::new());
        }
    };

    let channel = match derive_channel(&settings) {
        Some(channel) => channel,
        None => {
            tracing::debug!("No reminder channel enabled for user {}, nothing scheduled", user_id);
            return Ok(Vec::new());
        }
    };

    if state.reminder_repository.has_active_for_payment(payment_id)? {
        tracing::debug!("Payment {} already has a reminder batch, skipping", payment_id);
        return Ok(Vec::new());
    }

    let policy = SchedulePolicy::from_settings(&settings);
    let slots = compute_reminder_times(due_date, &policy, now);

    let rows: Vec<NewPaymentReminder> = slots
        .iter()
        .filter(|slot| {
            let fits = slot.scheduled_at <= i32::MAX as i64;
            if !fits {
                tracing::warn!(
                    "Slot at {} for payment {} is past the epoch-second range, dropped",
                    slot.scheduled_at,
                    payment_id
                );
            }
            fits
        })
        .map(|slot| NewPaymentReminder {
            user_id,
            payment_id: Some(payment_id),
            contact_id,
            reminder_type: slot.kind.as_str().to_string(),
            days_offset: slot.days_offset,
            status: "scheduled".to_string(),
            scheduled_at: slot.scheduled_at as i32,
            message_template: None,
            channel: channel.to_string(),
            created_at: now_ts,
        })
        .collect();

    if rows.is_empty() {
        tracing::debug!(
            "No upcoming reminder slots for payment {}, nothing scheduled",
            payment_id
        );
        return Ok(Vec::new());
    }

    if state
        .reminder_repository
        .create_batch_if_first(payment_id, &rows)?
        .is_none()
    {
        // Another trigger got there first.
        return Ok(Vec::new());
    }

    let created: Vec<PaymentReminder> = state
        .reminder_repository
        .list_for_payment(payment_id, user_id)?
        .into_iter()
        .filter(|row| row.status == "scheduled")
        .collect();

    state.notification_repository.create(&NewNotification {
        user_id,
        notification_type: "reminder_scheduled".to_string(),
        title: "Recordatorios programados".to_string(),
        message: format!(
            "Se programaron {} recordatorios para el pago de {} {:.2}.",
            created.len(),
            currency,
            amount
        ),
        read: false,
        created_at: now_ts,
    })?;

    tracing::info!(
        "Scheduled {} reminders for payment {} (user {})",
        created.len(),
        payment_id,
        user_id
    );
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    fn lima_policy(days_before: &[i64], on_due: bool, days_after: &[i64]) -> SchedulePolicy {
        SchedulePolicy {
            days_before: days_before.to_vec(),
            remind_on_due_date: on_due,
            days_after: days_after.to_vec(),
            preferred_hour: 9,
            timezone: chrono_tz::America::Lima,
        }
    }

    fn lima_at(y: i32, m: u32, d: u32, h: u32) -> i64 {
        chrono_tz::America::Lima
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
            .timestamp()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn before_and_on_due_slots_at_preferred_hour() {
        let policy = lima_policy(&[3, 1], true, &[]);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let slots = compute_reminder_times(date(2024, 6, 15), &policy, now);

        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].kind, ReminderKind::BeforeDue);
        assert_eq!(slots[0].days_offset, -3);
        assert_eq!(slots[0].scheduled_at, lima_at(2024, 6, 12, 9));
        assert_eq!(slots[1].days_offset, -1);
        assert_eq!(slots[1].scheduled_at, lima_at(2024, 6, 14, 9));
        assert_eq!(slots[2].kind, ReminderKind::OnDue);
        assert_eq!(slots[2].scheduled_at, lima_at(2024, 6, 15, 9));
    }

    #[test]
    fn past_before_due_slots_are_omitted() {
        let policy = lima_policy(&[3, 1], true, &[]);
        let now = Utc.with_ymd_and_hms(2024, 6, 13, 15, 0, 0).unwrap();
        let slots = compute_reminder_times(date(2024, 6, 15), &policy, now);

        let offsets: Vec<i32> = slots.iter().map(|s| s.days_offset).collect();
        assert_eq!(offsets, vec![-1, 0]);
    }

    #[test]
    fn slot_exactly_at_now_is_not_future() {
        let policy = lima_policy(&[1], true, &[]);
        let now = DateTime::from_timestamp(lima_at(2024, 6, 14, 9), 0).unwrap();
        let slots = compute_reminder_times(date(2024, 6, 15), &policy, now);

        let offsets: Vec<i32> = slots.iter().map(|s| s.days_offset).collect();
        assert_eq!(offsets, vec![0]);
    }

    #[test]
    fn after_due_slots_always_scheduled() {
        let policy = lima_policy(&[3], true, &[1, 3, 7]);
        // Due date long past: every before/on slot is stale, after-due still lands.
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let slots = compute_reminder_times(date(2024, 1, 10), &policy, now);

        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(|s| s.kind == ReminderKind::AfterDue));
        let offsets: Vec<i32> = slots.iter().map(|s| s.days_offset).collect();
        assert_eq!(offsets, vec![1, 3, 7]);
        assert!(slots.iter().all(|s| s.scheduled_at < now.timestamp()));
    }

    #[test]
    fn duplicate_and_nonpositive_offsets_collapse() {
        let policy = lima_policy(&[3, 3, 0, -2, 1], false, &[]);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let slots = compute_reminder_times(date(2024, 6, 15), &policy, now);

        let offsets: Vec<i32> = slots.iter().map(|s| s.days_offset).collect();
        assert_eq!(offsets, vec![-3, -1]);
    }

    #[test]
    fn parse_day_offsets_accepts_json_and_rejects_garbage() {
        assert_eq!(parse_day_offsets("[3,1]"), vec![3, 1]);
        assert_eq!(parse_day_offsets("[]"), Vec::<i64>::new());
        assert_eq!(parse_day_offsets("not json"), Vec::<i64>::new());
    }

    #[test]
    fn out_of_range_preferred_hour_is_clamped() {
        let mut settings = test_utils::settings_template(1);
        settings.preferred_hour = 99;
        let policy = SchedulePolicy::from_settings(&settings);
        assert_eq!(policy.preferred_hour, 23);
    }

    #[test]
    fn unknown_timezone_falls_back_to_lima() {
        let mut settings = test_utils::settings_template(1);
        settings.timezone = "Mars/OlympusMons".to_string();
        let policy = SchedulePolicy::from_settings(&settings);
        assert_eq!(policy.timezone, chrono_tz::America::Lima);
    }

    #[test]
    fn disabled_policy_creates_nothing() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let contact = test_utils::seed_contact(&state, user.id, "+51911111111");
        test_utils::seed_settings(&state, user.id, |s| s.auto_remind_enabled = false);
        let payment = test_utils::seed_payment(&state, user.id, contact.id, 100.0, Some("2099-01-10"));

        let created = schedule_payment_reminders(
            &state,
            payment.id,
            user.id,
            contact.id,
            date(2099, 1, 10),
            100.0,
            "PEN",
        )
        .unwrap();

        assert!(created.is_empty());
        let rows = state.reminder_repository.list_for_user(user.id, None).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn missing_settings_row_creates_nothing() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let contact = test_utils::seed_contact(&state, user.id, "+51911111111");
        let payment = test_utils::seed_payment(&state, user.id, contact.id, 100.0, Some("2099-01-10"));

        let created = schedule_payment_reminders(
            &state,
            payment.id,
            user.id,
            contact.id,
            date(2099, 1, 10),
            100.0,
            "PEN",
        )
        .unwrap();

        assert!(created.is_empty());
    }

    #[test]
    fn schedules_batch_and_notifies() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let contact = test_utils::seed_contact(&state, user.id, "+51911111111");
        test_utils::seed_settings(&state, user.id, |_| {});
        let due = (Utc::now() + Duration::days(60)).date_naive();
        let due_str = due.format("%Y-%m-%d").to_string();
        let payment = test_utils::seed_payment(&state, user.id, contact.id, 150.5, Some(&due_str));

        let created = schedule_payment_reminders(
            &state, payment.id, user.id, contact.id, due, 150.5, "PEN",
        )
        .unwrap();

        // Defaults: [3,1] before, on-due, [1,3,7] after, all future.
        assert_eq!(created.len(), 6);
        assert!(created.iter().all(|r| r.status == "scheduled"));
        assert!(created.iter().all(|r| r.channel == "whatsapp"));
        assert!(created.iter().all(|r| r.payment_id == Some(payment.id)));

        let notifications = state.notification_repository.list_for_user(user.id, false).unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].notification_type, "reminder_scheduled");
        assert!(notifications[0].message.contains("6 recordatorios"));
    }

    #[test]
    fn second_invocation_is_a_noop() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let contact = test_utils::seed_contact(&state, user.id, "+51911111111");
        test_utils::seed_settings(&state, user.id, |_| {});
        let due = (Utc::now() + Duration::days(60)).date_naive();
        let due_str = due.format("%Y-%m-%d").to_string();
        let payment = test_utils::seed_payment(&state, user.id, contact.id, 150.5, Some(&due_str));

        let first = schedule_payment_reminders(
            &state, payment.id, user.id, contact.id, due, 150.5, "PEN",
        )
        .unwrap();
        let second = schedule_payment_reminders(
            &state, payment.id, user.id, contact.id, due, 150.5, "PEN",
        )
        .unwrap();

        assert_eq!(first.len(), 6);
        assert!(second.is_empty());
        let rows = state.reminder_repository.list_for_user(user.id, None).unwrap();
        assert_eq!(rows.len(), 6);
    }

    #[test]
    fn channel_is_both_when_email_also_enabled() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let contact = test_utils::seed_contact(&state, user.id, "+51911111111");
        test_utils::seed_settings(&state, user.id, |s| s.email_enabled = true);
        let due = (Utc::now() + Duration::days(30)).date_naive();
        let due_str = due.format("%Y-%m-%d").to_string();
        let payment = test_utils::seed_payment(&state, user.id, contact.id, 80.0, Some(&due_str));

        let created = schedule_payment_reminders(
            &state, payment.id, user.id, contact.id, due, 80.0, "PEN",
        )
        .unwrap();

        assert!(!created.is_empty());
        assert!(created.iter().all(|r| r.channel == "both"));
    }

    #[test]
    fn oversized_offsets_are_ignored() {
        let policy = lima_policy(&[2], true, &[7, 6000, 100_000_000]);
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let slots = compute_reminder_times(date(2024, 6, 15), &policy, now);

        let offsets: Vec<i32> = slots.iter().map(|s| s.days_offset).collect();
        assert_eq!(offsets, vec![-2, 0, 7]);
    }

    #[test]
    fn slots_past_the_epoch_range_are_not_persisted() {
        let state = test_utils::test_state();
        let user = test_utils::seed_user(&state);
        let contact = test_utils::seed_contact(&state, user.id, "+51911111111");
        test_utils::seed_settings(&state, user.id, |_| {});
        let payment = test_utils::seed_payment(&state, user.id, contact.id, 90.0, Some("2099-01-10"));

        // Every slot for a 2099 due date lands past what the i32 column holds.
        let created = schedule_payment_reminders(
            &state, payment.id, user.id, contact.id, date(2099, 1, 10), 90.0, "PEN",
        )
        .unwrap();

        assert!(created.is_empty());
        let rows = state.reminder_repository.list_for_user(user.id, None).unwrap();
        assert!(rows.is_empty());
        let notifications = state.notification_repository.list_for_user(user.id, false).unwrap();
        assert!(notifications.is_empty());
    }
}
