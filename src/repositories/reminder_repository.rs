use diesel::prelude::*;
use diesel::result::Error as DieselError;

use crate::{
    models::domain_models::{Contact, NewPaymentReminder, Payment, PaymentReminder},
    schema::{contacts, payment_reminders, payments},
    DbPool,
};

pub struct ReminderRepository {
    pub pool: DbPool,
}

impl ReminderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // One statement, so a batch lands completely or not at all.
    pub fn create_batch(&self, rows: &[NewPaymentReminder]) -> Result<usize, DieselError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(payment_reminders::table)
            .values(rows)
            .execute(&mut conn)
    }

    // Scheduling gate under one transaction: a payment gets its batch at most
    // once. Ok(None) means a non-cancelled batch already existed.
    pub fn create_batch_if_first(
        &self,
        payment_id: i32,
        rows: &[NewPaymentReminder],
    ) -> Result<Option<usize>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        conn.transaction(|conn| {
            let existing: i64 = payment_reminders::table
                .filter(payment_reminders::payment_id.eq(payment_id))
                .filter(payment_reminders::status.ne("cancelled"))
                .count()
                .get_result(conn)?;
            if existing > 0 {
                return Ok(None);
            }
            if rows.is_empty() {
                return Ok(Some(0));
            }
            let inserted = diesel::insert_into(payment_reminders::table)
                .values(rows)
                .execute(conn)?;
            Ok(Some(inserted))
        })
    }

    // Same gate, read-only form, for callers that want to skip the slot
    // computation entirely.
    pub fn has_active_for_payment(&self, payment_id: i32) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let count: i64 = payment_reminders::table
            .filter(payment_reminders::payment_id.eq(payment_id))
            .filter(payment_reminders::status.ne("cancelled"))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    pub fn find_by_id(&self, reminder_id: i32, user_id: i32) -> Result<Option<PaymentReminder>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        payment_reminders::table
            .filter(payment_reminders::id.eq(reminder_id))
            .filter(payment_reminders::user_id.eq(user_id))
            .first::<PaymentReminder>(&mut conn)
            .optional()
    }

    pub fn list_for_payment(&self, payment_id: i32, user_id: i32) -> Result<Vec<PaymentReminder>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        payment_reminders::table
            .filter(payment_reminders::payment_id.eq(payment_id))
            .filter(payment_reminders::user_id.eq(user_id))
            .order_by(payment_reminders::scheduled_at.asc())
            .load::<PaymentReminder>(&mut conn)
    }

    pub fn list_for_user(
        &self,
        user_id: i32,
        status: Option<&str>,
    ) -> Result<Vec<PaymentReminder>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let mut query = payment_reminders::table
            .filter(payment_reminders::user_id.eq(user_id))
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(payment_reminders::status.eq(status.to_string()));
        }
        query
            .order_by(payment_reminders::scheduled_at.asc())
            .load::<PaymentReminder>(&mut conn)
    }

    pub fn cancel(&self, reminder_id: i32, user_id: i32) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            payment_reminders::table
                .filter(payment_reminders::id.eq(reminder_id))
                .filter(payment_reminders::user_id.eq(user_id))
                .filter(payment_reminders::status.eq("scheduled")),
        )
        .set(payment_reminders::status.eq("cancelled"))
        .execute(&mut conn)
    }

    // Due-date changes drop the old batch before the new one is generated. Rows
    // already sent or failed keep their history.
    pub fn cancel_scheduled_for_payment(&self, payment_id: i32, user_id: i32) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            payment_reminders::table
                .filter(payment_reminders::payment_id.eq(payment_id))
                .filter(payment_reminders::user_id.eq(user_id))
                .filter(payment_reminders::status.eq("scheduled")),
        )
        .set(payment_reminders::status.eq("cancelled"))
        .execute(&mut conn)
    }

    pub fn due_for_dispatch(
        &self,
        now: i32,
        limit: i64,
    ) -> Result<Vec<(PaymentReminder, Contact, Option<Payment>)>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        payment_reminders::table
            .inner_join(contacts::table)
            .left_join(payments::table)
            .filter(payment_reminders::status.eq("scheduled"))
            .filter(payment_reminders::scheduled_at.le(now))
            .order_by(payment_reminders::scheduled_at.asc())
            .limit(limit)
            .load::<(PaymentReminder, Contact, Option<Payment>)>(&mut conn)
    }

    // Conditional claim: only one dispatcher run can move scheduled -> sending,
    // so a slow previous tick cannot double-send a row.
    pub fn claim(&self, reminder_id: i32) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let claimed = diesel::update(
            payment_reminders::table
                .filter(payment_reminders::id.eq(reminder_id))
                .filter(payment_reminders::status.eq("scheduled")),
        )
        .set(payment_reminders::status.eq("sending"))
        .execute(&mut conn)?;
        Ok(claimed == 1)
    }

    pub fn mark_sent(&self, reminder_id: i32, now: i32) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            payment_reminders::table
                .filter(payment_reminders::id.eq(reminder_id))
                .filter(payment_reminders::status.eq("sending")),
        )
        .set((
            payment_reminders::status.eq("sent"),
            payment_reminders::sent_at.eq(Some(now)),
        ))
        .execute(&mut conn)?;
        Ok(())
    }

    pub fn mark_failed(&self, reminder_id: i32, error: &str) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            payment_reminders::table
                .filter(payment_reminders::id.eq(reminder_id))
                .filter(payment_reminders::status.eq("sending")),
        )
        .set((
            payment_reminders::status.eq("failed"),
            payment_reminders::error_message.eq(error),
        ))
        .execute(&mut conn)?;
        Ok(())
    }
}
