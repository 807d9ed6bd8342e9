use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sql_types::Integer;

use crate::{
    models::domain_models::{NewPayment, NewPaymentPromise, Payment, PaymentPromise},
    schema::{payment_promises, payments},
    DbPool,
};

diesel::sql_function! {
    fn last_insert_rowid() -> Integer;
}

pub struct PaymentRepository {
    pub pool: DbPool,
}

impl PaymentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn create_payment(&self, new_payment: &NewPayment) -> Result<Payment, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(payments::table)
            .values(new_payment)
            .execute(&mut conn)?;

        // Same pooled connection as the insert, so the rowid is ours.
        let id: i32 = diesel::select(last_insert_rowid()).get_result(&mut conn)?;
        payments::table.find(id).first::<Payment>(&mut conn)
    }

    pub fn find_by_id(&self, payment_id: i32, user_id: i32) -> Result<Option<Payment>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        payments::table
            .filter(payments::id.eq(payment_id))
            .filter(payments::user_id.eq(user_id))
            .first::<Payment>(&mut conn)
            .optional()
    }

    pub fn list_for_user(&self, user_id: i32, status: Option<&str>) -> Result<Vec<Payment>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let mut query = payments::table
            .filter(payments::user_id.eq(user_id))
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(payments::status.eq(status.to_string()));
        }
        query
            .order_by(payments::created_at.desc())
            .load::<Payment>(&mut conn)
    }

    // The pending-status filter is the terminal-state guard: confirmed, rejected
    // and cancelled rows never transition again. Zero affected rows tells the
    // caller the payment was missing or already settled.
    pub fn confirm(
        &self,
        payment_id: i32,
        user_id: i32,
        confirmed_by: &str,
        now: i32,
    ) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            payments::table
                .filter(payments::id.eq(payment_id))
                .filter(payments::user_id.eq(user_id))
                .filter(payments::status.eq("pending")),
        )
        .set((
            payments::status.eq("confirmed"),
            payments::confirmed_by.eq(confirmed_by),
            payments::confirmed_at.eq(Some(now)),
            payments::updated_at.eq(now),
        ))
        .execute(&mut conn)
    }

    pub fn reject(
        &self,
        payment_id: i32,
        user_id: i32,
        reason: Option<&str>,
        now: i32,
    ) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            payments::table
                .filter(payments::id.eq(payment_id))
                .filter(payments::user_id.eq(user_id))
                .filter(payments::status.eq("pending")),
        )
        .set((
            payments::status.eq("rejected"),
            payments::rejected_reason.eq(reason),
            payments::updated_at.eq(now),
        ))
        .execute(&mut conn)
    }

    pub fn cancel(&self, payment_id: i32, user_id: i32, now: i32) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            payments::table
                .filter(payments::id.eq(payment_id))
                .filter(payments::user_id.eq(user_id))
                .filter(payments::status.eq("pending")),
        )
        .set((
            payments::status.eq("cancelled"),
            payments::updated_at.eq(now),
        ))
        .execute(&mut conn)
    }

    // Due dates only move while the payment is still open.
    pub fn set_due_date(
        &self,
        payment_id: i32,
        user_id: i32,
        due_date: &str,
        now: i32,
    ) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            payments::table
                .filter(payments::id.eq(payment_id))
                .filter(payments::user_id.eq(user_id))
                .filter(payments::status.eq("pending")),
        )
        .set((
            payments::due_date.eq(due_date),
            payments::updated_at.eq(now),
        ))
        .execute(&mut conn)
    }

    pub fn create_promise(&self, new_promise: &NewPaymentPromise) -> Result<PaymentPromise, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(payment_promises::table)
            .values(new_promise)
            .execute(&mut conn)?;

        let id: i32 = diesel::select(last_insert_rowid()).get_result(&mut conn)?;
        payment_promises::table
            .find(id)
            .first::<PaymentPromise>(&mut conn)
    }

    pub fn find_promise_by_id(
        &self,
        promise_id: i32,
        user_id: i32,
    ) -> Result<Option<PaymentPromise>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        payment_promises::table
            .filter(payment_promises::id.eq(promise_id))
            .filter(payment_promises::user_id.eq(user_id))
            .first::<PaymentPromise>(&mut conn)
            .optional()
    }

    pub fn list_promises_for_user(
        &self,
        user_id: i32,
        status: Option<&str>,
    ) -> Result<Vec<PaymentPromise>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let mut query = payment_promises::table
            .filter(payment_promises::user_id.eq(user_id))
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(payment_promises::status.eq(status.to_string()));
        }
        query
            .order_by(payment_promises::created_at.desc())
            .load::<PaymentPromise>(&mut conn)
    }

    pub fn fulfill_promise(&self, promise_id: i32, user_id: i32, now: i32) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            payment_promises::table
                .filter(payment_promises::id.eq(promise_id))
                .filter(payment_promises::user_id.eq(user_id))
                .filter(payment_promises::status.eq("pending")),
        )
        .set((
            payment_promises::status.eq("fulfilled"),
            payment_promises::updated_at.eq(now),
        ))
        .execute(&mut conn)
    }

    pub fn expire_promise(&self, promise_id: i32, user_id: i32, now: i32) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            payment_promises::table
                .filter(payment_promises::id.eq(promise_id))
                .filter(payment_promises::user_id.eq(user_id))
                .filter(payment_promises::status.eq("pending")),
        )
        .set((
            payment_promises::status.eq("expired"),
            payment_promises::updated_at.eq(now),
        ))
        .execute(&mut conn)
    }

    // Daily job: every pending promise whose promised date is behind `today`
    // (YYYY-MM-DD, compared lexically) flips to expired. Returns the rows that
    // were flipped so the job can notify per user.
    pub fn expire_overdue_promises(&self, today: &str, now: i32) -> Result<Vec<PaymentPromise>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        conn.transaction(|conn| {
            let overdue: Vec<PaymentPromise> = payment_promises::table
                .filter(payment_promises::status.eq("pending"))
                .filter(payment_promises::promised_date.lt(today))
                .load::<PaymentPromise>(conn)?;

            if overdue.is_empty() {
                return Ok(Vec::new());
            }

            let ids: Vec<i32> = overdue.iter().map(|p| p.id).collect();
            diesel::update(payment_promises::table.filter(payment_promises::id.eq_any(ids)))
                .set((
                    payment_promises::status.eq("expired"),
                    payment_promises::updated_at.eq(now),
                ))
                .execute(conn)?;

            Ok(overdue)
        })
    }
}
