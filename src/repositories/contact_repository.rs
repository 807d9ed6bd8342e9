use diesel::prelude::*;
use diesel::result::Error as DieselError;

use crate::{
    models::domain_models::{Contact, NewContact},
    schema::contacts,
    DbPool,
};

pub struct ContactRepository {
    pub pool: DbPool,
}

impl ContactRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn find_by_id(&self, user_id: i32, contact_id: i32) -> Result<Option<Contact>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        contacts::table
            .filter(contacts::id.eq(contact_id))
            .filter(contacts::user_id.eq(user_id))
            .first::<Contact>(&mut conn)
            .optional()
    }

    pub fn list_for_user(&self, user_id: i32) -> Result<Vec<Contact>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        contacts::table
            .filter(contacts::user_id.eq(user_id))
            .order_by(contacts::last_message_at.desc())
            .load::<Contact>(&mut conn)
    }

    // Atomic resolve-or-create keyed on (user_id, phone). Two deliveries for the
    // same sender racing here both land on the one row. The profile name only
    // overwrites when the webhook actually carried one, so a user-edited name
    // survives deliveries without profile data.
    pub fn upsert_by_phone(
        &self,
        user_id: i32,
        phone: &str,
        profile_name: Option<&str>,
        now: i32,
    ) -> Result<Contact, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let new_contact = NewContact {
            user_id,
            name: profile_name.unwrap_or(phone).to_string(),
            phone: phone.to_string(),
            total_paid: 0.0,
            total_pending: 0.0,
            last_message_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        match profile_name {
            Some(name) => {
                diesel::insert_into(contacts::table)
                    .values(&new_contact)
                    .on_conflict((contacts::user_id, contacts::phone))
                    .do_update()
                    .set((
                        contacts::name.eq(name),
                        contacts::last_message_at.eq(Some(now)),
                        contacts::updated_at.eq(now),
                    ))
                    .execute(&mut conn)?;
            }
            None => {
                diesel::insert_into(contacts::table)
                    .values(&new_contact)
                    .on_conflict((contacts::user_id, contacts::phone))
                    .do_update()
                    .set((
                        contacts::last_message_at.eq(Some(now)),
                        contacts::updated_at.eq(now),
                    ))
                    .execute(&mut conn)?;
            }
        }

        contacts::table
            .filter(contacts::user_id.eq(user_id))
            .filter(contacts::phone.eq(phone))
            .first::<Contact>(&mut conn)
    }

    // Payment created while unpaid: the amount joins the contact's pending total.
    pub fn add_pending(&self, user_id: i32, contact_id: i32, amount: f64, now: i32) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            contacts::table
                .filter(contacts::id.eq(contact_id))
                .filter(contacts::user_id.eq(user_id)),
        )
        .set((
            contacts::total_pending.eq(contacts::total_pending + amount),
            contacts::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
        Ok(())
    }

    // Payment detected from an inbound message: pending total grows and the
    // last-payment stamp moves even before the owner confirms.
    pub fn record_payment_detected(
        &self,
        user_id: i32,
        contact_id: i32,
        amount: f64,
        now: i32,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            contacts::table
                .filter(contacts::id.eq(contact_id))
                .filter(contacts::user_id.eq(user_id)),
        )
        .set((
            contacts::total_pending.eq(contacts::total_pending + amount),
            contacts::last_payment_at.eq(Some(now)),
            contacts::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
        Ok(())
    }

    // Payment rejected or cancelled: the amount leaves the pending total.
    pub fn release_pending(&self, user_id: i32, contact_id: i32, amount: f64, now: i32) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            contacts::table
                .filter(contacts::id.eq(contact_id))
                .filter(contacts::user_id.eq(user_id)),
        )
        .set((
            contacts::total_pending.eq(contacts::total_pending - amount),
            contacts::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
        Ok(())
    }

    // Payment confirmed: pending -> paid, and the contact's last payment stamp moves.
    pub fn record_payment_confirmed(
        &self,
        user_id: i32,
        contact_id: i32,
        amount: f64,
        now: i32,
    ) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            contacts::table
                .filter(contacts::id.eq(contact_id))
                .filter(contacts::user_id.eq(user_id)),
        )
        .set((
            contacts::total_paid.eq(contacts::total_paid + amount),
            contacts::total_pending.eq(contacts::total_pending - amount),
            contacts::last_payment_at.eq(Some(now)),
            contacts::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
        Ok(())
    }
}
