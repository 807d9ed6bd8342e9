use diesel::prelude::*;
use diesel::result::Error as DieselError;

use crate::{
    models::domain_models::{Message, NewMessage, NewWhatsappLog},
    schema::{messages, whatsapp_logs},
    DbPool,
};

pub struct MessageRepository {
    pub pool: DbPool,
}

impl MessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn exists_by_wa_message_id(&self, wa_message_id: &str) -> Result<bool, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let count: i64 = messages::table
            .filter(messages::wa_message_id.eq(wa_message_id))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    pub fn find_by_wa_message_id(&self, wa_message_id: &str) -> Result<Option<Message>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        messages::table
            .filter(messages::wa_message_id.eq(wa_message_id))
            .first::<Message>(&mut conn)
            .optional()
    }

    // Idempotency gate: the unique index on wa_message_id absorbs provider
    // redeliveries. Ok(None) means another delivery already owns this id and
    // the caller must not create payments/promises from it.
    pub fn insert_if_new(&self, new_message: &NewMessage) -> Result<Option<Message>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let inserted = diesel::insert_into(messages::table)
            .values(new_message)
            .on_conflict(messages::wa_message_id)
            .do_nothing()
            .execute(&mut conn)?;

        if inserted == 0 {
            return Ok(None);
        }

        messages::table
            .filter(messages::wa_message_id.eq(&new_message.wa_message_id))
            .first::<Message>(&mut conn)
            .map(Some)
    }

    // Outbound sends (reminders) are recorded under the provider-assigned id.
    pub fn create_outbound(&self, new_message: &NewMessage) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(messages::table)
            .values(new_message)
            .on_conflict(messages::wa_message_id)
            .do_nothing()
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn list_for_contact(
        &self,
        user_id: i32,
        contact_id: i32,
        limit: i64,
    ) -> Result<Vec<Message>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        messages::table
            .filter(messages::user_id.eq(user_id))
            .filter(messages::contact_id.eq(contact_id))
            .order_by(messages::created_at.desc())
            .limit(limit)
            .load::<Message>(&mut conn)
    }

    pub fn log_event(&self, log: &NewWhatsappLog) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(whatsapp_logs::table)
            .values(log)
            .execute(&mut conn)?;
        Ok(())
    }
}
