use diesel::prelude::*;
use diesel::result::Error as DieselError;

use crate::{
    models::domain_models::{NewReminderSettings, NewUser, ReminderSettings, User},
    schema::{reminder_settings, users},
    DbPool,
};

pub struct UserCore {
    pub pool: DbPool,
}

impl UserCore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn find_by_id(&self, user_id: i32) -> Result<Option<User>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        users::table
            .find(user_id)
            .first::<User>(&mut conn)
            .optional()
    }

    // Webhook routing: the delivery's metadata.phone_number_id identifies the business.
    pub fn find_by_phone_number_id(&self, phone_number_id: &str) -> Result<Option<User>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        users::table
            .filter(users::whatsapp_phone_number_id.eq(phone_number_id))
            .first::<User>(&mut conn)
            .optional()
    }

    pub fn create_user(&self, new_user: &NewUser) -> Result<User, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(users::table)
            .values(new_user)
            .execute(&mut conn)?;

        users::table
            .filter(users::email.eq(&new_user.email))
            .first::<User>(&mut conn)
    }

    pub fn get_reminder_settings(&self, user_id: i32) -> Result<Option<ReminderSettings>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        reminder_settings::table
            .filter(reminder_settings::user_id.eq(user_id))
            .first::<ReminderSettings>(&mut conn)
            .optional()
    }

    // Settings surface only. The scheduler never creates a row: a user without
    // settings gets no reminders.
    pub fn get_or_create_reminder_settings(&self, user_id: i32, now: i32) -> Result<ReminderSettings, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(reminder_settings::table)
            .values(&Self::default_settings(user_id, now))
            .on_conflict(reminder_settings::user_id)
            .do_nothing()
            .execute(&mut conn)?;

        reminder_settings::table
            .filter(reminder_settings::user_id.eq(user_id))
            .first::<ReminderSettings>(&mut conn)
    }

    pub fn update_reminder_settings(
        &self,
        user_id: i32,
        settings: &NewReminderSettings,
    ) -> Result<ReminderSettings, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let updated = diesel::update(
            reminder_settings::table.filter(reminder_settings::user_id.eq(user_id)),
        )
        .set((
            reminder_settings::auto_remind_enabled.eq(settings.auto_remind_enabled),
            reminder_settings::days_before.eq(&settings.days_before),
            reminder_settings::remind_on_due_date.eq(settings.remind_on_due_date),
            reminder_settings::days_after.eq(&settings.days_after),
            reminder_settings::preferred_hour.eq(settings.preferred_hour),
            reminder_settings::timezone.eq(&settings.timezone),
            reminder_settings::whatsapp_enabled.eq(settings.whatsapp_enabled),
            reminder_settings::email_enabled.eq(settings.email_enabled),
            reminder_settings::template_before.eq(settings.template_before.as_deref()),
            reminder_settings::template_on_due.eq(settings.template_on_due.as_deref()),
            reminder_settings::template_after.eq(settings.template_after.as_deref()),
            reminder_settings::updated_at.eq(settings.updated_at),
        ))
        .execute(&mut conn)?;

        if updated == 0 {
            diesel::insert_into(reminder_settings::table)
                .values(settings)
                .execute(&mut conn)?;
        }

        reminder_settings::table
            .filter(reminder_settings::user_id.eq(user_id))
            .first::<ReminderSettings>(&mut conn)
    }

    pub fn default_settings(user_id: i32, now: i32) -> NewReminderSettings {
        NewReminderSettings {
            user_id,
            auto_remind_enabled: true,
            days_before: "[3,1]".to_string(),
            remind_on_due_date: true,
            days_after: "[1,3,7]".to_string(),
            preferred_hour: 9,
            timezone: "America/Lima".to_string(),
            whatsapp_enabled: true,
            email_enabled: false,
            template_before: None,
            template_on_due: None,
            template_after: None,
            updated_at: now,
        }
    }
}
