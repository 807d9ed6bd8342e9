use diesel::prelude::*;
use diesel::result::Error as DieselError;

use crate::{
    models::domain_models::{NewNotification, Notification},
    schema::notifications,
    DbPool,
};

pub struct NotificationRepository {
    pub pool: DbPool,
}

impl NotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn create(&self, notification: &NewNotification) -> Result<(), DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::insert_into(notifications::table)
            .values(notification)
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn list_for_user(&self, user_id: i32, unread_only: bool) -> Result<Vec<Notification>, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        let mut query = notifications::table
            .filter(notifications::user_id.eq(user_id))
            .into_boxed();
        if unread_only {
            query = query.filter(notifications::read.eq(false));
        }
        query
            .order_by(notifications::created_at.desc())
            .limit(100)
            .load::<Notification>(&mut conn)
    }

    pub fn mark_read(&self, notification_id: i32, user_id: i32) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().expect("Failed to get DB connection");
        diesel::update(
            notifications::table
                .filter(notifications::id.eq(notification_id))
                .filter(notifications::user_id.eq(user_id)),
        )
        .set(notifications::read.eq(true))
        .execute(&mut conn)
    }
}
