pub mod admin;
pub mod auth;
pub mod challenge;
pub mod health;
pub mod payments;
pub mod signals;
pub mod subscription;

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::user::User;

pub(crate) async fn load_user(db: &sqlx::PgPool, user_id: Uuid) -> AppResult<User> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or(AppError::NotFound("User not found".into()))
}
