use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: String,
    pub tg_id: i64,
    pub tg_username: Option<String>,
    pub first_name: Option<String>,
    pub avatar_url: Option<String>,
    pub rating: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub tg_id: i64,
    pub tg_username: Option<String>,
    pub first_name: Option<String>,
}

const DEFAULT_RATING: f64 = 5.0;

impl User {
    /// 按外部身份（Telegram ID）取用户，不存在则创建
    pub async fn get_or_create(
        pool: &PgPool,
        tg_id: i64,
        tg_username: Option<&str>,
        first_name: Option<&str>,
    ) -> Result<Self, ServiceError> {
        if let Some(user) = Self::find_by_tg_id(pool, tg_id).await? {
            return Ok(user);
        }

        let user_id = Uuid::new_v4().to_string();
        let inserted = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (user_id, tg_id, tg_username, first_name, avatar_url, rating, created_at)
            VALUES ($1, $2, $3, $4, NULL, $5, NOW())
            ON CONFLICT (tg_id) DO NOTHING
            RETURNING user_id, tg_id, tg_username, first_name, avatar_url, rating, created_at
            "#,
        )
        .bind(&user_id)
        .bind(tg_id)
        .bind(tg_username)
        .bind(first_name)
        .bind(DEFAULT_RATING)
        .fetch_optional(pool)
        .await?;

        match inserted {
            Some(user) => Ok(user),
            // 并发创建时对方先插入，重新读取即可
            None => Self::find_by_tg_id(pool, tg_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound("用户不存在".into())),
        }
    }

    pub async fn find_by_tg_id(pool: &PgPool, tg_id: i64) -> Result<Option<Self>, ServiceError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, tg_id, tg_username, first_name, avatar_url, rating, created_at
            FROM users
            WHERE tg_id = $1
            "#,
        )
        .bind(tg_id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    pub async fn find_many(pool: &PgPool, user_ids: &[String]) -> Result<Vec<Self>, ServiceError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, tg_id, tg_username, first_name, avatar_url, rating, created_at
            FROM users
            WHERE user_id = ANY($1)
            "#,
        )
        .bind(user_ids)
        .fetch_all(pool)
        .await?;

        Ok(users)
    }
}
