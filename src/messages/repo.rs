use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub audience: Vec<String>,
    pub status: String,
    pub sent_at: Option<OffsetDateTime>,
    pub scheduled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Message {
    /// Messages already delivered: explicitly sent, or whose send time has
    /// passed. Newest first.
    pub async fn list_past(db: &PgPool, limit: i64, offset: i64) -> anyhow::Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, title, content, audience, status, sent_at, scheduled_at,
                   created_at, updated_at
            FROM messages
            WHERE status = 'sent' OR sent_at <= now()
            ORDER BY sent_at DESC NULLS LAST, created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn count_past(db: &PgPool) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE status = 'sent' OR sent_at <= now()",
        )
        .fetch_one(db)
        .await?;
        Ok(count)
    }

    /// Pending messages still waiting for their scheduled time. Soonest first.
    pub async fn list_scheduled(
        db: &PgPool,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, title, content, audience, status, sent_at, scheduled_at,
                   created_at, updated_at
            FROM messages
            WHERE status = 'pending' AND scheduled_at > now()
            ORDER BY scheduled_at ASC, created_at ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    pub async fn count_scheduled(db: &PgPool) -> anyhow::Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM messages WHERE status = 'pending' AND scheduled_at > now()",
        )
        .fetch_one(db)
        .await?;
        Ok(count)
    }
}
