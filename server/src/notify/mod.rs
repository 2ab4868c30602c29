//! Notification Outbox
//!
//! Email and SMS notifications are queued in a database table and drained by
//! a background worker, so request handlers never wait on SMTP. Rows are
//! claimed with `FOR UPDATE SKIP LOCKED`, which lets multiple server
//! instances share one outbox safely.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::email::EmailService;

/// Delivery attempts before a notification is marked failed.
const MAX_ATTEMPTS: i32 = 3;

/// Rows claimed per delivery cycle.
const BATCH_SIZE: i64 = 20;

/// Notification delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "notification_channel", rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Sms,
}

/// Outbox row lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "notification_status", rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

/// Queued notification.
#[derive(Debug, Clone, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub channel: NotificationChannel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub status: NotificationStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Queue an email notification.
pub async fn enqueue_email(
    pool: &PgPool,
    user_id: Option<Uuid>,
    recipient: &str,
    subject: &str,
    body: &str,
) -> sqlx::Result<Uuid> {
    let id: (Uuid,) = sqlx::query_as(
        r"
        INSERT INTO notifications (user_id, channel, recipient, subject, body)
        VALUES ($1, 'email', $2, $3, $4)
        RETURNING id
        ",
    )
    .bind(user_id)
    .bind(recipient)
    .bind(subject)
    .bind(body)
    .fetch_one(pool)
    .await?;

    Ok(id.0)
}

/// Queue an SMS notification.
pub async fn enqueue_sms(
    pool: &PgPool,
    user_id: Option<Uuid>,
    recipient: &str,
    body: &str,
) -> sqlx::Result<Uuid> {
    let id: (Uuid,) = sqlx::query_as(
        r"
        INSERT INTO notifications (user_id, channel, recipient, body)
        VALUES ($1, 'sms', $2, $3)
        RETURNING id
        ",
    )
    .bind(user_id)
    .bind(recipient)
    .bind(body)
    .fetch_one(pool)
    .await?;

    Ok(id.0)
}

/// Start the outbox delivery background task.
///
/// The first tick is consumed immediately so the worker does not compete
/// with the startup request burst. The returned `JoinHandle` should be
/// stored alongside other background task handles in `main`.
pub fn spawn_delivery_task(
    pool: PgPool,
    email: Option<EmailService>,
    poll_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(poll_secs.max(1)));
        interval.tick().await; // consume immediate first tick
        loop {
            interval.tick().await;
            run_delivery_cycle(&pool, email.as_ref()).await;
        }
    })
}

/// Claim and deliver one batch of pending notifications.
#[tracing::instrument(skip(pool, email))]
pub async fn run_delivery_cycle(pool: &PgPool, email: Option<&EmailService>) {
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to start outbox delivery transaction");
            return;
        }
    };

    let batch: Vec<Notification> = match sqlx::query_as(
        r"
        SELECT id, user_id, channel, recipient, subject, body,
               status, attempts, last_error, created_at, sent_at
        FROM notifications
        WHERE status = 'pending'
        ORDER BY created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        ",
    )
    .bind(BATCH_SIZE)
    .fetch_all(&mut *tx)
    .await
    {
        Ok(batch) => batch,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to claim notification batch");
            return;
        }
    };

    if batch.is_empty() {
        return;
    }

    let mut sent = 0u32;
    for notification in &batch {
        let outcome = deliver(notification, email).await;

        let (status, error) = match outcome {
            Delivery::Sent => {
                sent += 1;
                (NotificationStatus::Sent, None)
            }
            Delivery::Skipped(reason) => (NotificationStatus::Skipped, Some(reason)),
            Delivery::Error(reason) if notification.attempts + 1 >= MAX_ATTEMPTS => {
                (NotificationStatus::Failed, Some(reason))
            }
            Delivery::Error(reason) => (NotificationStatus::Pending, Some(reason)),
        };

        let result = sqlx::query(
            r"
            UPDATE notifications
            SET status = $2,
                attempts = attempts + 1,
                last_error = $3,
                sent_at = CASE WHEN $2 = 'sent'::notification_status THEN NOW() ELSE sent_at END
            WHERE id = $1
            ",
        )
        .bind(notification.id)
        .bind(status)
        .bind(error)
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, id = %notification.id, "Failed to update notification status");
        }
    }

    if let Err(e) = tx.commit().await {
        tracing::warn!(error = %e, "Failed to commit outbox delivery transaction");
        return;
    }

    tracing::debug!(claimed = batch.len(), sent, "Outbox delivery cycle completed");
}

enum Delivery {
    Sent,
    Skipped(String),
    Error(String),
}

async fn deliver(notification: &Notification, email: Option<&EmailService>) -> Delivery {
    match notification.channel {
        NotificationChannel::Email => match email {
            Some(service) => {
                let subject = notification.subject.as_deref().unwrap_or("Notification");
                match service
                    .send(&notification.recipient, subject, &notification.body)
                    .await
                {
                    Ok(()) => Delivery::Sent,
                    Err(e) => Delivery::Error(e.to_string()),
                }
            }
            None => Delivery::Skipped("SMTP not configured".to_string()),
        },
        // SMS delivery is an external gateway's job; without one configured
        // the entry is recorded and skipped.
        NotificationChannel::Sms => Delivery::Skipped("No SMS gateway configured".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sms_without_gateway_is_skipped() {
        let notification = Notification {
            id: Uuid::now_v7(),
            user_id: None,
            channel: NotificationChannel::Sms,
            recipient: "+15550100".into(),
            subject: None,
            body: "code 123456".into(),
            status: NotificationStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            sent_at: None,
        };

        assert!(matches!(
            deliver(&notification, None).await,
            Delivery::Skipped(_)
        ));
    }

    #[tokio::test]
    async fn test_email_without_smtp_is_skipped() {
        let notification = Notification {
            id: Uuid::now_v7(),
            user_id: None,
            channel: NotificationChannel::Email,
            recipient: "user@example.com".into(),
            subject: Some("Hello".into()),
            body: "Hi".into(),
            status: NotificationStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            sent_at: None,
        };

        assert!(matches!(
            deliver(&notification, None).await,
            Delivery::Skipped(_)
        ));
    }
}
