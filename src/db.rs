use std::str::FromStr;

use anyhow::Context;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::TriageError;
use crate::models::{AuditRecord, Condition, ContactMessage, NewAuditRecord, Session};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url {database_url}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to open SQLite database")
}

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Appends one audit row. The timestamp is assigned by the store and never
/// precedes the subject's latest record.
pub async fn record(pool: &SqlitePool, entry: NewAuditRecord<'_>) -> Result<AuditRecord, TriageError> {
    let row = sqlx::query(
        r#"
        INSERT INTO predictions (username, condition, result, confidence, summary, created_at)
        VALUES (
            ?1, ?2, ?3, ?4, ?5,
            MAX(
                strftime('%Y-%m-%d %H:%M:%f', 'now'),
                COALESCE((SELECT MAX(created_at) FROM predictions WHERE username = ?1), '')
            )
        )
        RETURNING id, username, condition, result, confidence, summary, created_at
        "#,
    )
    .bind(entry.subject_id)
    .bind(entry.condition.as_str())
    .bind(entry.label)
    .bind(entry.confidence_percent)
    .bind(entry.summary)
    .fetch_one(pool)
    .await?;

    audit_record(&row)
}

/// Records newest first, optionally restricted to one subject.
pub async fn fetch(
    pool: &SqlitePool,
    subject_id: Option<&str>,
    limit: i64,
) -> Result<Vec<AuditRecord>, TriageError> {
    if limit <= 0 {
        return Ok(Vec::new());
    }

    let mut query = String::from(
        "SELECT id, username, condition, result, confidence, summary, created_at \
         FROM predictions",
    );

    if subject_id.is_some() {
        query.push_str(" WHERE username = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2");
    } else {
        query.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?1");
    }

    let mut rows = sqlx::query(&query);
    if let Some(value) = subject_id {
        rows = rows.bind(value);
    }
    rows = rows.bind(limit);

    rows.fetch_all(pool)
        .await?
        .iter()
        .map(audit_record)
        .collect()
}

pub async fn clear_history(pool: &SqlitePool, subject_id: &str) -> Result<u64, TriageError> {
    let result = sqlx::query("DELETE FROM predictions WHERE username = ?1")
        .bind(subject_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

fn audit_record(row: &SqliteRow) -> Result<AuditRecord, TriageError> {
    let condition: String = row.try_get("condition")?;
    let condition = condition
        .parse::<Condition>()
        .map_err(|err| sqlx::Error::Decode(err.into()))?;

    Ok(AuditRecord {
        id: row.try_get("id")?,
        subject_id: row.try_get("username")?,
        condition,
        label: row.try_get("result")?,
        confidence_percent: row.try_get("confidence")?,
        summary: row.try_get("summary")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Argon2id PHC string with a random salt.
fn hash_password(password: &str) -> Result<String, TriageError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|err| TriageError::BadInput(format!("Cannot hash password: {err}")))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| TriageError::BadInput(format!("Cannot hash password: {err}")))?;
    Ok(hash.to_string())
}

fn password_matches(stored: &str, password: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    password: &str,
    role: &str,
) -> Result<Session, TriageError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(TriageError::BadInput(
            "Username and password are required".to_string(),
        ));
    }

    let password_hash = hash_password(password)?;
    let result = sqlx::query("INSERT INTO users (username, password_hash, role) VALUES (?1, ?2, ?3)")
        .bind(username)
        .bind(password_hash)
        .bind(role)
        .execute(pool)
        .await;

    match result {
        Ok(_) => Ok(Session {
            username: username.to_string(),
            role: role.to_string(),
        }),
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Err(
            TriageError::BadInput(format!("Username {username} already exists")),
        ),
        Err(err) => Err(err.into()),
    }
}

pub async fn verify_user(
    pool: &SqlitePool,
    username: &str,
    password: &str,
) -> Result<Option<Session>, TriageError> {
    let row = sqlx::query("SELECT username, password_hash, role FROM users WHERE username = ?1")
        .bind(username.trim())
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let stored: String = row.try_get("password_hash")?;
    if !password_matches(&stored, password) {
        return Ok(None);
    }

    Ok(Some(Session {
        username: row.try_get("username")?,
        role: row.try_get("role")?,
    }))
}

pub async fn save_message(pool: &SqlitePool, message: &ContactMessage) -> Result<i64, TriageError> {
    let fields = [&message.name, &message.email, &message.subject, &message.message];
    if fields.iter().any(|field| field.trim().is_empty()) {
        return Err(TriageError::BadInput("Please fill in all fields.".to_string()));
    }

    let row = sqlx::query(
        "INSERT INTO messages (name, email, subject, message) VALUES (?1, ?2, ?3, ?4) RETURNING id",
    )
    .bind(message.name.trim())
    .bind(message.email.trim())
    .bind(message.subject.trim())
    .bind(message.message.trim())
    .fetch_one(pool)
    .await?;

    Ok(row.try_get("id")?)
}

#[cfg(test)]
pub(crate) mod testing {
    use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

    /// Fresh migrated in-memory database on a single connection.
    pub async fn memory_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        super::init_db(&pool).await.unwrap();
        pool
    }
}
