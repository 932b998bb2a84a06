mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

use crate::auth;
use crate::models::*;
use crate::severity::{Severity, SeverityRules};

/// Domain failures raised by the store. They travel inside `anyhow::Error`
/// and are recovered with `downcast_ref` by the HTTP layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("User already exists")]
    EmailTaken,

    #[error("Already upvoted")]
    AlreadyUpvoted,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const ISSUE_COLUMNS: &str = "i.id, i.title, i.description, i.image, i.location, i.severity, i.status,
     i.created_at, i.updated_at, u.id, u.name";

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        schema::run_migrations(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database lock poisoned")
    }

    // ============================================================
    // User operations
    // ============================================================

    pub fn create_user(&self, input: SignupInput) -> Result<User> {
        let name = required("name", &input.name)?;
        let email = required("email", &input.email)?.to_lowercase();
        if input.password.is_empty() {
            return Err(StoreError::Required("password").into());
        }

        let conn = self.lock();
        let taken: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?)",
            [&email],
            |row| row.get(0),
        )?;
        if taken {
            return Err(StoreError::EmailTaken.into());
        }

        let id = Uuid::new_v4();
        let now = now();
        conn.execute(
            "INSERT INTO users (id, name, email, password_hash, is_admin, created_at)
             VALUES (?, ?, ?, ?, 0, ?)",
            (
                id.to_string(),
                &name,
                &email,
                auth::hash_password(&input.password),
                timestamp(now),
            ),
        )?;

        tracing::info!("Registered user {}", id);
        Ok(User {
            id,
            name,
            email,
            is_admin: false,
            created_at: now,
        })
    }

    /// Returns the user if the email exists and the password matches.
    pub fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<User>> {
        let conn = self.lock();
        let found = conn
            .query_row(
                "SELECT id, name, email, is_admin, created_at, password_hash
                 FROM users WHERE email = ?",
                [email.trim().to_lowercase()],
                |row| Ok((user_from_row(row)?, row.get::<_, String>(5)?)),
            )
            .optional()?;

        Ok(found.and_then(|(user, hash)| auth::verify_password(password, &hash).then_some(user)))
    }

    pub fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let conn = self.lock();
        let user = conn
            .query_row(
                "SELECT id, name, email, is_admin, created_at FROM users WHERE id = ?",
                [id.to_string()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Grant or revoke administrator rights. Returns false if no such email.
    pub fn set_admin(&self, email: &str, is_admin: bool) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute(
            "UPDATE users SET is_admin = ? WHERE email = ?",
            (is_admin as i32, email.trim().to_lowercase()),
        )?;
        Ok(rows > 0)
    }

    // ============================================================
    // Session operations
    // ============================================================

    /// Start a session for `user_id`. Sessions that have already expired are
    /// purged first.
    pub fn create_session(&self, user_id: Uuid, ttl: Duration) -> Result<String> {
        let conn = self.lock();
        let token = auth::new_token();
        let now = now();

        // fixed-width timestamps compare correctly as text
        let purged = conn.execute("DELETE FROM sessions WHERE expires_at <= ?", [timestamp(now)])?;
        if purged > 0 {
            tracing::debug!("Purged {} expired sessions", purged);
        }

        conn.execute(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
            (&token, user_id.to_string(), timestamp(now), timestamp(now + ttl)),
        )?;

        Ok(token)
    }

    /// Resolve a session token to its user. Expired sessions are removed.
    pub fn get_session_user(&self, token: &str) -> Result<Option<User>> {
        let conn = self.lock();
        let found = conn
            .query_row(
                "SELECT u.id, u.name, u.email, u.is_admin, u.created_at, s.expires_at
                 FROM sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token = ?",
                [token],
                |row| Ok((user_from_row(row)?, row.get::<_, String>(5)?)),
            )
            .optional()?;

        let Some((user, expires_at)) = found else {
            return Ok(None);
        };

        if parse_datetime(expires_at) <= Utc::now() {
            conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
            tracing::debug!("Session for user {} expired", user.id);
            return Ok(None);
        }

        Ok(Some(user))
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
        Ok(rows > 0)
    }

    // ============================================================
    // Issue operations
    // ============================================================

    /// Store a new issue, tagging its severity from the title and description.
    pub fn create_issue(
        &self,
        user_id: Uuid,
        input: CreateIssueInput,
        rules: &SeverityRules,
    ) -> Result<Issue> {
        let title = required("title", &input.title)?;
        let description = required("description", &input.description)?;
        let location = required("location", &input.location)?;
        let severity = rules.classify(&title, &description);

        let conn = self.lock();
        let id = Uuid::new_v4();
        let now = timestamp(now());

        conn.execute(
            "INSERT INTO issues (id, user_id, title, description, image, location, severity, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                user_id.to_string(),
                &title,
                &description,
                &input.image,
                &location,
                severity.as_str(),
                IssueStatus::Open.as_str(),
                &now,
                &now,
            ),
        )?;

        tracing::info!("Created issue {} with severity {}", id, severity);
        load_issue(&conn, id)?.ok_or_else(|| anyhow::anyhow!("Issue {} missing after insert", id))
    }

    pub fn get_issue(&self, id: Uuid) -> Result<Option<Issue>> {
        let conn = self.lock();
        load_issue(&conn, id)
    }

    /// List issues matching `filter`, newest first.
    pub fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let conn = self.lock();

        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(severity) = filter.severity {
            clauses.push("severity = ?");
            params.push(severity.as_str().to_string());
        }
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            params.push(status.as_str().to_string());
        }
        if let Some(user_id) = filter.user_id {
            clauses.push("user_id = ?");
            params.push(user_id.to_string());
        }

        let mut sql = String::from("SELECT id FROM issues");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, rowid DESC");
        match (filter.limit, filter.offset) {
            (Some(limit), offset) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset.unwrap_or(0)))
            }
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                Ok(parse_uuid(row.get::<_, String>(0)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut issues = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(issue) = load_issue(&conn, id)? {
                issues.push(issue);
            }
        }
        Ok(issues)
    }

    /// Edit an issue's text. Severity is recomputed from the merged title
    /// and description before the row is written.
    pub fn update_issue(
        &self,
        id: Uuid,
        input: UpdateIssueInput,
        rules: &SeverityRules,
    ) -> Result<Option<Issue>> {
        let conn = self.lock();
        let existing = conn
            .query_row(
                "SELECT title, description, location FROM issues WHERE id = ?",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((old_title, old_description, old_location)) = existing else {
            return Ok(None);
        };

        let title = merge("title", input.title, old_title)?;
        let description = merge("description", input.description, old_description)?;
        let location = merge("location", input.location, old_location)?;
        let severity = rules.classify(&title, &description);

        conn.execute(
            "UPDATE issues SET title = ?, description = ?, location = ?, severity = ?, updated_at = ?
             WHERE id = ?",
            (
                &title,
                &description,
                &location,
                severity.as_str(),
                timestamp(now()),
                id.to_string(),
            ),
        )?;

        tracing::info!("Updated issue {}, severity now {}", id, severity);
        load_issue(&conn, id)
    }

    pub fn update_issue_status(&self, id: Uuid, status: IssueStatus) -> Result<Option<Issue>> {
        let conn = self.lock();
        let rows = conn.execute(
            "UPDATE issues SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), timestamp(now()), id.to_string()),
        )?;
        if rows == 0 {
            return Ok(None);
        }

        tracing::info!("Issue {} marked {}", id, status.as_str());
        load_issue(&conn, id)
    }

    /// Record an upvote. Each user may upvote an issue once.
    pub fn upvote_issue(&self, id: Uuid, user_id: Uuid) -> Result<Option<Issue>> {
        let conn = self.lock();
        if !issue_exists(&conn, id)? {
            return Ok(None);
        }

        let already: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM issue_upvotes WHERE issue_id = ? AND user_id = ?)",
            (id.to_string(), user_id.to_string()),
            |row| row.get(0),
        )?;
        if already {
            return Err(StoreError::AlreadyUpvoted.into());
        }

        conn.execute(
            "INSERT INTO issue_upvotes (issue_id, user_id, created_at) VALUES (?, ?, ?)",
            (id.to_string(), user_id.to_string(), timestamp(now())),
        )?;

        load_issue(&conn, id)
    }

    pub fn add_comment(
        &self,
        id: Uuid,
        user_id: Uuid,
        input: AddCommentInput,
    ) -> Result<Option<Issue>> {
        let message = required("message", &input.message)?;

        let conn = self.lock();
        if !issue_exists(&conn, id)? {
            return Ok(None);
        }

        conn.execute(
            "INSERT INTO comments (id, issue_id, user_id, message, created_at) VALUES (?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                id.to_string(),
                user_id.to_string(),
                &message,
                timestamp(now()),
            ),
        )?;

        load_issue(&conn, id)
    }
}

// ============================================================
// Row helpers
// ============================================================

fn load_issue(conn: &Connection, id: Uuid) -> Result<Option<Issue>> {
    let sql = format!(
        "SELECT {} FROM issues i JOIN users u ON u.id = i.user_id WHERE i.id = ?",
        ISSUE_COLUMNS
    );
    let issue = conn
        .query_row(&sql, [id.to_string()], |row| {
            Ok(Issue {
                id: parse_uuid(row.get::<_, String>(0)?),
                title: row.get(1)?,
                description: row.get(2)?,
                image: row.get(3)?,
                location: row.get(4)?,
                severity: row
                    .get::<_, String>(5)?
                    .parse::<Severity>()
                    .unwrap_or_default(),
                status: IssueStatus::from_str(&row.get::<_, String>(6)?).unwrap_or_default(),
                created_at: parse_datetime(row.get::<_, String>(7)?),
                updated_at: parse_datetime(row.get::<_, String>(8)?),
                user: UserSummary {
                    id: parse_uuid(row.get::<_, String>(9)?),
                    name: row.get(10)?,
                },
                upvotes: Vec::new(),
                comments: Vec::new(),
            })
        })
        .optional()?;

    let Some(mut issue) = issue else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT user_id FROM issue_upvotes WHERE issue_id = ? ORDER BY created_at, rowid",
    )?;
    issue.upvotes = stmt
        .query_map([id.to_string()], |row| Ok(parse_uuid(row.get::<_, String>(0)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT c.id, c.message, c.created_at, u.id, u.name
         FROM comments c JOIN users u ON u.id = c.user_id
         WHERE c.issue_id = ? ORDER BY c.created_at, c.rowid",
    )?;
    issue.comments = stmt
        .query_map([id.to_string()], |row| {
            Ok(Comment {
                id: parse_uuid(row.get::<_, String>(0)?),
                message: row.get(1)?,
                created_at: parse_datetime(row.get::<_, String>(2)?),
                user: UserSummary {
                    id: parse_uuid(row.get::<_, String>(3)?),
                    name: row.get(4)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(issue))
}

fn issue_exists(conn: &Connection, id: Uuid) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM issues WHERE id = ?)",
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_uuid(row.get::<_, String>(0)?),
        name: row.get(1)?,
        email: row.get(2)?,
        is_admin: row.get::<_, i32>(3)? != 0,
        created_at: parse_datetime(row.get::<_, String>(4)?),
    })
}

fn required(field: &'static str, value: &str) -> Result<String, StoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Required(field));
    }
    Ok(trimmed.to_string())
}

fn merge(field: &'static str, new: Option<String>, old: String) -> Result<String, StoreError> {
    match new {
        Some(value) => required(field, &value),
        None => Ok(old),
    }
}

/// Current time at the precision timestamps are stored with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so stored timestamps sort lexicographically.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
