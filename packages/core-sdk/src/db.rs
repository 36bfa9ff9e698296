use anyhow::{Context, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};
use time::OffsetDateTime;

use crate::error::AppResult;
use crate::models::{
    ChatMessageRecord, DiagnosisRecord, MessagePatch, NewMessage, ParsedDiagnosis, RoleStats,
    User,
};

/**
 * \brief SQLite 数据库文件句柄；每个请求单独打开连接。
 */
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /**
     * \brief 打开一次数据库执行迁移，之后只保留路径。
     */
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = store.open()?;
        migrate(&conn).context("apply migrations failed")?;
        Ok(store)
    }

    pub fn open(&self) -> Result<Connection> {
        open_db(&self.path)
    }

    /**
     * \brief 在阻塞线程池中用新连接执行 `f`。
     * \details 忙重试的休眠也发生在该线程上，不占用运行时工作线程。
     */
    pub async fn call<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&Connection) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_db(&path)?;
            f(&conn)
        })
        .await
        .context("store task failed")?
    }
}

/**
 * \brief 创建用户所需字段。
 */
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub location: &'a str,
    pub land_size: &'a str,
    pub main_crop: &'a str,
    pub phone: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

pub fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open database {} failed", path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 创建服务所需的数据表。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            location TEXT NOT NULL,
            land_size TEXT NOT NULL,
            main_crop TEXT NOT NULL,
            phone TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            text TEXT NOT NULL,
            sender TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS plant_analyses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            plant_name TEXT,
            disease TEXT,
            severity TEXT,
            treatment TEXT,
            full_analysis TEXT NOT NULL,
            analyzed_at INTEGER NOT NULL,
            user_role TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_plant_analyses_role ON plant_analyses(user_role);
        "#,
        )
    })?;
    Ok(())
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn from_millis(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

const USER_COLUMNS: &str =
    "id, name, location, land_size, main_crop, phone, email, password_hash";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        location: row.get(2)?,
        land_size: row.get(3)?,
        main_crop: row.get(4)?,
        phone: row.get(5)?,
        email: row.get(6)?,
        password_hash: row.get(7)?,
    })
}

pub fn insert_user(conn: &Connection, user: &NewUser<'_>) -> Result<i64> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO users (name, location, land_size, main_crop, phone, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.name,
                user.location,
                user.land_size,
                user.main_crop,
                user.phone,
                user.email,
                user.password_hash,
                now_millis()
            ],
        )
    })?;
    Ok(conn.last_insert_rowid())
}

pub fn get_user_by_id(conn: &Connection, id: i64) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE id=?1", USER_COLUMNS);
    let user = conn
        .query_row(&sql, params![id], user_from_row)
        .optional()?;
    Ok(user)
}

pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let sql = format!("SELECT {} FROM users WHERE email=?1", USER_COLUMNS);
    let user = conn
        .query_row(&sql, params![email], user_from_row)
        .optional()?;
    Ok(user)
}

/**
 * \brief 回写 `user` 的全部资料字段（密码哈希保持不变）。
 */
pub fn update_user(conn: &Connection, user: &User) -> Result<()> {
    let rows = retry_on_locked(|| {
        conn.execute(
            "UPDATE users SET name=?1, location=?2, land_size=?3, main_crop=?4, phone=?5, email=?6 WHERE id=?7",
            params![
                user.name,
                user.location,
                user.land_size,
                user.main_crop,
                user.phone,
                user.email,
                user.id
            ],
        )
    })?;
    if rows == 0 {
        anyhow::bail!("user id {} not found", user.id);
    }
    Ok(())
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessageRecord> {
    Ok(ChatMessageRecord {
        id: row.get(0)?,
        text: row.get(1)?,
        sender: row.get(2)?,
        created_at: from_millis(row.get(3)?),
    })
}

pub fn insert_message(conn: &Connection, message: &NewMessage) -> Result<ChatMessageRecord> {
    let created_at = now_millis();
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO messages (text, sender, created_at) VALUES (?1, ?2, ?3)",
            params![message.text, message.sender, created_at],
        )
    })?;
    Ok(ChatMessageRecord {
        id: conn.last_insert_rowid(),
        text: message.text.clone(),
        sender: message.sender.clone(),
        created_at: from_millis(created_at),
    })
}

/**
 * \brief 按时间倒序列出消息。
 */
pub fn list_messages(conn: &Connection, limit: i64, skip: i64) -> Result<Vec<ChatMessageRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, text, sender, created_at FROM messages
         ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
    )?;
    let rows = stmt
        .query_map(params![limit, skip], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_message(conn: &Connection, id: i64) -> Result<Option<ChatMessageRecord>> {
    let msg = conn
        .query_row(
            "SELECT id, text, sender, created_at FROM messages WHERE id=?1",
            params![id],
            message_from_row,
        )
        .optional()?;
    Ok(msg)
}

/**
 * \brief 执行部分更新并返回新行；ID 不存在时返回 `None`。
 */
pub fn update_message(
    conn: &Connection,
    id: i64,
    patch: &MessagePatch,
) -> Result<Option<ChatMessageRecord>> {
    let Some(mut current) = get_message(conn, id)? else {
        return Ok(None);
    };
    if let Some(text) = &patch.text {
        current.text = text.clone();
    }
    if let Some(sender) = &patch.sender {
        current.sender = sender.clone();
    }
    retry_on_locked(|| {
        conn.execute(
            "UPDATE messages SET text=?1, sender=?2 WHERE id=?3",
            params![current.text, current.sender, id],
        )
    })?;
    Ok(Some(current))
}

/**
 * \brief 删除消息；返回是否删除了记录。
 */
pub fn delete_message(conn: &Connection, id: i64) -> Result<bool> {
    let rows = retry_on_locked(|| conn.execute("DELETE FROM messages WHERE id=?1", params![id]))?;
    Ok(rows > 0)
}

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<DiagnosisRecord> {
    Ok(DiagnosisRecord {
        id: row.get(0)?,
        plant_name: row.get(1)?,
        disease: row.get(2)?,
        severity: row.get(3)?,
        treatment: row.get(4)?,
        full_analysis: row.get(5)?,
        analyzed_at: from_millis(row.get(6)?),
        user_role: row.get(7)?,
    })
}

pub fn insert_analysis(
    conn: &Connection,
    parsed: &ParsedDiagnosis,
    full_analysis: &str,
    user_role: Option<&str>,
) -> Result<DiagnosisRecord> {
    let analyzed_at = now_millis();
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO plant_analyses (plant_name, disease, severity, treatment, full_analysis, analyzed_at, user_role)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                parsed.plant_name,
                parsed.disease,
                parsed.severity,
                parsed.treatment,
                full_analysis,
                analyzed_at,
                user_role
            ],
        )
    })?;
    Ok(DiagnosisRecord {
        id: conn.last_insert_rowid(),
        plant_name: parsed.plant_name.clone(),
        disease: parsed.disease.clone(),
        severity: parsed.severity.clone(),
        treatment: parsed.treatment.clone(),
        full_analysis: full_analysis.to_string(),
        analyzed_at: from_millis(analyzed_at),
        user_role: user_role.map(|s| s.to_string()),
    })
}

/**
 * \brief 按时间倒序列出诊断记录，可按角色过滤。
 */
pub fn list_analyses(
    conn: &Connection,
    limit: i64,
    skip: i64,
    role: Option<&str>,
) -> Result<Vec<DiagnosisRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, plant_name, disease, severity, treatment, full_analysis, analyzed_at, user_role
         FROM plant_analyses
         WHERE (?1 IS NULL OR user_role = ?1)
         ORDER BY analyzed_at DESC, id DESC LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(params![role, limit, skip], analysis_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_analysis(conn: &Connection, id: i64) -> Result<Option<DiagnosisRecord>> {
    let rec = conn
        .query_row(
            "SELECT id, plant_name, disease, severity, treatment, full_analysis, analyzed_at, user_role
             FROM plant_analyses WHERE id=?1",
            params![id],
            analysis_from_row,
        )
        .optional()?;
    Ok(rec)
}

/**
 * \brief 按角色汇总；病害字段包含 "healthy"（不区分大小写）即计为健康。
 */
pub fn analysis_stats(conn: &Connection) -> Result<Vec<RoleStats>> {
    let mut stmt = conn.prepare(
        "SELECT user_role,
                COUNT(*),
                COALESCE(SUM(CASE WHEN disease LIKE '%healthy%' THEN 1 ELSE 0 END), 0)
         FROM plant_analyses
         GROUP BY user_role
         ORDER BY user_role",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let total: i64 = row.get(1)?;
            let healthy: i64 = row.get(2)?;
            Ok(RoleStats {
                role: row.get(0)?,
                total,
                healthy,
                diseased: total - healthy,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/**
 * \brief 对 SQLite busy/locked 错误线性退避重试，最多 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
