// ==========================================
// 上门服务预约智能引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 幂等建表（配置 / 师傅快照 / 工单 / 区域坐标 / 需求样本）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::path::PathBuf;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 默认数据库路径
///
/// 优先读取环境变量 BOOKING_ENGINE_DB_PATH，否则放在用户数据目录下
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("BOOKING_ENGINE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./booking_intelligence.db");
    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("booking-intelligence");
        // 目录创建失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("booking_intelligence.db");
        }
    }
    path.to_string_lossy().to_string()
}

/// 幂等创建引擎所需的表
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        CREATE TABLE IF NOT EXISTS vendor (
            vendor_id TEXT PRIMARY KEY,
            location TEXT NOT NULL,
            average_rating REAL NOT NULL DEFAULT 0,
            active_job_count INTEGER NOT NULL DEFAULT 0,
            is_available INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS vendor_category (
            vendor_id TEXT NOT NULL REFERENCES vendor(vendor_id) ON DELETE CASCADE,
            category TEXT NOT NULL,
            PRIMARY KEY (vendor_id, category)
        );
        CREATE INDEX IF NOT EXISTS idx_vendor_category_category ON vendor_category(category);

        CREATE TABLE IF NOT EXISTS location_point (
            location TEXT PRIMARY KEY,
            lat REAL NOT NULL,
            lon REAL NOT NULL
        );

        CREATE TABLE IF NOT EXISTS committed_job (
            job_id TEXT PRIMARY KEY,
            vendor_id TEXT NOT NULL,
            booking_id TEXT NOT NULL,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL,
            location TEXT NOT NULL,
            released INTEGER NOT NULL DEFAULT 0,
            committed_revision INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_committed_job_vendor ON committed_job(vendor_id, start_at);

        CREATE TABLE IF NOT EXISTS vendor_job_revision (
            vendor_id TEXT PRIMARY KEY,
            revision INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS demand_sample (
            sample_id INTEGER PRIMARY KEY AUTOINCREMENT,
            location TEXT NOT NULL,
            service_category TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_demand_sample_recorded_at ON demand_sample(recorded_at);
        "#,
    )?;

    // v1 → v2: 工单记录提交时的 revision
    // 旧工单取 0，视为任何快照都已看到
    if !has_column(conn, "committed_job", "committed_revision")? {
        conn.execute_batch(
            "ALTER TABLE committed_job ADD COLUMN committed_revision INTEGER NOT NULL DEFAULT 0;",
        )?;
    }

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
