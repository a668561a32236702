use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

pub mod cache;

pub mod api_key;
pub mod client;
pub mod provider_account;
pub mod routing_rule;
pub mod transaction;

/// 内嵌的建表脚本
const SCHEMA_SQL: &str = include_str!("schema.sql");

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// 异步创建 SqlitePool（WAL 模式、开启外键、设置忙等待超时）
pub async fn init_sqlite_pool(db_url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    init_sqlite_pool_with_busy_timeout(db_url, max_connections, DEFAULT_BUSY_TIMEOUT).await
}

/// 同上，可指定写锁忙等待超时
pub async fn init_sqlite_pool_with_busy_timeout(
    db_url: &str,
    max_connections: u32,
    busy_timeout: Duration,
) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// 执行内嵌建表脚本，可重复执行
pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // 支持多条 SQL 语句分号分割执行
    for statement in SCHEMA_SQL.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt).execute(pool).await?;
        }
    }
    Ok(())
}

/// 判断是否为 SQLite 写锁竞争（SQLITE_BUSY / SQLITE_LOCKED 及其扩展码）
pub fn is_busy_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            let primary = db_err
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            matches!(primary, Some(5) | Some(6)) || db_err.message().contains("database is locked")
        }
        _ => false,
    }
}
