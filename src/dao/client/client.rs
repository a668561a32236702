use serde::{Deserialize, Serialize};
use sqlx::{Result, SqlitePool};

/// 预付费客户；余额以 1/10000 单位存储，仅由账本修改
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub balance_units: i64,
    pub is_active: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Create a new client (async)
pub async fn create_client(pool: &SqlitePool, client: &Client) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO clients (id, name, balance_units, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, datetime('now'), datetime('now'))
    "#)
        .bind(&client.id)
        .bind(&client.name)
        .bind(client.balance_units)
        .bind(client.is_active)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Read a client by id (async)
pub async fn get_client_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Client>> {
    let client = sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(client)
}

/// Read the stored balance of a client in units (async)
pub async fn get_client_balance_units(pool: &SqlitePool, id: &str) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT balance_units FROM clients WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.0))
}

/// Toggle active status of a client (async)
pub async fn set_client_active(pool: &SqlitePool, id: &str, is_active: bool) -> Result<u64> {
    let res = sqlx::query("UPDATE clients SET is_active = ?, updated_at = datetime('now') WHERE id = ?")
        .bind(is_active)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
