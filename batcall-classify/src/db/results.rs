//! Result and probability rows
//!
//! Inserts take a bare connection so the persister can run them inside its
//! per-batch transaction.

use batcall_common::Result;
use chrono::Utc;
use sqlx::{FromRow, SqliteConnection, SqlitePool};

/// Persisted probability joined with its segment and call
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ProbabilityRow {
    pub result_id: i64,
    pub segment_id: i64,
    pub short_name: String,
    pub probability: f64,
}

pub async fn insert_result(
    conn: &mut SqliteConnection,
    run_id: i64,
    segment_id: i64,
) -> std::result::Result<i64, sqlx::Error> {
    let id = sqlx::query(
        "INSERT INTO classification_results (run_id, segment_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(run_id)
    .bind(segment_id)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn insert_probability(
    conn: &mut SqliteConnection,
    result_id: i64,
    call_id: i64,
    probability: f64,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO call_probabilities (result_id, call_id, probability) VALUES (?, ?, ?)")
        .bind(result_id)
        .bind(call_id)
        .bind(probability)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn count_results(pool: &SqlitePool, run_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM classification_results WHERE run_id = ?")
        .bind(run_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn count_probabilities(pool: &SqlitePool, run_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM call_probabilities p
        JOIN classification_results r ON r.id = p.result_id
        WHERE r.run_id = ?
        "#,
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// All probabilities of a run in creation order
pub async fn load_probabilities(pool: &SqlitePool, run_id: i64) -> Result<Vec<ProbabilityRow>> {
    let rows = sqlx::query_as::<_, ProbabilityRow>(
        r#"
        SELECT r.id AS result_id, r.segment_id, c.short_name, p.probability
        FROM call_probabilities p
        JOIN classification_results r ON r.id = p.result_id
        JOIN calls c ON c.id = p.call_id
        WHERE r.run_id = ?
        ORDER BY r.id, p.id
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
