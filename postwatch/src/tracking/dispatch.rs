//! Draining the persistent notification queue
//!
//! Finalized results wait in `notification_queues` until the writer's
//! next commit cycle drains them, in insertion order, in batches of at
//! most [`RESULT_INFOS_CAPACITY`] rows. Deletion and the downstream send
//! happen under the same transaction, so a result leaves the tracker at
//! most once. Anything still queued after a crash is re-drained at
//! startup.

use super::actions::release_queue_ref;
use super::result::{ResultData, TrackedResult};
use super::values::column_entry;
use postwatch_common::{Error, Result};
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::mpsc;
use tracing::debug;

/// Rows dispatched per batch
pub const RESULT_INFOS_CAPACITY: usize = 4;

pub(crate) async fn drain(
    tx: &mut Transaction<'_, Sqlite>,
    batch_id: &mut i64,
    results_tx: &mpsc::Sender<TrackedResult>,
) -> Result<usize> {
    let rows: Vec<(i64, i64)> =
        sqlx::query_as("SELECT id, result_id FROM notification_queues ORDER BY id")
            .fetch_all(&mut **tx)
            .await?;

    if rows.is_empty() {
        return Ok(0);
    }

    let current_batch = *batch_id;
    *batch_id += 1;

    for chunk in rows.chunks(RESULT_INFOS_CAPACITY) {
        for &(queue_entry_id, result_id) in chunk {
            let data = load_result_data(tx, result_id).await?;

            let queue_id: i64 = sqlx::query_scalar("SELECT queue_id FROM results WHERE id = ?")
                .bind(result_id)
                .fetch_one(&mut **tx)
                .await?;

            sqlx::query("DELETE FROM notification_queues WHERE id = ?")
                .bind(queue_entry_id)
                .execute(&mut **tx)
                .await?;
            sqlx::query("DELETE FROM result_data WHERE result_id = ?")
                .bind(result_id)
                .execute(&mut **tx)
                .await?;
            sqlx::query("DELETE FROM results WHERE id = ?")
                .bind(result_id)
                .execute(&mut **tx)
                .await?;

            release_queue_ref(tx, queue_id).await?;

            results_tx
                .send(TrackedResult {
                    result_id,
                    batch_id: current_batch,
                    data,
                })
                .await
                .map_err(|_| Error::Internal("results channel closed".into()))?;
        }
    }

    debug!(
        count = rows.len(),
        batch = current_batch,
        "dispatched finalized results"
    );

    Ok(rows.len())
}

async fn load_result_data(
    tx: &mut Transaction<'_, Sqlite>,
    result_id: i64,
) -> Result<ResultData> {
    let rows = sqlx::query("SELECT key, value FROM result_data WHERE result_id = ?")
        .bind(result_id)
        .fetch_all(&mut **tx)
        .await?;

    let mut data = ResultData::default();

    for row in &rows {
        let key: i64 = row.get(0);
        data.set_raw(key as usize, column_entry(row, 1));
    }

    Ok(data)
}
