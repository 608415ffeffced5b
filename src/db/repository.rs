use sqlx::PgPool;

use crate::records::{BalanceUpdateRecord, ErrorRecord, SupplySnapshotRecord, TransferRecord};

/// Insert a transfer record. Redelivered records (same distinct ID) are ignored.
pub async fn insert_transfer(pool: &PgPool, record: &TransferRecord) -> eyre::Result<u64> {
    let result = sqlx::query(
        "INSERT INTO usr_transfers (distinct_id, from_address, to_address, amount, network, \
         block_number, tx_hash, log_index)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (distinct_id) DO NOTHING",
    )
    .bind(&record.distinct_id)
    .bind(&record.from)
    .bind(&record.to)
    .bind(&record.amount)
    .bind(&record.network)
    .bind(record.block as i64)
    .bind(&record.tx_hash)
    .bind(record.log_index as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Insert a holder balance refresh.
pub async fn insert_balance_update(
    pool: &PgPool,
    record: &BalanceUpdateRecord,
) -> eyre::Result<u64> {
    let result = sqlx::query(
        "INSERT INTO usr_balance_updates (distinct_id, holder, balance, network, block_number, \
         update_type)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (distinct_id) DO NOTHING",
    )
    .bind(&record.distinct_id)
    .bind(&record.holder)
    .bind(&record.balance)
    .bind(&record.network)
    .bind(record.block as i64)
    .bind(record.update_type.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Insert a total supply snapshot.
pub async fn insert_supply_snapshot(
    pool: &PgPool,
    record: &SupplySnapshotRecord,
) -> eyre::Result<u64> {
    let result = sqlx::query(
        "INSERT INTO usr_total_supply (distinct_id, total_supply, network, block_number)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (distinct_id) DO NOTHING",
    )
    .bind(&record.distinct_id)
    .bind(&record.total_supply)
    .bind(&record.network)
    .bind(record.block as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Append an error record. Errors have no distinct ID and are never deduplicated.
pub async fn insert_error(pool: &PgPool, record: &ErrorRecord) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO processor_errors (error_type, message, tx_hash, block_number, holder, \
         from_address, to_address, stack, recorded_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())",
    )
    .bind(record.error_type.as_str())
    .bind(&record.message)
    .bind(&record.context.tx_hash)
    .bind(record.context.block.map(|b| b as i64))
    .bind(&record.context.holder)
    .bind(&record.context.from)
    .bind(&record.context.to)
    .bind(&record.stack)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the last processed block for a network. Returns None if never run.
pub async fn get_last_indexed_block(pool: &PgPool, network: &str) -> eyre::Result<Option<u64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT last_indexed_block FROM processor_state WHERE network = $1",
    )
    .bind(network)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(b,)| b as u64))
}

/// Get the timestamp of the last supply snapshot, so ticks resume on schedule.
pub async fn get_last_snapshot_timestamp(
    pool: &PgPool,
    network: &str,
) -> eyre::Result<Option<u64>> {
    let row: Option<(Option<i64>,)> = sqlx::query_as(
        "SELECT last_snapshot_timestamp FROM processor_state WHERE network = $1",
    )
    .bind(network)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|(ts,)| ts).map(|ts| ts as u64))
}

/// Upsert the processor checkpoint for a network.
pub async fn upsert_processor_state(
    pool: &PgPool,
    network: &str,
    block_number: u64,
    last_snapshot_timestamp: Option<u64>,
) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO processor_state (network, last_indexed_block, last_snapshot_timestamp, updated_at)
         VALUES ($1, $2, $3, NOW())
         ON CONFLICT (network) DO UPDATE
         SET last_indexed_block = $2,
             last_snapshot_timestamp = COALESCE($3, processor_state.last_snapshot_timestamp),
             updated_at = NOW()",
    )
    .bind(network)
    .bind(block_number as i64)
    .bind(last_snapshot_timestamp.map(|ts| ts as i64))
    .execute(pool)
    .await?;

    Ok(())
}
