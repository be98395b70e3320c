//! Postgres-backed stores.
//!
//! The store traits are synchronous; these implementations drive their sqlx
//! futures on a captured tokio runtime handle. Call them from plain threads or
//! `spawn_blocking`, never from inside an async task.
//!
//! ## Error Mapping
//!
//! | SQLx error | Code | LedgerError |
//! |---|---|---|
//! | Database (unique violation) | `23505` | `ConcurrentBalanceConflict` |
//! | Database (check violation) | `23514` | `Validation` |
//! | Database (ledger immutability trigger) | `SL001` | `Store` |
//! | anything else | | `Store` |

use std::fmt::Display;
use std::future::Future;
use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{error, instrument};
use uuid::Uuid;

use stockledger_core::{
    ActorId, CampaignId, LocationId, MovementId, PartNumberId, ProjectId,
};
use stockledger_inventory::{
    Balance, CountLineKey, CountResult, Movement, MovementFilter, MovementType,
};

use super::kv::KeyValueStore;
use super::movements::{LedgerAppend, MovementStore};
use crate::error::{LedgerError, LedgerResult};

const MIGRATION: &str = include_str!("../../migrations/0001_inventory_ledger.sql");

/// Connect and install the schema.
pub async fn connect(database_url: &str) -> LedgerResult<PgPool> {
    let pool = PgPool::connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))?;
    sqlx::raw_sql(MIGRATION)
        .execute(&pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    Ok(pool)
}

#[derive(Debug, Clone)]
struct Bridge {
    pool: PgPool,
    handle: Handle,
}

impl Bridge {
    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.handle.block_on(fut)
    }
}

/// Append-only movement ledger with the balance mirror.
#[derive(Debug, Clone)]
pub struct PostgresMovementStore {
    db: Bridge,
}

impl PostgresMovementStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            db: Bridge { pool, handle },
        }
    }

    #[instrument(skip(self, entry), fields(movement_id = %entry.id), err)]
    async fn append_async(&self, entry: LedgerAppend<'_>) -> LedgerResult<Movement> {
        let mut tx = self
            .db
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Sequence assignment is serialized so the ledger stays gap-free.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('inventory_movements'))")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("sequence_lock", e))?;

        let next: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(sequence), 0) + 1 FROM inventory_movements")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("next_sequence", e))?;

        let movement = Movement::recorded(entry.id, next as u64, entry.request, entry.occurred_at);

        sqlx::query(
            r#"
            INSERT INTO inventory_movements (
                id, sequence, movement_type, part_number_id, quantity,
                source_location_id, destination_location_id, project_id,
                serials, actor_id, reason, evidence_ref, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(*movement.id.as_uuid())
        .bind(next)
        .bind(movement.movement_type.as_str())
        .bind(*movement.part_number_id.as_uuid())
        .bind(movement.quantity)
        .bind(movement.source_location_id.map(|l| *l.as_uuid()))
        .bind(movement.destination_location_id.map(|l| *l.as_uuid()))
        .bind(movement.project_id.map(|p| *p.as_uuid()))
        .bind(&movement.serials)
        .bind(*movement.actor_id.as_uuid())
        .bind(&movement.reason)
        .bind(&movement.evidence_ref)
        .bind(movement.occurred_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;

        for row in entry.balances {
            upsert_balance(&mut tx, row).await?;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(movement)
    }

    async fn list_async(&self, filter: &MovementFilter) -> LedgerResult<Vec<Movement>> {
        let rows = sqlx::query(
            r#"
            SELECT id, sequence, movement_type, part_number_id, quantity,
                   source_location_id, destination_location_id, project_id,
                   serials, actor_id, reason, evidence_ref, occurred_at
            FROM inventory_movements
            WHERE ($1::uuid IS NULL OR part_number_id = $1)
              AND ($2::uuid IS NULL OR source_location_id = $2 OR destination_location_id = $2)
              AND ($3::uuid IS NULL OR project_id = $3)
              AND ($4::text IS NULL OR movement_type = $4)
              AND ($5::text IS NULL OR $5 = ANY(serials))
            ORDER BY sequence ASC
            "#,
        )
        .bind(filter.part_number_id.map(|p| *p.as_uuid()))
        .bind(filter.location_id.map(|l| *l.as_uuid()))
        .bind(filter.project_id.map(|p| *p.as_uuid()))
        .bind(filter.movement_type.map(|t| t.as_str()))
        .bind(filter.serial.as_deref())
        .fetch_all(&self.db.pool)
        .await
        .map_err(|e| map_sqlx_error("list_movements", e))?;

        rows.iter().map(movement_from_row).collect()
    }
}

impl MovementStore for PostgresMovementStore {
    fn append(&self, entry: LedgerAppend<'_>) -> LedgerResult<Movement> {
        self.db.block_on(self.append_async(entry))
    }

    fn get(&self, id: &MovementId) -> LedgerResult<Option<Movement>> {
        let id = *id.as_uuid();
        self.db.block_on(async {
            let row = sqlx::query(
                r#"
                SELECT id, sequence, movement_type, part_number_id, quantity,
                       source_location_id, destination_location_id, project_id,
                       serials, actor_id, reason, evidence_ref, occurred_at
                FROM inventory_movements
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_error("get_movement", e))?;
            row.as_ref().map(movement_from_row).transpose()
        })
    }

    fn list(&self, filter: &MovementFilter) -> LedgerResult<Vec<Movement>> {
        self.db.block_on(self.list_async(filter))
    }

    fn last_sequence(&self) -> LedgerResult<u64> {
        self.db.block_on(async {
            let last: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(sequence), 0) FROM inventory_movements")
                .fetch_one(&self.db.pool)
                .await
                .map_err(|e| map_sqlx_error("last_sequence", e))?;
            Ok(last as u64)
        })
    }

    fn sync_balances(&self, rows: &[Balance]) -> LedgerResult<()> {
        self.db.block_on(async {
            let mut tx = self
                .db
                .pool
                .begin()
                .await
                .map_err(|e| map_sqlx_error("begin_transaction", e))?;
            sqlx::query("DELETE FROM inventory_balances")
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("clear_balances", e))?;
            for row in rows {
                upsert_balance(&mut tx, row).await?;
            }
            tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
        })
    }
}

async fn upsert_balance(tx: &mut Transaction<'_, Postgres>, row: &Balance) -> LedgerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO inventory_balances (
            part_number_id, location_id, project_id,
            quantity_total, quantity_reserved, version, last_movement_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (part_number_id, location_id, (COALESCE(project_id, '00000000-0000-0000-0000-000000000000'::uuid)))
        DO UPDATE SET
            quantity_total = EXCLUDED.quantity_total,
            quantity_reserved = EXCLUDED.quantity_reserved,
            version = EXCLUDED.version,
            last_movement_at = EXCLUDED.last_movement_at
        "#,
    )
    .bind(*row.key.part_number_id.as_uuid())
    .bind(*row.key.location_id.as_uuid())
    .bind(row.key.project_id.map(|p| *p.as_uuid()))
    .bind(row.quantity_total)
    .bind(row.quantity_reserved)
    .bind(row.version as i64)
    .bind(row.last_movement_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("upsert_balance", e))?;
    Ok(())
}

fn movement_from_row(row: &PgRow) -> LedgerResult<Movement> {
    let get_err = |e: sqlx::Error| LedgerError::Store(format!("failed to decode movement row: {e}"));

    let raw_type: String = row.try_get("movement_type").map_err(get_err)?;
    let movement_type: MovementType = raw_type.parse().map_err(|e| {
        error!(movement_type = %raw_type, "ledger row carries an unknown movement type");
        LedgerError::from(e)
    })?;
    let sequence: i64 = row.try_get("sequence").map_err(get_err)?;

    Ok(Movement {
        id: MovementId::from_uuid(row.try_get("id").map_err(get_err)?),
        sequence: sequence as u64,
        movement_type,
        part_number_id: PartNumberId::from_uuid(row.try_get("part_number_id").map_err(get_err)?),
        quantity: row.try_get("quantity").map_err(get_err)?,
        source_location_id: row
            .try_get::<Option<Uuid>, _>("source_location_id")
            .map_err(get_err)?
            .map(LocationId::from_uuid),
        destination_location_id: row
            .try_get::<Option<Uuid>, _>("destination_location_id")
            .map_err(get_err)?
            .map(LocationId::from_uuid),
        project_id: row
            .try_get::<Option<Uuid>, _>("project_id")
            .map_err(get_err)?
            .map(ProjectId::from_uuid),
        serials: row.try_get("serials").map_err(get_err)?,
        actor_id: ActorId::from_uuid(row.try_get("actor_id").map_err(get_err)?),
        reason: row.try_get("reason").map_err(get_err)?,
        evidence_ref: row.try_get("evidence_ref").map_err(get_err)?,
        occurred_at: row.try_get::<DateTime<Utc>, _>("occurred_at").map_err(get_err)?,
    })
}

/// Counted lines, with `variance` generated by the database.
#[derive(Debug, Clone)]
pub struct PostgresCountResultStore {
    db: Bridge,
}

impl PostgresCountResultStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self {
            db: Bridge { pool, handle },
        }
    }
}

fn count_from_row(row: &PgRow) -> LedgerResult<CountResult> {
    let get_err = |e: sqlx::Error| LedgerError::Store(format!("failed to decode count row: {e}"));
    Ok(CountResult {
        campaign_id: CampaignId::from_uuid(row.try_get("campaign_id").map_err(get_err)?),
        part_number_id: PartNumberId::from_uuid(row.try_get("part_number_id").map_err(get_err)?),
        location_id: LocationId::from_uuid(row.try_get("location_id").map_err(get_err)?),
        expected_quantity: row.try_get("expected_quantity").map_err(get_err)?,
        counted_quantity: row.try_get("counted_quantity").map_err(get_err)?,
        counted_by: row
            .try_get::<Option<Uuid>, _>("counted_by")
            .map_err(get_err)?
            .map(ActorId::from_uuid),
        counted_at: row.try_get("counted_at").map_err(get_err)?,
    })
}

impl KeyValueStore<CountLineKey, CountResult> for PostgresCountResultStore {
    fn get(&self, key: &CountLineKey) -> LedgerResult<Option<CountResult>> {
        self.db.block_on(async {
            let row = sqlx::query(
                r#"
                SELECT campaign_id, part_number_id, location_id, expected_quantity,
                       counted_quantity, counted_by, counted_at
                FROM inventory_count_results
                WHERE campaign_id = $1 AND part_number_id = $2 AND location_id = $3
                "#,
            )
            .bind(*key.campaign_id.as_uuid())
            .bind(*key.part_number_id.as_uuid())
            .bind(*key.location_id.as_uuid())
            .fetch_optional(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_error("get_count_result", e))?;
            row.as_ref().map(count_from_row).transpose()
        })
    }

    fn upsert(&self, key: CountLineKey, value: CountResult) -> LedgerResult<()> {
        self.db.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO inventory_count_results (
                    campaign_id, part_number_id, location_id,
                    expected_quantity, counted_quantity, counted_by, counted_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (campaign_id, part_number_id, location_id)
                DO UPDATE SET
                    expected_quantity = EXCLUDED.expected_quantity,
                    counted_quantity = EXCLUDED.counted_quantity,
                    counted_by = EXCLUDED.counted_by,
                    counted_at = EXCLUDED.counted_at
                "#,
            )
            .bind(*key.campaign_id.as_uuid())
            .bind(*key.part_number_id.as_uuid())
            .bind(*key.location_id.as_uuid())
            .bind(value.expected_quantity)
            .bind(value.counted_quantity)
            .bind(value.counted_by.map(|a| *a.as_uuid()))
            .bind(value.counted_at)
            .execute(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_error("upsert_count_result", e))?;
            Ok(())
        })
    }

    fn list(&self) -> LedgerResult<Vec<CountResult>> {
        self.db.block_on(async {
            let rows = sqlx::query(
                r#"
                SELECT campaign_id, part_number_id, location_id, expected_quantity,
                       counted_quantity, counted_by, counted_at
                FROM inventory_count_results
                ORDER BY campaign_id, part_number_id, location_id
                "#,
            )
            .fetch_all(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_error("list_count_results", e))?;
            rows.iter().map(count_from_row).collect()
        })
    }
}

/// JSON document collection keyed by the record's display form.
#[derive(Debug, Clone)]
pub struct PostgresDocumentStore<K, V> {
    db: Bridge,
    collection: &'static str,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> PostgresDocumentStore<K, V> {
    pub fn new(pool: PgPool, handle: Handle, collection: &'static str) -> Self {
        Self {
            db: Bridge { pool, handle },
            collection,
            _marker: PhantomData,
        }
    }
}

impl<K, V> KeyValueStore<K, V> for PostgresDocumentStore<K, V>
where
    K: Display,
    V: Serialize + DeserializeOwned,
{
    fn get(&self, key: &K) -> LedgerResult<Option<V>> {
        let doc_key = key.to_string();
        self.db.block_on(async {
            let row = sqlx::query("SELECT body FROM stockledger_documents WHERE collection = $1 AND doc_key = $2")
                .bind(self.collection)
                .bind(&doc_key)
                .fetch_optional(&self.db.pool)
                .await
                .map_err(|e| map_sqlx_error("get_document", e))?;
            row.map(|r| decode_document(self.collection, &r)).transpose()
        })
    }

    fn upsert(&self, key: K, value: V) -> LedgerResult<()> {
        let body = serde_json::to_value(&value)
            .map_err(|e| LedgerError::Store(format!("{} serialization failed: {e}", self.collection)))?;
        let doc_key = key.to_string();
        self.db.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO stockledger_documents (collection, doc_key, body)
                VALUES ($1, $2, $3)
                ON CONFLICT (collection, doc_key)
                DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()
                "#,
            )
            .bind(self.collection)
            .bind(&doc_key)
            .bind(&body)
            .execute(&self.db.pool)
            .await
            .map_err(|e| map_sqlx_error("upsert_document", e))?;
            Ok(())
        })
    }

    fn list(&self) -> LedgerResult<Vec<V>> {
        self.db.block_on(async {
            let rows = sqlx::query("SELECT body FROM stockledger_documents WHERE collection = $1 ORDER BY doc_key")
                .bind(self.collection)
                .fetch_all(&self.db.pool)
                .await
                .map_err(|e| map_sqlx_error("list_documents", e))?;
            rows.iter().map(|r| decode_document(self.collection, r)).collect()
        })
    }
}

fn decode_document<V: DeserializeOwned>(collection: &str, row: &PgRow) -> LedgerResult<V> {
    let body: serde_json::Value = row
        .try_get("body")
        .map_err(|e| LedgerError::Store(format!("failed to read {collection} document: {e}")))?;
    serde_json::from_value(body)
        .map_err(|e| LedgerError::Store(format!("failed to decode {collection} document: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => LedgerError::ConcurrentBalanceConflict(msg),
                Some("23514") => LedgerError::Validation(msg),
                Some("SL001") => {
                    error!(operation, "storage rejected a change to an immutable movement");
                    LedgerError::Store(msg)
                }
                _ => LedgerError::Store(msg),
            }
        }
        sqlx::Error::PoolClosed => LedgerError::Store(format!("connection pool closed in {operation}")),
        other => LedgerError::Store(format!("sqlx error in {operation}: {other}")),
    }
}
