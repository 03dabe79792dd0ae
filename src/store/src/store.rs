//! Versioned CRUD over caller-supplied transactions.
//!
//! Every mutating operation locks the target identity rows before
//! reading the "before" snapshot, so concurrent writers to the same
//! entity serialize on the database row lock. Locking happens in a
//! single pass sorted by (entity-kind table, id) to establish a global
//! lock order across transactions that touch mixed kinds.

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Postgres, Row, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::error::{map_insert_error, Result, StoreError};
use crate::models::CredentialData;
use crate::record::{Entity, EntityKind, EntityRecord, WriteMeta};

/// Which versions a read resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadView {
    /// The current version; a deleted entity reads as not found.
    Current,
    /// The current version even if it is a deletion tombstone.
    IncludeDeleted,
}

/// Request-scoped transaction marker.
///
/// Acquiring locks twice within one transaction is a latent
/// deadlock-prone usage pattern: the second acquisition may interleave
/// with another transaction's first. Detected by comparing the
/// database's transaction id against the marker; flagged as an invariant
/// warning rather than silently tolerated.
#[derive(Debug, Default, Clone)]
pub struct TxContext {
    lock_txid: Option<i64>,
}

/// The record store. Connection management lives here; every CRUD
/// operation runs on a caller-supplied connection or transaction.
pub struct RecordStore {
    pool: PgPool,
}

impl RecordStore {
    /// Connects a pool to the given Postgres URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for advanced queries.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the schema migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Invariant(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Begins a transaction owned by the caller.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Acquires row-level locks on the given entities, in a single pass
    /// sorted by (entity-kind table, id).
    ///
    /// Raises [`StoreError::NotFound`] for any id whose identity row does
    /// not exist. A repeated acquisition within the same transaction is
    /// logged as an invariant warning.
    pub async fn lock(
        conn: &mut PgConnection,
        ctx: &mut TxContext,
        targets: &[(EntityKind, Uuid)],
    ) -> Result<()> {
        let txid: i64 = sqlx::query("SELECT txid_current()")
            .fetch_one(&mut *conn)
            .await?
            .try_get(0)?;
        if ctx.lock_txid == Some(txid) {
            warn!(
                txid,
                targets = ?targets,
                "entities locked twice within one transaction; lock ordering cannot be \
                 guaranteed across both passes"
            );
        }
        ctx.lock_txid = Some(txid);

        let mut sorted: Vec<(EntityKind, Uuid)> = targets.to_vec();
        sorted.sort_by(|a, b| a.0.table().cmp(b.0.table()).then(a.1.cmp(&b.1)));
        sorted.dedup();

        let mut index = 0;
        while index < sorted.len() {
            let kind = sorted[index].0;
            let mut ids = Vec::new();
            while index < sorted.len() && sorted[index].0 == kind {
                ids.push(sorted[index].1);
                index += 1;
            }
            let sql = format!(
                r#"SELECT id FROM "{}" WHERE id = ANY($1) ORDER BY id FOR UPDATE"#,
                kind.table()
            );
            let rows = sqlx::query(&sql).bind(&ids).fetch_all(&mut *conn).await?;
            if rows.len() != ids.len() {
                let found: Vec<Uuid> = rows
                    .iter()
                    .map(|r| r.try_get("id"))
                    .collect::<std::result::Result<_, _>>()?;
                let missing = ids.into_iter().find(|id| !found.contains(id)).ok_or_else(
                    || {
                        StoreError::Invariant(format!(
                            "lock on \"{}\" returned more rows than requested",
                            kind.table()
                        ))
                    },
                )?;
                return Err(StoreError::NotFound { kind, id: missing });
            }
        }
        Ok(())
    }

    /// Inserts the identity row and the first record of a new entity.
    pub async fn create<T: Entity>(
        conn: &mut PgConnection,
        data: T,
        meta: WriteMeta,
    ) -> Result<EntityRecord<T>> {
        let entity_id = data.id();
        let sql = format!(r#"INSERT INTO "{}" (id) VALUES ($1)"#, T::KIND.table());
        sqlx::query(&sql)
            .bind(entity_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_insert_error(e, T::KIND, entity_id))?;

        Self::insert_record(conn, Uuid::new_v4(), entity_id, data, false, meta).await
    }

    /// Reads one entity.
    pub async fn read<T: Entity>(
        conn: &mut PgConnection,
        id: Uuid,
        view: ReadView,
    ) -> Result<EntityRecord<T>> {
        let mut records = Self::read_many::<T>(conn, &[id], view).await?;
        Ok(records.remove(0))
    }

    /// Reads a batch of entities, returned in request order.
    ///
    /// Every missing id (no row, or no current version under the
    /// requested view) raises [`StoreError::NotFound`]; the result set is
    /// never silently shrunk.
    pub async fn read_many<T: Entity>(
        conn: &mut PgConnection,
        ids: &[Uuid],
        view: ReadView,
    ) -> Result<Vec<EntityRecord<T>>> {
        let sql = format!(
            r#"SELECT record_id, entity_id, replacement_record_id, created_at,
                      created_by_authorization_id, deleted_at, data
               FROM "{}" WHERE entity_id = ANY($1) AND replacement_record_id IS NULL"#,
            T::KIND.record_table()
        );
        let rows = sqlx::query(&sql)
            .bind(ids)
            .fetch_all(&mut *conn)
            .await?;

        let mut by_id: HashMap<Uuid, EntityRecord<T>> = HashMap::with_capacity(rows.len());
        for row in rows {
            let record = Self::decode_record::<T>(&row)?;
            if by_id.insert(record.entity_id, record).is_some() {
                return Err(StoreError::Invariant(format!(
                    "{} has more than one current record",
                    T::KIND
                )));
            }
        }

        ids.iter()
            .map(|id| match by_id.get(id) {
                Some(record) if view == ReadView::Current && record.is_deleted() => {
                    Err(StoreError::NotFound { kind: T::KIND, id: *id })
                }
                Some(record) => Ok(record.clone()),
                None => Err(StoreError::NotFound { kind: T::KIND, id: *id }),
            })
            .collect()
    }

    /// Reads one specific historical version by record id.
    pub async fn read_record<T: Entity>(
        conn: &mut PgConnection,
        record_id: Uuid,
    ) -> Result<EntityRecord<T>> {
        let sql = format!(
            r#"SELECT record_id, entity_id, replacement_record_id, created_at,
                      created_by_authorization_id, deleted_at, data
               FROM "{}" WHERE record_id = $1"#,
            T::KIND.record_table()
        );
        let row = sqlx::query(&sql)
            .bind(record_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(StoreError::NotFound {
                kind: T::KIND,
                id: record_id,
            })?;
        Self::decode_record(&row)
    }

    /// The full append-only history of an entity, oldest first.
    ///
    /// Ordered by the insertion sequence, not `created_at`: versions
    /// written within one transaction share the transaction timestamp.
    pub async fn history<T: Entity>(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Vec<EntityRecord<T>>> {
        let sql = format!(
            r#"SELECT record_id, entity_id, replacement_record_id, created_at,
                      created_by_authorization_id, deleted_at, data
               FROM "{}" WHERE entity_id = $1 ORDER BY seq"#,
            T::KIND.record_table()
        );
        let rows = sqlx::query(&sql).bind(id).fetch_all(&mut *conn).await?;
        rows.iter().map(|row| Self::decode_record(row)).collect()
    }

    /// Every current, non-deleted entity of a kind.
    pub async fn list_current<T: Entity>(conn: &mut PgConnection) -> Result<Vec<EntityRecord<T>>> {
        let sql = format!(
            r#"SELECT record_id, entity_id, replacement_record_id, created_at,
                      created_by_authorization_id, deleted_at, data
               FROM "{}"
               WHERE replacement_record_id IS NULL AND deleted_at IS NULL
               ORDER BY entity_id"#,
            T::KIND.record_table()
        );
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        rows.iter().map(|row| Self::decode_record(row)).collect()
    }

    /// Current, non-deleted credentials for one (authority, identifier)
    /// pair. More than one *enabled* result is an upstream integrity bug;
    /// the access layer enforces that.
    pub async fn current_credentials_for(
        conn: &mut PgConnection,
        authority_id: Uuid,
        authority_user_id: &str,
    ) -> Result<Vec<EntityRecord<CredentialData>>> {
        let sql = format!(
            r#"SELECT record_id, entity_id, replacement_record_id, created_at,
                      created_by_authorization_id, deleted_at, data
               FROM "{}"
               WHERE replacement_record_id IS NULL
                 AND deleted_at IS NULL
                 AND data->>'authority_id' = $1
                 AND data->>'authority_user_id' = $2"#,
            EntityKind::Credential.record_table()
        );
        let rows = sqlx::query(&sql)
            .bind(authority_id.to_string())
            .bind(authority_user_id)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(|row| Self::decode_record(row)).collect()
    }

    /// Supersedes the current version with one produced by `mutate`,
    /// applied to the locked "before" snapshot.
    pub async fn update<T, F>(
        conn: &mut PgConnection,
        ctx: &mut TxContext,
        id: Uuid,
        mutate: F,
        meta: WriteMeta,
    ) -> Result<EntityRecord<T>>
    where
        T: Entity,
        F: FnOnce(T) -> T + Send,
    {
        Self::lock(conn, ctx, &[(T::KIND, id)]).await?;
        let before = Self::read::<T>(conn, id, ReadView::Current).await?;
        let data = mutate(before.data);
        if data.id() != id {
            return Err(StoreError::Validation(format!(
                "update must not change the entity id ({} -> {})",
                id,
                data.id()
            )));
        }
        Self::replace_current(conn, before.record_id, id, data, false, meta)
            .await
    }

    /// Writes the terminal record of an entity. The history is preserved;
    /// current-version reads report the entity as not found afterwards.
    pub async fn delete<T: Entity>(
        conn: &mut PgConnection,
        ctx: &mut TxContext,
        id: Uuid,
        meta: WriteMeta,
    ) -> Result<EntityRecord<T>> {
        Self::lock(conn, ctx, &[(T::KIND, id)]).await?;
        let before = Self::read::<T>(conn, id, ReadView::Current).await?;
        Self::replace_current(conn, before.record_id, id, before.data, true, meta)
            .await
    }

    async fn replace_current<T: Entity>(
        conn: &mut PgConnection,
        prior_record_id: Uuid,
        entity_id: Uuid,
        data: T,
        deleted: bool,
        meta: WriteMeta,
    ) -> Result<EntityRecord<T>> {
        // The prior record is repointed before the replacement row
        // exists; the self-referencing foreign key is deferred to commit,
        // and this order keeps the one-current-record unique index
        // satisfied throughout.
        let record_id = Uuid::new_v4();
        let sql = format!(
            r#"UPDATE "{}" SET replacement_record_id = $1
               WHERE record_id = $2 AND replacement_record_id IS NULL"#,
            T::KIND.record_table()
        );
        let result = sqlx::query(&sql)
            .bind(record_id)
            .bind(prior_record_id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() != 1 {
            // The snapshot was read under the row lock, so the prior
            // record being already superseded means the lock discipline
            // was bypassed somewhere.
            return Err(StoreError::Invariant(format!(
                "{} record {} was superseded outside the row lock",
                T::KIND,
                prior_record_id
            )));
        }

        Self::insert_record(conn, record_id, entity_id, data, deleted, meta).await
    }

    async fn insert_record<T: Entity>(
        conn: &mut PgConnection,
        record_id: Uuid,
        entity_id: Uuid,
        data: T,
        deleted: bool,
        meta: WriteMeta,
    ) -> Result<EntityRecord<T>> {
        let payload = serde_json::to_value(&data)?;
        let sql = format!(
            r#"INSERT INTO "{}"
                   (record_id, entity_id, replacement_record_id,
                    created_by_authorization_id, deleted_at, data)
               VALUES ($1, $2, NULL, $3, CASE WHEN $4 THEN now() END, $5)
               RETURNING created_at, deleted_at"#,
            T::KIND.record_table()
        );
        let row = sqlx::query(&sql)
            .bind(record_id)
            .bind(entity_id)
            .bind(meta.created_by_authorization_id)
            .bind(deleted)
            .bind(&payload)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| map_insert_error(e, T::KIND, record_id))?;

        Ok(EntityRecord {
            record_id,
            entity_id,
            data,
            replacement_record_id: None,
            created_at: row.try_get("created_at")?,
            created_by_authorization_id: meta.created_by_authorization_id,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    fn decode_record<T: Entity>(row: &PgRow) -> Result<EntityRecord<T>> {
        let payload: serde_json::Value = row.try_get("data")?;
        Ok(EntityRecord {
            record_id: row.try_get("record_id")?,
            entity_id: row.try_get("entity_id")?,
            data: serde_json::from_value(payload)?,
            replacement_record_id: row.try_get("replacement_record_id")?,
            created_at: row.try_get("created_at")?,
            created_by_authorization_id: row.try_get("created_by_authorization_id")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}
