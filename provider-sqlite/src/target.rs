//! SQLite Target Store
//!
//! Reference [`TargetStore`] over one SQLite table. Field values are
//! stored as JSON-encoded text so one table shape serves any declared
//! schema; the primary key is a plain INTEGER column.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use tracing::debug;

use sync_traits::{CanonicalRecord, FieldValue, Result, StoreError, TargetStore};

/// SQLite-backed target table with declared fields
pub struct SqliteTargetStore {
    pool: SqlitePool,
    table: String,
    fields: Vec<String>,
}

impl SqliteTargetStore {
    /// Create a store over an existing table.
    ///
    /// `fields` is the declared field list; every write touches exactly
    /// these columns, with `Null` standing in for absent values.
    pub fn new(pool: SqlitePool, table: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            fields,
        }
    }

    /// Create the target table if it does not exist
    pub async fn migrate(
        pool: &SqlitePool,
        table: &str,
        fields: &[String],
    ) -> Result<()> {
        let columns: Vec<String> = fields.iter().map(|f| format!("{f} TEXT")).collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, {})",
            columns.join(", ")
        );
        sqlx::query(&sql)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    /// Count all rows (test and reporting helper)
    pub async fn count(&self) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(count as u64)
    }

    fn encode(value: &FieldValue) -> Result<String> {
        serde_json::to_string(value).map_err(|e| StoreError::Database(e.to_string()))
    }

    fn decode(raw: &str) -> Result<FieldValue> {
        serde_json::from_str(raw).map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Field value for one declared column, `Null` when absent
    fn field_of<'a>(record: &'a CanonicalRecord, name: &str) -> &'a FieldValue {
        record.get(name).unwrap_or(&FieldValue::Null)
    }

    fn record_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<CanonicalRecord> {
        let key: i64 = row
            .try_get("id")
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let mut record = CanonicalRecord::new(key);
        for field in &self.fields {
            let raw: Option<String> = row
                .try_get(field.as_str())
                .map_err(|e| StoreError::Database(e.to_string()))?;
            let value = match raw {
                Some(text) => Self::decode(&text)?,
                None => FieldValue::Null,
            };
            record.set(field.clone(), value);
        }
        Ok(record)
    }

    /// Multi-row VALUES clause with one placeholder per column
    fn values_clause(&self, rows: usize) -> String {
        let row = format!("({})", vec!["?"; self.fields.len() + 1].join(", "));
        vec![row; rows].join(", ")
    }
}

#[async_trait]
impl TargetStore for SqliteTargetStore {
    async fn bulk_upsert(
        &self,
        records: &[CanonicalRecord],
        update_fields: &[String],
    ) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let assignments: Vec<String> = update_fields
            .iter()
            .filter(|f| self.fields.contains(f))
            .map(|f| format!("{f} = excluded.{f}"))
            .collect();
        let on_conflict = if assignments.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", assignments.join(", "))
        };

        let sql = format!(
            "INSERT INTO {} (id, {}) VALUES {} ON CONFLICT(id) {}",
            self.table,
            self.fields.join(", "),
            self.values_clause(records.len()),
            on_conflict,
        );

        let mut query = sqlx::query(&sql);
        for record in records {
            query = query.bind(record.key);
            for field in &self.fields {
                query = query.bind(Self::encode(Self::field_of(record, field))?);
            }
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::BulkWrite(e.to_string()))?;

        debug!(table = %self.table, rows = records.len(), "bulk upsert");
        Ok(result.rows_affected())
    }

    async fn bulk_insert(&self, records: &[CanonicalRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT INTO {} (id, {}) VALUES {}",
            self.table,
            self.fields.join(", "),
            self.values_clause(records.len()),
        );

        let mut query = sqlx::query(&sql);
        for record in records {
            query = query.bind(record.key);
            for field in &self.fields {
                query = query.bind(Self::encode(Self::field_of(record, field))?);
            }
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::BulkWrite(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn bulk_update(
        &self,
        records: &[CanonicalRecord],
        update_fields: &[String],
    ) -> Result<u64> {
        let fields: Vec<&String> = update_fields
            .iter()
            .filter(|f| self.fields.contains(f))
            .collect();
        if records.is_empty() || fields.is_empty() {
            return Ok(0);
        }

        let assignments: Vec<String> = fields.iter().map(|f| format!("{f} = ?")).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            self.table,
            assignments.join(", ")
        );

        // One short-lived transaction per call, never one per record
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::BulkWrite(e.to_string()))?;

        let mut affected = 0;
        for record in records {
            let mut query = sqlx::query(&sql);
            for field in &fields {
                query = query.bind(Self::encode(Self::field_of(record, field))?);
            }
            let result = query
                .bind(record.key)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::BulkWrite(e.to_string()))?;
            affected += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::BulkWrite(e.to_string()))?;

        Ok(affected)
    }

    async fn filter_existing(&self, keys: &[i64]) -> Result<HashSet<i64>> {
        if keys.is_empty() {
            return Ok(HashSet::new());
        }

        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT id FROM {} WHERE id IN ({placeholders})",
            self.table
        );

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for key in keys {
            query = query.bind(key);
        }

        let existing = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(existing.into_iter().collect())
    }

    async fn get(&self, key: i64) -> Result<Option<CanonicalRecord>> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", self.table);
        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        row.map(|r| self.record_from_row(&r)).transpose()
    }

    async fn save(&self, record: &CanonicalRecord) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (id, {}) VALUES ({})",
            self.table,
            self.fields.join(", "),
            vec!["?"; self.fields.len() + 1].join(", "),
        );

        let mut query = sqlx::query(&sql).bind(record.key);
        for field in &self.fields {
            query = query.bind(Self::encode(Self::field_of(record, field))?);
        }

        query
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::RecordWrite {
                key: record.key,
                message: e.to_string(),
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteTargetStore {
        // One connection so every handle sees the same in-memory database
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        let fields = vec!["name".to_string(), "active".to_string()];
        SqliteTargetStore::migrate(&pool, "contacts", &fields)
            .await
            .unwrap();
        SqliteTargetStore::new(pool, "contacts", fields)
    }

    fn record(key: i64, name: &str, active: bool) -> CanonicalRecord {
        let mut r = CanonicalRecord::new(key);
        r.set("name", FieldValue::Text(name.to_string()));
        r.set("active", FieldValue::Boolean(active));
        r
    }

    #[tokio::test]
    async fn test_upsert_roundtrip() {
        let store = store().await;
        let all = vec!["name".to_string(), "active".to_string()];

        store
            .bulk_upsert(&[record(1, "ada", true), record(2, "bob", false)], &all)
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let found = store.get(1).await.unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&FieldValue::Text("ada".to_string())));
        assert_eq!(found.get("active"), Some(&FieldValue::Boolean(true)));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_on_key() {
        let store = store().await;
        let all = vec!["name".to_string(), "active".to_string()];

        store.bulk_upsert(&[record(1, "ada", true)], &all).await.unwrap();
        store.bulk_upsert(&[record(1, "ada2", true)], &all).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let found = store.get(1).await.unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&FieldValue::Text("ada2".to_string())));
    }

    #[tokio::test]
    async fn test_upsert_respects_update_field_subset() {
        let store = store().await;
        let all = vec!["name".to_string(), "active".to_string()];
        store.bulk_upsert(&[record(1, "ada", true)], &all).await.unwrap();

        // Only name may be refreshed on conflict
        store
            .bulk_upsert(&[record(1, "ada2", false)], &["name".to_string()])
            .await
            .unwrap();

        let found = store.get(1).await.unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&FieldValue::Text("ada2".to_string())));
        assert_eq!(found.get("active"), Some(&FieldValue::Boolean(true)));
    }

    #[tokio::test]
    async fn test_bulk_insert_fails_on_duplicate() {
        let store = store().await;
        store.bulk_insert(&[record(1, "ada", true)]).await.unwrap();
        let result = store.bulk_insert(&[record(1, "ada", true)]).await;
        assert!(matches!(result, Err(StoreError::BulkWrite(_))));
    }

    #[tokio::test]
    async fn test_bulk_update() {
        let store = store().await;
        store
            .bulk_insert(&[record(1, "ada", true), record(2, "bob", true)])
            .await
            .unwrap();

        let updated = store
            .bulk_update(
                &[record(1, "ada2", false), record(2, "bob2", false)],
                &["name".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let found = store.get(2).await.unwrap().unwrap();
        assert_eq!(found.get("name"), Some(&FieldValue::Text("bob2".to_string())));
        // active untouched
        assert_eq!(found.get("active"), Some(&FieldValue::Boolean(true)));
    }

    #[tokio::test]
    async fn test_filter_existing() {
        let store = store().await;
        store
            .bulk_insert(&[record(1, "a", true), record(3, "c", true)])
            .await
            .unwrap();

        let existing = store.filter_existing(&[1, 2, 3, 4]).await.unwrap();
        assert_eq!(existing, HashSet::from([1, 3]));
        assert!(store.filter_existing(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_missing_get() {
        let store = store().await;
        assert!(store.get(9).await.unwrap().is_none());

        store.save(&record(9, "solo", true)).await.unwrap();
        assert!(store.get(9).await.unwrap().is_some());
    }
}
