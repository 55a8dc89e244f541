//! Bake storage collaborator.
//!
//! Only the recalibration endpoint talks to this; the notification engine
//! never touches bakes directly.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::bake::{Bake, BakePatch};
use crate::error::StorageError;

#[async_trait]
pub trait BakeStorage: Send + Sync {
    async fn get_bake(&self, id: &str) -> Result<Option<Bake>, StorageError>;

    /// Apply `patch` and return the updated bake.
    async fn update_bake(&self, id: &str, patch: BakePatch) -> Result<Bake, StorageError>;
}

/// HashMap-backed bake storage.
#[derive(Default)]
pub struct MemoryBakeStorage {
    bakes: Mutex<HashMap<String, Bake>>,
}

impl MemoryBakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bake: Bake) {
        self.bakes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(bake.id.clone(), bake);
    }
}

#[async_trait]
impl BakeStorage for MemoryBakeStorage {
    async fn get_bake(&self, id: &str) -> Result<Option<Bake>, StorageError> {
        Ok(self
            .bakes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned())
    }

    async fn update_bake(&self, id: &str, patch: BakePatch) -> Result<Bake, StorageError> {
        let mut bakes = self.bakes.lock().unwrap_or_else(PoisonError::into_inner);
        let bake = bakes
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        bake.apply(patch);
        Ok(bake.clone())
    }
}

/// SQLite-backed bake storage; each bake is one JSON document.
pub struct SqliteBakeStorage {
    conn: Mutex<Connection>,
}

impl SqliteBakeStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bakes (
                id   TEXT PRIMARY KEY,
                body TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace a bake.
    pub fn put(&self, bake: &Bake) -> Result<(), StorageError> {
        let body = serde_json::to_string(bake)?;
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT OR REPLACE INTO bakes (id, body) VALUES (?1, ?2)",
            params![bake.id, body],
        )?;
        Ok(())
    }

    fn load(conn: &Connection, id: &str) -> Result<Option<Bake>, StorageError> {
        let body: Option<String> = conn
            .query_row("SELECT body FROM bakes WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(StorageError::from))
            .transpose()
    }
}

#[async_trait]
impl BakeStorage for SqliteBakeStorage {
    async fn get_bake(&self, id: &str) -> Result<Option<Bake>, StorageError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Self::load(&conn, id)
    }

    async fn update_bake(&self, id: &str, patch: BakePatch) -> Result<Bake, StorageError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut bake =
            Self::load(&conn, id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        bake.apply(patch);
        let body = serde_json::to_string(&bake)?;
        conn.execute(
            "UPDATE bakes SET body = ?2 WHERE id = ?1",
            params![id, body],
        )?;
        Ok(bake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bake(id: &str) -> Bake {
        Bake {
            id: id.into(),
            recipe_name: "Baguette".into(),
            current_step: 0,
            start_time: "2026-03-01T08:00:00Z".parse().unwrap(),
            estimated_end_time: "2026-03-01T12:00:00Z".parse().unwrap(),
            timeline_adjustments: vec![],
        }
    }

    #[tokio::test]
    async fn sqlite_bake_roundtrip_and_update() {
        let storage = SqliteBakeStorage::open_memory().unwrap();
        storage.put(&bake("b1")).unwrap();

        let loaded = storage.get_bake("b1").await.unwrap().unwrap();
        assert_eq!(loaded.recipe_name, "Baguette");

        let updated = storage
            .update_bake(
                "b1",
                BakePatch {
                    current_step: Some(4),
                    ..BakePatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.current_step, 4);
        assert_eq!(
            storage.get_bake("b1").await.unwrap().unwrap().current_step,
            4
        );
    }

    #[tokio::test]
    async fn missing_bake_is_not_found() {
        let storage = MemoryBakeStorage::new();
        assert!(storage.get_bake("nope").await.unwrap().is_none());
        assert!(matches!(
            storage.update_bake("nope", BakePatch::default()).await,
            Err(StorageError::NotFound(_))
        ));
    }
}
