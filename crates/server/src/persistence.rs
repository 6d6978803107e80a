//! Persistence layer — SQLite behind `spawn_blocking`.
//!
//! Every call opens its own connection with WAL pragmas; writes that
//! must be read back immediately (turn append, room resolve) run in a
//! transaction. Turn appends assign `MAX(sequence)+1` scoped to the
//! room; per-room serialization of appends is the room actor's job.

use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use roomrelay_protocol::{new_id, now_ts, Identity, Room, Turn, TurnRole};

use crate::migrations::run_migrations;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Handle to the SQLite database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    /// Open the database and apply pending migrations.
    pub fn open(db_path: PathBuf) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(&db_path)?;
        run_migrations(&mut conn)?;
        Ok(Self { db_path })
    }

    /// Run a closure against a fresh connection on the blocking pool.
    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        let result = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(
                "PRAGMA busy_timeout = 5000;
                 PRAGMA synchronous = NORMAL;",
            )?;
            f(&conn)
        })
        .await?;
        Ok(result?)
    }

    // -- Identities --

    pub async fn find_identity(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        let id = id.to_string();
        self.call(move |conn| {
            conn.query_row(
                "SELECT id, username, email, is_active, updated_at
                 FROM identities WHERE id = ?1",
                params![id],
                row_to_identity,
            )
            .optional()
        })
        .await
    }

    /// Mirror an identity row from the external user store (operational
    /// seeding and tests).
    pub async fn upsert_identity(&self, identity: Identity) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO identities (id, username, email, is_active, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   username = ?2, email = ?3, is_active = ?4, updated_at = ?5",
                params![
                    identity.id,
                    identity.username,
                    identity.email,
                    identity.is_active as i64,
                    identity.updated_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    // -- Revocation set --

    pub async fn is_token_revoked(&self, jti: &str) -> Result<bool, StoreError> {
        let jti = jti.to_string();
        self.call(move |conn| {
            let hit: Option<String> = conn
                .query_row(
                    "SELECT jti FROM revoked_tokens WHERE jti = ?1",
                    params![jti],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hit.is_some())
        })
        .await
    }

    pub async fn revoke_token(&self, jti: &str) -> Result<(), StoreError> {
        let jti = jti.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO revoked_tokens (jti, revoked_at) VALUES (?1, ?2)",
                params![jti, now_ts()],
            )?;
            Ok(())
        })
        .await
    }

    // -- Rooms --

    /// Look up a room by `(owner, room_key)`, creating it with no title
    /// if absent. Idempotent; a soft-deleted room with the same key is
    /// revived rather than duplicated (the key stays unique per owner).
    pub async fn resolve_or_create_room(
        &self,
        owner_id: &str,
        room_key: &str,
    ) -> Result<Room, StoreError> {
        let owner_id = owner_id.to_string();
        let room_key = room_key.to_string();
        self.call(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let now = now_ts();
            tx.execute(
                "INSERT INTO rooms (id, room_key, title, owner_id, created_at, updated_at)
                 VALUES (?1, ?2, NULL, ?3, ?4, ?4)
                 ON CONFLICT(owner_id, room_key) DO UPDATE SET deleted_at = NULL",
                params![new_id(), room_key, owner_id, now],
            )?;
            let room = tx.query_row(
                "SELECT id, room_key, title, owner_id, created_at, updated_at, deleted_at
                 FROM rooms WHERE owner_id = ?1 AND room_key = ?2",
                params![owner_id, room_key],
                row_to_room,
            )?;
            tx.commit()?;
            Ok(room)
        })
        .await
    }

    /// The owner's non-deleted rooms, newest activity first.
    pub async fn list_rooms(&self, owner_id: &str) -> Result<Vec<Room>, StoreError> {
        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_key, title, owner_id, created_at, updated_at, deleted_at
                 FROM rooms
                 WHERE owner_id = ?1 AND deleted_at IS NULL
                 ORDER BY updated_at DESC, created_at DESC",
            )?;
            let rooms = stmt
                .query_map(params![owner_id], row_to_room)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rooms)
        })
        .await
    }

    pub async fn set_room_title(&self, room_id: &str, title: &str) -> Result<(), StoreError> {
        let room_id = room_id.to_string();
        let title = title.to_string();
        self.call(move |conn| {
            conn.execute(
                "UPDATE rooms SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, now_ts(), room_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Soft-delete one room. Returns false when nothing matched.
    pub async fn delete_room(&self, owner_id: &str, room_key: &str) -> Result<bool, StoreError> {
        let owner_id = owner_id.to_string();
        let room_key = room_key.to_string();
        self.call(move |conn| {
            let affected = conn.execute(
                "UPDATE rooms SET deleted_at = ?1
                 WHERE owner_id = ?2 AND room_key = ?3 AND deleted_at IS NULL",
                params![now_ts(), owner_id, room_key],
            )?;
            Ok(affected > 0)
        })
        .await
    }

    /// Soft-delete all of the owner's rooms. Returns the count affected.
    pub async fn clear_rooms(&self, owner_id: &str) -> Result<usize, StoreError> {
        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let affected = conn.execute(
                "UPDATE rooms SET deleted_at = ?1
                 WHERE owner_id = ?2 AND deleted_at IS NULL",
                params![now_ts(), owner_id],
            )?;
            Ok(affected)
        })
        .await
    }

    // -- Turns --

    /// Append a turn, assigning the next sequence number scoped to the
    /// room, and bump the room's activity timestamp. Never drops
    /// silently: any failure surfaces to the caller.
    pub async fn append_turn(
        &self,
        room_id: &str,
        owner_id: &str,
        role: TurnRole,
        text: &str,
        is_image: bool,
        attachment_refs: &[String],
    ) -> Result<Turn, StoreError> {
        let room_id = room_id.to_string();
        let owner_id = owner_id.to_string();
        let text = text.to_string();
        let refs_json =
            serde_json::to_string(attachment_refs).unwrap_or_else(|_| "[]".to_string());
        let attachment_refs = attachment_refs.to_vec();
        self.call(move |conn| {
            let tx = conn.unchecked_transaction()?;
            let sequence: i64 = tx.query_row(
                "SELECT COALESCE(MAX(sequence), -1) + 1 FROM turns WHERE room_id = ?1",
                params![room_id],
                |row| row.get(0),
            )?;
            let turn = Turn {
                id: new_id(),
                room_id: room_id.clone(),
                owner_id: owner_id.clone(),
                role,
                text,
                is_image,
                attachment_refs,
                sequence,
                ts: now_ts(),
            };
            tx.execute(
                "INSERT INTO turns (id, room_id, owner_id, role, text, is_image, attachment_refs, sequence, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    turn.id,
                    turn.room_id,
                    turn.owner_id,
                    role.as_str(),
                    turn.text,
                    turn.is_image as i64,
                    refs_json,
                    turn.sequence,
                    turn.ts,
                ],
            )?;
            tx.execute(
                "UPDATE rooms SET updated_at = ?1 WHERE id = ?2",
                params![turn.ts, turn.room_id],
            )?;
            tx.commit()?;
            Ok(turn)
        })
        .await
    }

    /// The last `limit` turns of a room, in chronological order.
    pub async fn replay_turns(
        &self,
        room_id: &str,
        owner_id: &str,
        limit: usize,
    ) -> Result<Vec<Turn>, StoreError> {
        let room_id = room_id.to_string();
        let owner_id = owner_id.to_string();
        self.call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, owner_id, role, text, is_image, attachment_refs, sequence, ts
                 FROM (
                     SELECT * FROM turns
                     WHERE room_id = ?1 AND owner_id = ?2
                     ORDER BY sequence DESC LIMIT ?3
                 ) ORDER BY sequence ASC",
            )?;
            let turns = stmt
                .query_map(params![room_id, owner_id, limit as i64], row_to_turn)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(turns)
        })
        .await
    }
}

fn row_to_identity(row: &Row<'_>) -> Result<Identity, rusqlite::Error> {
    Ok(Identity {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        is_active: row.get::<_, i64>(3)? != 0,
        updated_at: row.get(4)?,
    })
}

fn row_to_room(row: &Row<'_>) -> Result<Room, rusqlite::Error> {
    Ok(Room {
        id: row.get(0)?,
        room_key: row.get(1)?,
        title: row.get(2)?,
        owner_id: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        deleted_at: row.get(6)?,
    })
}

fn row_to_turn(row: &Row<'_>) -> Result<Turn, rusqlite::Error> {
    let role: String = row.get(3)?;
    let refs_json: String = row.get(6)?;
    Ok(Turn {
        id: row.get(0)?,
        room_id: row.get(1)?,
        owner_id: row.get(2)?,
        role: match role.as_str() {
            "user" => TurnRole::User,
            "assistant" => TurnRole::Assistant,
            _ => TurnRole::System,
        },
        text: row.get(4)?,
        is_image: row.get::<_, i64>(5)? != 0,
        attachment_refs: serde_json::from_str(&refs_json).unwrap_or_default(),
        sequence: row.get(7)?,
        ts: row.get(8)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    pub(crate) fn test_identity(id: &str) -> Identity {
        Identity {
            id: id.to_string(),
            username: format!("user-{id}"),
            email: format!("{id}@example.com"),
            is_active: true,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn resolve_or_create_is_idempotent() {
        let (store, _dir) = test_store();
        store.upsert_identity(test_identity("u1")).await.unwrap();

        let first = store.resolve_or_create_room("u1", "room-aa").await.unwrap();
        let second = store.resolve_or_create_room("u1", "room-aa").await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.title.is_none());
    }

    #[tokio::test]
    async fn room_keys_are_scoped_per_owner() {
        let (store, _dir) = test_store();
        let a = store.resolve_or_create_room("u1", "room-aa").await.unwrap();
        let b = store.resolve_or_create_room("u2", "room-aa").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.room_key, b.room_key);
    }

    #[tokio::test]
    async fn append_assigns_gap_free_sequences() {
        let (store, _dir) = test_store();
        let room = store.resolve_or_create_room("u1", "room-aa").await.unwrap();

        for i in 0..5 {
            let turn = store
                .append_turn(&room.id, "u1", TurnRole::User, &format!("msg {i}"), false, &[])
                .await
                .unwrap();
            assert_eq!(turn.sequence, i);
        }

        let replayed = store.replay_turns(&room.id, "u1", 200).await.unwrap();
        let sequences: Vec<i64> = replayed.iter().map(|t| t.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn replay_window_returns_last_n_chronologically() {
        let (store, _dir) = test_store();
        let room = store.resolve_or_create_room("u1", "room-aa").await.unwrap();

        for i in 0..10 {
            store
                .append_turn(&room.id, "u1", TurnRole::User, &format!("msg {i}"), false, &[])
                .await
                .unwrap();
        }

        let window = store.replay_turns(&room.id, "u1", 3).await.unwrap();
        let texts: Vec<&str> = window.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["msg 7", "msg 8", "msg 9"]);
    }

    #[tokio::test]
    async fn soft_deleted_rooms_are_excluded_from_listing() {
        let (store, _dir) = test_store();
        store.resolve_or_create_room("u1", "room-aa").await.unwrap();
        store.resolve_or_create_room("u1", "room-bb").await.unwrap();

        assert!(store.delete_room("u1", "room-aa").await.unwrap());
        assert!(!store.delete_room("u1", "room-aa").await.unwrap());

        let rooms = store.list_rooms("u1").await.unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].room_key, "room-bb");
    }

    #[tokio::test]
    async fn deleted_room_is_revived_on_resolve() {
        let (store, _dir) = test_store();
        let before = store.resolve_or_create_room("u1", "room-aa").await.unwrap();
        store.delete_room("u1", "room-aa").await.unwrap();

        let after = store.resolve_or_create_room("u1", "room-aa").await.unwrap();
        assert_eq!(before.id, after.id);
        assert!(after.deleted_at.is_none());
    }

    #[tokio::test]
    async fn clear_rooms_reports_count() {
        let (store, _dir) = test_store();
        store.resolve_or_create_room("u1", "room-aa").await.unwrap();
        store.resolve_or_create_room("u1", "room-bb").await.unwrap();
        store.resolve_or_create_room("u2", "room-cc").await.unwrap();

        assert_eq!(store.clear_rooms("u1").await.unwrap(), 2);
        assert_eq!(store.clear_rooms("u1").await.unwrap(), 0);
        assert_eq!(store.list_rooms("u2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn attachment_refs_round_trip() {
        let (store, _dir) = test_store();
        let room = store.resolve_or_create_room("u1", "room-aa").await.unwrap();
        let refs = vec!["https://img.example/a.png".to_string()];
        store
            .append_turn(&room.id, "u1", TurnRole::Assistant, "an image", true, &refs)
            .await
            .unwrap();

        let replayed = store.replay_turns(&room.id, "u1", 10).await.unwrap();
        assert!(replayed[0].is_image);
        assert_eq!(replayed[0].attachment_refs, refs);
    }

    #[tokio::test]
    async fn revocation_set_membership() {
        let (store, _dir) = test_store();
        assert!(!store.is_token_revoked("jti-1").await.unwrap());
        store.revoke_token("jti-1").await.unwrap();
        assert!(store.is_token_revoked("jti-1").await.unwrap());
    }
}
