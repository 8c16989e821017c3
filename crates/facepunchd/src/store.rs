use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use facepunch_core::repository::{AttendanceRepository, GalleryRepository};
use facepunch_core::types::GalleryEntry;
use facepunch_core::{AttendanceEvent, Embedding, Gallery, Identity, PunchKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_rusqlite::Connection;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("embedding encryption failed")]
    EncryptionFailed,
    #[error("embedding decryption failed: key mismatch or corrupted data")]
    DecryptionFailed,
    #[error("invalid embedding blob size: {0} bytes")]
    InvalidBlob(usize),
    #[error("invalid embedding dimension: {got} (expected {expected})")]
    InvalidEmbeddingDim { expected: usize, got: usize },
    #[error("invalid embedding value (NaN/Inf)")]
    InvalidEmbeddingValue,
    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),
    #[error("identity already exists: {0}")]
    DuplicateIdentity(String),
    #[error("unknown or inactive identity: {0}")]
    UnknownIdentity(String),
    #[error("corrupt attendance row: {0}")]
    CorruptEvent(String),
}

/// SQLite-backed store for identities, encrypted embeddings and the
/// attendance log.
///
/// Embeddings are AES-256-GCM encrypted at rest with a per-installation
/// key kept at `{db_dir}/.key` (mode 0600). Attendance events are
/// append-only.
#[derive(Clone)]
pub struct AttendanceStore {
    conn: Connection,
    enc_key: [u8; 32],
    embedding_dim: usize,
}

impl AttendanceStore {
    /// Open (or create) the database at the given path and create the schema.
    pub async fn open(db_path: &Path, embedding_dim: usize) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let enc_key = if db_path == Path::new(":memory:") {
            [0u8; 32]
        } else {
            let key_path = db_path.parent().unwrap_or(Path::new(".")).join(".key");
            load_or_generate_key(&key_path)?
        };

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS identities (
                     seq INTEGER PRIMARY KEY AUTOINCREMENT,
                     external_id TEXT NOT NULL UNIQUE,
                     name TEXT NOT NULL,
                     active INTEGER NOT NULL DEFAULT 1,
                     created_at TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS embeddings (
                     id TEXT PRIMARY KEY,
                     identity_seq INTEGER NOT NULL REFERENCES identities(seq) ON DELETE CASCADE,
                     embedding BLOB NOT NULL,
                     model_version TEXT NOT NULL,
                     angle_label TEXT NOT NULL DEFAULT 'front',
                     quality REAL NOT NULL DEFAULT 0.0,
                     created_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_embeddings_identity ON embeddings(identity_seq);
                 CREATE TABLE IF NOT EXISTS attendance_events (
                     seq INTEGER PRIMARY KEY AUTOINCREMENT,
                     identity_seq INTEGER NOT NULL REFERENCES identities(seq),
                     kind TEXT NOT NULL,
                     timestamp TEXT NOT NULL,
                     day TEXT NOT NULL,
                     match_confidence REAL NOT NULL,
                     liveness_passed INTEGER NOT NULL,
                     liveness_confidence REAL NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_events_identity_day
                     ON attendance_events(identity_seq, day);
                 CREATE INDEX IF NOT EXISTS idx_events_day ON attendance_events(day);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            enc_key,
            embedding_dim,
        })
    }

    // ── Identities ────────────────────────────────────────────────────────────

    /// Register a new identity. The external id must be unused.
    pub async fn create_identity(&self, id: &str, name: &str) -> Result<IdentityRecord, StoreError> {
        let created_at = Utc::now().to_rfc3339();
        let external_id = id.to_string();
        let name = name.to_string();

        let record = self
            .conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM identities WHERE external_id = ?1)",
                    [&external_id],
                    |row| row.get(0),
                )?;
                if exists {
                    return Ok(None);
                }
                conn.execute(
                    "INSERT INTO identities (external_id, name, active, created_at)
                     VALUES (?1, ?2, 1, ?3)",
                    rusqlite::params![external_id, name, created_at],
                )?;
                Ok(Some(IdentityRecord {
                    id: external_id,
                    name,
                    active: true,
                    embedding_count: 0,
                    created_at,
                }))
            })
            .await?;

        record.ok_or_else(|| StoreError::DuplicateIdentity(id.to_string()))
    }

    /// Mark an identity inactive. Its embeddings stop taking part in matching.
    ///
    /// Returns `false` when no active identity has this id.
    pub async fn deactivate_identity(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "UPDATE identities SET active = 0 WHERE external_id = ?1 AND active = 1",
                    [&id],
                )?;
                Ok(affected > 0)
            })
            .await
            .map_err(StoreError::from)
    }

    pub async fn identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.external_id, i.name, i.active, i.created_at,
                            (SELECT COUNT(*) FROM embeddings e WHERE e.identity_seq = i.seq)
                     FROM identities i WHERE i.external_id = ?1",
                )?;
                let mut rows = stmt.query_map([&id], identity_from_row)?;
                let record = rows.next().transpose()?;
                Ok(record)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Identities in registration order.
    pub async fn list_identities(
        &self,
        include_inactive: bool,
    ) -> Result<Vec<IdentityRecord>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.external_id, i.name, i.active, i.created_at,
                            (SELECT COUNT(*) FROM embeddings e WHERE e.identity_seq = i.seq)
                     FROM identities i
                     WHERE ?1 OR i.active = 1
                     ORDER BY i.seq",
                )?;
                let rows = stmt.query_map([include_inactive], identity_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Embeddings ────────────────────────────────────────────────────────────

    /// Store an embedding for an active identity. Returns the generated UUID.
    pub async fn add_embedding(
        &self,
        identity_id: &str,
        embedding: &Embedding,
        angle_label: &str,
        quality: f32,
    ) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let model_version = embedding
            .model_version
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        let created_at = Utc::now().to_rfc3339();

        // Encrypt before entering the SQLite closure
        let blob = self.encrypt_embedding(&embedding.values)?;

        let id_clone = id.clone();
        let external_id = identity_id.to_string();
        let angle_label = angle_label.to_string();

        let inserted = self
            .conn
            .call(move |conn| {
                let affected = conn.execute(
                    "INSERT INTO embeddings
                         (id, identity_seq, embedding, model_version, angle_label, quality, created_at)
                     SELECT ?1, seq, ?2, ?3, ?4, ?5, ?6
                     FROM identities WHERE external_id = ?7 AND active = 1",
                    rusqlite::params![
                        id_clone,
                        blob,
                        model_version,
                        angle_label,
                        quality,
                        created_at,
                        external_id
                    ],
                )?;
                Ok(affected > 0)
            })
            .await?;

        if !inserted {
            return Err(StoreError::UnknownIdentity(identity_id.to_string()));
        }
        Ok(id)
    }

    /// Embedding metadata of one identity (no vectors).
    pub async fn list_embeddings(&self, identity_id: &str) -> Result<Vec<EmbeddingInfo>, StoreError> {
        let external_id = identity_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT e.id, e.angle_label, e.model_version, e.quality, e.created_at
                     FROM embeddings e JOIN identities i ON i.seq = e.identity_seq
                     WHERE i.external_id = ?1 ORDER BY e.rowid",
                )?;
                let rows = stmt.query_map([&external_id], |row| {
                    Ok(EmbeddingInfo {
                        id: row.get(0)?,
                        angle_label: row.get(1)?,
                        model_version: row.get(2)?,
                        quality: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Delete every embedding of an identity. Returns how many were removed.
    pub async fn clear_embeddings(&self, identity_id: &str) -> Result<usize, StoreError> {
        let external_id = identity_id.to_string();
        self.conn
            .call(move |conn| {
                let affected = conn.execute(
                    "DELETE FROM embeddings
                     WHERE identity_seq = (SELECT seq FROM identities WHERE external_id = ?1)",
                    [&external_id],
                )?;
                Ok(affected)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Count embeddings across all active identities.
    pub async fn count_embeddings(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 = conn.query_row(
                    "SELECT COUNT(*) FROM embeddings e
                     JOIN identities i ON i.seq = e.identity_seq WHERE i.active = 1",
                    [],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }

    // ── Attendance log ────────────────────────────────────────────────────────

    /// All events of one UTC day across identities, ascending by time.
    pub async fn events_on(&self, day: NaiveDate) -> Result<Vec<AttendanceEvent>, StoreError> {
        let day = day.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.external_id, e.kind, e.timestamp, e.match_confidence,
                            e.liveness_passed, e.liveness_confidence
                     FROM attendance_events e JOIN identities i ON i.seq = e.identity_seq
                     WHERE e.day = ?1 ORDER BY e.timestamp, e.seq",
                )?;
                let rows = stmt.query_map([&day], raw_event_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        rows.into_iter().map(RawEvent::into_event).collect()
    }

    /// Filtered attendance history, most recent first.
    pub async fn history(&self, filter: &HistoryFilter) -> Result<HistoryPage, StoreError> {
        let identity = filter.identity.clone();
        let from = filter.from.map(|d| d.to_string());
        let to = filter.to.map(|d| d.to_string());
        let limit = i64::from(filter.limit);
        let offset = i64::from(filter.offset);

        let (total, rows) = self
            .conn
            .call(move |conn| {
                const FILTER: &str = "(?1 IS NULL OR i.external_id = ?1)
                     AND (?2 IS NULL OR e.day >= ?2)
                     AND (?3 IS NULL OR e.day <= ?3)";

                let total: u64 = conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM attendance_events e
                         JOIN identities i ON i.seq = e.identity_seq WHERE {FILTER}"
                    ),
                    rusqlite::params![identity, from, to],
                    |row| row.get(0),
                )?;

                let mut stmt = conn.prepare(&format!(
                    "SELECT i.external_id, e.kind, e.timestamp, e.match_confidence,
                            e.liveness_passed, e.liveness_confidence, i.name
                     FROM attendance_events e JOIN identities i ON i.seq = e.identity_seq
                     WHERE {FILTER}
                     ORDER BY e.timestamp DESC, e.seq DESC
                     LIMIT ?4 OFFSET ?5"
                ))?;
                let rows = stmt.query_map(
                    rusqlite::params![identity, from, to, limit, offset],
                    |row| Ok((raw_event_from_row(row)?, row.get::<_, String>(6)?)),
                )?;
                Ok((total, rows.collect::<Result<Vec<_>, _>>()?))
            })
            .await?;

        let entries = rows
            .into_iter()
            .map(|(raw, name)| {
                Ok(HistoryEntry {
                    name,
                    event: raw.into_event()?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(HistoryPage { total, entries })
    }

    // ── Encryption helpers ────────────────────────────────────────────────────

    /// Encrypt embedding values with AES-256-GCM.
    ///
    /// Output: 12-byte random nonce || ciphertext || 16-byte GCM tag.
    fn encrypt_embedding(&self, values: &[f32]) -> Result<Vec<u8>, StoreError> {
        validate_embedding_values(values, self.embedding_dim)?;
        let plaintext = embedding_to_bytes(values);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| StoreError::EncryptionFailed)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt an embedding blob.
    ///
    /// The dimension is taken from the plaintext so that rows written under
    /// a different model survive and are skipped by the matcher.
    fn decrypt_embedding(&self, blob: &[u8]) -> Result<Vec<f32>, StoreError> {
        if blob.len() <= NONCE_LEN {
            return Err(StoreError::InvalidBlob(blob.len()));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let key = Key::<Aes256Gcm>::from_slice(&self.enc_key);
        let cipher = Aes256Gcm::new(key);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| StoreError::DecryptionFailed)?;

        bytes_to_embedding(&plaintext)
    }
}

impl GalleryRepository for AttendanceStore {
    type Error = StoreError;

    async fn active_embeddings(&self) -> Result<Gallery, StoreError> {
        // Fetch raw rows; decrypt outside the blocking closure
        let rows: Vec<(String, String, Option<Vec<u8>>, Option<String>)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.external_id, i.name, e.embedding, e.model_version
                     FROM identities i
                     LEFT JOIN embeddings e ON e.identity_seq = i.seq
                     WHERE i.active = 1
                     ORDER BY i.seq, e.rowid",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<Vec<u8>>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        let mut entries: Vec<GalleryEntry> = Vec::new();
        for (id, name, blob, model_version) in rows {
            if entries.last().map_or(true, |e| e.identity.id != id) {
                entries.push(GalleryEntry {
                    identity: Identity::new(id, name),
                    embeddings: Vec::new(),
                });
            }
            let (Some(blob), Some(entry)) = (blob, entries.last_mut()) else {
                continue;
            };
            match self.decrypt_embedding(&blob) {
                Ok(values) => entry.embeddings.push(Embedding {
                    values,
                    model_version,
                }),
                Err(e) => {
                    tracing::warn!(
                        identity = %entry.identity.id,
                        error = %e,
                        "skipping unreadable embedding"
                    );
                }
            }
        }
        Ok(entries.into_iter().collect())
    }
}

impl AttendanceRepository for AttendanceStore {
    type Error = StoreError;

    async fn events_for(
        &self,
        identity_id: &str,
        day: NaiveDate,
    ) -> Result<Vec<AttendanceEvent>, StoreError> {
        let external_id = identity_id.to_string();
        let day = day.to_string();
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT i.external_id, e.kind, e.timestamp, e.match_confidence,
                            e.liveness_passed, e.liveness_confidence
                     FROM attendance_events e JOIN identities i ON i.seq = e.identity_seq
                     WHERE i.external_id = ?1 AND e.day = ?2
                     ORDER BY e.timestamp, e.seq",
                )?;
                let rows = stmt.query_map([&external_id, &day], raw_event_from_row)?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        rows.into_iter().map(RawEvent::into_event).collect()
    }

    async fn append(&self, event: &AttendanceEvent) -> Result<(), StoreError> {
        let external_id = event.identity_id.clone();
        let kind = event.kind.as_str();
        let timestamp = event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true);
        let day = event.day().to_string();
        let match_confidence = event.match_confidence;
        let liveness_passed = event.liveness_passed;
        let liveness_confidence = event.liveness_confidence;

        let inserted = self
            .conn
            .call(move |conn| {
                let affected = conn.execute(
                    "INSERT INTO attendance_events
                         (identity_seq, kind, timestamp, day, match_confidence,
                          liveness_passed, liveness_confidence)
                     SELECT seq, ?2, ?3, ?4, ?5, ?6, ?7
                     FROM identities WHERE external_id = ?1",
                    rusqlite::params![
                        external_id,
                        kind,
                        timestamp,
                        day,
                        match_confidence,
                        liveness_passed,
                        liveness_confidence
                    ],
                )?;
                Ok(affected > 0)
            })
            .await?;

        if !inserted {
            return Err(StoreError::UnknownIdentity(event.identity_id.clone()));
        }
        Ok(())
    }
}

// ── Row helpers ───────────────────────────────────────────────────────────────

fn identity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityRecord> {
    Ok(IdentityRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        active: row.get(2)?,
        created_at: row.get(3)?,
        embedding_count: row.get(4)?,
    })
}

/// Event row as stored; kind and timestamp are validated outside SQLite.
struct RawEvent {
    identity_id: String,
    kind: String,
    timestamp: String,
    match_confidence: f32,
    liveness_passed: bool,
    liveness_confidence: f32,
}

fn raw_event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        identity_id: row.get(0)?,
        kind: row.get(1)?,
        timestamp: row.get(2)?,
        match_confidence: row.get(3)?,
        liveness_passed: row.get(4)?,
        liveness_confidence: row.get(5)?,
    })
}

impl RawEvent {
    fn into_event(self) -> Result<AttendanceEvent, StoreError> {
        let kind = PunchKind::parse(&self.kind)
            .ok_or_else(|| StoreError::CorruptEvent(format!("unknown kind {:?}", self.kind)))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| StoreError::CorruptEvent(format!("timestamp {:?}: {e}", self.timestamp)))?
            .with_timezone(&Utc);
        Ok(AttendanceEvent {
            identity_id: self.identity_id,
            kind,
            timestamp,
            match_confidence: self.match_confidence,
            liveness_passed: self.liveness_passed,
            liveness_confidence: self.liveness_confidence,
        })
    }
}

// ── Key management ────────────────────────────────────────────────────────────

/// Load the encryption key from disk, or generate and persist a new one.
/// Written with mode 0600 (owner-readable only).
fn load_or_generate_key(key_path: &Path) -> Result<[u8; 32], StoreError> {
    if key_path.exists() {
        let bytes = std::fs::read(key_path).map_err(StoreError::KeyIo)?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            StoreError::KeyIo(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "encryption key file has wrong length ({} bytes, expected 32)",
                    bytes.len()
                ),
            ))
        })?;
        tracing::debug!(path = %key_path.display(), "loaded encryption key");
        Ok(key)
    } else {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(key_path)
            .map_err(StoreError::KeyIo)?;
        f.write_all(&key).map_err(StoreError::KeyIo)?;

        tracing::info!(path = %key_path.display(), "generated new AES-256 encryption key");
        Ok(key)
    }
}

// ── Serialization helpers ─────────────────────────────────────────────────────

fn embedding_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidBlob(bytes.len()));
    }
    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidEmbeddingValue);
    }
    Ok(values)
}

fn validate_embedding_values(values: &[f32], expected: usize) -> Result<(), StoreError> {
    if values.len() != expected {
        return Err(StoreError::InvalidEmbeddingDim {
            expected,
            got: values.len(),
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(StoreError::InvalidEmbeddingValue);
    }
    Ok(())
}

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub embedding_count: u32,
    pub created_at: String,
}

/// Metadata about a stored embedding (no vector data).
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingInfo {
    pub id: String,
    pub angle_label: String,
    pub model_version: String,
    pub quality: f64,
    pub created_at: String,
}

/// History query. Dates are inclusive UTC days.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryFilter {
    pub identity: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub offset: u32,
    pub limit: u32,
}

impl Default for HistoryFilter {
    fn default() -> Self {
        Self {
            identity: None,
            from: None,
            to: None,
            offset: 0,
            limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub name: String,
    #[serde(flatten)]
    pub event: AttendanceEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Matching events before pagination.
    pub total: u64,
    pub entries: Vec<HistoryEntry>,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
