//! SQLite backend.
//!
//! Every write runs in an IMMEDIATE transaction, so the read of the group's
//! max version and the insert of the next one cannot interleave with another
//! writer, in this process or another. The schema backs this up with
//! `UNIQUE(group_id, version_number)` and a partial unique index allowing a
//! single current row per group.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{
    ffi, params, Connection, OptionalExtension, Row, ToSql, Transaction, TransactionBehavior,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    check_next_version, check_stamp, AnnotationStatistics, AnnotationStore, DocumentReplacement,
    ReplacePolicy, ReviewStamp,
};
use crate::domain::{
    Annotation, AnnotationDraft, AnnotationId, AnnotationUpdate, ConceptRef, DocumentRef,
    DocumentType, Span,
};
use crate::error::{AnnotationError, Result};

const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS annotations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_type TEXT NOT NULL CHECK (document_type IN ('guideline', 'case')),
        document_id INTEGER NOT NULL,
        context_id TEXT NOT NULL,
        text_segment TEXT NOT NULL,
        start_offset INTEGER NOT NULL,
        end_offset INTEGER NOT NULL,
        concept_uri TEXT NOT NULL,
        concept_label TEXT NOT NULL,
        concept_definition TEXT,
        concept_type TEXT,
        source_name TEXT NOT NULL,
        source_version TEXT,
        confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
        model_id TEXT NOT NULL,
        rationale TEXT,
        source_digest TEXT NOT NULL,
        approval_stage TEXT NOT NULL,
        validation_status TEXT NOT NULL,
        version_number INTEGER NOT NULL CHECK (version_number >= 1),
        group_id TEXT NOT NULL,
        parent_version_id INTEGER REFERENCES annotations(id) ON DELETE SET NULL,
        superseded_by_version_id INTEGER REFERENCES annotations(id) ON DELETE SET NULL,
        is_current INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        validated_at TEXT,
        validated_by TEXT,
        edit_payload TEXT,
        CHECK (start_offset < end_offset),
        UNIQUE (group_id, version_number)
    );

    CREATE INDEX IF NOT EXISTS idx_annotations_document_current
        ON annotations (document_type, document_id, is_current);
    CREATE INDEX IF NOT EXISTS idx_annotations_context
        ON annotations (context_id);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_annotations_one_current
        ON annotations (group_id) WHERE is_current = 1;

    INSERT INTO schema_version (version, applied_at) VALUES (1, datetime('now'));",
)];

const SELECT_COLUMNS: &str = "id, document_type, document_id, context_id, text_segment,
    start_offset, end_offset, concept_uri, concept_label, concept_definition, concept_type,
    source_name, source_version, confidence, model_id, rationale, source_digest,
    approval_stage, validation_status, version_number, group_id, parent_version_id,
    superseded_by_version_id, is_current, created_at, updated_at, validated_at,
    validated_by, edit_payload";

/// Raw column values before enum and timestamp parsing
struct AnnotationRow {
    id: i64,
    document_type: String,
    document_id: i64,
    context_id: String,
    text_segment: String,
    start_offset: i64,
    end_offset: i64,
    concept_uri: String,
    concept_label: String,
    concept_definition: Option<String>,
    concept_type: Option<String>,
    source_name: String,
    source_version: Option<String>,
    confidence: f64,
    model_id: String,
    rationale: Option<String>,
    source_digest: String,
    approval_stage: String,
    validation_status: String,
    version_number: i64,
    group_id: String,
    parent_version_id: Option<i64>,
    superseded_by_version_id: Option<i64>,
    is_current: bool,
    created_at: String,
    updated_at: String,
    validated_at: Option<String>,
    validated_by: Option<String>,
    edit_payload: Option<String>,
}

impl AnnotationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            document_type: row.get(1)?,
            document_id: row.get(2)?,
            context_id: row.get(3)?,
            text_segment: row.get(4)?,
            start_offset: row.get(5)?,
            end_offset: row.get(6)?,
            concept_uri: row.get(7)?,
            concept_label: row.get(8)?,
            concept_definition: row.get(9)?,
            concept_type: row.get(10)?,
            source_name: row.get(11)?,
            source_version: row.get(12)?,
            confidence: row.get(13)?,
            model_id: row.get(14)?,
            rationale: row.get(15)?,
            source_digest: row.get(16)?,
            approval_stage: row.get(17)?,
            validation_status: row.get(18)?,
            version_number: row.get(19)?,
            group_id: row.get(20)?,
            parent_version_id: row.get(21)?,
            superseded_by_version_id: row.get(22)?,
            is_current: row.get(23)?,
            created_at: row.get(24)?,
            updated_at: row.get(25)?,
            validated_at: row.get(26)?,
            validated_by: row.get(27)?,
            edit_payload: row.get(28)?,
        })
    }

    fn into_annotation(self) -> Result<Annotation> {
        let corrupt = |field: &str, value: &str| {
            AnnotationError::Persistence(format!("row {}: invalid {}: {}", self.id, field, value))
        };

        let document_type: DocumentType = self
            .document_type
            .parse()
            .map_err(|_| corrupt("document_type", &self.document_type))?;
        let approval_stage = self
            .approval_stage
            .parse()
            .map_err(|_| corrupt("approval_stage", &self.approval_stage))?;
        let validation_status = self
            .validation_status
            .parse()
            .map_err(|_| corrupt("validation_status", &self.validation_status))?;
        let group_id =
            Uuid::parse_str(&self.group_id).map_err(|_| corrupt("group_id", &self.group_id))?;
        let edit_payload = self
            .edit_payload
            .as_deref()
            .map(serde_json::from_str::<AnnotationUpdate>)
            .transpose()
            .map_err(|e| corrupt("edit_payload", &e.to_string()))?;

        Ok(Annotation {
            id: AnnotationId(self.id),
            document: DocumentRef::new(document_type, self.document_id),
            context_id: self.context_id,
            span: Span {
                text_segment: self.text_segment,
                start_offset: self.start_offset as usize,
                end_offset: self.end_offset as usize,
            },
            concept: ConceptRef {
                uri: self.concept_uri,
                label: self.concept_label,
                definition: self.concept_definition,
                concept_type: self.concept_type,
                source_name: self.source_name,
                source_version: self.source_version,
            },
            confidence: self.confidence,
            model_id: self.model_id,
            rationale: self.rationale,
            source_digest: self.source_digest,
            approval_stage,
            validation_status,
            version_number: self.version_number as u32,
            group_id,
            parent_version_id: self.parent_version_id.map(AnnotationId),
            superseded_by_version_id: self.superseded_by_version_id.map(AnnotationId),
            is_current: self.is_current,
            created_at: parse_timestamp(self.id, &self.created_at)?,
            updated_at: parse_timestamp(self.id, &self.updated_at)?,
            validated_at: self
                .validated_at
                .as_deref()
                .map(|ts| parse_timestamp(self.id, ts))
                .transpose()?,
            validated_by: self.validated_by,
            edit_payload,
        })
    }
}

fn parse_timestamp(id: i64, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AnnotationError::Persistence(format!("row {}: invalid timestamp {}: {}", id, value, e)))
}

/// Unique-constraint violations on insert mean another writer got there first.
/// CHECK and foreign-key failures are plain errors: retrying cannot fix them.
fn map_insert_error(err: rusqlite::Error, group_id: Uuid, version_number: u32) -> AnnotationError {
    match err {
        rusqlite::Error::SqliteFailure(ref e, _)
            if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            AnnotationError::ConcurrentVersionConflict {
                group_id,
                version_number,
            }
        }
        other => AnnotationError::Sqlite(other),
    }
}

/// SQLite-backed [`AnnotationStore`]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and run migrations
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AnnotationError::Persistence(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AnnotationError::Persistence("sqlite connection lock poisoned".to_string()))
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    let current: i64 = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i64>>(0)
        })
        .ok()
        .flatten()
        .unwrap_or(0);

    for (version, sql) in MIGRATIONS {
        if *version > current {
            info!("Running migration v{version}");
            conn.execute_batch(sql).map_err(|e| {
                AnnotationError::Persistence(format!("Migration {} failed: {}", version, e))
            })?;
        }
    }
    Ok(())
}

fn fetch(conn: &Connection, id: AnnotationId) -> Result<Annotation> {
    let sql = format!("SELECT {} FROM annotations WHERE id = ?1", SELECT_COLUMNS);
    conn.query_row(&sql, params![id.0], AnnotationRow::from_row)
        .optional()?
        .ok_or_else(|| AnnotationError::not_found("annotation", id))?
        .into_annotation()
}

fn fetch_many(
    conn: &Connection,
    where_clause: &str,
    args: &[&dyn ToSql],
) -> Result<Vec<Annotation>> {
    let sql = format!("SELECT {} FROM annotations {}", SELECT_COLUMNS, where_clause);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(args, AnnotationRow::from_row)?;

    let mut annotations = Vec::new();
    for row in rows {
        annotations.push(row?.into_annotation()?);
    }
    Ok(annotations)
}

fn max_version(conn: &Connection, group_id: Uuid) -> Result<Option<u32>> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(version_number) FROM annotations WHERE group_id = ?1",
        params![group_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(max.map(|v| v as u32))
}

fn insert(tx: &Transaction<'_>, draft: &AnnotationDraft) -> Result<AnnotationId> {
    let edit_payload = draft
        .edit_payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| AnnotationError::Persistence(e.to_string()))?;
    let created_at = draft.created_at.to_rfc3339();

    tx.execute(
        "INSERT INTO annotations
         (document_type, document_id, context_id, text_segment, start_offset, end_offset,
          concept_uri, concept_label, concept_definition, concept_type, source_name,
          source_version, confidence, model_id, rationale, source_digest, approval_stage,
          validation_status, version_number, group_id, parent_version_id, is_current,
          created_at, updated_at, validated_at, validated_by, edit_payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, 1, ?22, ?22, ?23, ?24, ?25)",
        params![
            draft.document.document_type.as_str(),
            draft.document.document_id,
            draft.context_id,
            draft.span.text_segment,
            draft.span.start_offset as i64,
            draft.span.end_offset as i64,
            draft.concept.uri,
            draft.concept.label,
            draft.concept.definition,
            draft.concept.concept_type,
            draft.concept.source_name,
            draft.concept.source_version,
            draft.confidence,
            draft.model_id,
            draft.rationale,
            draft.source_digest,
            draft.approval_stage.as_str(),
            draft.validation_status.as_str(),
            draft.version_number as i64,
            draft.group_id.to_string(),
            draft.parent_version_id.map(|id| id.0),
            created_at,
            draft.validated_at.map(|ts| ts.to_rfc3339()),
            draft.validated_by,
            edit_payload,
        ],
    )
    .map_err(|e| map_insert_error(e, draft.group_id, draft.version_number))?;

    Ok(AnnotationId(tx.last_insert_rowid()))
}

fn group_exists(conn: &Connection, group_id: Uuid) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM annotations WHERE group_id = ?1)",
        params![group_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Current rows per distinct value of `column`
fn grouped_counts<K>(
    conn: &Connection,
    column: &str,
    scope: &str,
    context_id: Option<&str>,
) -> Result<BTreeMap<K, usize>>
where
    K: std::str::FromStr + Ord,
{
    let sql = format!(
        "SELECT {column}, COUNT(*) FROM annotations {scope} AND is_current = 1 GROUP BY {column}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![context_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut counts = BTreeMap::new();
    for row in rows {
        let (value, count) = row?;
        let key = value.parse::<K>().map_err(|_| {
            AnnotationError::Persistence(format!("invalid {}: {}", column, value))
        })?;
        counts.insert(key, count as usize);
    }
    Ok(counts)
}

impl AnnotationStore for SqliteStore {
    fn get(&self, id: AnnotationId) -> Result<Annotation> {
        let conn = self.conn()?;
        fetch(&conn, id)
    }

    fn insert_initial(&self, draft: AnnotationDraft) -> Result<Annotation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if group_exists(&tx, draft.group_id)? {
            return Err(AnnotationError::ConcurrentVersionConflict {
                group_id: draft.group_id,
                version_number: draft.version_number,
            });
        }
        let id = insert(&tx, &draft)?;
        tx.commit()?;
        Ok(draft.into_annotation(id))
    }

    fn commit_version(&self, mut draft: AnnotationDraft) -> Result<Annotation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current_id: AnnotationId = tx
            .query_row(
                "SELECT id FROM annotations WHERE group_id = ?1 AND is_current = 1",
                params![draft.group_id.to_string()],
                |row| row.get(0).map(AnnotationId),
            )
            .optional()?
            .ok_or_else(|| AnnotationError::not_found("current version of group", draft.group_id))?;

        let expected = max_version(&tx, draft.group_id)?.unwrap_or(0) + 1;
        check_next_version(draft.group_id, draft.version_number, expected)?;

        let now = Utc::now().to_rfc3339();
        // Retire first: the partial index allows one current row per group
        tx.execute(
            "UPDATE annotations SET is_current = 0, updated_at = ?1 WHERE id = ?2",
            params![now, current_id.0],
        )?;

        draft.parent_version_id = Some(current_id);
        let new_id = insert(&tx, &draft)?;

        tx.execute(
            "UPDATE annotations SET superseded_by_version_id = ?1 WHERE id = ?2",
            params![new_id.0, current_id.0],
        )?;

        let annotation = fetch(&tx, new_id)?;
        tx.commit()?;

        debug!(
            group_id = %annotation.group_id,
            version = annotation.version_number,
            superseded = %current_id,
            "Committed version"
        );
        Ok(annotation)
    }

    fn supersede(&self, old: AnnotationId, new: AnnotationId) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let old_row = fetch(&tx, old)?;
        let new_row = fetch(&tx, new)?;

        if old_row.group_id != new_row.group_id
            || new_row.version_number != old_row.version_number + 1
        {
            return Err(AnnotationError::Persistence(format!(
                "{} cannot supersede {}: not the next version of the same group",
                new, old
            )));
        }

        tx.execute(
            "UPDATE annotations
             SET is_current = 0, superseded_by_version_id = ?1, updated_at = ?2
             WHERE id = ?3",
            params![new.0, Utc::now().to_rfc3339(), old.0],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn max_version(&self, group_id: Uuid) -> Result<Option<u32>> {
        let conn = self.conn()?;
        max_version(&conn, group_id)
    }

    fn group_history(&self, group_id: Uuid) -> Result<Vec<Annotation>> {
        let conn = self.conn()?;
        let rows = fetch_many(
            &conn,
            "WHERE group_id = ?1 ORDER BY version_number DESC",
            params![group_id.to_string()],
        )?;
        if rows.is_empty() {
            return Err(AnnotationError::not_found("annotation group", group_id));
        }
        Ok(rows)
    }

    fn current_for_document(&self, document: DocumentRef) -> Result<Vec<Annotation>> {
        let conn = self.conn()?;
        fetch_many(
            &conn,
            "WHERE document_type = ?1 AND document_id = ?2 AND is_current = 1
             ORDER BY start_offset, id",
            params![document.document_type.as_str(), document.document_id],
        )
    }

    fn replace_document(
        &self,
        document: DocumentRef,
        drafts: Vec<AnnotationDraft>,
        policy: ReplacePolicy,
    ) -> Result<DocumentReplacement> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if policy == ReplacePolicy::IfUnannotated {
            let kept = fetch_many(
                &tx,
                "WHERE document_type = ?1 AND document_id = ?2 AND is_current = 1
                 ORDER BY start_offset, id",
                params![document.document_type.as_str(), document.document_id],
            )?;
            if !kept.is_empty() {
                debug!(%document, kept = kept.len(), "Document already annotated, nothing written");
                return Ok(DocumentReplacement {
                    kept,
                    ..Default::default()
                });
            }
        }

        let retired: Vec<AnnotationId> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM annotations
                 WHERE document_type = ?1 AND document_id = ?2 AND is_current = 1
                 ORDER BY id",
            )?;
            let ids = stmt.query_map(
                params![document.document_type.as_str(), document.document_id],
                |row| row.get(0).map(AnnotationId),
            )?;
            ids.collect::<rusqlite::Result<_>>()?
        };

        tx.execute(
            "UPDATE annotations SET is_current = 0, updated_at = ?1
             WHERE document_type = ?2 AND document_id = ?3 AND is_current = 1",
            params![
                Utc::now().to_rfc3339(),
                document.document_type.as_str(),
                document.document_id
            ],
        )?;

        let mut inserted = Vec::with_capacity(drafts.len());
        for draft in drafts {
            if group_exists(&tx, draft.group_id)? {
                return Err(AnnotationError::ConcurrentVersionConflict {
                    group_id: draft.group_id,
                    version_number: draft.version_number,
                });
            }
            let id = insert(&tx, &draft)?;
            inserted.push(draft.into_annotation(id));
        }

        tx.commit()?;
        Ok(DocumentReplacement {
            retired,
            inserted,
            kept: Vec::new(),
        })
    }

    fn stamp_review(&self, id: AnnotationId, stamp: ReviewStamp) -> Result<Annotation> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row = fetch(&tx, id)?;
        check_stamp(&row, &stamp)?;

        tx.execute(
            "UPDATE annotations
             SET approval_stage = ?1, validation_status = ?2, validated_by = ?3,
                 validated_at = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                stamp.approval_stage.as_str(),
                stamp.validation_status.as_str(),
                stamp.validated_by,
                stamp.validated_at.map(|ts| ts.to_rfc3339()),
                Utc::now().to_rfc3339(),
                id.0
            ],
        )?;

        let annotation = fetch(&tx, id)?;
        tx.commit()?;
        Ok(annotation)
    }

    fn clear_document(&self, document: DocumentRef) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            "DELETE FROM annotations WHERE document_type = ?1 AND document_id = ?2",
            params![document.document_type.as_str(), document.document_id],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    fn statistics(&self, context_id: Option<&str>) -> Result<AnnotationStatistics> {
        let conn = self.conn()?;
        // `?1 IS NULL` lets one statement serve both the scoped and global case
        let scope = "WHERE (?1 IS NULL OR context_id = ?1)";

        let (total_versions, groups, documents): (i64, i64, i64) = conn.query_row(
            &format!(
                "SELECT COUNT(*), COUNT(DISTINCT group_id),
                        COUNT(DISTINCT document_type || ':' || document_id)
                 FROM annotations {}",
                scope
            ),
            params![context_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let (current, mean_confidence): (i64, Option<f64>) = conn.query_row(
            &format!(
                "SELECT COUNT(*), AVG(confidence) FROM annotations {} AND is_current = 1",
                scope
            ),
            params![context_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut stats = AnnotationStatistics {
            total_versions: total_versions as usize,
            current: current as usize,
            groups: groups as usize,
            documents: documents as usize,
            mean_confidence,
            ..Default::default()
        };
        stats.by_stage = grouped_counts(&conn, "approval_stage", scope, context_id)?;
        stats.by_status = grouped_counts(&conn, "validation_status", scope, context_id)?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;
    use tempfile::TempDir;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_fork_supersedes_current() {
        contract::fork_supersedes_current(&store());
    }

    #[test]
    fn test_taken_version_is_a_conflict() {
        contract::taken_version_is_a_conflict(&store());
    }

    #[test]
    fn test_replace_document_retires_previous_set() {
        contract::replace_document_retires_previous_set(&store());
    }

    #[test]
    fn test_replace_if_unannotated_keeps_existing_set() {
        contract::replace_if_unannotated_keeps_existing_set(&store());
    }

    #[test]
    fn test_stamp_review_rechecks_stage() {
        contract::stamp_review_rechecks_stage(&store());
    }

    #[test]
    fn test_stamp_review_in_place() {
        contract::stamp_review_in_place(&store());
    }

    #[test]
    fn test_clear_document_removes_all_versions() {
        contract::clear_document_removes_all_versions(&store());
    }

    #[test]
    fn test_statistics_by_context() {
        contract::statistics_by_context(&store());
    }

    #[test]
    fn test_supersede_requires_next_version() {
        contract::supersede_requires_next_version(&store());
    }

    #[test]
    fn test_missing_rows() {
        contract::missing_rows(&store());
    }

    #[test]
    fn test_reopen_keeps_rows_and_skips_migrations() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("db").join("annotations.sqlite");
        let doc = DocumentRef::guideline(1);

        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_initial(contract::draft(doc, "eng", 0, 9)).unwrap().id
        };

        let store = SqliteStore::open(&path).unwrap();
        let row = store.get(id).unwrap();
        assert_eq!(row.span.text_segment, "Engineers");
        assert!(row.is_current);
    }

    #[test]
    fn test_edit_payload_roundtrip() {
        let store = store();
        let doc = DocumentRef::case(2);
        let v1 = store.insert_initial(contract::draft(doc, "eng", 0, 9)).unwrap();

        let mut next = v1.to_draft();
        next.version_number = 2;
        next.edit_payload = Some(AnnotationUpdate::concept_uri("X"));
        let v2 = store.commit_version(next).unwrap();

        let reloaded = store.get(v2.id).unwrap();
        assert_eq!(reloaded.edit_payload, Some(AnnotationUpdate::concept_uri("X")));
    }

    #[test]
    fn test_check_failure_is_not_a_version_conflict() {
        let store = store();
        let mut bad = contract::draft(DocumentRef::case(4), "eng", 0, 9);
        bad.confidence = 1.5;

        let result = store.insert_initial(bad);
        assert!(matches!(result, Err(AnnotationError::Sqlite(_))));
    }

    #[test]
    fn test_duplicate_version_is_a_conflict() {
        let store = store();
        let v1 = store
            .insert_initial(contract::draft(DocumentRef::case(5), "eng", 0, 9))
            .unwrap();

        let mut conn = store.conn().unwrap();
        let tx = conn.transaction().unwrap();
        let duplicate = v1.to_draft();
        let result = insert(&tx, &duplicate);
        assert!(matches!(
            result,
            Err(AnnotationError::ConcurrentVersionConflict { version_number: 1, .. })
        ));
    }

    #[test]
    fn test_schema_rejects_second_current_row() {
        let store = store();
        let doc = DocumentRef::case(3);
        let v1 = store.insert_initial(contract::draft(doc, "eng", 0, 9)).unwrap();

        let conn = store.conn().unwrap();
        let result = conn.execute(
            "INSERT INTO annotations
             (document_type, document_id, context_id, text_segment, start_offset, end_offset,
              concept_uri, concept_label, source_name, confidence, model_id, source_digest,
              approval_stage, validation_status, version_number, group_id, is_current,
              created_at, updated_at)
             VALUES ('case', 3, 'eng', 'x', 0, 1, 'u', 'l', 's', 0.5, 'm', 'd',
                     'llm_extracted', 'pending', 2, ?1, 1, 'now', 'now')",
            params![v1.group_id.to_string()],
        );
        assert!(result.is_err());
    }
}
