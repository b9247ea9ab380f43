//! Certificate store.
//!
//! Persists which provider certificate covers which hostnames under each parent
//! domain. At most one record exists per parent domain; a record and its
//! hostnames are always written and removed together inside one transaction.

use std::collections::BTreeSet;
use std::sync::MutexGuard;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use thiserror::Error;

use crate::core::types::CertificateRecord;

use super::db::Db;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Expected absence: no record for the requested key.
    #[error("certificate record not found: {0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("stored certificate record is corrupt: {0}")]
    Corrupt(String),
    #[error("SQLite connection poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Query/command contract of the certificate store.
pub trait CertificateStore: Send + Sync {
    fn find_by_parent_domain(&self, parent_domain: &str) -> Result<CertificateRecord, StoreError>;

    fn find_by_cert_id(&self, cert_id: &str) -> Result<CertificateRecord, StoreError>;

    /// Inserts a record, superseding any record already held by the same
    /// parent domain.
    fn create_record(&self, record: &CertificateRecord) -> Result<(), StoreError>;

    /// Replaces the hostname set of `cert_id` with its union with `hostnames`.
    fn append_domains(&self, cert_id: &str, hostnames: &[String]) -> Result<(), StoreError>;

    fn delete_record(&self, cert_id: &str) -> Result<(), StoreError>;

    fn list_domains_and_expiry(
        &self,
        parent_domain: &str,
    ) -> Result<(DateTime<Utc>, Vec<String>), StoreError>;

    fn list_records(&self) -> Result<Vec<CertificateRecord>, StoreError>;
}

/// SQLite-backed [`CertificateStore`].
#[derive(Clone)]
pub struct SqliteCertificateStore {
    db: Db,
}

struct RecordRow {
    parent_domain: String,
    cert_id: String,
    cert_pem: String,
    key_pem: String,
    not_after_raw: String,
}

impl SqliteCertificateStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.db.try_lock().ok_or(StoreError::Poisoned)
    }

    fn find_row(
        conn: &Connection,
        column: &str,
        value: &str,
    ) -> Result<Option<RecordRow>, StoreError> {
        let sql = format!(
            r#"
            SELECT parent_domain, cert_id, cert_pem, key_pem, not_after
            FROM certificates
            WHERE {column} = ?1
            "#
        );
        let mut stmt = conn.prepare(&sql)?;
        let row = stmt.query_row(params![value], Self::read_row).optional()?;
        Ok(row)
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
        Ok(RecordRow {
            parent_domain: row.get(0)?,
            cert_id: row.get(1)?,
            cert_pem: row.get(2)?,
            key_pem: row.get(3)?,
            not_after_raw: row.get(4)?,
        })
    }

    fn domains_for(conn: &Connection, cert_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = conn.prepare(
            r#"
            SELECT hostname FROM certificate_domains
            WHERE cert_id = ?1
            ORDER BY hostname ASC
            "#,
        )?;
        let domains = stmt
            .query_map(params![cert_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(domains)
    }

    fn into_record(conn: &Connection, row: RecordRow) -> Result<CertificateRecord, StoreError> {
        let not_after = parse_timestamp(&row.not_after_raw)?;
        let domains = Self::domains_for(conn, &row.cert_id)?;
        Ok(CertificateRecord {
            parent_domain: row.parent_domain,
            cert_id: row.cert_id,
            cert_pem: row.cert_pem,
            key_pem: row.key_pem,
            not_after,
            domains,
        })
    }

    fn find_record(
        &self,
        column: &str,
        value: &str,
    ) -> Result<CertificateRecord, StoreError> {
        let conn = self.lock_conn()?;
        let row = Self::find_row(&conn, column, value)?
            .ok_or_else(|| StoreError::NotFound(value.to_string()))?;
        Self::into_record(&conn, row)
    }

    fn insert_domains(
        tx: &Transaction<'_>,
        cert_id: &str,
        hostnames: impl IntoIterator<Item = String>,
    ) -> Result<(), StoreError> {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO certificate_domains (hostname, cert_id) VALUES (?1, ?2)",
        )?;
        for hostname in hostnames {
            stmt.execute(params![hostname, cert_id])?;
        }
        Ok(())
    }

    fn delete_with_tx(tx: &Transaction<'_>, cert_id: &str) -> Result<usize, StoreError> {
        tx.execute(
            "DELETE FROM certificate_domains WHERE cert_id = ?1",
            params![cert_id],
        )?;
        let removed = tx.execute("DELETE FROM certificates WHERE cert_id = ?1", params![cert_id])?;
        Ok(removed)
    }
}

impl CertificateStore for SqliteCertificateStore {
    fn find_by_parent_domain(&self, parent_domain: &str) -> Result<CertificateRecord, StoreError> {
        self.find_record("parent_domain", parent_domain)
    }

    fn find_by_cert_id(&self, cert_id: &str) -> Result<CertificateRecord, StoreError> {
        self.find_record("cert_id", cert_id)
    }

    fn create_record(&self, record: &CertificateRecord) -> Result<(), StoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        if let Some(previous) = Self::find_row(&tx, "parent_domain", &record.parent_domain)? {
            log::info!(
                "[store] record {} for {} superseded by {}",
                previous.cert_id,
                record.parent_domain,
                record.cert_id
            );
            Self::delete_with_tx(&tx, &previous.cert_id)?;
        }

        let now = Utc::now().to_rfc3339();
        tx.execute(
            r#"
            INSERT INTO certificates (
                cert_id, parent_domain, cert_pem, key_pem, not_after, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
            params![
                record.cert_id,
                record.parent_domain,
                record.cert_pem,
                record.key_pem,
                record.not_after.to_rfc3339(),
                now,
            ],
        )?;
        let unique: BTreeSet<String> = record.domains.iter().cloned().collect();
        Self::insert_domains(&tx, &record.cert_id, unique)?;

        tx.commit()?;
        Ok(())
    }

    fn append_domains(&self, cert_id: &str, hostnames: &[String]) -> Result<(), StoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;

        if Self::find_row(&tx, "cert_id", cert_id)?.is_none() {
            return Err(StoreError::NotFound(cert_id.to_string()));
        }

        let mut merged: BTreeSet<String> = Self::domains_for(&tx, cert_id)?.into_iter().collect();
        merged.extend(hostnames.iter().cloned());

        tx.execute(
            "DELETE FROM certificate_domains WHERE cert_id = ?1",
            params![cert_id],
        )?;
        Self::insert_domains(&tx, cert_id, merged)?;
        tx.execute(
            "UPDATE certificates SET updated_at = ?2 WHERE cert_id = ?1",
            params![cert_id, Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_record(&self, cert_id: &str) -> Result<(), StoreError> {
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let removed = Self::delete_with_tx(&tx, cert_id)?;
        if removed == 0 {
            return Err(StoreError::NotFound(cert_id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    fn list_domains_and_expiry(
        &self,
        parent_domain: &str,
    ) -> Result<(DateTime<Utc>, Vec<String>), StoreError> {
        let record = self.find_by_parent_domain(parent_domain)?;
        Ok((record.not_after, record.domains))
    }

    fn list_records(&self) -> Result<Vec<CertificateRecord>, StoreError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT parent_domain, cert_id, cert_pem, key_pem, not_after
            FROM certificates
            ORDER BY not_after ASC
            "#,
        )?;
        let rows = stmt
            .query_map([], Self::read_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|row| Self::into_record(&conn, row))
            .collect()
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("invalid not_after {raw:?}: {err}")))
}
