use anyhow::{Context, Result};
use rusqlite::Connection;

/// Runs all schema creation and migrations for the certificate database.
pub fn run_all(conn: &Connection) -> Result<()> {
    create_tables(conn)?;
    migrate_tables(conn)?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS certificates (
            cert_id TEXT PRIMARY KEY,
            parent_domain TEXT NOT NULL UNIQUE,
            cert_pem TEXT NOT NULL,
            key_pem TEXT NOT NULL,
            not_after TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS certificate_domains (
            hostname TEXT PRIMARY KEY,
            cert_id TEXT NOT NULL REFERENCES certificates(cert_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_certificate_domains_cert_id
            ON certificate_domains (cert_id);
        "#,
    )?;
    Ok(())
}

fn migrate_tables(conn: &Connection) -> Result<()> {
    ensure_columns(conn, "certificates", &[(
        "updated_at",
        "ALTER TABLE certificates ADD COLUMN updated_at TEXT NOT NULL DEFAULT ''",
    )])?;
    backfill_updated_at(conn)?;
    Ok(())
}

fn ensure_columns(conn: &Connection, table: &str, alters: &[(&str, &str)]) -> Result<()> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to introspect table {table}"))?;
    let mut rows = stmt.query([])?;
    let mut existing = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        existing.push(name);
    }

    for (column, alter_sql) in alters {
        if !existing.iter().any(|c| c == column) {
            conn.execute(alter_sql, [])
                .with_context(|| format!("failed to apply migration for {table}.{column}"))?;
        }
    }

    Ok(())
}

fn backfill_updated_at(conn: &Connection) -> Result<()> {
    conn.execute(
        "UPDATE certificates SET updated_at = created_at WHERE updated_at IS NULL OR updated_at = ''",
        [],
    )?;
    Ok(())
}
