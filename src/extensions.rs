//! Bookkeeping rows in `gpkg_extensions`.
//!
//! cf. https://www.geopackage.org/spec140/index.html#extension_mechanism

use crate::error::Result;
use crate::ogc_sql::{SQL_GPKG_EXTENSIONS, SQL_TABLE_EXISTS};
use rusqlite::Connection;

/// Value of the `scope` column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtensionScope {
    ReadWrite,
    WriteOnly,
}

impl ExtensionScope {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ExtensionScope::ReadWrite => "read-write",
            ExtensionScope::WriteOnly => "write-only",
        }
    }
}

/// One `gpkg_extensions` row this crate writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ExtensionDef {
    pub name: &'static str,
    pub definition: &'static str,
    pub scope: ExtensionScope,
}

pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    Ok(conn.query_row(SQL_TABLE_EXISTS, [table_name], |row| row.get(0))?)
}

pub(crate) fn ensure_extensions_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(SQL_GPKG_EXTENSIONS)?;
    Ok(())
}

/// Whether `extension` is recorded for the table, and for the column when one
/// is given.
pub(crate) fn has_extension(
    conn: &Connection,
    extension: &ExtensionDef,
    table_name: &str,
    column_name: Option<&str>,
) -> Result<bool> {
    if !table_exists(conn, "gpkg_extensions")? {
        return Ok(false);
    }
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM gpkg_extensions \
         WHERE extension_name = ?1 AND table_name = ?2 \
         AND (?3 IS NULL OR column_name = ?3))",
        rusqlite::params![extension.name, table_name, column_name],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Record `extension` for a table or column. Existing rows are left alone,
/// including ones with a `NULL` column.
pub(crate) fn register_extension(
    conn: &Connection,
    extension: &ExtensionDef,
    table_name: &str,
    column_name: Option<&str>,
) -> Result<()> {
    ensure_extensions_table(conn)?;
    conn.execute(
        "INSERT INTO gpkg_extensions \
         (table_name, column_name, extension_name, definition, scope) \
         SELECT ?1, ?2, ?3, ?4, ?5 \
         WHERE NOT EXISTS (SELECT 1 FROM gpkg_extensions \
           WHERE table_name IS ?1 AND column_name IS ?2 AND extension_name = ?3)",
        rusqlite::params![
            table_name,
            column_name,
            extension.name,
            extension.definition,
            extension.scope.as_str()
        ],
    )?;
    Ok(())
}

/// Delete the extension rows for a table (and column, when given). Returns the
/// number of rows removed.
pub(crate) fn delete_extension(
    conn: &Connection,
    extension: &ExtensionDef,
    table_name: &str,
    column_name: Option<&str>,
) -> Result<usize> {
    if !table_exists(conn, "gpkg_extensions")? {
        return Ok(0);
    }
    let deleted = conn.execute(
        "DELETE FROM gpkg_extensions \
         WHERE extension_name = ?1 AND table_name = ?2 \
         AND (?3 IS NULL OR column_name = ?3)",
        rusqlite::params![extension.name, table_name, column_name],
    )?;
    Ok(deleted)
}
