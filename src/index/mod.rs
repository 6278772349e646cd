//! Spatial indexes over the geometry column of a feature layer.
//!
//! Three backends answer the same bounding-box queries:
//!
//! - [`RTreeIndex`]: the GeoPackage RTree extension, an SQLite `rtree`
//!   virtual table kept in sync with the layer by triggers.
//! - [`GeometryIndex`]: the `nga_geometry_index` table, refreshed by explicit
//!   (re)index calls and therefore possibly stale.
//! - [`ManualFeatureQuery`]: a chunked scan of the layer, always available.
//!
//! [`FeatureIndexManager`] picks the first backend present in that order.
//! Overlap tests are non-strict and query bounds are widened by a tolerance,
//! so features touching the query box are returned by every backend.

use crate::error::{GpkgError, Result};
use rusqlite::Connection;

mod geometry_index;
mod manager;
mod manual;
mod results;
mod rtree;

pub use geometry_index::{GeometryIndex, GeometryIndexEntry};
pub use manager::FeatureIndexManager;
pub use manual::ManualFeatureQuery;
pub use results::{CachedFeatureIndexResults, FeatureIndexResults};
pub use rtree::{RTreeEntry, RTreeIndex};

/// Amount query bounds are widened by, on each side.
pub const DEFAULT_TOLERANCE: f64 = 1e-14;

/// Rows fetched per chunk by scans and index passes.
pub const DEFAULT_CHUNK_LIMIT: u32 = 1000;

/// Index backends, in query priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FeatureIndexType {
    RTree,
    GeometryIndex,
    Manual,
}

/// Whether an index backend is present for a table.
///
/// A backend needs both its `gpkg_extensions` row and its backing structure.
/// Having only one of them is reported as [`IndexState::Inconsistent`] and
/// left for the caller to rebuild.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexState {
    NotIndexed,
    Indexed,
    Inconsistent {
        has_extension: bool,
        has_structure: bool,
    },
}

impl IndexState {
    pub(crate) fn from_parts(has_extension: bool, has_structure: bool) -> Self {
        match (has_extension, has_structure) {
            (true, true) => IndexState::Indexed,
            (false, false) => IndexState::NotIndexed,
            (has_extension, has_structure) => IndexState::Inconsistent {
                has_extension,
                has_structure,
            },
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, IndexState::Indexed)
    }

    /// `Ok` only when indexed; otherwise the error a query should fail with.
    pub(crate) fn require_indexed(
        self,
        extension_name: &'static str,
        table_name: &str,
        column_name: &str,
    ) -> Result<()> {
        match self {
            IndexState::Indexed => Ok(()),
            IndexState::NotIndexed => Err(GpkgError::ExtensionNotFound {
                extension_name,
                table_name: table_name.to_string(),
                column_name: column_name.to_string(),
            }),
            IndexState::Inconsistent {
                has_extension,
                has_structure,
            } => Err(GpkgError::InconsistentIndex {
                extension_name,
                table_name: table_name.to_string(),
                has_extension,
                has_structure,
            }),
        }
    }
}

/// Run `f` inside `SAVEPOINT name`, rolling back to it when `f` fails.
///
/// Savepoints nest, so this also works inside a caller's transaction.
pub(crate) fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    match f() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name}"))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) =
                conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
            {
                log::warn!("failed to roll back savepoint {name}: {rollback_err}");
            }
            Err(err)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::{IndexState, with_savepoint};
    use crate::Result;
    use crate::error::GpkgError;
    use rusqlite::Connection;

    #[test]
    fn index_state_from_parts() {
        assert_eq!(IndexState::from_parts(true, true), IndexState::Indexed);
        assert_eq!(IndexState::from_parts(false, false), IndexState::NotIndexed);
        assert_eq!(
            IndexState::from_parts(true, false),
            IndexState::Inconsistent {
                has_extension: true,
                has_structure: false
            }
        );
        assert!(!IndexState::from_parts(false, true).is_indexed());
    }

    #[test]
    fn require_indexed_reports_missing_and_partial_indexes() {
        assert!(
            IndexState::Indexed
                .require_indexed("ext", "points", "geom")
                .is_ok()
        );
        assert!(matches!(
            IndexState::NotIndexed.require_indexed("ext", "points", "geom"),
            Err(GpkgError::ExtensionNotFound { .. })
        ));
        assert!(matches!(
            IndexState::from_parts(false, true).require_indexed("ext", "points", "geom"),
            Err(GpkgError::InconsistentIndex {
                has_extension: false,
                has_structure: true,
                ..
            })
        ));
    }

    #[test]
    fn savepoint_rolls_back_on_error() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("CREATE TABLE t (x INTEGER)")?;

        with_savepoint(&conn, "ok", || {
            conn.execute("INSERT INTO t VALUES (1)", [])?;
            Ok(())
        })?;
        let failed: Result<()> = with_savepoint(&conn, "fails", || {
            conn.execute("INSERT INTO t VALUES (2)", [])?;
            Err(GpkgError::ReadOnly)
        });
        assert!(failed.is_err());

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?;
        assert_eq!(count, 1);
        assert!(conn.is_autocommit());
        Ok(())
    }
}
