use crate::envelope::Envelope;
use crate::error::Result;
use crate::gpkg::geometry::gpkg_geometry_envelope;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};

/// Register the envelope functions used by the RTree triggers on a connection.
///
/// `ST_MinX`, `ST_MaxX`, `ST_MinY` and `ST_MaxY` return `NULL` for `NULL` or
/// empty geometries; `ST_IsEmpty` returns 1 for them. Registration is per
/// connection, so every connection that writes to an RTree-indexed table
/// needs it.
///
/// Example:
/// ```no_run
/// use rusqlite::Connection;
/// use rusqlite_gpkg_index::register_spatial_functions;
///
/// let conn = Connection::open_in_memory()?;
/// register_spatial_functions(&conn)?;
/// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
/// ```
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    register_bounds_component(conn, "ST_MinX", |e| e.min_x)?;
    register_bounds_component(conn, "ST_MaxX", |e| e.max_x)?;
    register_bounds_component(conn, "ST_MinY", |e| e.min_y)?;
    register_bounds_component(conn, "ST_MaxY", |e| e.max_y)?;
    register_st_isempty(conn)?;
    Ok(())
}

fn register_st_isempty(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsEmpty",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let is_empty = envelope_from_ctx(ctx)?.is_none();
            Ok(i64::from(is_empty))
        },
    )?;
    Ok(())
}

fn register_bounds_component<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(&Envelope) -> f64 + Copy + Send + Sync + 'static,
{
    conn.create_scalar_function(
        name,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let value = envelope_from_ctx(ctx)?
                .map(|envelope| f(&envelope))
                .filter(|value| value.is_finite());
            Ok(value)
        },
    )?;
    Ok(())
}

fn envelope_from_ctx(ctx: &Context<'_>) -> std::result::Result<Option<Envelope>, Error> {
    match ctx.get_raw(0) {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => {
            gpkg_geometry_envelope(blob).map_err(|err| Error::UserFunctionError(Box::new(err)))
        }
        _ => Err(Error::InvalidFunctionParameterType(0, Type::Blob)),
    }
}
