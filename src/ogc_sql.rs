// cf. https://www.geopackage.org/spec140/index.html#table_definition_sql

/// Quote an SQLite identifier, doubling embedded quotes.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// "GPKG" in ASCII, and GeoPackage 1.4.0.
const SQL_GPKG_PRAGMAS: &str = "
PRAGMA application_id = 1196444487;
PRAGMA user_version = 10400;
";

// gpkg_spatial_ref_sys: the SRS catalog referenced by gpkg_contents and
// gpkg_geometry_columns to describe spatial reference systems.
const SQL_GPKG_SPATIAL_REF_SYS: &str = "
CREATE TABLE gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition  TEXT NOT NULL,
  description TEXT
);
";

// gpkg_contents: lists all geospatial contents in the package with identifying
// and descriptive metadata for user display and access.
const SQL_GPKG_CONTENTS: &str = "
CREATE TABLE gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
";

// gpkg_geometry_columns: identifies geometry columns and geometry types for
// vector feature user data tables.
const SQL_GPKG_GEOMETRY_COLUMNS: &str = "
CREATE TABLE gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT uk_gc_table_name UNIQUE (table_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

// gpkg_extensions: declares which extensions apply to the GeoPackage, a table,
// or a column so clients can detect requirements without scanning user tables.
//
// Older files may lack it, so it is also created lazily before registering an
// extension.
pub(crate) const SQL_GPKG_EXTENSIONS: &str = "
CREATE TABLE IF NOT EXISTS gpkg_extensions (
  table_name TEXT,
  column_name TEXT,
  extension_name TEXT NOT NULL,
  definition TEXT NOT NULL,
  scope TEXT NOT NULL,
  CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
);
";

pub(crate) fn initialize_gpkg(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SQL_GPKG_PRAGMAS)?;
    conn.execute_batch(SQL_GPKG_SPATIAL_REF_SYS)?;
    register_default_srs_ids(conn)?;
    conn.execute_batch(SQL_GPKG_CONTENTS)?;
    conn.execute_batch(SQL_GPKG_GEOMETRY_COLUMNS)?;
    conn.execute_batch(SQL_GPKG_EXTENSIONS)?;
    Ok(())
}

pub(crate) const SQL_INSERT_GPKG_SPATIAL_REF_SYS: &str = "
INSERT INTO gpkg_spatial_ref_sys
  (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

// gpkg_spatial_ref_sys requires the WKT of the SRS, and there is no catalog
// bundled here. The geographic and web mercator systems cover the common
// cases; anything else goes through `Gpkg::register_srs`.
fn register_default_srs_ids(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    const EPSG4326_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;
    const EPSG3857_WKT: &str = r#"PROJCS["WGS 84 / Pseudo-Mercator",GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AUTHORITY["EPSG","4326"]],PROJECTION["Mercator_1SP"],PARAMETER["central_meridian",0],PARAMETER["scale_factor",1],PARAMETER["false_easting",0],PARAMETER["false_northing",0],UNIT["metre",1,AUTHORITY["EPSG","9001"]],AXIS["Easting",EAST],AXIS["Northing",NORTH],AUTHORITY["EPSG","3857"]]"#;

    let mut stmt = conn.prepare(SQL_INSERT_GPKG_SPATIAL_REF_SYS)?;
    stmt.execute(rusqlite::params![
        "WGS 84",
        4326,
        "EPSG",
        4326,
        EPSG4326_WKT,
        "longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid"
    ])?;
    stmt.execute(rusqlite::params![
        "WGS 84 / Pseudo-Mercator",
        3857,
        "EPSG",
        3857,
        EPSG3857_WKT,
        "Web Mercator / Pseudo-Mercator"
    ])?;
    stmt.execute(rusqlite::params![
        "Undefined Cartesian SRS",
        -1,
        "NONE",
        -1,
        "undefined",
        "undefined Cartesian coordinate reference system"
    ])?;
    stmt.execute(rusqlite::params![
        "Undefined geographic SRS",
        0,
        "NONE",
        0,
        "undefined",
        "undefined geographic coordinate reference system"
    ])?;
    Ok(())
}

pub(crate) const SQL_LIST_LAYERS: &str =
    "SELECT table_name FROM gpkg_contents WHERE data_type = 'features' ORDER BY table_name";

pub(crate) const SQL_INSERT_GPKG_CONTENTS: &str = "
INSERT INTO gpkg_contents
  (table_name, data_type, identifier, description, srs_id)
VALUES
  (?1, 'features', ?2, '', ?3)
";

pub(crate) const SQL_INSERT_GPKG_GEOMETRY_COLUMNS: &str = "
INSERT INTO gpkg_geometry_columns
  (table_name, column_name, geometry_type_name, srs_id, z, m)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

pub(crate) const SQL_DELETE_GPKG_GEOMETRY_COLUMNS: &str =
    "DELETE FROM gpkg_geometry_columns WHERE table_name = ?1";

pub(crate) const SQL_DELETE_GPKG_CONTENTS: &str = "DELETE FROM gpkg_contents WHERE table_name = ?1";

pub(crate) const SQL_SELECT_GEOMETRY_COLUMN_META: &str = "
SELECT column_name, geometry_type_name, z, m, srs_id
FROM gpkg_geometry_columns
WHERE table_name = ?1
";

pub(crate) const SQL_SRS_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM gpkg_spatial_ref_sys WHERE srs_id = ?1)";

pub(crate) const SQL_SELECT_SRS_ORGANIZATION: &str = "
SELECT organization, organization_coordsys_id
FROM gpkg_spatial_ref_sys
WHERE srs_id = ?1
";

pub(crate) const SQL_TABLE_COLUMNS: &str = "SELECT name, type, pk FROM pragma_table_info(?1)";

pub(crate) const SQL_TABLE_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)";

pub(crate) fn sql_create_table(layer_name: &str, column_defs: &str) -> String {
    format!("CREATE TABLE {} ({})", quote_identifier(layer_name), column_defs)
}

pub(crate) fn sql_drop_table(layer_name: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_identifier(layer_name))
}

/// Column list used by every feature SELECT: geometry, primary key, then the
/// properties in layer order.
pub(crate) fn sql_feature_columns<'a, I>(
    geometry_column: &'a str,
    primary_key_column: &'a str,
    other_columns: I,
) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    std::iter::once(geometry_column)
        .chain(std::iter::once(primary_key_column))
        .chain(other_columns)
        .map(quote_identifier)
        .collect::<Vec<String>>()
        .join(", ")
}

pub(crate) fn sql_count(layer_name: &str) -> String {
    format!("SELECT COUNT(*) FROM {}", quote_identifier(layer_name))
}

pub(crate) fn sql_delete_all(layer_name: &str) -> String {
    format!("DELETE FROM {}", quote_identifier(layer_name))
}

pub(crate) fn sql_delete_by_id(layer_name: &str, primary_key_column: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote_identifier(layer_name),
        quote_identifier(primary_key_column)
    )
}

pub(crate) fn sql_clear_geometry(
    layer_name: &str,
    geometry_column: &str,
    primary_key_column: &str,
) -> String {
    format!(
        "UPDATE {} SET {} = NULL WHERE {} = ?1",
        quote_identifier(layer_name),
        quote_identifier(geometry_column),
        quote_identifier(primary_key_column)
    )
}

pub(crate) fn sql_insert_feature(layer_name: &str, columns: &str, values: &str) -> String {
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote_identifier(layer_name));
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_identifier(layer_name),
        columns,
        values
    )
}

// cf. https://www.geopackage.org/spec140/index.html#extension_rtree

pub(crate) fn rtree_table_name(table: &str, geom_column: &str) -> String {
    format!("rtree_{table}_{geom_column}")
}

pub(crate) const RTREE_TRIGGER_SUFFIXES: [&str; 7] = [
    "insert", "update2", "update4", "update5", "update6", "update7", "delete",
];

// Triggers from GeoPackage 1.2 and 1.3 writers that 1.4 replaced.
const RTREE_LEGACY_TRIGGER_SUFFIXES: [&str; 2] = ["update1", "update3"];

const RTREE_SHADOW_SUFFIXES: [&str; 3] = ["node", "parent", "rowid"];

pub(crate) fn gpkg_rtree_create_sql(table: &str, geom_column: &str) -> String {
    format!(
        "CREATE VIRTUAL TABLE {} USING rtree(id, minx, maxx, miny, maxy);",
        quote_identifier(&rtree_table_name(table, geom_column)),
    )
}

pub(crate) fn gpkg_rtree_drop_sql(table: &str, geom_column: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {};",
        quote_identifier(&rtree_table_name(table, geom_column)),
    )
}

pub(crate) fn gpkg_rtree_shadow_drop_sql(table: &str, geom_column: &str) -> String {
    let rtree = rtree_table_name(table, geom_column);
    RTREE_SHADOW_SUFFIXES
        .iter()
        .map(|suffix| {
            format!(
                "DROP TABLE IF EXISTS {};",
                quote_identifier(&format!("{rtree}_{suffix}"))
            )
        })
        .collect::<Vec<String>>()
        .join("\n")
}

pub(crate) const SQL_DELETE_SCHEMA_TABLE: &str =
    "DELETE FROM sqlite_master WHERE type = 'table' AND name = ?1";

pub(crate) fn gpkg_rtree_load_sql(table: &str, geom_column: &str, id_column: &str) -> String {
    format!(
        "INSERT OR REPLACE INTO {r}
  SELECT {i}, ST_MinX({c}), ST_MaxX({c}), ST_MinY({c}), ST_MaxY({c})
  FROM {t} WHERE {c} NOT NULL AND NOT ST_IsEmpty({c});",
        r = quote_identifier(&rtree_table_name(table, geom_column)),
        t = quote_identifier(table),
        c = quote_identifier(geom_column),
        i = quote_identifier(id_column)
    )
}

pub(crate) fn gpkg_rtree_triggers_sql(table: &str, geom_column: &str, id_column: &str) -> String {
    let rtree = rtree_table_name(table, geom_column);
    let trigger = |suffix: &str| quote_identifier(&format!("{rtree}_{suffix}"));
    format!(
        "CREATE TRIGGER {insert} AFTER INSERT ON {t}
  WHEN (new.{c} NOT NULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {update2} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END;

CREATE TRIGGER {update4} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id IN (OLD.{i}, NEW.{i});
END;

CREATE TRIGGER {update5} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {update6} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} NOTNULL AND NOT ST_IsEmpty(OLD.{c}))
BEGIN
  UPDATE {r} SET
    minx = ST_MinX(NEW.{c}),
    maxx = ST_MaxX(NEW.{c}),
    miny = ST_MinY(NEW.{c}),
    maxy = ST_MaxY(NEW.{c})
  WHERE id = NEW.{i};
END;

CREATE TRIGGER {update7} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} ISNULL OR ST_IsEmpty(OLD.{c}))
BEGIN
  INSERT INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END;

CREATE TRIGGER {delete} AFTER DELETE ON {t}
  WHEN old.{c} NOT NULL
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END;",
        insert = trigger("insert"),
        update2 = trigger("update2"),
        update4 = trigger("update4"),
        update5 = trigger("update5"),
        update6 = trigger("update6"),
        update7 = trigger("update7"),
        delete = trigger("delete"),
        r = quote_identifier(&rtree),
        t = quote_identifier(table),
        c = quote_identifier(geom_column),
        i = quote_identifier(id_column)
    )
}

pub(crate) fn gpkg_rtree_drop_triggers_sql(table: &str, geom_column: &str) -> String {
    let rtree = rtree_table_name(table, geom_column);
    RTREE_TRIGGER_SUFFIXES
        .iter()
        .chain(RTREE_LEGACY_TRIGGER_SUFFIXES.iter())
        .map(|suffix| {
            format!(
                "DROP TRIGGER IF EXISTS {};",
                quote_identifier(&format!("{rtree}_{suffix}"))
            )
        })
        .collect::<Vec<String>>()
        .join("\n")
}

pub(crate) fn execute_rtree_sqls(
    conn: &rusqlite::Connection,
    table: &str,
    geom_column: &str,
    id_column: &str,
) -> rusqlite::Result<usize> {
    conn.execute_batch(&gpkg_rtree_create_sql(table, geom_column))?;
    let loaded = conn.execute(&gpkg_rtree_load_sql(table, geom_column, id_column), [])?;
    conn.execute_batch(&gpkg_rtree_triggers_sql(table, geom_column, id_column))?;
    Ok(loaded)
}

// cf. http://ngageoint.github.io/GeoPackage/docs/extensions/geometry-index.html

pub(crate) const NGA_TABLE_INDEX: &str = "nga_table_index";
pub(crate) const NGA_GEOMETRY_INDEX: &str = "nga_geometry_index";

pub(crate) const SQL_NGA_TABLE_INDEX: &str = "
CREATE TABLE IF NOT EXISTS nga_table_index (
  table_name TEXT NOT NULL PRIMARY KEY,
  last_indexed DATETIME
);
";

pub(crate) const SQL_NGA_GEOMETRY_INDEX: &str = "
CREATE TABLE IF NOT EXISTS nga_geometry_index (
  table_name TEXT NOT NULL,
  geom_id INTEGER NOT NULL,
  min_x DOUBLE NOT NULL,
  max_x DOUBLE NOT NULL,
  min_y DOUBLE NOT NULL,
  max_y DOUBLE NOT NULL,
  min_z DOUBLE,
  max_z DOUBLE,
  min_m DOUBLE,
  max_m DOUBLE,
  CONSTRAINT pk_ngi PRIMARY KEY (table_name, geom_id),
  CONSTRAINT fk_ngi_nti_tn FOREIGN KEY (table_name) REFERENCES nga_table_index(table_name)
);
";

// A pass that has started but not finished leaves last_indexed NULL.
pub(crate) const SQL_NGA_BEGIN_TABLE_INDEX: &str = "
INSERT INTO nga_table_index (table_name, last_indexed)
VALUES (?1, NULL)
ON CONFLICT(table_name) DO UPDATE SET last_indexed = NULL
";

// The stored timestamp only moves forward; when the clock has not passed it,
// it advances by two milliseconds instead. ?2 is the value to stay ahead of
// when the stored one was reset to NULL by SQL_NGA_BEGIN_TABLE_INDEX.
pub(crate) const SQL_NGA_TOUCH_TABLE_INDEX: &str = "
INSERT INTO nga_table_index (table_name, last_indexed)
VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
ON CONFLICT(table_name) DO UPDATE SET last_indexed = CASE
  WHEN coalesce(last_indexed, ?2) IS NULL
    OR excluded.last_indexed > coalesce(last_indexed, ?2) THEN excluded.last_indexed
  ELSE strftime('%Y-%m-%dT%H:%M:%fZ', julianday(coalesce(last_indexed, ?2)) + 2.0 / 86400000.0)
END
";

pub(crate) const SQL_NGA_LAST_INDEXED: &str =
    "SELECT last_indexed FROM nga_table_index WHERE table_name = ?1";

pub(crate) const SQL_NGA_DELETE_TABLE_INDEX: &str =
    "DELETE FROM nga_table_index WHERE table_name = ?1";

pub(crate) const SQL_NGA_INSERT_ENTRY: &str = "
INSERT OR REPLACE INTO nga_geometry_index
  (table_name, geom_id, min_x, max_x, min_y, max_y, min_z, max_z, min_m, max_m)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
";

pub(crate) const SQL_NGA_DELETE_ENTRY: &str =
    "DELETE FROM nga_geometry_index WHERE table_name = ?1 AND geom_id = ?2";

pub(crate) const SQL_NGA_DELETE_ENTRIES: &str =
    "DELETE FROM nga_geometry_index WHERE table_name = ?1";

pub(crate) const SQL_NGA_COUNT_ENTRIES: &str =
    "SELECT COUNT(*) FROM nga_geometry_index WHERE table_name = ?1";
