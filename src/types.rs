pub use rusqlite::types::Value;

/// Column types supported for feature property columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Varchar,
    Double,
    Integer,
    Blob,
    Geometry,
}

/// Name and type of a property column on a feature layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Columns of a feature table split into the primary key and everything else.
#[derive(Clone, Debug)]
pub(crate) struct ColumnSpecs {
    pub primary_key: String,
    pub other_columns: Vec<ColumnSpec>,
}
