use std::fmt;

#[derive(Debug)]
pub enum ConflateError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad distance, unsafe table name, etc.).
    ConfigValidation(String),
    /// Source SRID has no reprojection into WGS84.
    UnsupportedCrs(u32),
    /// Spatial store failure (connection, query, schema mismatch).
    Store(String),
    /// Source table lacks a configured column.
    MissingColumn { table: String, column: String },
    /// Map feature geometry cannot be decoded.
    Geometry { kind: String, id: i64, message: String },
    /// Report file cannot be written.
    Export { path: String, message: String },
    /// IO error (file read, etc.).
    Io(String),
}

impl fmt::Display for ConflateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::UnsupportedCrs(srid) => {
                write!(f, "unsupported source SRID {srid} (expected 4326, 3857 or 2154)")
            }
            Self::Store(msg) => write!(f, "store error: {msg}"),
            Self::MissingColumn { table, column } => {
                write!(f, "table '{table}': missing column '{column}'")
            }
            Self::Geometry { kind, id, message } => {
                write!(f, "map feature {kind}{id}: bad geometry: {message}")
            }
            Self::Export { path, message } => write!(f, "cannot write {path}: {message}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for ConflateError {}

impl From<rusqlite::Error> for ConflateError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<std::io::Error> for ConflateError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
