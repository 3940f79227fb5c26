//! Error types for string table operations.

use std::fmt;

use codec::Tick;

use crate::types::{ContainerId, StringIndex, TableId};

/// Result type for string table operations.
pub type StringTableResult<T> = Result<T, StringTableError>;

/// Errors that can occur while editing, replicating or mirroring string tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringTableError {
    /// Bitstream error while writing or parsing an update.
    Bitstream(bitstream::BitError),

    /// The table holds `capacity` entries already.
    TableFull { table: String, capacity: u32 },

    /// Inserts are not accepted while the table is locked.
    Locked { table: String },

    /// The table does not accept client-originated inserts.
    ClientInsertRejected { table: String },

    /// Index does not name an entry of the table.
    InvalidIndex { table: String, index: StringIndex },

    /// A history record older than the latest one was written.
    TickRegression {
        table: String,
        latest: Tick,
        requested: Tick,
    },

    /// Strings must be non-empty and free of NUL bytes.
    InvalidString,

    /// Payload does not fit the table's payload layout.
    PayloadSize {
        table: String,
        max_bytes: usize,
        actual_bytes: usize,
    },

    /// Table capacity must be a power of two between 1 and 65536.
    InvalidCapacity { capacity: u32 },

    /// History can only be enabled while the table is empty.
    HistoryAfterInsert { table: String },

    /// The container does not accept new tables right now.
    CreationNotAllowed { name: String },

    /// A table with this name already exists (names compare case-insensitively).
    DuplicateTable { name: String },

    /// The container holds the maximum number of tables.
    TooManyTables { max: usize },

    /// Rollback can only be enabled before any table is created.
    RollbackAfterCreate,

    /// Table id is not part of the container.
    UnknownTable { table: TableId },

    /// Container id is not part of the registry.
    UnknownContainer { container: ContainerId },

    /// The mirror target must be empty when the link is made.
    MirrorNotEmpty { table: String },

    /// A table cannot mirror itself, and each table has a limited number of mirrors.
    InvalidMirror { reason: &'static str },

    /// An update stream is structurally invalid for the receiving table.
    CorruptUpdate { table: String, reason: &'static str },
}

impl fmt::Display for StringTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bitstream(err) => write!(f, "bitstream error: {err}"),
            Self::TableFull { table, capacity } => {
                write!(f, "table {table} is full ({capacity} entries)")
            }
            Self::Locked { table } => write!(f, "table {table} is locked"),
            Self::ClientInsertRejected { table } => {
                write!(f, "table {table} rejects client inserts")
            }
            Self::InvalidIndex { table, index } => {
                write!(f, "table {table} has no entry {index}")
            }
            Self::TickRegression {
                table,
                latest,
                requested,
            } => write!(
                f,
                "table {table}: write at tick {requested} precedes history tick {latest}"
            ),
            Self::InvalidString => write!(f, "string is empty or contains NUL"),
            Self::PayloadSize {
                table,
                max_bytes,
                actual_bytes,
            } => write!(
                f,
                "table {table}: payload of {actual_bytes} bytes exceeds {max_bytes}"
            ),
            Self::InvalidCapacity { capacity } => {
                write!(f, "capacity {capacity} is not a power of two in 1..=65536")
            }
            Self::HistoryAfterInsert { table } => {
                write!(f, "table {table}: history must be enabled before inserts")
            }
            Self::CreationNotAllowed { name } => {
                write!(f, "table {name} cannot be created now")
            }
            Self::DuplicateTable { name } => write!(f, "table {name} already exists"),
            Self::TooManyTables { max } => write!(f, "container is limited to {max} tables"),
            Self::RollbackAfterCreate => {
                write!(f, "rollback must be enabled before tables are created")
            }
            Self::UnknownTable { table } => write!(f, "unknown table {table}"),
            Self::UnknownContainer { container } => write!(f, "unknown container {container}"),
            Self::MirrorNotEmpty { table } => write!(f, "mirror table {table} is not empty"),
            Self::InvalidMirror { reason } => write!(f, "invalid mirror link: {reason}"),
            Self::CorruptUpdate { table, reason } => {
                write!(f, "corrupt update for table {table}: {reason}")
            }
        }
    }
}

impl std::error::Error for StringTableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bitstream(err) => Some(err),
            _ => None,
        }
    }
}

impl From<bitstream::BitError> for StringTableError {
    fn from(err: bitstream::BitError) -> Self {
        Self::Bitstream(err)
    }
}
