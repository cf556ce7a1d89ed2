/*!
 * Defines the [MetaError] and [Result] types.
*/

use thiserror::Error;

/// Errors reported by the metadata engine.
#[derive(Error, Debug)]
pub enum MetaError {
    /// The action-log arena could not reserve the requested bytes.
    #[error("out of memory while reserving {0} bytes")]
    OutOfMemory(usize),

    /// A table with the same uid is already registered in the repo.
    #[error("table {name} already exists, tid {tid} uid {uid}")]
    TableAlreadyExists {
        /// Name of the already registered table.
        name: String,
        /// Its dense table index.
        tid: i32,
        /// Its unique table id.
        uid: u64,
    },

    /// No live table matches the given id.
    #[error("invalid table id, tid {tid} uid {uid}")]
    InvalidTableId {
        /// Dense table index carried by the request.
        tid: i32,
        /// Unique table id carried by the request.
        uid: u64,
    },

    /// The table kind does not admit the requested operation.
    #[error("invalid table type {0}")]
    InvalidTableType(u8),

    /// A create message failed validation in the config builder.
    #[error("invalid create message: {0}")]
    InvalidCreateMsg(String),

    /// The operation is not defined for the target table.
    #[error("invalid action on table {table}")]
    InvalidAction {
        /// Name of the target table.
        table: String,
    },

    /// The client sent a tag update built against an older tag schema.
    #[error("tag version out of date, client version {client} server version {server}")]
    TagVersionOutOfDate {
        /// Tag schema version the client is on.
        client: i32,
        /// Tag schema version the server is on.
        server: i32,
    },

    /// No schema with the requested version is held in memory.
    #[error("schema version {0} not found")]
    SchemaVersionNotFound(i32),

    /// A persisted meta record failed its checksum or could not be decoded.
    #[error("meta record corrupted")]
    FileCorrupted,

    /// A child table refers to a super table that is not in the catalog.
    #[error("super table with uid {0} is missing")]
    MissingSuperTable(u64),

    /// The repo configuration failed validation.
    #[error("invalid repo configuration: {0}")]
    InvalidConfig(String),

    /// An error from the operating system.
    #[error("system error: {0}")]
    System(#[from] std::io::Error),
}

/// Result type for the metadata engine.
pub type Result<T> = std::result::Result<T, MetaError>;
