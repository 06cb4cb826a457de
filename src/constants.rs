//! Wire protocol constants
//!
//! Packet and message type codes, function codes, execute flags, the SQL type
//! catalogue shared by both dialects, and the sentinel values used in batch
//! update-count arrays.

// =============================================================================
// Packet Types
// =============================================================================

/// Packet types (found in packet header byte 4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Data packet (contains protocol messages)
    Data = 6,
    /// Marker packet (interrupt/reset)
    Marker = 12,
}

impl TryFrom<u8> for PacketType {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            6 => Ok(PacketType::Data),
            12 => Ok(PacketType::Marker),
            _ => Err(crate::error::Error::InvalidPacketType(value)),
        }
    }
}

/// Marker kinds carried in the single payload byte of a marker packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarkerType {
    /// Out-of-band interrupt of the in-flight request
    Interrupt = 1,
    /// Acknowledges an interrupt
    Reset = 2,
}

impl TryFrom<u8> for MarkerType {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MarkerType::Interrupt),
            2 => Ok(MarkerType::Reset),
            _ => Err(crate::error::Error::Protocol(format!("invalid marker type: {}", value))),
        }
    }
}

/// Packet header size in bytes
pub const PACKET_HEADER_SIZE: usize = 8;

/// Largest packet either side accepts
pub const MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

// =============================================================================
// Function Codes (client requests)
// =============================================================================

/// Function codes that open every client request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Parse and/or execute a statement
    Execute = 1,
    /// Fetch rows from an open cursor
    Fetch = 2,
    /// Upload one piece of a streamed LOB bind
    Piece = 3,
    /// Release server cursors
    CloseCursors = 4,
    /// Commit the current transaction
    Commit = 5,
    /// Roll back the current transaction
    Rollback = 6,
    /// Switch autocommit on or off
    SetAutoCommit = 7,
    /// Round-trip with no side effects
    Ping = 8,
}

impl TryFrom<u8> for FunctionCode {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FunctionCode::Execute),
            2 => Ok(FunctionCode::Fetch),
            3 => Ok(FunctionCode::Piece),
            4 => Ok(FunctionCode::CloseCursors),
            5 => Ok(FunctionCode::Commit),
            6 => Ok(FunctionCode::Rollback),
            7 => Ok(FunctionCode::SetAutoCommit),
            8 => Ok(FunctionCode::Ping),
            _ => Err(crate::error::Error::InvalidMessageType(value)),
        }
    }
}

// =============================================================================
// Message Types (server replies)
// =============================================================================

/// Server message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Column metadata for a result set
    Describe = 1,
    /// One row of data
    RowData = 2,
    /// Values of OUT / INOUT parameters
    OutBinds = 3,
    /// Completion status of a call
    Status = 4,
    /// Error raised by the call
    Error = 5,
    /// Per-row update counts of an array execute
    BatchCounts = 6,
    /// Acknowledges one uploaded LOB piece
    PieceAck = 7,
    /// Terminates a response
    EndOfResponse = 29,
}

impl TryFrom<u8> for MessageType {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, crate::error::Error> {
        match value {
            1 => Ok(MessageType::Describe),
            2 => Ok(MessageType::RowData),
            3 => Ok(MessageType::OutBinds),
            4 => Ok(MessageType::Status),
            5 => Ok(MessageType::Error),
            6 => Ok(MessageType::BatchCounts),
            7 => Ok(MessageType::PieceAck),
            29 => Ok(MessageType::EndOfResponse),
            _ => Err(crate::error::Error::InvalidMessageType(value)),
        }
    }
}

// =============================================================================
// Length Indicators
// =============================================================================

/// Length indicator constants
pub mod length {
    /// Maximum length that fits in a single byte
    pub const MAX_SHORT: u8 = 252;
    /// Indicates a chunked (multi-piece) value follows
    pub const LONG_INDICATOR: u8 = 254;
    /// Indicates NULL value
    pub const NULL_INDICATOR: u8 = 255;
}

// =============================================================================
// Execute Options
// =============================================================================

/// Execute option flags (bitmask sent with every Execute request)
pub mod exec_option {
    /// Parse the SQL text (no server cursor yet)
    pub const PARSE: u32 = 0x0001;
    /// Run the statement
    pub const EXECUTE: u32 = 0x0002;
    /// Return the first page of rows with the execute reply
    pub const FETCH: u32 = 0x0004;
    /// Return column metadata
    pub const DESCRIBE: u32 = 0x0008;
    /// Keep the cursor open as a scrollable server cursor
    pub const SCROLLABLE: u32 = 0x0010;
    /// Rows are fetched page by page from a server cursor
    pub const CURSOR_FETCH: u32 = 0x0020;
    /// Commit after successful execution
    pub const COMMIT: u32 = 0x0040;
    /// Bind rows form an array execute (one iteration per row)
    pub const ARRAY_DML: u32 = 0x0080;
    /// Return generated keys in the status
    pub const RETURN_KEYS: u32 = 0x0100;
    /// SQL text is final (no binds, text protocol)
    pub const TEXT: u32 = 0x0200;
    /// Combined prepare-and-execute in one round trip
    pub const PREPARE_EXECUTE: u32 = 0x0400;
    /// Row-at-a-time streaming of the result
    pub const STREAMING: u32 = 0x0800;
    /// Keep the server-side prepared cursor after execution
    pub const KEEP_CURSOR: u32 = 0x1000;
}

// =============================================================================
// Fetch Orientation
// =============================================================================

/// Fetch orientation for scrollable server cursors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum FetchOrientation {
    /// Fetch current row
    Current = 0x01,
    /// Fetch next row (default)
    #[default]
    Next = 0x02,
    /// Fetch first row
    First = 0x04,
    /// Fetch last row
    Last = 0x08,
    /// Fetch previous row
    Prior = 0x10,
    /// Fetch absolute position
    Absolute = 0x20,
    /// Fetch relative to current position
    Relative = 0x40,
}

impl TryFrom<u8> for FetchOrientation {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FetchOrientation::Current),
            0x02 => Ok(FetchOrientation::Next),
            0x04 => Ok(FetchOrientation::First),
            0x08 => Ok(FetchOrientation::Last),
            0x10 => Ok(FetchOrientation::Prior),
            0x20 => Ok(FetchOrientation::Absolute),
            0x40 => Ok(FetchOrientation::Relative),
            _ => Err(crate::error::Error::Protocol(format!(
                "invalid fetch orientation: {}",
                value
            ))),
        }
    }
}

// =============================================================================
// Bind Direction
// =============================================================================

/// Bind parameter direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(u8)]
pub enum BindDirection {
    /// Output only parameter (server writes, client reads)
    Output = 16,
    /// Input only parameter (client writes, server reads) - default
    #[default]
    Input = 32,
    /// Input/Output parameter (bidirectional)
    InputOutput = 48,
}

impl BindDirection {
    /// Check if this direction includes input (IN or IN OUT)
    pub fn is_input(&self) -> bool {
        matches!(self, BindDirection::Input | BindDirection::InputOutput)
    }

    /// Check if this direction includes output (OUT or IN OUT)
    pub fn is_output(&self) -> bool {
        matches!(self, BindDirection::Output | BindDirection::InputOutput)
    }

    /// Create from wire value
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            16 => Some(BindDirection::Output),
            32 => Some(BindDirection::Input),
            48 => Some(BindDirection::InputOutput),
            _ => None,
        }
    }
}

impl TryFrom<u8> for BindDirection {
    type Error = crate::error::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        BindDirection::from_wire(value)
            .ok_or_else(|| crate::error::Error::Protocol(format!("Invalid bind direction: {}", value)))
    }
}

// =============================================================================
// SQL Types
// =============================================================================

/// Column and parameter types understood by both dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SqlType {
    /// BIT(n)
    Bit = 1,
    /// BOOLEAN
    Boolean = 2,
    /// TINYINT
    TinyInt = 3,
    /// SMALLINT
    SmallInt = 4,
    /// MEDIUMINT
    MediumInt = 5,
    /// INT / INTEGER
    Integer = 6,
    /// BIGINT
    BigInt = 7,
    /// FLOAT / BINARY_FLOAT
    Float = 8,
    /// DOUBLE / BINARY_DOUBLE
    Double = 9,
    /// DECIMAL / NUMBER
    Decimal = 10,
    /// CHAR
    Char = 11,
    /// VARCHAR / VARCHAR2
    Varchar = 12,
    /// TEXT / LONG
    LongVarchar = 13,
    /// BINARY
    Binary = 14,
    /// VARBINARY / RAW
    Varbinary = 15,
    /// LONGBLOB / LONG RAW
    LongVarbinary = 16,
    /// CLOB
    Clob = 17,
    /// BLOB
    Blob = 18,
    /// DATE
    Date = 19,
    /// TIME
    Time = 20,
    /// DATETIME
    DateTime = 21,
    /// TIMESTAMP
    Timestamp = 22,
    /// TIMESTAMP WITH TIME ZONE
    TimestampTz = 23,
    /// YEAR
    Year = 24,
    /// REF CURSOR
    Cursor = 25,
    /// NULL type
    Null = 26,
    /// Anything else
    #[default]
    Unknown = 255,
}

impl SqlType {
    /// Decode from the wire code
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => SqlType::Bit,
            2 => SqlType::Boolean,
            3 => SqlType::TinyInt,
            4 => SqlType::SmallInt,
            5 => SqlType::MediumInt,
            6 => SqlType::Integer,
            7 => SqlType::BigInt,
            8 => SqlType::Float,
            9 => SqlType::Double,
            10 => SqlType::Decimal,
            11 => SqlType::Char,
            12 => SqlType::Varchar,
            13 => SqlType::LongVarchar,
            14 => SqlType::Binary,
            15 => SqlType::Varbinary,
            16 => SqlType::LongVarbinary,
            17 => SqlType::Clob,
            18 => SqlType::Blob,
            19 => SqlType::Date,
            20 => SqlType::Time,
            21 => SqlType::DateTime,
            22 => SqlType::Timestamp,
            23 => SqlType::TimestampTz,
            24 => SqlType::Year,
            25 => SqlType::Cursor,
            26 => SqlType::Null,
            _ => SqlType::Unknown,
        }
    }

    /// The matching `java.sql.Types` code, as reported by result-set metadata
    pub fn type_code(&self) -> i32 {
        match self {
            SqlType::Bit => -7,
            SqlType::Boolean => 16,
            SqlType::TinyInt => -6,
            SqlType::SmallInt => 5,
            SqlType::MediumInt | SqlType::Integer => 4,
            SqlType::BigInt => -5,
            SqlType::Float => 7,
            SqlType::Double => 8,
            SqlType::Decimal => 3,
            SqlType::Char => 1,
            SqlType::Varchar => 12,
            SqlType::LongVarchar => -1,
            SqlType::Binary => -2,
            SqlType::Varbinary => -3,
            SqlType::LongVarbinary => -4,
            SqlType::Clob => 2005,
            SqlType::Blob => 2004,
            SqlType::Date => 91,
            SqlType::Time => 92,
            SqlType::DateTime | SqlType::Timestamp => 93,
            SqlType::TimestampTz => 2014,
            SqlType::Year => 91,
            SqlType::Cursor => 2012,
            SqlType::Null => 0,
            SqlType::Unknown => 1111,
        }
    }

    /// Check if this type is a LOB type
    pub fn is_lob(&self) -> bool {
        matches!(self, SqlType::Clob | SqlType::Blob)
    }

    /// Check if values of this type are character data
    pub fn is_character(&self) -> bool {
        matches!(
            self,
            SqlType::Char | SqlType::Varchar | SqlType::LongVarchar | SqlType::Clob
        )
    }

    /// Check if values of this type are binary data
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            SqlType::Binary | SqlType::Varbinary | SqlType::LongVarbinary | SqlType::Blob
        )
    }
}

// =============================================================================
// Value Tags
// =============================================================================

/// Tag byte preceding every encoded value
#[allow(missing_docs)]
pub mod value_tag {
    pub const NULL: u8 = 0;
    pub const INT: u8 = 1;
    pub const UINT: u8 = 2;
    pub const DECIMAL: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const STRING: u8 = 6;
    pub const BYTES: u8 = 7;
    pub const DATE: u8 = 8;
    pub const TIME: u8 = 9;
    pub const DATETIME: u8 = 10;
    pub const TIMESTAMP_TZ: u8 = 11;
    pub const BOOL: u8 = 12;
    pub const CLOB: u8 = 13;
    pub const BLOB: u8 = 14;
    pub const EMPTY_CLOB: u8 = 15;
    pub const EMPTY_BLOB: u8 = 16;
    pub const CURSOR: u8 = 17;
    pub const PIECE: u8 = 18;
}

// =============================================================================
// Column Flags
// =============================================================================

/// Flags carried in column metadata
#[allow(missing_docs)]
pub mod column_flags {
    pub const NULLABLE: u16 = 0x0001;
    pub const PRIMARY_KEY: u16 = 0x0002;
    pub const UNSIGNED: u16 = 0x0004;
    pub const AUTO_INCREMENT: u16 = 0x0008;
    pub const BINARY: u16 = 0x0010;
}

// =============================================================================
// Batch Sentinels
// =============================================================================

/// Update count reported when a row succeeded but its exact count is unknown
pub const SUCCESS_NO_INFO: i64 = -2;

/// Update count reported for a row that failed
pub const EXECUTE_FAILED: i64 = -3;

/// Fetch size requesting row-at-a-time streaming
pub const STREAMING_FETCH_SIZE: i32 = i32::MIN;

// =============================================================================
// Error Codes
// =============================================================================

/// Well-known server error codes
#[allow(missing_docs)]
pub mod error_code {
    pub const QUERY_INTERRUPTED: u32 = 1317;
    pub const UNKNOWN_CURSOR: u32 = 1243;
    pub const PIECE_OUT_OF_ORDER: u32 = 3100;
    pub const DUPLICATE_KEY: u32 = 1062;
    pub const BAD_FIELD_VALUE: u32 = 1366;
    pub const SERVER_SHUTDOWN: u32 = 1053;
}

/// Well-known SQLSTATE values
#[allow(missing_docs)]
pub mod sql_state {
    pub const GENERAL: &str = "HY000";
    pub const INTERRUPTED: &str = "70100";
    pub const LINK_FAILURE: &str = "08S01";
    pub const CONSTRAINT: &str = "23000";
    pub const SYNTAX: &str = "42000";
}
