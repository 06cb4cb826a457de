//! Driver configuration and property string parsing
//!
//! Properties are given as `key=value` pairs separated by `&` or `;`, the way
//! they appear after the `?` of a JDBC URL:
//!
//! ```text
//! mode=oracle&useServerPrepStmts=true&rewriteBatchedStatements=true
//! ```
//!
//! Keys are matched case-insensitively; both the camel-case JDBC names and
//! snake-case aliases are accepted.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::error::{Error, Result};

/// Default LOB piece size in bytes
pub const DEFAULT_PIECE_SIZE: usize = 8192;

/// Default upper bound for a single rewritten batch statement
pub const DEFAULT_MAX_ALLOWED_PACKET: usize = 4 * 1024 * 1024;

/// Default number of rows folded into one rewritten chunk
pub const DEFAULT_MAX_BATCH_ROWS: usize = 1000;

/// Default statement cache size
pub const DEFAULT_STMT_CACHE_SIZE: usize = 20;

/// SQL dialect the server session runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Dialect {
    /// MySQL-compatible mode
    #[default]
    MySql,
    /// Oracle-compatible mode
    Oracle,
}

impl Dialect {
    /// Check for Oracle mode
    pub fn is_oracle(&self) -> bool {
        matches!(self, Dialect::Oracle)
    }
}

impl FromStr for Dialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mysql" => Ok(Dialect::MySql),
            "oracle" => Ok(Dialect::Oracle),
            other => Err(Error::InvalidConnectionString(format!(
                "unknown mode '{}', expected mysql or oracle",
                other
            ))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::MySql => write!(f, "mysql"),
            Dialect::Oracle => write!(f, "oracle"),
        }
    }
}

/// Driver configuration.
///
/// Every switch the execution engine consults lives here. The connection
/// owns one copy; statements read it but never change it.
///
/// # Examples
///
/// ```rust
/// use dualsql::{Config, Dialect};
///
/// let config = Config::new(Dialect::Oracle)
///     .with_server_prep_stmts(true)
///     .with_default_fetch_size(100);
///
/// let parsed: Config = "mode=oracle&useServerPrepStmts=true&defaultFetchSize=100"
///     .parse()
///     .unwrap();
/// assert_eq!(parsed.default_fetch_size, config.default_fetch_size);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Server dialect
    pub mode: Dialect,
    /// Report `TINYINT(1)` columns as `BIT` rather than `TINYINT`
    pub tinyint1_is_bit: bool,
    /// Report bit columns (including `TINYINT(1)` when mapped) as `BOOLEAN`
    pub transformed_bit_is_boolean: bool,
    /// Report `YEAR` as `DATE` rather than `SMALLINT`
    pub year_is_date_type: bool,
    /// Fold batches into multi-row statements / array binds
    pub rewrite_batched_statements: bool,
    /// Keep executing a batch after a failed row
    pub continue_batch_on_error: bool,
    /// Prepare statements on the server
    pub use_server_prep_stmts: bool,
    /// Fetch rows through a server cursor in pages of the fetch size
    pub use_cursor_fetch: bool,
    /// Fetch size applied to new statements (0 = fetch all)
    pub default_fetch_size: i32,
    /// Upload LOB binds as pieces ahead of the execute
    pub use_piece_data: bool,
    /// Use the combined prepare-and-execute path
    pub use_oracle_prepare_execute: bool,
    /// Accept `:name` placeholders (Oracle mode only)
    pub support_name_binding: bool,
    /// Accept streaming fetch size through the extended result class
    pub use_extended_result_class: bool,
    /// Size of a single LOB piece in bytes
    pub piece_size: usize,
    /// Largest rewritten statement the server accepts
    pub max_allowed_packet: usize,
    /// Rows folded into one rewritten chunk at most
    pub max_batch_rows: usize,
    /// Step between generated keys of consecutive inserted rows
    pub auto_increment_increment: i64,
    /// Server-prepared statement cache size (0 = disabled)
    pub stmt_cache_size: usize,
    /// Session time zone used to interpret zone-less datetime values
    pub session_time_zone: FixedOffset,
    /// Default query timeout for new statements
    pub query_timeout: Option<Duration>,
}

impl Config {
    /// Create a configuration for the given dialect with default switches
    pub fn new(mode: Dialect) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Set tinyint1IsBit
    pub fn with_tinyint1_is_bit(mut self, value: bool) -> Self {
        self.tinyint1_is_bit = value;
        self
    }

    /// Set transformedBitIsBoolean
    pub fn with_transformed_bit_is_boolean(mut self, value: bool) -> Self {
        self.transformed_bit_is_boolean = value;
        self
    }

    /// Set yearIsDateType
    pub fn with_year_is_date_type(mut self, value: bool) -> Self {
        self.year_is_date_type = value;
        self
    }

    /// Set rewriteBatchedStatements
    pub fn with_rewrite_batched_statements(mut self, value: bool) -> Self {
        self.rewrite_batched_statements = value;
        self
    }

    /// Set continueBatchOnError
    pub fn with_continue_batch_on_error(mut self, value: bool) -> Self {
        self.continue_batch_on_error = value;
        self
    }

    /// Set useServerPrepStmts
    pub fn with_server_prep_stmts(mut self, value: bool) -> Self {
        self.use_server_prep_stmts = value;
        self
    }

    /// Set useCursorFetch
    pub fn with_cursor_fetch(mut self, value: bool) -> Self {
        self.use_cursor_fetch = value;
        self
    }

    /// Set defaultFetchSize
    pub fn with_default_fetch_size(mut self, value: i32) -> Self {
        self.default_fetch_size = value;
        self
    }

    /// Set usePieceData
    pub fn with_piece_data(mut self, value: bool) -> Self {
        self.use_piece_data = value;
        self
    }

    /// Set useOraclePrepareExecute
    pub fn with_oracle_prepare_execute(mut self, value: bool) -> Self {
        self.use_oracle_prepare_execute = value;
        self
    }

    /// Set supportNameBinding
    pub fn with_name_binding(mut self, value: bool) -> Self {
        self.support_name_binding = value;
        self
    }

    /// Set useExtendedResultClass
    pub fn with_extended_result_class(mut self, value: bool) -> Self {
        self.use_extended_result_class = value;
        self
    }

    /// Set the LOB piece size.
    ///
    /// A size of zero is replaced by 1 so uploads always make progress.
    pub fn with_piece_size(mut self, size: usize) -> Self {
        self.piece_size = size.max(1);
        self
    }

    /// Set the rewritten statement size bound
    pub fn with_max_allowed_packet(mut self, size: usize) -> Self {
        self.max_allowed_packet = size;
        self
    }

    /// Set the maximum rows per rewritten chunk
    pub fn with_max_batch_rows(mut self, rows: usize) -> Self {
        self.max_batch_rows = rows.max(1);
        self
    }

    /// Set the auto-increment step
    pub fn with_auto_increment_increment(mut self, step: i64) -> Self {
        self.auto_increment_increment = step;
        self
    }

    /// Set the statement cache size
    pub fn with_statement_cache_size(mut self, size: usize) -> Self {
        self.stmt_cache_size = size;
        self
    }

    /// Set the session time zone
    pub fn with_session_time_zone(mut self, tz: FixedOffset) -> Self {
        self.session_time_zone = tz;
        self
    }

    /// Set the default query timeout
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Whether `:name` placeholders are recognized
    pub fn named_binding_enabled(&self) -> bool {
        self.mode.is_oracle() && self.support_name_binding
    }

    /// Whether the streaming fetch size sentinel may be requested
    pub fn streaming_fetch_allowed(&self) -> bool {
        self.use_oracle_prepare_execute || self.use_extended_result_class
    }

    /// Apply one `key=value` property
    pub fn set_property(&mut self, key: &str, value: &str) -> Result<()> {
        let normalized: String = key
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "mode" | "compatiblemode" => self.mode = value.parse()?,
            "tinyint1isbit" => self.tinyint1_is_bit = parse_bool(key, value)?,
            "transformedbitisboolean" => self.transformed_bit_is_boolean = parse_bool(key, value)?,
            "yearisdatetype" => self.year_is_date_type = parse_bool(key, value)?,
            "rewritebatchedstatements" => {
                self.rewrite_batched_statements = parse_bool(key, value)?
            }
            "continuebatchonerror" => self.continue_batch_on_error = parse_bool(key, value)?,
            "useserverprepstmts" => self.use_server_prep_stmts = parse_bool(key, value)?,
            "usecursorfetch" => self.use_cursor_fetch = parse_bool(key, value)?,
            "defaultfetchsize" => self.default_fetch_size = parse_num(key, value)?,
            "usepiecedata" => self.use_piece_data = parse_bool(key, value)?,
            "useoracleprepareexecute" => {
                self.use_oracle_prepare_execute = parse_bool(key, value)?
            }
            "supportnamebinding" => self.support_name_binding = parse_bool(key, value)?,
            "useextendedresultclass" => {
                self.use_extended_result_class = parse_bool(key, value)?
            }
            "piecesize" => self.piece_size = parse_num::<usize>(key, value)?.max(1),
            "maxallowedpacket" => self.max_allowed_packet = parse_num(key, value)?,
            "maxbatchrows" => self.max_batch_rows = parse_num::<usize>(key, value)?.max(1),
            "autoincrementincrement" => self.auto_increment_increment = parse_num(key, value)?,
            "stmtcachesize" | "statementcachesize" => self.stmt_cache_size = parse_num(key, value)?,
            "sessiontimezone" | "servertimezone" => {
                self.session_time_zone = parse_offset(value)?
            }
            "querytimeout" => {
                let secs: u64 = parse_num(key, value)?;
                self.query_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            _ => {
                return Err(Error::InvalidConnectionString(format!(
                    "unknown property '{}'",
                    key
                )))
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Dialect::MySql,
            tinyint1_is_bit: true,
            transformed_bit_is_boolean: false,
            year_is_date_type: true,
            rewrite_batched_statements: false,
            continue_batch_on_error: false,
            use_server_prep_stmts: false,
            use_cursor_fetch: false,
            default_fetch_size: 0,
            use_piece_data: false,
            use_oracle_prepare_execute: false,
            support_name_binding: false,
            use_extended_result_class: false,
            piece_size: DEFAULT_PIECE_SIZE,
            max_allowed_packet: DEFAULT_MAX_ALLOWED_PACKET,
            max_batch_rows: DEFAULT_MAX_BATCH_ROWS,
            auto_increment_increment: 1,
            stmt_cache_size: DEFAULT_STMT_CACHE_SIZE,
            session_time_zone: utc(),
            query_timeout: None,
        }
    }
}

/// Parse a property string
///
/// Pairs are separated by `&` or `;`. An optional leading `?` (as copied from
/// a URL) is ignored, as are empty segments.
impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut config = Config::default();
        let s = s.trim().trim_start_matches('?');

        for pair in s.split(['&', ';']) {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                Error::InvalidConnectionString(format!("expected key=value, got '{}'", pair))
            })?;
            config.set_property(key.trim(), value.trim())?;
        }

        Ok(config)
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConnectionString(format!(
            "invalid boolean for {}: '{}'",
            key, value
        ))),
    }
}

fn parse_num<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        Error::InvalidConnectionString(format!("invalid number for {}: '{}'", key, value))
    })
}

/// Parse `UTC`, `Z`, `+08:00`, `-0530` or `+8`
fn parse_offset(value: &str) -> Result<FixedOffset> {
    let invalid = || Error::InvalidConnectionString(format!("invalid time zone '{}'", value));
    let v = value.trim();
    if v.eq_ignore_ascii_case("utc") || v.eq_ignore_ascii_case("gmt") || v == "Z" {
        return Ok(utc());
    }

    let (sign, rest) = match v.as_bytes().first() {
        Some(b'+') => (1, &v[1..]),
        Some(b'-') => (-1, &v[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = if let Some((h, m)) = rest.split_once(':') {
        (h, m)
    } else if rest.len() == 4 {
        rest.split_at(2)
    } else {
        (rest, "0")
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes >= 60 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
