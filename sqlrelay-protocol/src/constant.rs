use bitflags::bitflags;

/// Protocol version is always 0x0A.
pub const PROTOCOL_VERSION: u8 = 0x0A;

pub const NUL: u8 = 0x00;

/// Charset code 0x21 is utf8_general_ci.
pub const DEFAULT_CHARSET: u8 = 0x21;

pub const AUTH_PLUGIN_NATIVE_PASSWORD: &str = "mysql_native_password";

bitflags! {
    /// Status flags, sent in OK/EOF packets.
    ///
    /// @see <a href="https://dev.mysql.com/doc/internals/en/status-flags.html">StatusFlags</a>
    pub struct StatusFlags: u16 {
        const SERVER_STATUS_IN_TRANS             = 0x0001;
        const SERVER_STATUS_AUTOCOMMIT           = 0x0002;
        const SERVER_MORE_RESULTS_EXISTS         = 0x0008;
        const SERVER_STATUS_NO_GOOD_INDEX_USED   = 0x0010;
        const SERVER_STATUS_NO_INDEX_USED        = 0x0020;
        const SERVER_STATUS_CURSOR_EXISTS        = 0x0040;
        const SERVER_STATUS_LAST_ROW_SENT        = 0x0080;
        const SERVER_STATUS_DB_DROPPED           = 0x0100;
        const SERVER_STATUS_NO_BACKSLASH_ESCAPES = 0x0200;
        const SERVER_STATUS_METADATA_CHANGED     = 0x0400;
        const SERVER_QUERY_WAS_SLOW              = 0x0800;
        const SERVER_PS_OUT_PARAMS               = 0x1000;
        const SERVER_STATUS_IN_TRANS_READONLY    = 0x2000;
        const SERVER_SESSION_STATE_CHANGED       = 0x4000;
    }
}

bitflags! {
    /// Client/server capability flags negotiated during the handshake.
    ///
    /// @see <a href="https://dev.mysql.com/doc/internals/en/capability-flags.html">CapabilityFlags</a>
    pub struct CapabilityFlags: u32 {
        const CLIENT_LONG_PASSWORD                  = 0x0000_0001;
        const CLIENT_FOUND_ROWS                     = 0x0000_0002;
        const CLIENT_LONG_FLAG                       = 0x0000_0004;
        const CLIENT_CONNECT_WITH_DB                 = 0x0000_0008;
        const CLIENT_NO_SCHEMA                       = 0x0000_0010;
        const CLIENT_COMPRESS                        = 0x0000_0020;
        const CLIENT_ODBC                             = 0x0000_0040;
        const CLIENT_LOCAL_FILES                     = 0x0000_0080;
        const CLIENT_IGNORE_SPACE                    = 0x0000_0100;
        const CLIENT_PROTOCOL_41                     = 0x0000_0200;
        const CLIENT_INTERACTIVE                     = 0x0000_0400;
        const CLIENT_SSL                              = 0x0000_0800;
        const CLIENT_IGNORE_SIGPIPE                  = 0x0000_1000;
        const CLIENT_TRANSACTIONS                    = 0x0000_2000;
        const CLIENT_RESERVED                        = 0x0000_4000;
        const CLIENT_SECURE_CONNECTION               = 0x0000_8000;
        const CLIENT_MULTI_STATEMENTS                = 0x0001_0000;
        const CLIENT_MULTI_RESULTS                   = 0x0002_0000;
        const CLIENT_PS_MULTI_RESULTS                = 0x0004_0000;
        const CLIENT_PLUGIN_AUTH                     = 0x0008_0000;
        const CLIENT_CONNECT_ATTRS                   = 0x0010_0000;
        const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA  = 0x0020_0000;
        const CLIENT_CAN_HANDLE_EXPIRED_PASSWORDS    = 0x0040_0000;
        const CLIENT_SESSION_TRACK                   = 0x0080_0000;
        const CLIENT_DEPRECATE_EOF                   = 0x0100_0000;
    }
}

/// Default negotiated capability set the gateway advertises in the
/// handshake greeting; matches the capability set named in the external
/// interfaces contract.
pub fn default_server_capabilities() -> CapabilityFlags {
    CapabilityFlags::CLIENT_LONG_PASSWORD
        | CapabilityFlags::CLIENT_FOUND_ROWS
        | CapabilityFlags::CLIENT_LONG_FLAG
        | CapabilityFlags::CLIENT_CONNECT_WITH_DB
        | CapabilityFlags::CLIENT_LOCAL_FILES
        | CapabilityFlags::CLIENT_PROTOCOL_41
        | CapabilityFlags::CLIENT_TRANSACTIONS
        | CapabilityFlags::CLIENT_SECURE_CONNECTION
        | CapabilityFlags::CLIENT_MULTI_STATEMENTS
        | CapabilityFlags::CLIENT_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PS_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PLUGIN_AUTH
}

/// Supported `COM_*` command codes; see `MYSQL_GET_COMMAND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    Quit,
    InitDb,
    Query,
    ChangeUser,
    Ping,
    Other(u8),
}

impl CommandCode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => CommandCode::Quit,
            0x02 => CommandCode::InitDb,
            0x03 => CommandCode::Query,
            0x0e => CommandCode::Ping,
            0x11 => CommandCode::ChangeUser,
            other => CommandCode::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            CommandCode::Quit => 0x01,
            CommandCode::InitDb => 0x02,
            CommandCode::Query => 0x03,
            CommandCode::Ping => 0x0e,
            CommandCode::ChangeUser => 0x11,
            CommandCode::Other(b) => b,
        }
    }
}

/// Error codes used by this core; a small subset of the full MySQL error
/// code space, covering exactly the failures named in the error taxonomy.
pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;
pub const ER_NOT_SUPPORTED_YET: u16 = 1235;
pub const ER_UNSUPPORTED_CAPABILITY: u16 = 1043;

pub const SQLSTATE_ACCESS_DENIED: &[u8; 5] = b"28000";
pub const SQLSTATE_GENERAL: &[u8; 5] = b"HY000";
