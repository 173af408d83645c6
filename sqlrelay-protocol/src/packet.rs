use sqlrelay_common::error::{GatewayError, Result};

use crate::constant::{
    CapabilityFlags, StatusFlags, AUTH_PLUGIN_NATIVE_PASSWORD, DEFAULT_CHARSET, NUL,
    PROTOCOL_VERSION,
};
use crate::payload::Payload;

/// Server greeting packet, protocol version 10.
///
/// @see <a href="https://dev.mysql.com/doc/internals/en/connection-phase-packets.html#packet-Protocol::Handshake">Handshake</a>
pub struct HandshakePacket {
    pub server_version: String,
    pub connection_id: u32,
    pub scramble: Vec<u8>,
    pub capabilities: CapabilityFlags,
    pub charset: u8,
    pub status: StatusFlags,
}

impl HandshakePacket {
    pub fn new(server_version: String, connection_id: u32, scramble: Vec<u8>, capabilities: CapabilityFlags) -> Self {
        assert_eq!(scramble.len(), 20, "scramble must be 20 bytes");
        HandshakePacket {
            server_version,
            connection_id,
            scramble,
            capabilities,
            charset: DEFAULT_CHARSET,
            status: StatusFlags::SERVER_STATUS_AUTOCOMMIT,
        }
    }

    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        payload.put_u8(PROTOCOL_VERSION);
        payload.put_string_with_nul(self.server_version.as_bytes());
        payload.put_u32_le(self.connection_id);
        payload.put_slice(&self.scramble[0..8]);
        payload.put_u8(NUL);
        payload.put_u16_le((self.capabilities.bits() & 0xffff) as u16);
        payload.put_u8(self.charset);
        payload.put_u16_le(self.status.bits());
        payload.put_u16_le(((self.capabilities.bits() >> 16) & 0xffff) as u16);
        payload.put_u8(21); // auth plugin data length: 8 + 12 + 1
        payload.put_slice(&[0u8; 10]);
        payload.put_string_with_nul(&self.scramble[8..20]);
        payload.put_string_with_nul(AUTH_PLUGIN_NATIVE_PASSWORD.as_bytes());
        payload
    }

    /// Parses a backend's greeting, the mirror of [`Self::encode`]. Used by
    /// the backend-facing half of the engine to drive
    /// `Connected -> AuthSent -> AuthRecv` for a connection this gateway
    /// opens outward rather than accepts.
    pub fn decode(payload: &mut Payload) -> Result<Self> {
        if payload.remaining() < 1 {
            return Err(GatewayError::ProtocolMalformed(
                "handshake truncated before protocol version".to_string(),
            ));
        }
        let _protocol_version = payload.get_uint(1);
        let server_version = payload.get_string_nul();

        if payload.remaining() < 4 + 8 + 1 {
            return Err(GatewayError::ProtocolMalformed(
                "handshake truncated before scramble".to_string(),
            ));
        }
        let connection_id = payload.get_uint_le(4) as u32;
        let mut scramble = payload.get_fixed_bytes(8)?;
        payload.advance(1); // filler

        if payload.remaining() < 2 + 1 + 2 + 2 + 1 + 10 {
            return Err(GatewayError::ProtocolMalformed(
                "handshake truncated before capability flags".to_string(),
            ));
        }
        let capabilities_lower = payload.get_uint_le(2) as u32;
        let charset = (payload.get_uint(1) & 0xff) as u8;
        let status = StatusFlags::from_bits_truncate(payload.get_uint_le(2) as u16);
        let capabilities_upper = payload.get_uint_le(2) as u32;
        let auth_plugin_data_len = payload.get_uint(1) as usize;
        payload.advance(10);

        let capabilities = CapabilityFlags::from_bits_truncate(capabilities_lower | (capabilities_upper << 16));

        let second_part_len = auth_plugin_data_len.saturating_sub(8).max(13);
        let mut second_part = payload.get_fixed_bytes(second_part_len)?;
        if second_part.last() == Some(&NUL) {
            second_part.pop();
        }
        scramble.append(&mut second_part);
        if scramble.len() < 20 {
            return Err(GatewayError::ProtocolMalformed(
                "handshake scramble shorter than 20 bytes".to_string(),
            ));
        }
        scramble.truncate(20);

        if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) && payload.remaining() > 0 {
            let _auth_plugin_name = payload.get_string_nul();
        }

        Ok(HandshakePacket {
            server_version,
            connection_id,
            scramble,
            capabilities,
            charset,
            status,
        })
    }
}

/// HandshakeResponse41, sent by the client after the greeting.
///
/// @see <a href="https://dev.mysql.com/doc/internals/en/connection-phase-packets.html#packet-Protocol::HandshakeResponse41">HandshakeResponse41</a>
pub struct HandshakeResponse41Packet {
    pub capabilities: CapabilityFlags,
    pub max_packet_size: u32,
    pub charset: u8,
    pub user: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
}

impl HandshakeResponse41Packet {
    pub fn decode(payload: &mut Payload) -> Result<Self> {
        if payload.remaining() < 4 + 4 + 1 + 23 {
            return Err(GatewayError::ProtocolMalformed(
                "handshake response truncated before filler".to_string(),
            ));
        }
        let capabilities = CapabilityFlags::from_bits_truncate(payload.get_uint_le(4) as u32);
        let max_packet_size = payload.get_uint_le(4) as u32;
        let charset = (payload.get_uint(1) & 0xff) as u8;
        payload.advance(23);

        let user = payload.get_string_nul();

        let auth_response = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            payload.get_string_lenenc()?
        } else if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            payload.get_string_fix()?
        } else {
            payload.get_string_nul().into_bytes()
        };

        let database = if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) {
            Some(payload.get_string_nul())
        } else {
            None
        };

        let auth_plugin_name = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            Some(payload.get_string_nul())
        } else {
            None
        };

        Ok(HandshakeResponse41Packet {
            capabilities,
            max_packet_size,
            charset,
            user,
            auth_response,
            database,
            auth_plugin_name,
        })
    }

    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        payload.put_u32_le(self.capabilities.bits());
        payload.put_u32_le(self.max_packet_size);
        payload.put_u8(self.charset);
        payload.put_slice(&[0u8; 23]);
        payload.put_string_with_nul(self.user.as_bytes());
        if self.capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            payload.put_u8(self.auth_response.len() as u8);
            payload.put_slice(&self.auth_response);
        } else {
            payload.put_string_with_nul(&self.auth_response);
        }
        if let Some(db) = &self.database {
            payload.put_string_with_nul(db.as_bytes());
        }
        if let Some(plugin) = &self.auth_plugin_name {
            payload.put_string_with_nul(plugin.as_bytes());
        }
        payload
    }
}

/// OK packet.
///
/// @see <a href="https://dev.mysql.com/doc/internals/en/packet-OK_Packet.html">OK Packet</a>
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status: StatusFlags,
    pub warnings: u16,
    pub info: String,
}

impl OkPacket {
    pub fn new() -> Self {
        OkPacket {
            affected_rows: 0,
            last_insert_id: 0,
            status: StatusFlags::SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
            info: String::new(),
        }
    }

    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        payload.put_u8(0x00);
        payload.put_int_lenenc(self.affected_rows);
        payload.put_int_lenenc(self.last_insert_id);
        payload.put_u16_le(self.status.bits());
        payload.put_u16_le(self.warnings);
        payload.put_slice(self.info.as_bytes());
        payload
    }
}

impl Default for OkPacket {
    fn default() -> Self {
        Self::new()
    }
}

/// Error packet: `0xFF || error_code (2 LE) || '#' || sqlstate (5 bytes) || message`.
pub struct ErrPacket {
    pub error_code: u16,
    pub sqlstate: [u8; 5],
    pub message: String,
}

impl ErrPacket {
    pub fn new(error_code: u16, sqlstate: &[u8; 5], message: impl Into<String>) -> Self {
        ErrPacket {
            error_code,
            sqlstate: *sqlstate,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        payload.put_u8(0xff);
        payload.put_u16_le(self.error_code);
        payload.put_u8(b'#');
        payload.put_slice(&self.sqlstate);
        payload.put_slice(self.message.as_bytes());
        payload
    }
}

/// `AuthSwitchRequest`, sent when the server wants the client to switch
/// authentication plugins.
pub struct AuthSwitchRequestPacket {
    pub plugin_name: String,
    pub plugin_data: Vec<u8>,
}

impl AuthSwitchRequestPacket {
    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        payload.put_u8(0xfe);
        payload.put_string_with_nul(self.plugin_name.as_bytes());
        payload.put_slice(&self.plugin_data);
        payload
    }
}

pub struct AuthSwitchResponsePacket {
    pub auth_response: Vec<u8>,
}

impl AuthSwitchResponsePacket {
    pub fn decode(payload: &mut Payload) -> Self {
        let remaining = payload.remaining();
        let mut auth_response = Vec::with_capacity(remaining);
        for _ in 0..remaining {
            auth_response.push(payload.get_uint(1) as u8);
        }
        AuthSwitchResponsePacket { auth_response }
    }
}

/// `COM_CHANGE_USER` request: new user, auth response against the
/// *current* backend scramble, database, charset, plugin name.
pub struct ChangeUserPacket {
    pub user: String,
    pub auth_response: Vec<u8>,
    pub database: String,
    pub charset: u16,
    pub auth_plugin_name: String,
}

impl ChangeUserPacket {
    pub fn encode(&self) -> Payload {
        let mut payload = Payload::new();
        payload.put_u8(crate::constant::CommandCode::ChangeUser.to_byte());
        payload.put_string_with_nul(self.user.as_bytes());
        payload.put_u8(self.auth_response.len() as u8);
        payload.put_slice(&self.auth_response);
        payload.put_string_with_nul(self.database.as_bytes());
        payload.put_u16_le(self.charset);
        payload.put_string_with_nul(self.auth_plugin_name.as_bytes());
        payload
    }

    pub fn decode(payload: &mut Payload) -> Result<Self> {
        // first byte (command code) already consumed by the caller.
        let user = payload.get_string_nul();
        let auth_response = payload.get_string_fix()?;
        let database = payload.get_string_nul();
        if payload.remaining() < 2 {
            return Err(GatewayError::ProtocolMalformed(
                "change user missing charset".to_string(),
            ));
        }
        let charset = payload.get_uint_le(2) as u16;
        let auth_plugin_name = payload.get_string_nul();
        Ok(ChangeUserPacket {
            user,
            auth_response,
            database,
            charset,
            auth_plugin_name,
        })
    }
}

/// `COM_QUERY` request: the SQL text follows the command byte verbatim.
pub struct QueryPacket {
    pub sql: String,
}

impl QueryPacket {
    pub fn decode(payload: &mut Payload) -> Self {
        let remaining = payload.remaining();
        let mut bytes = Vec::with_capacity(remaining);
        for _ in 0..remaining {
            bytes.push(payload.get_uint(1) as u8);
        }
        QueryPacket {
            sql: String::from_utf8_lossy(&bytes).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn default_caps() -> CapabilityFlags {
        crate::constant::default_server_capabilities()
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
    }

    #[test]
    fn handshake_response_round_trips() {
        let response = HandshakeResponse41Packet {
            capabilities: default_caps(),
            max_packet_size: 16_777_216,
            charset: DEFAULT_CHARSET,
            user: "alice".to_string(),
            auth_response: vec![1; 20],
            database: Some("test".to_string()),
            auth_plugin_name: Some(AUTH_PLUGIN_NATIVE_PASSWORD.to_string()),
        };
        let mut payload = Payload::from_bytes(BytesMut::from(&response.encode().get_bytes()[..]));
        let decoded = HandshakeResponse41Packet::decode(&mut payload).unwrap();
        assert_eq!(decoded.user, "alice");
        assert_eq!(decoded.auth_response, vec![1; 20]);
        assert_eq!(decoded.database.as_deref(), Some("test"));
        assert_eq!(decoded.auth_plugin_name.as_deref(), Some(AUTH_PLUGIN_NATIVE_PASSWORD));
    }

    #[test]
    fn handshake_encodes_twenty_byte_scramble_in_two_parts() {
        let scramble: Vec<u8> = (0..20).collect();
        let packet = HandshakePacket::new(
            "5.7.0-sqlrelay".to_string(),
            42,
            scramble.clone(),
            crate::constant::default_server_capabilities(),
        );
        let encoded = packet.encode().get_bytes();
        assert!(encoded.windows(8).any(|w| w == &scramble[0..8]));
    }

    #[test]
    fn handshake_round_trips_through_decode() {
        let scramble: Vec<u8> = (1..=20).collect();
        let packet = HandshakePacket::new(
            "5.7.0-backend".to_string(),
            7,
            scramble.clone(),
            crate::constant::default_server_capabilities() | CapabilityFlags::CLIENT_PLUGIN_AUTH,
        );
        let mut payload = Payload::from_bytes(BytesMut::from(&packet.encode().get_bytes()[..]));
        let decoded = HandshakePacket::decode(&mut payload).unwrap();
        assert_eq!(decoded.server_version, "5.7.0-backend");
        assert_eq!(decoded.connection_id, 7);
        assert_eq!(decoded.scramble, scramble);
    }

    #[test]
    fn handshake_decode_rejects_truncated_greeting() {
        let mut payload = Payload::from_bytes(BytesMut::from(&b"\x0a5.7.0"[..]));
        assert!(HandshakePacket::decode(&mut payload).is_err());
    }

    #[test]
    fn err_packet_matches_wire_format() {
        let err = ErrPacket::new(1045, b"28000", "Access denied");
        let bytes = err.encode().get_bytes();
        assert_eq!(bytes[0], 0xff);
        assert_eq!(bytes[1..3].to_vec(), vec![0x15, 0x04]); // 1045 LE
        assert_eq!(bytes[3], b'#');
        assert_eq!(&bytes[4..9], b"28000");
        assert_eq!(&bytes[9..], b"Access denied");
    }

    #[test]
    fn change_user_round_trips() {
        let packet = ChangeUserPacket {
            user: "bob".to_string(),
            auth_response: vec![9; 20],
            database: "app".to_string(),
            charset: 0x21,
            auth_plugin_name: AUTH_PLUGIN_NATIVE_PASSWORD.to_string(),
        };
        let mut encoded = packet.encode().get_bytes().to_vec();
        // strip the command byte the decoder expects the caller to consume.
        encoded.remove(0);
        let mut payload = Payload::from_bytes(BytesMut::from(&encoded[..]));
        let decoded = ChangeUserPacket::decode(&mut payload).unwrap();
        assert_eq!(decoded.user, "bob");
        assert_eq!(decoded.database, "app");
        assert_eq!(decoded.charset, 0x21);
    }
}
