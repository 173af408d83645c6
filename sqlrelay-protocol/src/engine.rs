//! The protocol engine: client-facing and backend-facing handshake/auth,
//! and `IDLE`-state command framing/dispatch.

use log::warn;

use sqlrelay_buffer::{BufferChain, PayloadType};
use sqlrelay_classifier::{classify, QueryTag};
use sqlrelay_common::error::{GatewayError, Result};
use sqlrelay_crypto::{native_password_token, verify_native_password};

use crate::constant::{
    default_server_capabilities, CapabilityFlags, CommandCode, AUTH_PLUGIN_NATIVE_PASSWORD,
    ER_ACCESS_DENIED_ERROR, ER_UNSUPPORTED_CAPABILITY, SQLSTATE_ACCESS_DENIED, SQLSTATE_GENERAL,
};
use crate::framing::build_header;
use crate::packet::{
    ChangeUserPacket, ErrPacket, HandshakePacket, HandshakeResponse41Packet, OkPacket, QueryPacket,
};
use crate::payload::Payload;
use crate::session::{ConnectionSession, CredentialStore};
use crate::state::ConnectionState;

/// Wraps an encoded payload with its wire header. The header and payload are
/// built as separate chain segments joined with [`BufferChain::append`], so
/// no intermediate copy happens until the caller asks for contiguous bytes
/// to hand to the socket.
pub fn frame_bytes(payload_bytes: &[u8], sequence_id: u8) -> Vec<u8> {
    let header = build_header(payload_bytes.len(), sequence_id);
    let mut header_chain = BufferChain::allocate(header.len());
    header_chain.fill(&header).expect("freshly allocated chain accepts its own header");

    let mut payload_chain = BufferChain::allocate(payload_bytes.len());
    payload_chain
        .fill(payload_bytes)
        .expect("freshly allocated chain accepts its own payload");

    let mut framed = header_chain.append(payload_chain);
    framed.set_type(PayloadType::MysqlWire);
    framed.bytes()
}

/// Builds the server greeting (handshake packet, sequence 0) and transitions
/// the session `Connected -> AuthSent`.
pub fn server_greeting(session: &mut ConnectionSession, server_version: &str) -> Result<Vec<u8>> {
    let packet = HandshakePacket::new(
        server_version.to_string(),
        session.id,
        session.scramble.clone(),
        default_server_capabilities(),
    );
    let bytes = packet.encode().get_bytes();
    session
        .transition(ConnectionState::AuthSent)
        .map_err(GatewayError::ProtocolMalformed)?;
    Ok(frame_bytes(&bytes, 0))
}

/// Outcome of verifying a client's `HandshakeResponse41`.
pub enum AuthOutcome {
    Ok(Vec<u8>),
    Failed(Vec<u8>),
}

/// Verifies `response` against `credentials`, transitioning the session to
/// `Idle` on success or `AuthFailed` on mismatch/unknown user, per the
/// authentication algebra: `expected = SHA1(scramble || SHA1(SHA1(password)))`,
/// checked by XOR-ing the client's token against the stored double hash.
pub fn verify_handshake_response(
    session: &mut ConnectionSession,
    response: &HandshakeResponse41Packet,
    credentials: &dyn CredentialStore,
) -> Result<AuthOutcome> {
    session
        .transition(ConnectionState::AuthRecv)
        .map_err(GatewayError::ProtocolMalformed)?;

    let stored = credentials.stored_double_hash(&response.user);
    let accepted = match &stored {
        Some(double_hash) => verify_native_password(&response.auth_response, &session.scramble, double_hash),
        None => false,
    };

    if accepted {
        session.user = response.user.clone();
        session.database = response.database.clone().unwrap_or_default();
        session.capabilities = response.capabilities.bits();
        session.authorized = true;
        session
            .transition(ConnectionState::Idle)
            .map_err(GatewayError::ProtocolMalformed)?;
        let ok = OkPacket::new();
        Ok(AuthOutcome::Ok(frame_bytes(&ok.encode().get_bytes(), 2)))
    } else {
        session
            .transition(ConnectionState::AuthFailed)
            .map_err(GatewayError::ProtocolMalformed)?;
        warn!("auth failed for user '{}'", response.user);
        let err = ErrPacket::new(
            ER_ACCESS_DENIED_ERROR,
            SQLSTATE_ACCESS_DENIED,
            format!("Access denied for user '{}'", response.user),
        );
        Ok(AuthOutcome::Failed(frame_bytes(&err.encode().get_bytes(), 2)))
    }
}

/// Builds the client-side `HandshakeResponse41` for connecting to a
/// backend, mirroring the server-facing verification algebra:
/// `token = SHA1(password) XOR SHA1(scramble || SHA1(SHA1(password)))`.
pub fn build_handshake_response(
    user: &str,
    password: &[u8],
    database: Option<&str>,
    scramble: &[u8],
    charset: u8,
) -> HandshakeResponse41Packet {
    let token = native_password_token(password, scramble);
    let mut capabilities = default_server_capabilities() | CapabilityFlags::CLIENT_SECURE_CONNECTION;
    capabilities.set(CapabilityFlags::CLIENT_CONNECT_WITH_DB, database.is_some());
    HandshakeResponse41Packet {
        capabilities,
        max_packet_size: 16_777_216,
        charset,
        user: user.to_string(),
        auth_response: token,
        database: database.map(|s| s.to_string()),
        auth_plugin_name: Some(AUTH_PLUGIN_NATIVE_PASSWORD.to_string()),
    }
}

/// Parses a backend's greeting and builds the `HandshakeResponse41` this
/// gateway sends back, mirroring [`verify_handshake_response`]'s role but
/// for the outbound side of a connection: `Connected -> AuthSent`. The
/// backend's own scramble replaces whatever was on the session, since the
/// scramble that matters here is the one the backend just generated for us.
pub fn begin_backend_handshake(
    session: &mut ConnectionSession,
    greeting_payload: &[u8],
    user: &str,
    password: &[u8],
    database: Option<&str>,
) -> Result<Vec<u8>> {
    let mut payload = Payload::from_bytes(bytes::BytesMut::from(greeting_payload));
    let greeting = HandshakePacket::decode(&mut payload)?;
    session.scramble = greeting.scramble;
    session.user = user.to_string();
    let response = build_handshake_response(user, password, database, &session.scramble, greeting.charset);
    session
        .transition(ConnectionState::AuthSent)
        .map_err(GatewayError::ProtocolMalformed)?;
    Ok(frame_bytes(&response.encode().get_bytes(), 1))
}

/// Consumes the backend's reply to our handshake response (an `OK` or `ERR`
/// packet, distinguished by its first byte) and finishes
/// `AuthSent -> AuthRecv -> {Idle|AuthFailed}` for the backend leg.
pub fn finish_backend_handshake(session: &mut ConnectionSession, reply_payload: &[u8]) -> Result<AuthOutcome> {
    session
        .transition(ConnectionState::AuthRecv)
        .map_err(GatewayError::ProtocolMalformed)?;
    if reply_payload.first() == Some(&0x00) {
        session.authorized = true;
        session
            .transition(ConnectionState::Idle)
            .map_err(GatewayError::ProtocolMalformed)?;
        Ok(AuthOutcome::Ok(reply_payload.to_vec()))
    } else {
        session
            .transition(ConnectionState::AuthFailed)
            .map_err(GatewayError::ProtocolMalformed)?;
        warn!("backend rejected handshake response for user '{}'", session.user);
        Ok(AuthOutcome::Failed(reply_payload.to_vec()))
    }
}

/// Builds a `COM_CHANGE_USER` packet, reusing the currently remembered
/// backend scramble for the new token.
pub fn build_change_user(
    user: &str,
    password: &[u8],
    database: &str,
    backend_scramble: &[u8],
    charset: u16,
) -> ChangeUserPacket {
    ChangeUserPacket {
        user: user.to_string(),
        auth_response: native_password_token(password, backend_scramble),
        database: database.to_string(),
        charset,
        auth_plugin_name: AUTH_PLUGIN_NATIVE_PASSWORD.to_string(),
    }
}

/// Result of dispatching one command-packet payload while `IDLE`.
pub enum CommandOutcome {
    /// `COM_QUIT`: connection should close, no response packet.
    Quit,
    /// `COM_INIT_DB`: session database updated; caller should send OK.
    DatabaseChanged(String),
    /// `COM_QUERY`: classified and ready for the routing collaborator.
    Query { sql: String, tag: QueryTag },
    /// `COM_CHANGE_USER`: re-authentication requested.
    ChangeUser(ChangeUserPacket),
    /// `COM_PING`: caller should send OK.
    Ping,
    /// A command byte we don't implement.
    Unsupported(u8),
}

/// Dispatches one command packet's payload (the command byte plus whatever
/// follows it). Does not itself send a response; callers turn the outcome
/// into wire bytes since some outcomes need the routing collaborator first.
pub fn dispatch_command(session: &mut ConnectionSession, command_payload: &[u8]) -> Result<CommandOutcome> {
    if command_payload.is_empty() {
        return Err(GatewayError::ProtocolMalformed("empty command packet".to_string()));
    }
    let command = CommandCode::from_byte(command_payload[0]);
    let mut payload = Payload::from_bytes(bytes::BytesMut::from(&command_payload[1..]));

    match command {
        CommandCode::Quit => Ok(CommandOutcome::Quit),
        CommandCode::InitDb => {
            let db = String::from_utf8_lossy(&command_payload[1..]).to_string();
            session.database = db.clone();
            Ok(CommandOutcome::DatabaseChanged(db))
        }
        CommandCode::Query => {
            let query = QueryPacket::decode(&mut payload);
            let tag = classify(&query.sql, session.capabilities);
            Ok(CommandOutcome::Query { sql: query.sql, tag })
        }
        CommandCode::ChangeUser => {
            session
                .transition(ConnectionState::SessionChange)
                .map_err(GatewayError::ProtocolMalformed)?;
            let change_user = ChangeUserPacket::decode(&mut payload)?;
            Ok(CommandOutcome::ChangeUser(change_user))
        }
        CommandCode::Ping => Ok(CommandOutcome::Ping),
        CommandCode::Other(b) => Ok(CommandOutcome::Unsupported(b)),
    }
}

/// Builds the error packet for an unsupported capability/command, per the
/// `UNSUPPORTED` error taxonomy entry (error code 1043).
pub fn unsupported_error(sequence_id: u8, message: &str) -> Vec<u8> {
    let err = ErrPacket::new(ER_UNSUPPORTED_CAPABILITY, SQLSTATE_GENERAL, message);
    frame_bytes(&err.encode().get_bytes(), sequence_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SingleUserStore {
        user: &'static str,
        double_hash: Vec<u8>,
    }
    impl CredentialStore for SingleUserStore {
        fn stored_double_hash(&self, user: &str) -> Option<Vec<u8>> {
            if user == self.user {
                Some(self.double_hash.clone())
            } else {
                None
            }
        }
    }

    fn store_for(password: &[u8]) -> SingleUserStore {
        SingleUserStore {
            user: "alice",
            double_hash: sqlrelay_crypto::sha1_twice(password).to_vec(),
        }
    }

    #[test]
    fn full_handshake_and_auth_succeeds_with_right_password() {
        let mut session = ConnectionSession::new(1, sqlrelay_crypto::random_scramble(20));
        session.transition(ConnectionState::PendingConnect).unwrap();
        session.transition(ConnectionState::Connected).unwrap();
        let _greeting = server_greeting(&mut session, "5.7.0-sqlrelay").unwrap();

        let response = build_handshake_response("alice", b"secret", None, &session.scramble, 0x21);
        let store = store_for(b"secret");
        match verify_handshake_response(&mut session, &response, &store).unwrap() {
            AuthOutcome::Ok(_) => {}
            AuthOutcome::Failed(_) => panic!("expected auth to succeed"),
        }
        assert_eq!(session.state, ConnectionState::Idle);
        assert!(session.authorized);
    }

    #[test]
    fn wrong_password_fails_and_sets_auth_failed() {
        let mut session = ConnectionSession::new(1, sqlrelay_crypto::random_scramble(20));
        session.transition(ConnectionState::PendingConnect).unwrap();
        session.transition(ConnectionState::Connected).unwrap();
        server_greeting(&mut session, "5.7.0-sqlrelay").unwrap();

        let response = build_handshake_response("alice", b"wrong", None, &session.scramble, 0x21);
        let store = store_for(b"secret");
        match verify_handshake_response(&mut session, &response, &store).unwrap() {
            AuthOutcome::Failed(bytes) => {
                assert_eq!(bytes[4], 0xff);
            }
            AuthOutcome::Ok(_) => panic!("expected auth to fail"),
        }
        assert_eq!(session.state, ConnectionState::AuthFailed);
    }

    #[test]
    fn begin_backend_handshake_parses_greeting_and_sends_response() {
        let mut backend_session = ConnectionSession::new(99, sqlrelay_crypto::random_scramble(20));
        backend_session.transition(ConnectionState::PendingConnect).unwrap();
        backend_session.transition(ConnectionState::Connected).unwrap();
        let greeting = server_greeting(&mut backend_session, "5.7.0-backend").unwrap();

        let mut our_session = ConnectionSession::new(1, vec![0; 20]);
        our_session.transition(ConnectionState::PendingConnect).unwrap();
        our_session.transition(ConnectionState::Connected).unwrap();
        let response_bytes =
            begin_backend_handshake(&mut our_session, &greeting[4..], "alice", b"secret", None).unwrap();

        assert_eq!(our_session.state, ConnectionState::AuthSent);
        assert_eq!(our_session.scramble, backend_session.scramble);
        assert!(response_bytes.len() > 4);
    }

    #[test]
    fn finish_backend_handshake_ok_reaches_idle() {
        let mut session = ConnectionSession::new(1, vec![0; 20]);
        session.transition(ConnectionState::PendingConnect).unwrap();
        session.transition(ConnectionState::Connected).unwrap();
        session.transition(ConnectionState::AuthSent).unwrap();

        let ok = OkPacket::new().encode().get_bytes().to_vec();
        match finish_backend_handshake(&mut session, &ok).unwrap() {
            AuthOutcome::Ok(_) => {}
            AuthOutcome::Failed(_) => panic!("expected backend auth to succeed"),
        }
        assert_eq!(session.state, ConnectionState::Idle);
        assert!(session.authorized);
    }

    #[test]
    fn finish_backend_handshake_err_sets_auth_failed() {
        let mut session = ConnectionSession::new(1, vec![0; 20]);
        session.transition(ConnectionState::PendingConnect).unwrap();
        session.transition(ConnectionState::Connected).unwrap();
        session.transition(ConnectionState::AuthSent).unwrap();

        let err = ErrPacket::new(ER_ACCESS_DENIED_ERROR, SQLSTATE_ACCESS_DENIED, "nope")
            .encode()
            .get_bytes()
            .to_vec();
        match finish_backend_handshake(&mut session, &err).unwrap() {
            AuthOutcome::Failed(_) => {}
            AuthOutcome::Ok(_) => panic!("expected backend auth to fail"),
        }
        assert_eq!(session.state, ConnectionState::AuthFailed);
    }

    #[test]
    fn dispatch_query_classifies_and_returns_sql() {
        let mut session = ConnectionSession::new(1, vec![0; 20]);
        let mut payload = vec![CommandCode::Query.to_byte()];
        payload.extend_from_slice(b"SELECT 1");
        match dispatch_command(&mut session, &payload).unwrap() {
            CommandOutcome::Query { sql, tag } => {
                assert_eq!(sql, "SELECT 1");
                assert_eq!(tag, QueryTag::READ);
            }
            _ => panic!("expected Query outcome"),
        }
    }

    #[test]
    fn dispatch_quit_closes_without_error() {
        let mut session = ConnectionSession::new(1, vec![0; 20]);
        let payload = vec![CommandCode::Quit.to_byte()];
        assert!(matches!(dispatch_command(&mut session, &payload).unwrap(), CommandOutcome::Quit));
    }
}
