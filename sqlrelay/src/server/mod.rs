//! Accept loop and per-connection driving of the protocol engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use log::{info, warn};
use tokio::net::{TcpListener, TcpStream};

use sqlrelay_common::error::{GatewayError, Result};
use sqlrelay_common::service::io::Channel;
use sqlrelay_common::service::{Service, ServiceHandler};
use sqlrelay_protocol::codec::MySQLCodec;
use sqlrelay_protocol::constant::{
    ER_ACCESS_DENIED_ERROR, ER_NOT_SUPPORTED_YET, SQLSTATE_ACCESS_DENIED, SQLSTATE_GENERAL,
};
use sqlrelay_protocol::engine::{
    dispatch_command, frame_bytes, server_greeting, unsupported_error, verify_handshake_response,
    AuthOutcome, CommandOutcome,
};
use sqlrelay_protocol::framing::HEADER_LEN;
use sqlrelay_protocol::packet::{ErrPacket, HandshakeResponse41Packet, OkPacket};
use sqlrelay_protocol::payload::Payload;
use sqlrelay_protocol::{ConnectionSession, ConnectionState, CredentialStore};

use sqlrelay_control_panel::{BackendDecision, RoutingPolicy};

lazy_static::lazy_static! {
    static ref CONNECTION_ID_GENERATOR: AtomicU32 = AtomicU32::new(1);
}

fn next_connection_id() -> u32 {
    CONNECTION_ID_GENERATOR.fetch_add(1, Ordering::SeqCst)
}

fn illegal_transition(e: String) -> GatewayError {
    GatewayError::ProtocolMalformed(e)
}

/// Binds a socket, decodes whatever comes off it with [`MySQLCodec`], and
/// drives one [`ConnectionSession`] through the protocol engine.
pub struct GatewayHandler {
    credentials: Arc<dyn CredentialStore>,
    routing: Arc<dyn RoutingPolicy>,
}

impl GatewayHandler {
    pub fn new(credentials: Arc<dyn CredentialStore>, routing: Arc<dyn RoutingPolicy>) -> Self {
        GatewayHandler { credentials, routing }
    }
}

#[async_trait]
impl ServiceHandler for GatewayHandler {
    async fn handle(&self, mut socket: TcpStream) {
        let id = next_connection_id();
        let peer = socket.peer_addr().ok();
        if let Err(e) = drive_connection(id, &mut socket, &self.credentials, &self.routing).await {
            warn!("connection {} from {:?} ended: {}", id, peer, e);
        }
    }
}

/// The gateway's accept loop, bound to one host:port pair.
pub struct GatewayService {
    host: String,
    port: u32,
    handler: Arc<GatewayHandler>,
}

impl GatewayService {
    pub fn new(
        host: impl Into<String>,
        port: u32,
        credentials: Arc<dyn CredentialStore>,
        routing: Arc<dyn RoutingPolicy>,
    ) -> Self {
        GatewayService {
            host: host.into(),
            port,
            handler: Arc::new(GatewayHandler::new(credentials, routing)),
        }
    }

    /// Drives an already-bound listener. Split out from [`Service::serve`]
    /// so tests can bind an ephemeral port and learn the chosen address
    /// before traffic arrives.
    pub async fn serve_listener(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (socket, _peer) = listener.accept().await?;
            let handler = self.handler.clone();
            tokio::spawn(async move {
                handler.handle(socket).await;
            });
        }
    }
}

#[async_trait]
impl Service for GatewayService {
    async fn serve(&self) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("listening on {}", addr);
        self.serve_listener(listener).await?;
        Ok(())
    }
}

/// Convenience wrapper for tests: binds an ephemeral listener and drives it
/// with a fresh [`GatewayHandler`], without needing a [`GatewayService`].
pub async fn serve_listener(
    listener: TcpListener,
    credentials: Arc<dyn CredentialStore>,
    routing: Arc<dyn RoutingPolicy>,
) -> std::io::Result<()> {
    let handler = Arc::new(GatewayHandler::new(credentials, routing));
    loop {
        let (socket, _peer) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            handler.handle(socket).await;
        });
    }
}

async fn drive_connection(
    id: u32,
    socket: &mut TcpStream,
    credentials: &Arc<dyn CredentialStore>,
    routing: &Arc<dyn RoutingPolicy>,
) -> Result<()> {
    let server_version = sqlrelay_common::config::GatewayConfig::get_server_version();
    let scramble = sqlrelay_crypto::random_scramble(20);
    let mut session = ConnectionSession::new(id, scramble);
    session
        .transition(ConnectionState::PendingConnect)
        .map_err(illegal_transition)?;
    session
        .transition(ConnectionState::Connected)
        .map_err(illegal_transition)?;

    let mut channel = Channel::new(socket, MySQLCodec {});

    let greeting = server_greeting(&mut session, &server_version)?;
    channel.send(Some(vec![Bytes::from(greeting)])).await?;

    use futures::StreamExt;
    while let Some(frame) = channel.stream.next().await {
        let frame = frame?;
        if frame.len() < HEADER_LEN {
            break;
        }
        let incoming_seq = frame[3];
        let reply_seq = incoming_seq.wrapping_add(1);
        let body = frame[HEADER_LEN..].to_vec();

        if !session.authorized {
            let mut payload = Payload::from_bytes(bytes::BytesMut::from(&body[..]));
            let response = HandshakeResponse41Packet::decode(&mut payload)?;
            match verify_handshake_response(&mut session, &response, credentials.as_ref())? {
                AuthOutcome::Ok(bytes) => {
                    channel.send(Some(vec![Bytes::from(bytes)])).await?;
                }
                AuthOutcome::Failed(bytes) => {
                    channel.send(Some(vec![Bytes::from(bytes)])).await?;
                    break;
                }
            }
            continue;
        }

        match dispatch_command(&mut session, &body)? {
            CommandOutcome::Quit => break,
            CommandOutcome::DatabaseChanged(_) | CommandOutcome::Ping => {
                let ok = OkPacket::new();
                let reply = frame_bytes(&ok.encode().get_bytes(), reply_seq);
                channel.send(Some(vec![Bytes::from(reply)])).await?;
            }
            CommandOutcome::Query { sql, tag } => {
                session.transition(ConnectionState::Routing).map_err(illegal_transition)?;
                let decision = routing.decide(&sql, tag, &session.user).await;
                session
                    .transition(ConnectionState::WaitingResult)
                    .map_err(illegal_transition)?;

                match decision {
                    BackendDecision::AnswerLocally { response } => {
                        let reply = frame_bytes(&response, reply_seq);
                        channel.send(Some(vec![Bytes::from(reply)])).await?;
                    }
                    BackendDecision::Route { backend } => {
                        warn!(
                            "no backend wiring for '{}', statement routed to '{}' dropped",
                            sql, backend
                        );
                        let ok = OkPacket::new();
                        let reply = frame_bytes(&ok.encode().get_bytes(), reply_seq);
                        channel.send(Some(vec![Bytes::from(reply)])).await?;
                    }
                    BackendDecision::Reject { message } => {
                        let err = ErrPacket::new(ER_NOT_SUPPORTED_YET, SQLSTATE_GENERAL, message);
                        let reply = frame_bytes(&err.encode().get_bytes(), reply_seq);
                        channel.send(Some(vec![Bytes::from(reply)])).await?;
                    }
                }

                session.transition(ConnectionState::Idle).map_err(illegal_transition)?;
            }
            CommandOutcome::ChangeUser(change_user) => {
                let stored = credentials.stored_double_hash(&change_user.user);
                let accepted = match &stored {
                    Some(double_hash) => sqlrelay_crypto::verify_native_password(
                        &change_user.auth_response,
                        &session.scramble,
                        double_hash,
                    ),
                    None => false,
                };
                if accepted {
                    session.user = change_user.user.clone();
                    session.database = change_user.database.clone();
                    session.transition(ConnectionState::Idle).map_err(illegal_transition)?;
                    let ok = OkPacket::new();
                    let reply = frame_bytes(&ok.encode().get_bytes(), reply_seq);
                    channel.send(Some(vec![Bytes::from(reply)])).await?;
                } else {
                    session
                        .transition(ConnectionState::AuthFailed)
                        .map_err(illegal_transition)?;
                    warn!("change-user auth failed for user '{}'", change_user.user);
                    let err = ErrPacket::new(
                        ER_ACCESS_DENIED_ERROR,
                        SQLSTATE_ACCESS_DENIED,
                        format!("Access denied for user '{}'", change_user.user),
                    );
                    let reply = frame_bytes(&err.encode().get_bytes(), reply_seq);
                    channel.send(Some(vec![Bytes::from(reply)])).await?;
                    break;
                }
            }
            CommandOutcome::Unsupported(code) => {
                warn!("connection {} sent unsupported command 0x{:02x}, closing", id, code);
                let reply = unsupported_error(reply_seq, &format!("command 0x{:02x} not supported", code));
                channel.send(Some(vec![Bytes::from(reply)])).await?;
                break;
            }
        }
    }

    Ok(())
}
