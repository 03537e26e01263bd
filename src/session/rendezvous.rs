//! Client side of the connection handshake.
//!
//! With [`Rendezvous::Portmap`] the client asks the well-known port for the
//! data port: it sends the magic, reads `{magic, port}` within the port map
//! timeout, then reconnects to the data port and sends the magic again. A
//! direct connection sends the magic once.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};

use tracing::{debug, info};

use super::SessionState;
use crate::config::{Rendezvous, SessionConfig};
use crate::protocol::PROTOCOL_MAGIC;
use crate::{EvwireError, ProtocolError, Result};

/// Connect to `addr` and complete the magic exchange, leaving `state` at `Connected`.
pub fn connect(addr: SocketAddr, config: &SessionConfig, state: &mut SessionState) -> Result<TcpStream> {
    match establish(addr, config, state) {
        Ok(stream) => {
            state.transition(SessionState::Connected)?;
            info!(peer = %addr, "Connected");
            Ok(stream)
        }
        Err(err) => {
            state.close();
            Err(err)
        }
    }
}

fn establish(addr: SocketAddr, config: &SessionConfig, state: &mut SessionState) -> Result<TcpStream> {
    state.transition(SessionState::Connecting)?;
    match config.rendezvous {
        Rendezvous::Direct => open_data_channel(addr, config),
        Rendezvous::Portmap => {
            let mut control = dial(addr, config)?;
            send_magic(&mut control)?;
            state.transition(SessionState::AwaitingPortmap)?;
            let port = read_portmap_reply(&mut control, config)?;
            drop(control);
            debug!(%addr, port, "Port map resolved data port");
            open_data_channel(SocketAddr::new(addr.ip(), port), config)
        }
    }
}

fn dial(addr: SocketAddr, config: &SessionConfig) -> Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, config.connect_timeout())
        .map_err(|e| EvwireError::io(format!("connect to {}", addr), e))?;
    stream.set_nodelay(true).map_err(|e| EvwireError::io("set nodelay", e))?;
    Ok(stream)
}

fn open_data_channel(addr: SocketAddr, config: &SessionConfig) -> Result<TcpStream> {
    let mut stream = dial(addr, config)?;
    send_magic(&mut stream)?;
    Ok(stream)
}

fn send_magic(stream: &mut TcpStream) -> Result<()> {
    stream.write_all(&PROTOCOL_MAGIC.to_be_bytes()).map_err(|e| EvwireError::io("send magic", e))
}

fn read_portmap_reply(stream: &mut TcpStream, config: &SessionConfig) -> Result<u16> {
    let timeout = config.portmap_timeout();
    stream.set_read_timeout(Some(timeout)).map_err(|e| EvwireError::io("set read timeout", e))?;

    let mut reply = [0u8; 8];
    if let Err(err) = stream.read_exact(&mut reply) {
        return Err(match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::UnexpectedEof => {
                ProtocolError::PortmapTimeout { duration: timeout }.into()
            }
            _ => EvwireError::io("read port map reply", err),
        });
    }
    parse_portmap_reply(reply)
}

/// Decode `{magic, port}`; the port travels as a full word.
pub(crate) fn parse_portmap_reply(reply: [u8; 8]) -> Result<u16> {
    let magic = u32::from_be_bytes([reply[0], reply[1], reply[2], reply[3]]);
    if magic != PROTOCOL_MAGIC {
        return Err(ProtocolError::BadMagic { expected: PROTOCOL_MAGIC, found: magic }.into());
    }
    let port = u32::from_be_bytes([reply[4], reply[5], reply[6], reply[7]]);
    u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| EvwireError::malformed("port map reply", format!("invalid port {}", port)))
}

/// Build the `{magic, port}` reply sent by the port map listener.
pub(crate) fn portmap_reply(port: u16) -> [u8; 8] {
    let mut reply = [0u8; 8];
    reply[..4].copy_from_slice(&PROTOCOL_MAGIC.to_be_bytes());
    reply[4..].copy_from_slice(&u32::from(port).to_be_bytes());
    reply
}
