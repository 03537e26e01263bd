//! mio readiness loop distributing one producer stream to many consumers.
//!
//! ```text
//!  producer ──publish()/attach_producer()──▶ ChunkPool ──cursor──▶ consumer 1
//!                                              │  init chunks   ──▶ consumer 2
//!  port map listener ──{magic, data port}──▶ client             ──▶ ...
//! ```
//!
//! One thread drives everything through [`BroadcastServer::run_once`]. Sockets
//! are non-blocking and edge-triggered; writes that hit `WouldBlock` resume on
//! the next writable readiness.

use std::collections::HashMap;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, info, trace, warn};

use super::{ChunkPool, ConsumerCursor, ServerStats, StatsBoard};
use crate::config::ServerConfig;
use crate::protocol::{FrameDecoder, Message, PROTOCOL_MAGIC, WireMessage};
use crate::session::MessageSink;
use crate::session::rendezvous::portmap_reply;
use crate::{CapacityError, EvwireError, ProtocolError, Result, TransportError};

const PORTMAP_TOKEN: Token = Token(0);
const DATA_TOKEN: Token = Token(1);
const PRODUCER_TOKEN: Token = Token(2);
const FIRST_PEER_TOKEN: usize = 16;

const MAX_EVENTS: usize = 256;

/// Lifecycle of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Running,
    /// No new input; consumers get until `deadline` to read what is committed.
    Draining { deadline: Instant },
    Closed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Running => write!(f, "running"),
            ServerState::Draining { .. } => write!(f, "draining"),
            ServerState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Portmap,
    Consumer,
}

#[derive(Debug)]
enum Link {
    AwaitingMagic { received: [u8; 4], len: usize },
    /// Port map connection sending `{magic, data port}`.
    Replying { reply: [u8; 8], written: usize },
    Streaming(ConsumerCursor),
}

#[derive(Debug)]
struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    role: Role,
    link: Link,
    since: Instant,
    blocked: bool,
}

impl Peer {
    fn new(stream: TcpStream, addr: SocketAddr, role: Role) -> Self {
        Self {
            stream,
            addr,
            role,
            link: Link::AwaitingMagic { received: [0; 4], len: 0 },
            since: Instant::now(),
            blocked: false,
        }
    }

    fn is_streaming(&self) -> bool {
        matches!(self.link, Link::Streaming(_))
    }

    /// Consume readable input. Returns true when the magic was just verified.
    fn read_ready(&mut self, data_port: u16) -> Result<bool> {
        let Link::AwaitingMagic { received, len } = &mut self.link else {
            return discard_input(&mut self.stream).map(|_| false);
        };
        while *len < received.len() {
            match self.stream.read(&mut received[*len..]) {
                Ok(0) => return Err(TransportError::Closed.into()),
                Ok(n) => *len += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EvwireError::io("read magic", err)),
            }
        }
        let found = u32::from_be_bytes(*received);
        if found != PROTOCOL_MAGIC {
            return Err(ProtocolError::BadMagic { expected: PROTOCOL_MAGIC, found }.into());
        }
        self.link = match self.role {
            Role::Portmap => Link::Replying { reply: portmap_reply(data_port), written: 0 },
            Role::Consumer => Link::Streaming(ConsumerCursor::new()),
        };
        Ok(true)
    }
}

/// Consumers never send after the magic; anything else is read and dropped.
fn discard_input(stream: &mut TcpStream) -> Result<()> {
    let mut scratch = [0u8; 512];
    loop {
        match stream.read(&mut scratch) {
            Ok(0) => return Err(TransportError::Closed.into()),
            Ok(_) => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(EvwireError::io("consumer read", err)),
        }
    }
}

#[derive(Debug)]
struct Producer {
    stream: TcpStream,
    magic: [u8; 4],
    magic_len: usize,
    verified: bool,
    decoder: FrameDecoder,
}

#[derive(Debug, Default)]
struct Flushed {
    sent: usize,
    skipped: u64,
    blocked: bool,
}

/// Write committed chunks to one consumer until it blocks or catches up.
fn write_chunks(pool: &mut ChunkPool, cursor: &mut ConsumerCursor, stream: &mut TcpStream) -> std::io::Result<Flushed> {
    let mut flushed = Flushed::default();
    loop {
        flushed.skipped += pool.sync(cursor);
        let bytes = pool.readable(cursor);
        if bytes.is_empty() {
            return Ok(flushed);
        }
        match stream.write(bytes) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => {
                cursor.advance(n);
                flushed.sent += n;
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                flushed.blocked = true;
                return Ok(flushed);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

enum CloseReason {
    /// Port map reply delivered.
    Finished,
    Disconnected,
    Rejected(EvwireError),
    Failed(EvwireError),
}

/// Broadcast server.
///
/// Messages reach it through [`publish`](Self::publish) (or the
/// [`MessageSink`] impl, so a [`crate::session::ProducerSession`] can write
/// straight into it) or from a producer socket handed to
/// [`attach_producer`](Self::attach_producer).
pub struct BroadcastServer {
    config: ServerConfig,
    poll: Poll,
    events: Events,
    data_listener: TcpListener,
    data_addr: SocketAddr,
    portmap_listener: Option<TcpListener>,
    producer: Option<Producer>,
    peers: HashMap<Token, Peer>,
    next_token: usize,
    pool: ChunkPool,
    state: ServerState,
    terminated: bool,
    stats: ServerStats,
    board: Arc<StatsBoard>,
}

impl BroadcastServer {
    /// Bind the data listener and, if configured, the port map listener.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let poll = Poll::new().map_err(|e| EvwireError::io("create poll", e))?;

        let mut data_listener = TcpListener::bind(SocketAddr::new(config.bind_address, config.data_port))
            .map_err(|e| EvwireError::io(format!("bind data port {}", config.data_port), e))?;
        poll.registry()
            .register(&mut data_listener, DATA_TOKEN, Interest::READABLE)
            .map_err(|e| EvwireError::io("register data listener", e))?;
        let data_addr = data_listener.local_addr().map_err(|e| EvwireError::io("data listener address", e))?;

        let portmap_listener = match config.portmap_port {
            Some(port) => {
                let mut listener = TcpListener::bind(SocketAddr::new(config.bind_address, port))
                    .map_err(|e| EvwireError::io(format!("bind port map port {}", port), e))?;
                poll.registry()
                    .register(&mut listener, PORTMAP_TOKEN, Interest::READABLE)
                    .map_err(|e| EvwireError::io("register port map listener", e))?;
                Some(listener)
            }
            None => None,
        };

        let server = Self {
            pool: ChunkPool::new(config.chunk_size, config.memory_ceiling),
            config,
            poll,
            events: Events::with_capacity(MAX_EVENTS),
            data_listener,
            data_addr,
            portmap_listener,
            producer: None,
            peers: HashMap::new(),
            next_token: FIRST_PEER_TOKEN,
            state: ServerState::Running,
            terminated: false,
            stats: ServerStats::default(),
            board: Arc::new(StatsBoard::new()),
        };
        info!(data = %server.data_addr, portmap = ?server.portmap_addr(), "Broadcast server listening");
        Ok(server)
    }

    /// Address consumers connect to directly.
    pub fn local_addr(&self) -> SocketAddr {
        self.data_addr
    }

    pub fn portmap_addr(&self) -> Option<SocketAddr> {
        self.portmap_listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pool(&self) -> &ChunkPool {
        &self.pool
    }

    /// Consumers that completed the magic exchange.
    pub fn consumer_count(&self) -> usize {
        self.peers.values().filter(|p| p.is_streaming()).count()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            chunks_allocated: self.pool.chunks_allocated(),
            chunks_reclaimed: self.pool.chunks_reclaimed(),
            consumers_active: self.consumer_count() as u64,
            bytes_in_use: self.pool.in_use() as u64,
            peak_bytes_in_use: self.pool.peak_in_use() as u64,
            ..self.stats
        }
    }

    /// Board other threads can read statistics from.
    pub fn stats_board(&self) -> Arc<StatsBoard> {
        Arc::clone(&self.board)
    }

    /// Append a message for distribution. It becomes visible at the next commit.
    pub fn publish(&mut self, message: &WireMessage) -> Result<()> {
        if self.state != ServerState::Running || self.terminated {
            let state = if self.terminated { "terminated".to_string() } else { self.state.to_string() };
            return Err(ProtocolError::UnexpectedMessage { kind: message.kind().to_string(), state }.into());
        }
        self.pool.append(message)?;
        self.stats.messages_published += 1;
        self.stats.bytes_published += message.encoded_len() as u64;
        if message.kind().is_terminal() {
            self.terminated = true;
            debug!(kind = %message.kind(), "Terminal message published");
        }
        Ok(())
    }

    /// Commit the open chunk so consumers can see it.
    pub fn flush(&mut self) {
        self.pool.commit();
    }

    /// Take producer input from `stream`, which must start with the magic.
    ///
    /// End of stream begins draining.
    pub fn attach_producer(&mut self, mut stream: TcpStream) -> Result<()> {
        if self.producer.is_some() {
            return Err(EvwireError::config("a producer is already attached"));
        }
        if self.state != ServerState::Running {
            return Err(EvwireError::config(format!("cannot attach a producer while {}", self.state)));
        }
        self.poll
            .registry()
            .register(&mut stream, PRODUCER_TOKEN, Interest::READABLE)
            .map_err(|e| EvwireError::io("register producer", e))?;
        info!(peer = ?stream.peer_addr().ok(), "Producer attached");
        self.producer = Some(Producer {
            stream,
            magic: [0; 4],
            magic_len: 0,
            verified: false,
            decoder: FrameDecoder::new(self.config.max_message_size),
        });
        // Data may already be queued; edge-triggered readiness would not report it.
        self.service_producer();
        Ok(())
    }

    /// One poll iteration: commit, handle readiness, write to consumers,
    /// expire handshakes and finish draining when possible.
    pub fn run_once(&mut self, timeout: Duration) -> Result<()> {
        let timeout = match self.state {
            ServerState::Closed => return Ok(()),
            ServerState::Running => timeout,
            ServerState::Draining { deadline } => timeout.min(deadline.saturating_duration_since(Instant::now())),
        };
        self.pool.commit();

        if let Err(err) = self.poll.poll(&mut self.events, Some(timeout)) {
            if err.kind() != ErrorKind::Interrupted {
                return Err(EvwireError::io("poll", err));
            }
        }
        let ready: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|e| (e.token(), e.is_readable() || e.is_read_closed() || e.is_error(), e.is_writable()))
            .collect();

        for (token, readable, writable) in ready {
            match token {
                PORTMAP_TOKEN => self.accept(Role::Portmap),
                DATA_TOKEN => self.accept(Role::Consumer),
                PRODUCER_TOKEN => self.service_producer(),
                token => self.service_peer(token, readable, writable),
            }
        }

        self.pump();
        self.expire_handshakes();

        if let ServerState::Draining { deadline } = self.state {
            let drained = self.peers.values().all(|peer| match &peer.link {
                Link::Streaming(cursor) => self.pool.is_drained(cursor),
                _ => true,
            });
            if drained || Instant::now() >= deadline {
                if !drained {
                    warn!(consumers = self.consumer_count(), "Drain deadline passed, closing consumers");
                }
                self.close_all();
            }
        }

        self.board.publish(&self.stats());
        Ok(())
    }

    /// Run until the server is closed.
    pub fn run(&mut self) -> Result<ServerStats> {
        while self.state != ServerState::Closed {
            self.run_once(self.config.poll_interval())?;
        }
        Ok(self.stats())
    }

    /// Publish `done` (or `abort`) unless a terminal message was already
    /// published, then drain consumers until they caught up or the shutdown
    /// timeout passes, and free every chunk.
    pub fn shutdown(&mut self, done: bool) -> Result<ServerStats> {
        if self.state == ServerState::Running {
            if !self.terminated {
                let message = if done {
                    Message::Done
                } else {
                    Message::Abort { reason: "server shutdown".to_string() }
                };
                if let Err(err) = self.publish(&message.encode()) {
                    warn!(error = %err, "Could not publish terminal message");
                }
            }
            self.begin_drain();
        }
        while matches!(self.state, ServerState::Draining { .. }) {
            self.run_once(self.config.poll_interval())?;
        }
        Ok(self.stats())
    }

    fn begin_drain(&mut self) {
        if self.state != ServerState::Running {
            return;
        }
        self.pool.seal_all();
        let deadline = Instant::now() + self.config.shutdown_timeout();
        self.state = ServerState::Draining { deadline };
        info!(consumers = self.consumer_count(), timeout = ?self.config.shutdown_timeout(), "Draining");
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.peers.keys().copied().collect();
        for token in tokens {
            self.close_peer(token, CloseReason::Finished);
        }
        if let Some(mut producer) = self.producer.take() {
            let _ = self.poll.registry().deregister(&mut producer.stream);
        }
        self.pool.clear();
        self.state = ServerState::Closed;
        let stats = self.stats();
        self.board.publish(&stats);
        info!(
            messages = stats.messages_published,
            bytes_sent = stats.bytes_sent,
            skipped = stats.chunks_skipped,
            "Broadcast server closed"
        );
    }

    fn accept(&mut self, role: Role) {
        loop {
            let listener = match role {
                Role::Portmap => self.portmap_listener.as_ref(),
                Role::Consumer => Some(&self.data_listener),
            };
            let Some(listener) = listener else {
                return;
            };
            match listener.accept() {
                Ok((mut stream, addr)) => {
                    if self.state != ServerState::Running {
                        debug!(%addr, "Refusing connection while {}", self.state);
                        continue;
                    }
                    if role == Role::Consumer {
                        let max = self.config.max_consumers;
                        if self.peers.values().filter(|p| p.role == Role::Consumer).count() >= max {
                            let err = EvwireError::from(CapacityError::TooManyConsumers { max });
                            warn!(%addr, error = %err, "Rejecting consumer");
                            self.stats.consumers_rejected += 1;
                            continue;
                        }
                    }

                    let token = Token(self.next_token);
                    self.next_token += 1;
                    if let Err(err) =
                        self.poll.registry().register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
                    {
                        warn!(%addr, error = %err, "Failed to register connection");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    debug!(%addr, ?role, ?token, "Accepted connection");
                    self.peers.insert(token, Peer::new(stream, addr, role));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(?role, error = %err, "Accept failed");
                    break;
                }
            }
        }
    }

    fn service_peer(&mut self, token: Token, readable: bool, writable: bool) {
        let data_port = self.data_addr.port();
        let Some(peer) = self.peers.get_mut(&token) else {
            return;
        };
        if writable {
            peer.blocked = false;
        }
        if !readable {
            return;
        }
        let (addr, role) = (peer.addr, peer.role);
        match peer.read_ready(data_port) {
            Ok(true) if role == Role::Consumer => {
                self.stats.consumers_accepted += 1;
                info!(%addr, consumers = self.consumer_count(), "Consumer joined");
            }
            Ok(_) => {}
            Err(err) if err.is_retryable() => {}
            Err(EvwireError::Transport(TransportError::Closed)) => self.close_peer(token, CloseReason::Disconnected),
            Err(err @ EvwireError::Protocol(_)) => self.close_peer(token, CloseReason::Rejected(err)),
            Err(err) => self.close_peer(token, CloseReason::Failed(err)),
        }
    }

    /// Write pending data to every peer that is not blocked.
    fn pump(&mut self) {
        let mut finished = Vec::new();
        for (token, peer) in self.peers.iter_mut() {
            if peer.blocked {
                continue;
            }
            match &mut peer.link {
                Link::Streaming(cursor) => match write_chunks(&mut self.pool, cursor, &mut peer.stream) {
                    Ok(flushed) => {
                        self.stats.bytes_sent += flushed.sent as u64;
                        self.stats.chunks_skipped += flushed.skipped;
                        peer.blocked = flushed.blocked;
                        if flushed.sent > 0 {
                            trace!(addr = %peer.addr, bytes = flushed.sent, "Sent to consumer");
                        }
                    }
                    Err(err) => {
                        let reason = if matches!(err.kind(), ErrorKind::BrokenPipe | ErrorKind::ConnectionReset) {
                            CloseReason::Disconnected
                        } else {
                            CloseReason::Failed(EvwireError::io("consumer write", err))
                        };
                        finished.push((*token, reason));
                    }
                },
                Link::Replying { reply, written } => loop {
                    match peer.stream.write(&reply[*written..]) {
                        Ok(n) => {
                            *written += n;
                            if *written == reply.len() {
                                finished.push((*token, CloseReason::Finished));
                                break;
                            }
                        }
                        Err(err) if err.kind() == ErrorKind::WouldBlock => {
                            peer.blocked = true;
                            break;
                        }
                        Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                        Err(err) => {
                            finished.push((*token, CloseReason::Failed(EvwireError::io("port map reply", err))));
                            break;
                        }
                    }
                },
                Link::AwaitingMagic { .. } => {}
            }
        }
        for (token, reason) in finished {
            self.close_peer(token, reason);
        }
    }

    fn expire_handshakes(&mut self) {
        let timeout = self.config.handshake_timeout();
        let expired: Vec<Token> = self
            .peers
            .iter()
            .filter(|(_, p)| !p.is_streaming() && p.since.elapsed() >= timeout)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            let err = EvwireError::malformed("handshake", format!("no magic within {:?}", timeout));
            self.close_peer(token, CloseReason::Rejected(err));
        }
    }

    fn close_peer(&mut self, token: Token, reason: CloseReason) {
        let Some(mut peer) = self.peers.remove(&token) else {
            return;
        };
        if let Link::Streaming(cursor) = &mut peer.link {
            self.pool.detach(cursor);
        }
        let _ = self.poll.registry().deregister(&mut peer.stream);
        match reason {
            CloseReason::Finished => debug!(addr = %peer.addr, role = ?peer.role, "Connection closed"),
            CloseReason::Disconnected => info!(addr = %peer.addr, role = ?peer.role, "Peer disconnected"),
            CloseReason::Rejected(err) => {
                self.stats.consumers_rejected += 1;
                warn!(addr = %peer.addr, role = ?peer.role, error = %err, "Rejected connection");
            }
            CloseReason::Failed(err) => warn!(addr = %peer.addr, role = ?peer.role, error = %err, "Connection failed"),
        }
    }

    /// Read everything the producer socket has and republish it.
    fn service_producer(&mut self) {
        let Some(mut producer) = self.producer.take() else {
            return;
        };
        match self.read_producer(&mut producer) {
            Ok(()) => {
                self.pool.commit();
                self.producer = Some(producer);
            }
            Err(err) => {
                let _ = self.poll.registry().deregister(&mut producer.stream);
                match &err {
                    EvwireError::Transport(TransportError::Closed) => info!("Producer disconnected"),
                    _ => warn!(error = %err, "Producer input failed"),
                }
                if !self.terminated && self.state == ServerState::Running {
                    let abort = Message::Abort { reason: format!("producer lost: {}", err) };
                    if let Err(err) = self.publish(&abort.encode()) {
                        warn!(error = %err, "Could not publish abort");
                    }
                }
                self.begin_drain();
            }
        }
    }

    fn read_producer(&mut self, producer: &mut Producer) -> Result<()> {
        while producer.magic_len < producer.magic.len() {
            match producer.stream.read(&mut producer.magic[producer.magic_len..]) {
                Ok(0) => return Err(TransportError::Closed.into()),
                Ok(n) => producer.magic_len += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(EvwireError::io("read producer magic", err)),
            }
        }
        if !producer.verified {
            let found = u32::from_be_bytes(producer.magic);
            if found != PROTOCOL_MAGIC {
                return Err(ProtocolError::BadMagic { expected: PROTOCOL_MAGIC, found }.into());
            }
            producer.verified = true;
            debug!("Producer magic verified");
        }
        loop {
            while let Some(message) = producer.decoder.next_message()? {
                self.publish(&message)?;
            }
            match producer.decoder.read_from(&mut producer.stream) {
                Ok(_) => {}
                Err(err) if err.is_retryable() => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }
}

impl fmt::Debug for BroadcastServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastServer")
            .field("data_addr", &self.data_addr)
            .field("state", &self.state)
            .field("peers", &self.peers.len())
            .field("producer", &self.producer.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl MessageSink for BroadcastServer {
    fn send(&mut self, message: &WireMessage) -> Result<()> {
        self.publish(message)
    }

    fn flush(&mut self) -> Result<()> {
        self.pool.commit();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Rendezvous, SessionConfig};
    use crate::protocol::RequestKind;
    use crate::session::SessionState;
    use crate::session::rendezvous;
    use std::net::TcpStream as StdStream;

    const TICK: Duration = Duration::from_millis(10);

    fn server() -> BroadcastServer {
        BroadcastServer::bind(ServerConfig::loopback()).unwrap()
    }

    fn spin_until(server: &mut BroadcastServer, mut done: impl FnMut(&BroadcastServer) -> bool) {
        for _ in 0..500 {
            if done(server) {
                return;
            }
            server.run_once(TICK).unwrap();
        }
        panic!("condition not reached: {:?}", server);
    }

    fn client(server: &BroadcastServer, magic: u32) -> StdStream {
        let mut stream = StdStream::connect(server.local_addr()).unwrap();
        stream.write_all(&magic.to_be_bytes()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }

    #[test]
    fn bad_magic_drops_only_that_consumer() {
        let mut server = server();
        let _good = client(&server, PROTOCOL_MAGIC);
        let mut bad = client(&server, 0xdead_beef);

        spin_until(&mut server, |s| s.consumer_count() == 1 && s.stats().consumers_rejected == 1);
        let mut buf = [0u8; 1];
        assert_eq!(bad.read(&mut buf).unwrap_or(0), 0);
        assert_eq!(server.stats().consumers_accepted, 1);
    }

    #[test]
    fn consumer_limit_is_enforced() {
        let config = ServerConfig { max_consumers: 1, ..ServerConfig::loopback() };
        let mut server = BroadcastServer::bind(config).unwrap();
        let _first = client(&server, PROTOCOL_MAGIC);
        spin_until(&mut server, |s| s.consumer_count() == 1);
        let _second = client(&server, PROTOCOL_MAGIC);
        spin_until(&mut server, |s| s.stats().consumers_rejected == 1);
        assert_eq!(server.consumer_count(), 1);
    }

    #[test]
    fn silent_clients_time_out() {
        let config = ServerConfig { handshake_timeout_ms: 50, ..ServerConfig::loopback() };
        let mut server = BroadcastServer::bind(config).unwrap();
        let _silent = StdStream::connect(server.local_addr()).unwrap();
        spin_until(&mut server, |s| s.stats().consumers_rejected == 1);
        assert!(server.peers.is_empty());
    }

    #[test]
    fn consumers_receive_committed_messages() {
        let mut server = server();
        let mut consumer = client(&server, PROTOCOL_MAGIC);
        spin_until(&mut server, |s| s.consumer_count() == 1);

        server.publish(&WireMessage::empty(RequestKind::SetupDone)).unwrap();
        server.publish(&WireMessage::new(RequestKind::EventFill, vec![1, 2, 3, 4])).unwrap();
        server.flush();
        spin_until(&mut server, |s| s.stats().bytes_sent == 20);

        let mut decoder = FrameDecoder::default();
        let first = decoder.read_message(&mut consumer).unwrap();
        let second = decoder.read_message(&mut consumer).unwrap();
        assert_eq!(first.kind(), RequestKind::SetupDone);
        assert_eq!(second.payload(), &[1, 2, 3, 4]);
    }

    #[test]
    fn portmap_points_at_data_port() {
        let config = ServerConfig { portmap_port: Some(0), ..ServerConfig::loopback() };
        let mut server = BroadcastServer::bind(config).unwrap();
        let portmap = server.portmap_addr().unwrap();
        let data_port = server.local_addr().port();

        let session = SessionConfig { rendezvous: Rendezvous::Portmap, ..SessionConfig::default() };
        let handle = std::thread::spawn(move || {
            let mut state = SessionState::default();
            rendezvous::connect(portmap, &session, &mut state).map(|s| s.peer_addr().unwrap().port())
        });
        spin_until(&mut server, |s| s.consumer_count() == 1);
        assert_eq!(handle.join().unwrap().unwrap(), data_port);
    }

    #[test]
    fn shutdown_publishes_done_once_and_closes() {
        let mut server = server();
        let mut consumer = client(&server, PROTOCOL_MAGIC);
        spin_until(&mut server, |s| s.consumer_count() == 1);

        server.publish(&WireMessage::empty(RequestKind::SetupDone)).unwrap();
        server.publish(&WireMessage::empty(RequestKind::Done)).unwrap();
        assert!(server.publish(&WireMessage::empty(RequestKind::KeepAlive)).is_err());

        let stats = server.shutdown(true).unwrap();
        assert_eq!(server.state(), ServerState::Closed);
        assert_eq!(stats.messages_published, 2);
        assert_eq!(stats.bytes_in_use, 0);
        assert_eq!(server.stats_board().snapshot(), stats);

        let mut bytes = Vec::new();
        consumer.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[8..12], &RequestKind::Done.tag().to_be_bytes());
    }

    #[test]
    fn attached_producer_is_republished() {
        let mut server = server();
        let mut consumer = client(&server, PROTOCOL_MAGIC);
        spin_until(&mut server, |s| s.consumer_count() == 1);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut upstream = StdStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        server.attach_producer(TcpStream::from_std(accepted)).unwrap();

        upstream.write_all(&PROTOCOL_MAGIC.to_be_bytes()).unwrap();
        upstream.write_all(&WireMessage::empty(RequestKind::SetupDone).to_bytes()).unwrap();
        upstream.write_all(&WireMessage::new(RequestKind::EventFill, vec![9; 4]).to_bytes()).unwrap();
        drop(upstream);

        spin_until(&mut server, |s| s.state() == ServerState::Closed);
        let stats = server.stats();
        assert_eq!(stats.messages_published, 3);

        let mut decoder = FrameDecoder::default();
        let kinds: Vec<RequestKind> =
            (0..3).map(|_| decoder.read_message(&mut consumer).unwrap().kind()).collect();
        assert_eq!(kinds, [RequestKind::SetupDone, RequestKind::EventFill, RequestKind::Abort]);
    }
}
