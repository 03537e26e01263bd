//! Broadcast distribution server.
//!
//! A single producer stream is fanned out to any number of consumers that
//! connect directly or through the port map rendezvous. Messages are stored
//! once, in refcounted chunks; each consumer reads through its own cursor, so a
//! slow consumer costs memory only until the ceiling forces its unread chunks to
//! be reclaimed.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use evwire::config::ServerConfig;
//! use evwire::layout::StructureDescriptor;
//! use evwire::server::BroadcastServer;
//! use evwire::session::{ProducerOptions, ProducerSession};
//! use evwire::types::ScalarType;
//!
//! # fn main() -> evwire::Result<()> {
//! let mut d = StructureDescriptor::new("scaler");
//! d.describe(0, 4, ScalarType::Uint32, "counts", None, None)?;
//!
//! let server = BroadcastServer::bind(ServerConfig::default())?;
//! let mut producer = ProducerSession::new(server, d.clone(), ProducerOptions::default())?;
//! for counts in 0..1000u32 {
//!     let mut event = producer.new_event();
//!     event.set(&d, "counts", 0, counts)?;
//!     producer.write_event(&event, &[], &[])?;
//!     producer.sink_mut().run_once(Duration::from_millis(1))?;
//! }
//! producer.close()?;
//! let stats = producer.into_sink().shutdown(true)?;
//! println!("sent {} bytes", stats.bytes_sent);
//! # Ok(())
//! # }
//! ```

mod broadcast;
mod chunk;
mod cursor;
mod stats;

pub use broadcast::{BroadcastServer, ServerState};
pub use chunk::{ChunkHandle, ChunkPool};
pub use cursor::{ConsumerCursor, CursorPhase};
pub use stats::{ServerStats, StatsBoard};
