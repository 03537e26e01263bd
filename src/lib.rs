//! Self-describing event record protocol for data acquisition.
//!
//! evwire moves fixed-layout binary records from one producer to any number of
//! consumers. Producers describe the record layout once during setup; consumers
//! match it against their own layout by field name, so either side can add,
//! drop or resize fields without breaking the other.
//!
//! # Features
//!
//! - **Layout negotiation**: structure descriptors, compiled pack lists and a
//!   name-based struct matcher with clamped array projection
//! - **Compact wire format**: plain packing of live slots, or a bit-compacted
//!   encoding that folds zero runs into skip deltas
//! - **Verified handshake**: port map rendezvous, MD5 layout checksum and
//!   shipped pack-list comparison
//! - **Broadcast server**: a mio loop with refcounted chunks, late-join replay
//!   of the setup and a hard memory ceiling
//! - **Async façade**: tokio streams of every event or of the latest one
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use evwire::Evwire;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> evwire::Result<()> {
//!     let addr = "127.0.0.1:56577".parse().unwrap();
//!     let mut subscription = Evwire::subscribe(addr).await?;
//!     let mut events = subscription.events().expect("lossless subscription");
//!
//!     while let Some(frame) = events.next().await {
//!         println!("{:?} hits in event {}", frame.u32("nhits"), frame.sequence());
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Layout and wire format
pub mod codec;
pub mod layout;
pub mod protocol;

// Sessions and distribution
pub mod config;
pub mod server;
pub mod session;
pub mod subscription;

// Core exports
pub use error::*;
pub use types::{Field, ScalarType, SlotValue, UpdateRate, Value};

pub use codec::Encoding;
pub use config::{ServerConfig, SessionConfig};
pub use layout::{EventBuffer, MapList, PackList, StructureDescriptor};

// Main API exports
pub use server::{BroadcastServer, ServerStats};
pub use session::{ConsumerSession, ProducerOptions, ProducerSession};
pub use subscription::{EventFrame, Subscription, SubscriptionOptions};

/// Unified entry point for evwire servers and clients.
///
/// # Examples
///
/// ## Serving
/// ```rust,no_run
/// use evwire::{Evwire, ServerConfig};
///
/// fn main() -> evwire::Result<()> {
///     let mut server = Evwire::serve(ServerConfig::default())?;
///     server.run()?;
///     Ok(())
/// }
/// ```
///
/// ## Subscribing
/// ```rust,no_run
/// use evwire::Evwire;
///
/// #[tokio::main]
/// async fn main() -> evwire::Result<()> {
///     let subscription = Evwire::subscribe("127.0.0.1:56577".parse().unwrap()).await?;
///     println!("layout: {}", subscription.layout().name());
///     Ok(())
/// }
/// ```
pub struct Evwire;

impl Evwire {
    /// Bind a broadcast server.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a port cannot be bound.
    pub fn serve(config: ServerConfig) -> Result<BroadcastServer> {
        BroadcastServer::bind(config)
    }

    /// Connect through the port map and accept the producer's layout as is.
    ///
    /// # Errors
    ///
    /// Returns an error if the rendezvous, the connection or the setup fails.
    pub async fn subscribe(addr: std::net::SocketAddr) -> Result<Subscription> {
        Subscription::connect(addr, SessionConfig::default(), None, SubscriptionOptions::default()).await
    }

    /// Connect and decode into `layout`, matching fields by name.
    pub async fn subscribe_as(addr: std::net::SocketAddr, layout: StructureDescriptor) -> Result<Subscription> {
        Subscription::connect(addr, SessionConfig::default(), Some(layout), SubscriptionOptions::default()).await
    }
}
