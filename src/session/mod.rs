//! Producer and consumer sessions.
//!
//! A session connects (optionally through the port map rendezvous), exchanges
//! the record layout during setup, verifies it with the layout checksum and
//! then streams events until `done` or `abort`.
//!
//! ```rust
//! use std::io::Cursor;
//! use evwire::config::SessionConfig;
//! use evwire::layout::StructureDescriptor;
//! use evwire::session::{ConsumerSession, ProducerOptions, ProducerSession, StreamSink};
//! use evwire::types::ScalarType;
//!
//! let mut d = StructureDescriptor::new("tracks");
//! d.describe(0, 4, ScalarType::Uint32, "ntracks", None, Some(8)).unwrap();
//! d.describe(4, 32, ScalarType::Float32, "pt", Some("ntracks"), None).unwrap();
//!
//! let mut producer = ProducerSession::new(StreamSink::new(Vec::new()), d.clone(), ProducerOptions::default()).unwrap();
//! let mut event = producer.new_event();
//! event.set(&d, "ntracks", 0, 1u32).unwrap();
//! event.set(&d, "pt", 0, 4.5f32).unwrap();
//! producer.write_event(&event, &[], &[]).unwrap();
//! producer.close().unwrap();
//!
//! let bytes = producer.into_sink().into_inner();
//! let mut consumer = ConsumerSession::from_reader(Cursor::new(bytes), SessionConfig::default(), None).unwrap();
//! let received = consumer.fetch_event().unwrap().unwrap();
//! assert_eq!(received.get::<f32>(&d, "pt", 0).unwrap(), 4.5);
//! assert!(consumer.fetch_event().unwrap().is_none());
//! ```

mod consumer;
mod producer;
pub mod rendezvous;
mod sink;
mod state;

pub use consumer::ConsumerSession;
pub use producer::{ProducerOptions, ProducerSession};
pub use sink::{MessageSink, RecordSink, StreamSink};
pub use state::SessionState;
