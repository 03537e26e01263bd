//! Async consumer façade.
//!
//! A [`Subscription`] runs a blocking [`crate::session::ConsumerSession`] on
//! tokio's blocking pool and hands its events out as streams: every event in
//! order through [`Subscription::events`], or only the newest one, optionally
//! rate limited, through [`Subscription::latest`].
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use evwire::config::SessionConfig;
//! use evwire::subscription::{Subscription, SubscriptionOptions};
//! use evwire::types::UpdateRate;
//!
//! # async fn example() -> evwire::Result<()> {
//! let addr = "127.0.0.1:56577".parse().unwrap();
//! let subscription = Subscription::connect(addr, SessionConfig::default(), None, SubscriptionOptions::default()).await?;
//! let mut display = subscription.latest(UpdateRate::Max(10));
//! while let Some(frame) = display.next().await {
//!     println!("event {}: {:?}", frame.sequence(), frame.u32("nhits"));
//! }
//! # Ok(())
//! # }
//! ```

mod connection;
mod driver;
mod frame;
mod throttle;

pub use connection::{Subscription, SubscriptionOptions};
pub use frame::EventFrame;
pub use throttle::{Throttle, ThrottleExt};
