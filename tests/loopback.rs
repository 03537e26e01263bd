//! End-to-end tests over loopback TCP: a producer publishing through the
//! broadcast server to blocking and async consumers.

use std::net::SocketAddr;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use evwire::config::{Rendezvous, ServerConfig, SessionConfig};
use evwire::layout::{EventBuffer, StructureDescriptor};
use evwire::server::{BroadcastServer, ServerState};
use evwire::session::{ConsumerSession, ProducerOptions, ProducerSession};
use evwire::subscription::{EventFrame, Subscription, SubscriptionOptions};
use evwire::types::ScalarType;
use futures::StreamExt;

const TICK: Duration = Duration::from_millis(5);

fn hits_layout(max_hits: u32) -> Result<StructureDescriptor> {
    let width = max_hits * 4;
    let mut d = StructureDescriptor::new("hits");
    d.describe(0, 4, ScalarType::Uint32, "event", None, None)?;
    d.describe(4, 4, ScalarType::Uint32, "nhits", None, Some(max_hits))?;
    d.describe(8, width, ScalarType::Uint32, "channel", Some("nhits"), None)?;
    d.describe(8 + width, width, ScalarType::Float32, "energy", Some("nhits"), None)?;
    Ok(d)
}

fn hits_event(d: &StructureDescriptor, number: u32) -> Result<EventBuffer> {
    let mut event = EventBuffer::new(d);
    let hits = number % 8;
    event.set(d, "event", 0, number)?;
    event.set(d, "nhits", 0, hits)?;
    for i in 0..hits {
        event.set(d, "channel", i, number * 10 + i)?;
        event.set(d, "energy", i, i as f32 + 0.5)?;
    }
    Ok(event)
}

fn direct() -> SessionConfig {
    SessionConfig { rendezvous: Rendezvous::Direct, ..SessionConfig::default() }
}

fn spin_until(server: &mut BroadcastServer, mut done: impl FnMut(&BroadcastServer) -> bool) -> Result<()> {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done(server) {
        if Instant::now() > deadline {
            bail!("server condition not reached: {server:?}");
        }
        server.run_once(TICK)?;
    }
    Ok(())
}

/// Read every event, returning `(event, nhits, first channel)` per record.
fn drain(mut session: ConsumerSession) -> Result<Vec<(u32, u32, u32)>> {
    let d = session.layout().clone();
    let mut seen = Vec::new();
    while let Some(event) = session.fetch_event()? {
        seen.push((event.get(&d, "event", 0)?, event.get(&d, "nhits", 0)?, event.get(&d, "channel", 0)?));
    }
    Ok(seen)
}

#[test]
fn late_joiner_with_smaller_layout_sees_setup_and_new_events() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let server = BroadcastServer::bind(ServerConfig::loopback())?;
    let addr = server.local_addr();
    let layout = hits_layout(16)?;
    let mut producer = ProducerSession::new(server, layout.clone(), ProducerOptions::default())?;

    let early = thread::spawn(move || -> Result<_> { drain(ConsumerSession::connect(addr, direct(), None)?) });
    spin_until(producer.sink_mut(), |s| s.consumer_count() == 1)?;

    for number in 0..10 {
        producer.write_event(&hits_event(&layout, number)?, &[], &[])?;
        producer.flush()?;
        producer.sink_mut().run_once(TICK)?;
    }

    let late = thread::spawn(move || -> Result<_> {
        let session = ConsumerSession::connect(addr, direct(), Some(hits_layout(4)?))?;
        drain(session)
    });
    spin_until(producer.sink_mut(), |s| s.consumer_count() == 2)?;

    for number in 10..20 {
        producer.write_event(&hits_event(&layout, number)?, &[], &[])?;
        producer.flush()?;
        producer.sink_mut().run_once(TICK)?;
    }
    producer.close()?;
    let stats = producer.into_sink().shutdown(true)?;

    let early = early.join().expect("early consumer panicked")?;
    let numbers: Vec<u32> = early.iter().map(|(n, _, _)| *n).collect();
    assert_eq!(numbers, (0..20).collect::<Vec<_>>());
    assert!(early.iter().all(|(n, hits, _)| *hits == n % 8));

    let late = late.join().expect("late consumer panicked")?;
    let first = late.first().map(|(n, _, _)| *n).unwrap_or(20);
    let numbers: Vec<u32> = late.iter().map(|(n, _, _)| *n).collect();
    assert!(first <= 10);
    assert_eq!(numbers, (first..20).collect::<Vec<_>>());
    for (number, hits, channel) in late {
        assert_eq!(hits, (number % 8).min(4));
        assert_eq!(channel, if hits > 0 { number * 10 } else { 0 });
    }

    assert_eq!(stats.consumers_accepted, 2);
    assert_eq!(stats.consumers_active, 0);
    assert_eq!(stats.bytes_in_use, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subscription_streams_every_event_over_tcp() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let (addr_tx, addr_rx) = mpsc::channel::<SocketAddr>();

    let server = thread::spawn(move || -> Result<ServerState> {
        let layout = hits_layout(8)?;
        let server = BroadcastServer::bind(ServerConfig::loopback())?;
        addr_tx.send(server.local_addr())?;
        let options = ProducerOptions { name: "hits".to_string(), ..ProducerOptions::default() };
        let mut producer = ProducerSession::new(server, layout.clone(), options)?;
        spin_until(producer.sink_mut(), |s| s.consumer_count() == 1)?;

        for number in 0..25 {
            producer.write_event(&hits_event(&layout, number)?, &[], &[])?;
        }
        producer.close()?;
        let mut server = producer.into_sink();
        server.shutdown(true)?;
        Ok(server.state())
    });

    let addr = tokio::task::spawn_blocking(move || addr_rx.recv()).await??;
    let mut subscription = Subscription::connect(addr, direct(), None, SubscriptionOptions::default()).await?;
    assert_eq!(subscription.layout().name(), "hits");

    let events: Vec<EventFrame> = subscription.events().expect("lossless subscription").collect().await;
    let numbers: Vec<u32> = events.iter().filter_map(|e| e.u32("event")).collect();
    assert_eq!(numbers, (0..25).collect::<Vec<_>>());
    assert_eq!(events[9].array::<u32>("channel"), Some(vec![90]));
    assert_eq!(subscription.current().map(|e| e.sequence()), Some(25));
    assert_eq!(subscription.finish().await?, 25);

    let state = server.join().expect("server thread panicked")?;
    assert_eq!(state, ServerState::Closed);
    Ok(())
}
