//! Producers: drain a source channel's stream into the relay.
//!
//! Every message is handled on its own task so a slow broadcast never
//! holds up the next post. Redundant producers need no coordination; the
//! relay's dedup gate absorbs repeated observations.

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::channels::{MessageStream, SourceChannel};
use crate::pipeline::processor::Relay;
use crate::pipeline::types::Outcome;

/// Feed `stream` into `relay` until the stream ends or the relay stops
/// accepting. Waits for the spawned handlers before returning the number
/// of messages taken from the stream.
pub async fn run_producer(name: &str, mut stream: MessageStream, relay: Arc<Relay>) -> usize {
    let mut handlers = JoinSet::new();
    let mut received = 0;

    while let Some(msg) = stream.next().await {
        if !relay.is_accepting() {
            debug!(producer = name, "Relay stopped accepting; producer exiting");
            break;
        }
        received += 1;

        let relay = Arc::clone(&relay);
        handlers.spawn(async move { relay.on_message(msg).await });

        // Reap finished handlers so the set does not grow unbounded.
        while let Some(done) = handlers.try_join_next() {
            log_join(name, done);
        }
    }

    while let Some(done) = handlers.join_next().await {
        log_join(name, done);
    }

    info!(producer = name, received, "Producer finished");
    received
}

fn log_join(name: &str, done: Result<Outcome, tokio::task::JoinError>) {
    if let Err(e) = done {
        warn!(producer = name, error = %e, "Message handler panicked");
    }
}

/// Start `channel` and spawn its producer loop.
pub fn spawn_producer(channel: Arc<dyn SourceChannel>, relay: Arc<Relay>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = channel.name().to_string();
        let stream = match channel.start().await {
            Ok(s) => s,
            Err(e) => {
                warn!(producer = %name, error = %e, "Source channel failed to start");
                return;
            }
        };
        info!(producer = %name, "Producer started");
        run_producer(&name, stream, relay).await;
    })
}
