//! End-to-end throughput benchmark for tubes.
//!
//! Measures WebSocket broadcast throughput against a running server with
//! the demo channels enabled. Every client joins `chat` and sends as fast
//! as it can; every received envelope is counted.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tubes_bench::{frame, PAYLOAD};
use tubes_protocol::{codec, Envelope};

const SERVER_URL: &str = "ws://127.0.0.1:9090/connect";
const CHANNEL: &str = "chat";
const SETTLE_MILLIS: u64 = 200;
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).map_or(SERVER_URL, String::as_str).to_string();

    println!("tubes end-to-end throughput benchmark");
    println!("  server:  {url} (run `tubes` with demo channels enabled)");
    println!("  clients: {num_clients}, channel: {CHANNEL}");
    println!("  warmup:  {WARMUP_SECS}s, measurement: {BENCH_SECS}s");
    println!();

    run_broadcast_benchmark(&url, num_clients).await;
}

async fn run_broadcast_benchmark(url: &str, num_clients: usize) {
    let message_count = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let url = url.to_string();
        let msg_count = Arc::clone(&message_count);
        let barrier = Arc::clone(&barrier);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(&url, msg_count, barrier).await {
                eprintln!("Client {client_id} error: {e}");
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to subscribe
    barrier.wait().await;
    println!("All {num_clients} clients subscribed");

    println!("Warming up for {WARMUP_SECS}s...");
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {BENCH_SECS}s...");
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);

    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();
    let msgs_per_sec_per_client = msgs_per_sec / num_clients as f64;

    println!();
    println!("Results");
    println!("  Clients:          {num_clients:>10}");
    println!("  Duration:         {:>10.2}s", elapsed.as_secs_f64());
    println!("  Delivered:        {total_messages:>10}");
    println!("  Throughput:       {msgs_per_sec:>10.0} msg/s");
    println!("  Per-client:       {msgs_per_sec_per_client:>10.0} msg/s");

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    url: &str,
    message_count: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let subscribe = codec::encode(&Envelope::subscribe(CHANNEL))?;
    sender
        .send(Message::Text(String::from_utf8(subscribe.to_vec())?))
        .await?;

    // Subscriptions are not acknowledged; give the server a moment
    tokio::time::sleep(Duration::from_millis(SETTLE_MILLIS)).await;
    barrier.wait().await;

    let message = frame(&Envelope::message(CHANNEL, PAYLOAD)?);
    let message = Message::Text(String::from_utf8(message.to_vec())?);

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) if codec::decode(text.as_bytes()).is_ok() => {
                    message_count.fetch_add(1, Ordering::Relaxed);
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    loop {
        if sender.send(message.clone()).await.is_err() {
            break;
        }
        // Let the receiver task drain
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
