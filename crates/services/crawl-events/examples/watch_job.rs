//! Follow a crawl job's progress stream until it ends.
//!
//! Usage:
//!
//! ```text
//! CRAWL_API_BASE=https://api.example.com CRAWL_API_TOKEN=... \
//!     cargo run --example watch_job -- 42
//! ```
//!
//! Ctrl-C cancels the subscription.

use crawl_events::{
    CredentialSnapshot, EndReason, EnvCredentials, JobEvent, StreamClient, StreamConfig,
    StreamEvent, StreamRequest,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crawl_events=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let job_id = std::env::args().nth(1).unwrap_or_else(|| "1".into());

    let client = StreamClient::new(StreamConfig::new())?;
    let creds = CredentialSnapshot::capture(&EnvCredentials)?;
    let request = StreamRequest::new("/api/crawl/stream").param("job_id", job_id);
    println!("Streaming {}", client.resolve(&request)?);

    let sub = client.subscribe(
        &request,
        &creds,
        |event: StreamEvent<JobEvent>| match event.payload {
            JobEvent::State { data } => println!(
                "[{}] state: {}",
                event.sequence,
                data.status.as_deref().unwrap_or("?")
            ),
            JobEvent::Feed { data } => println!("[{}] {}", event.sequence, data.message),
            JobEvent::Unknown => println!("[{}] (unrecognized event)", event.sequence),
        },
        |reason| match reason {
            EndReason::Completed => println!("stream completed"),
            EndReason::Cancelled => println!("stream cancelled"),
            EndReason::Failed(e) => eprintln!("stream failed: {e}"),
        },
    )?;

    tokio::select! {
        () = sub.closed() => {}
        _ = tokio::signal::ctrl_c() => sub.cancel(),
    }
    let stats = sub.stats();
    let reason = sub.wait().await;
    println!(
        "delivered {} events, skipped {} malformed records",
        stats.events_delivered, stats.records_skipped
    );

    if let EndReason::Failed(e) = reason {
        anyhow::bail!("{e}");
    }
    Ok(())
}
