//! Streaming event client for crawl and sitemap job progress.
//!
//! The backend reports long-running jobs over a text stream of
//! `data: <json>` lines. This crate opens that stream, decodes it
//! incrementally and hands each event to a callback (or a channel) in
//! arrival order.
//!
//! ```no_run
//! use crawl_events::{CredentialSnapshot, JobEvent, StreamClient, StreamConfig, StreamRequest};
//!
//! # async fn example() -> crawl_events::Result<()> {
//! let client = StreamClient::new(StreamConfig::new().with_base_url("https://api.example.com"))?;
//! let creds = CredentialSnapshot::new("token", Some("team-1".into()))?;
//!
//! let sub = client.subscribe(
//!     &StreamRequest::new("/api/crawl/stream").param("job_id", "42"),
//!     &creds,
//!     |event: crawl_events::StreamEvent<JobEvent>| println!("{:?}", event.payload),
//!     |reason| println!("ended: {reason:?}"),
//! )?;
//! let reason = sub.wait().await;
//! # Ok(())
//! # }
//! ```

#![deny(rust_2018_idioms)]

pub mod config;
pub mod credentials;
pub mod decoder;
pub mod error;
pub mod event;
pub mod request;
pub mod subscription;

#[cfg(feature = "http")]
pub mod client;

#[cfg(test)]
mod test_support;

// Re-exports
#[cfg(feature = "http")]
pub use crate::client::StreamClient;
pub use crate::config::StreamConfig;
pub use crate::credentials::{
    CredentialProvider, CredentialSnapshot, EnvCredentials, StaticCredentials,
};
pub use crate::decoder::EventDecoder;
pub use crate::error::{Result, StreamError};
pub use crate::event::{FeedEntry, JobEvent, JobState, StreamEvent};
pub use crate::request::StreamRequest;
pub use crate::subscription::{
    EndReason, EventReceiver, Subscription, SubscriptionState, SubscriptionStats,
};
