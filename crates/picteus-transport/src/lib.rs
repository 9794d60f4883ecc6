//! Transport channel and correlation registry for the Picteus extension protocol.
//!
//! A [`TransportChannel`] runs over a [`TransportLink`], either an in-memory pair
//! or newline-delimited JSON over any async byte stream, and pairs requests with
//! their acknowledgements through a [`CorrelationRegistry`].

mod channel;
mod link;
mod registry;

pub use channel::{
    Acknowledger, ChannelMetricsSnapshot, NotificationHandler, TransportChannel,
};
pub use link::{memory_link_pair, ndjson_link, FrameSender, TransportLink};
pub use registry::{CorrelationRegistry, PendingReply};

#[cfg(test)]
mod tests;
