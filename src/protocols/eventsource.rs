use es::Client;
use eventsource_client as es;
use futures::Stream;
use std::{pin::Pin, time::Duration};

use crate::{error::TransportError, protocols::https::HyperHttpsClient};

pub type EventSourceStream = dyn Stream<Item = Result<eventsource_client::SSE, eventsource_client::Error>>
    + std::marker::Send
    + std::marker::Sync;

pub type PinnedEventSourceStream = Pin<Box<EventSourceStream>>;

pub fn mk_eventsource_stream(
    url: &str,
    client: &HyperHttpsClient,
) -> Result<PinnedEventSourceStream, TransportError> {
    let eventsource_client = es::ClientBuilder::for_url(url)
        .map_err(|e| {
            TransportError::Request(format!(
                "Failed to build event stream client. Check your database_url config. {:?}",
                e
            ))
        })?
        .header("Accept", "text/event-stream")
        .map_err(|e| TransportError::Request(format!("Failed to set Accept header. {:?}", e)))?
        .reconnect(
            es::ReconnectOptions::reconnect(true)
                .retry_initial(false)
                .delay(Duration::from_secs(2))
                .backoff_factor(2)
                .delay_max(Duration::from_secs(60))
                .build(),
        )
        .build_with_http_client(client.clone());

    Ok(eventsource_client.stream())
}
