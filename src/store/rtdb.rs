use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use hyper::{Method, Uri};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use super::{order_and_limit, tree, DocumentStore, Subscription};
use crate::{
    auth::SessionState,
    error::TransportError,
    protocols::{
        eventsource::mk_eventsource_stream,
        https::{mk_get_request, mk_json_request, HyperHttpsClient},
    },
};

/// Firebase Realtime Database accessed over its REST and streaming API.
/// Requests are authorized with the id token of the current session.
#[derive(Clone)]
pub struct RtdbStore {
    database_url: String,
    client: HyperHttpsClient,
    session: watch::Receiver<SessionState>,
}

#[derive(Deserialize, Debug, Clone)]
struct StreamEventData {
    path: String,
    data: Value,
}

#[derive(Deserialize, Debug, Clone)]
struct PushResponse {
    name: String,
}

/// What the stream loop should do after handling one server sent event.
#[derive(Debug, PartialEq)]
pub enum StreamAction {
    /// The tree changed and a snapshot should be delivered
    Deliver,
    Ignore,
    /// The token expired or was revoked, reconnect with a fresh one
    Reconnect,
    /// The server cancelled the subscription (e.g. permission denied)
    Stop,
}

/// Folds one streaming event into the locally assembled `tree`.
pub fn apply_stream_event(
    tree: &mut Value,
    event_type: &str,
    data: &str,
) -> Result<StreamAction, TransportError> {
    match event_type {
        "put" | "patch" => {
            let de = &mut serde_json::Deserializer::from_str(data);
            let event: StreamEventData = serde_path_to_error::deserialize(de)?;

            if event_type == "put" {
                tree::put(tree, &event.path, event.data);
            } else {
                tree::patch(tree, &event.path, event.data);
            }

            Ok(StreamAction::Deliver)
        }
        "keep-alive" => Ok(StreamAction::Ignore),
        "auth_revoked" => Ok(StreamAction::Reconnect),
        "cancel" => Ok(StreamAction::Stop),
        other => {
            debug!("Ignoring unknown stream event type {other}");
            Ok(StreamAction::Ignore)
        }
    }
}

impl RtdbStore {
    pub fn new(
        database_url: &str,
        client: &HyperHttpsClient,
        session: watch::Receiver<SessionState>,
    ) -> Self {
        RtdbStore {
            database_url: database_url.trim_end_matches('/').to_string(),
            client: client.clone(),
            session,
        }
    }

    fn url(&self, path: &str, query: &str) -> Result<String, TransportError> {
        let token = self
            .session
            .borrow()
            .id_token()
            .ok_or(TransportError::Unauthenticated)?;

        Ok(format!(
            "{}/{}.json?auth={}{}",
            self.database_url,
            path.trim_matches('/'),
            token,
            query
        ))
    }

    fn uri(&self, path: &str, query: &str) -> Result<Uri, TransportError> {
        Ok(self.url(path, query)?.parse()?)
    }
}

#[async_trait]
impl DocumentStore for RtdbStore {
    async fn subscribe(&self, path: &str) -> Result<Subscription, TransportError> {
        // Fail early if there is no session to authorize the stream with
        self.url(path, "")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let store = self.clone();
        let path = path.to_string();

        let task = tokio::spawn(async move {
            loop {
                let stream = store
                    .url(&path, "")
                    .and_then(|url| mk_eventsource_stream(&url, &store.client));

                let mut eventsource_stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("Failed to open stream for {path}: {e}. Retrying in 5 seconds...");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                info!("Streaming changes of {path}");

                // Each connection starts with a put of the full node
                let mut document = Value::Null;

                loop {
                    let e = eventsource_stream.next().await;

                    match e {
                        Some(Ok(eventsource_client::SSE::Event(e))) => {
                            match apply_stream_event(&mut document, &e.event_type, &e.data) {
                                Ok(StreamAction::Deliver) => {
                                    if tx.send(tree::get_or_null(&document, "/")).is_err() {
                                        // Subscriber went away
                                        return;
                                    }
                                }
                                Ok(StreamAction::Ignore) => {}
                                Ok(StreamAction::Reconnect) => {
                                    warn!("Stream authorization for {path} revoked. Reconnecting in 5 seconds...");
                                    tokio::time::sleep(Duration::from_secs(5)).await;
                                    break;
                                }
                                Ok(StreamAction::Stop) => {
                                    error!("Stream for {path} was cancelled by the server");
                                    return;
                                }
                                Err(e) => {
                                    warn!("Malformed stream event for {path}: {e}");
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Error while receiving from stream. Reconnecting in 5 seconds...");
                            warn!("{:?}", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            break;
                        }
                        None => {
                            warn!("End of stream for {path}. Reconnecting in 5 seconds...");
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            break;
                        }
                        _ => {}
                    }
                }

                if tx.is_closed() {
                    return;
                }
            }
        });

        Ok(Subscription::new(rx, Some(task)))
    }

    async fn patch(&self, path: &str, fields: Value) -> Result<(), TransportError> {
        let uri = self.uri(path, "")?;
        let _: Value = mk_json_request(&self.client, Method::PATCH, &uri, &fields).await?;

        Ok(())
    }

    async fn replace(&self, path: &str, document: Value) -> Result<(), TransportError> {
        let uri = self.uri(path, "")?;
        let _: Value = mk_json_request(&self.client, Method::PUT, &uri, &document).await?;

        Ok(())
    }

    async fn append(&self, path: &str, record: Value) -> Result<String, TransportError> {
        let uri = self.uri(path, "")?;
        let response: PushResponse = mk_json_request(&self.client, Method::POST, &uri, &record).await?;

        Ok(response.name)
    }

    async fn query_recent(
        &self,
        path: &str,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<Value>, TransportError> {
        // The orderBy value must be a quoted JSON string
        let query = format!("&orderBy=%22{order_field}%22&limitToLast={limit}");
        let uri = self.uri(path, &query)?;

        // Filtered results come back as an object keyed by child name, whose
        // order is not meaningful
        let response: Value = mk_get_request(&self.client, &uri).await?;
        let records = match response {
            Value::Object(children) => children.into_iter().map(|(_, v)| v).collect(),
            Value::Array(items) => items.into_iter().filter(|v| !v.is_null()).collect(),
            _ => vec![],
        };

        Ok(order_and_limit(records, order_field, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initial_put_then_patch_assembles_document() {
        let mut document = Value::Null;

        let action = apply_stream_event(
            &mut document,
            "put",
            r#"{"path":"/","data":{"brightness":40,"powered":true}}"#,
        )
        .unwrap();
        assert_eq!(action, StreamAction::Deliver);

        apply_stream_event(
            &mut document,
            "patch",
            r#"{"path":"/","data":{"brightness":55,"pwmValue":140}}"#,
        )
        .unwrap();

        apply_stream_event(&mut document, "put", r#"{"path":"/ambientLight","data":312.5}"#)
            .unwrap();

        assert_eq!(
            document,
            json!({ "brightness": 55, "powered": true, "pwmValue": 140, "ambientLight": 312.5 })
        );
    }

    #[test]
    fn control_events() {
        let mut document = json!({ "powered": true });

        assert_eq!(
            apply_stream_event(&mut document, "keep-alive", "null").unwrap(),
            StreamAction::Ignore
        );
        assert_eq!(
            apply_stream_event(&mut document, "auth_revoked", "credential is no longer valid")
                .unwrap(),
            StreamAction::Reconnect
        );
        assert_eq!(
            apply_stream_event(&mut document, "cancel", "permission denied").unwrap(),
            StreamAction::Stop
        );
        assert_eq!(document, json!({ "powered": true }));
    }

    #[test]
    fn malformed_put_is_an_error() {
        let mut document = Value::Null;
        let result = apply_stream_event(&mut document, "put", r#"{"data":1}"#);

        assert!(matches!(result, Err(TransportError::Decode(_))));
        assert_eq!(document, Value::Null);
    }
}
