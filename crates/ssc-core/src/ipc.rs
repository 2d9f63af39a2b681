//! IPC envelopes and request/response correlation
//!
//! Messages travel as JSON objects `{to, from, type, jobId, action, payload}`.
//! [`Ipc`] hands outbound messages to a channel the transport drains and
//! resolves inbound responses against a `jobId -> oneshot` table.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub to: String,
    pub from: String,
    #[serde(default)]
    pub job_id: u64,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(to: impl Into<String>, from: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Envelope {
            to: to.into(),
            from: from.into(),
            job_id: 0,
            action: action.into(),
            payload,
        }
    }

    /// Reply addressed back to the sender, carrying the same job id and action
    pub fn reply(&self, payload: Value) -> Envelope {
        Envelope {
            to: self.from.clone(),
            from: self.to.clone(),
            job_id: self.job_id,
            action: self.action.clone(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(Envelope),
    Response(Envelope),
    Broadcast(Envelope),
}

impl Message {
    pub fn envelope(&self) -> &Envelope {
        match self {
            Message::Request(e) | Message::Response(e) | Message::Broadcast(e) => e,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// One endpoint on the message bus
pub struct Ipc {
    name: String,
    next_job: AtomicU64,
    pending: Mutex<BTreeMap<u64, oneshot::Sender<Envelope>>>,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Ipc {
    /// Create an endpoint and the receiver the transport reads outbound messages from
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let ipc = Ipc {
            name: name.into(),
            next_job: AtomicU64::new(1),
            pending: Mutex::new(BTreeMap::new()),
            outbound,
        };
        (ipc, rx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send a request and wait for the matching response
    pub async fn send(&self, to: &str, action: &str, payload: Value, timeout: Duration) -> Result<Envelope> {
        let job_id = self.next_job.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(job_id, tx);

        let envelope = Envelope {
            job_id,
            ..Envelope::new(to, self.name.as_str(), action, payload)
        };
        if self.outbound.send(Message::Request(envelope)).is_err() {
            self.pending.lock().remove(&job_id);
            return Err(Error::Ipc("transport closed".into()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Ipc(format!("job {} dropped before a response arrived", job_id))),
            Err(_) => {
                self.pending.lock().remove(&job_id);
                Err(Error::Ipc(format!("job {} ({}) timed out", job_id, action)))
            }
        }
    }

    pub fn broadcast(&self, action: &str, payload: Value) -> Result<()> {
        let envelope = Envelope::new("*", self.name.as_str(), action, payload);
        self.outbound
            .send(Message::Broadcast(envelope))
            .map_err(|_| Error::Ipc("transport closed".into()))
    }

    pub fn respond(&self, request: &Envelope, payload: Value) -> Result<()> {
        self.outbound
            .send(Message::Response(request.reply(payload)))
            .map_err(|_| Error::Ipc("transport closed".into()))
    }

    /// Route an inbound message. Responses complete their pending request and
    /// yield `None`; requests and broadcasts are returned for dispatch.
    pub fn deliver(&self, message: Message) -> Option<Message> {
        match message {
            Message::Response(envelope) => {
                match self.pending.lock().remove(&envelope.job_id) {
                    Some(waiter) => {
                        if waiter.send(envelope).is_err() {
                            debug!("response arrived after the requester gave up");
                        }
                    }
                    None => warn!(job_id = envelope.job_id, action = %envelope.action, "response for unknown job"),
                }
                None
            }
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_wire_format() {
        let message = Message::Request(Envelope {
            job_id: 7,
            ..Envelope::new("blockchain", "p2p", "getLatestBlockInfo", Value::Null)
        });
        let json = message.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"type":"request","to":"blockchain","from":"p2p","jobId":7,"action":"getLatestBlockInfo","payload":null}"#
        );
        assert_eq!(Message::from_json(&json).unwrap(), message);
    }

    #[test]
    fn test_reply_swaps_addresses() {
        let request = Envelope {
            job_id: 3,
            ..Envelope::new("a", "b", "find", Value::Null)
        };
        let reply = request.reply(Value::Boolean(true));
        assert_eq!((reply.to.as_str(), reply.from.as_str(), reply.job_id), ("b", "a", 3));
    }

    #[tokio::test]
    async fn test_send_resolves_on_matching_response() {
        let (ipc, mut outbound) = Ipc::new("producer");
        let ipc = Arc::new(ipc);

        let responder = {
            let ipc = ipc.clone();
            tokio::spawn(async move {
                let Some(Message::Request(request)) = outbound.recv().await else {
                    panic!("expected a request");
                };
                assert!(ipc.deliver(Message::Response(request.reply(Value::from("pong")))).is_none());
            })
        };

        let response = ipc.send("store", "ping", Value::Null, Duration::from_secs(5)).await.unwrap();
        assert_eq!(response.payload, Value::from("pong"));
        assert_eq!(ipc.pending_count(), 0);
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_times_out_and_forgets_job() {
        let (ipc, _outbound) = Ipc::new("producer");
        let result = ipc.send("store", "ping", Value::Null, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(Error::Ipc(_))));
        assert_eq!(ipc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_fails_when_transport_closed() {
        let (ipc, outbound) = Ipc::new("producer");
        drop(outbound);
        assert!(ipc.send("store", "ping", Value::Null, Duration::from_secs(1)).await.is_err());
        assert!(ipc.broadcast("newBlock", Value::Null).is_err());
    }

    #[test]
    fn test_deliver_passes_requests_through() {
        let (ipc, _outbound) = Ipc::new("producer");
        let request = Message::Request(Envelope::new("producer", "api", "find", Value::Null));
        assert_eq!(ipc.deliver(request.clone()), Some(request));
        let stray = Message::Response(Envelope::new("producer", "api", "find", Value::Null));
        assert!(ipc.deliver(stray).is_none());
    }
}
