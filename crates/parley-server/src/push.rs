//! HTTP push gateway.
//!
//! Posts the notification JSON to the endpoint URL registered by the
//! client. Delivery is best effort: the dispatcher logs failures and never
//! retries.

use async_trait::async_trait;
use parley_core::{DeliveryError, PushEndpoint, PushGateway};
use tracing::trace;

use crate::metrics;

/// Push gateway speaking plain HTTP to the push service.
#[derive(Debug, Clone)]
pub struct HttpPushGateway {
    client: reqwest::Client,
    ttl_seconds: u32,
}

impl HttpPushGateway {
    #[must_use]
    pub fn new(ttl_seconds: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            ttl_seconds,
        }
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn deliver(
        &self,
        endpoint: &PushEndpoint,
        payload: &serde_json::Value,
    ) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&endpoint.endpoint)
            .header("TTL", self.ttl_seconds.to_string())
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                metrics::record_notification("transport_error");
                DeliveryError::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            metrics::record_notification("rejected");
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
            });
        }

        trace!(endpoint = %endpoint.endpoint, "Push delivered");
        metrics::record_notification("delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn push_service() -> (String, mpsc::UnboundedReceiver<(Option<String>, Value)>) {
        let (tx, rx) = mpsc::unbounded_channel();

        async fn accept(
            State(tx): State<mpsc::UnboundedSender<(Option<String>, Value)>>,
            headers: HeaderMap,
            Json(body): Json<Value>,
        ) -> StatusCode {
            let ttl = headers
                .get("ttl")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let _ = tx.send((ttl, body));
            StatusCode::CREATED
        }

        let app = Router::new()
            .route("/push/ok", post(accept))
            .route("/push/gone", post(|| async { StatusCode::GONE }))
            .with_state(tx);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        (format!("http://{addr}"), rx)
    }

    #[tokio::test]
    async fn test_delivers_payload() {
        let (base, mut rx) = push_service().await;
        let gateway = HttpPushGateway::new(60);
        let payload = json!({"title": "New message", "body": "hi", "data": {"roomId": "r1"}});

        gateway
            .deliver(&PushEndpoint::new(format!("{base}/push/ok")), &payload)
            .await
            .unwrap();

        let (ttl, body) = rx.recv().await.unwrap();
        assert_eq!(ttl.as_deref(), Some("60"));
        assert_eq!(body, payload);
    }

    #[tokio::test]
    async fn test_rejected_and_unreachable() {
        let (base, _rx) = push_service().await;
        let gateway = HttpPushGateway::new(60);
        let payload = json!({});

        let err = gateway
            .deliver(&PushEndpoint::new(format!("{base}/push/gone")), &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected { status: 410 }));

        let err = gateway
            .deliver(&PushEndpoint::new("http://127.0.0.1:1/push"), &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }
}
