//! Client for the remote reasoning service.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{GuideError, Result};
use crate::types::{Directive, ElementDescriptor, Snapshot};

/// Produces the next directive for a task from the latest snapshot.
#[async_trait]
pub trait DirectiveSource: Send + Sync {
    async fn next_directive(&self, task: &str, snapshot: &Snapshot) -> Result<Directive>;
}

/// Request body for the guidance endpoint.
#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    task_description: &'a str,
    image_base64: &'a str,
    ui_elements: &'a [ElementDescriptor],
}

/// Talks to the guidance endpoint over HTTPS. One request per iteration, no
/// internal retry; retry policy belongs to the loop controller.
pub struct Brain {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl Brain {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuideError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> GuideError {
        if error.is_timeout() {
            GuideError::Timeout(self.timeout)
        } else {
            GuideError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl DirectiveSource for Brain {
    async fn next_directive(&self, task: &str, snapshot: &Snapshot) -> Result<Directive> {
        let request = AnalyzeRequest {
            task_description: task,
            image_base64: &snapshot.image_base64,
            ui_elements: &snapshot.elements,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(GuideError::Transport(format!(
                "guidance endpoint returned {status}: {}",
                excerpt(&body)
            )));
        }

        let directive: Directive = serde_json::from_str(&body)
            .map_err(|e| GuideError::Protocol(format!("{e}; body: {}", excerpt(&body))))?;

        debug!(
            is_complete = directive.is_complete,
            action = directive.interaction(),
            "received directive"
        );
        Ok(directive)
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    fn snapshot() -> Snapshot {
        Snapshot {
            image_base64: "data:image/png;base64,iVBORw0KGgo=".into(),
            elements: vec![ElementDescriptor {
                guide_id: "g0".into(),
                id: Some("submit-btn".into()),
                class_name: Some("btn".into()),
                text: Some("Submit".into()),
                tag: "button".into(),
                location: BoundingBox {
                    x: 1,
                    y: 2,
                    width: 3,
                    height: 4,
                },
            }],
        }
    }

    #[test]
    fn request_body_matches_the_wire_format() {
        let snapshot = snapshot();
        let request = AnalyzeRequest {
            task_description: "file a report",
            image_base64: &snapshot.image_base64,
            ui_elements: &snapshot.elements,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["task_description"], "file a report");
        assert_eq!(value["ui_elements"][0]["tagName"], "button");
        assert_eq!(value["ui_elements"][0]["class_name"], "btn");
        assert_eq!(value["ui_elements"][0]["location"]["width"], 3);
        assert!(value["ui_elements"][0].get("guideId").is_none());
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/analyze_ui")
    }

    #[tokio::test]
    async fn parses_directive_and_normalizes_legacy_completion_flag() {
        let app = Router::new().route(
            "/analyze_ui",
            post(|Json(_body): Json<Value>| async move {
                Json(json!({
                    "id": "submit-btn",
                    "class_name": null,
                    "text": null,
                    "message": "Click Submit",
                    "action": null,
                    "isFinished": true,
                }))
            }),
        );

        let brain = Brain::new(serve(app).await, Duration::from_secs(5)).unwrap();
        let directive = brain.next_directive("file a report", &snapshot()).await.unwrap();

        assert_eq!(directive.target_id.as_deref(), Some("submit-btn"));
        assert!(directive.is_complete);
        assert_eq!(directive.interaction(), "click");
    }

    #[tokio::test]
    async fn non_success_status_maps_to_transport_error() {
        let app = Router::new().route(
            "/analyze_ui",
            post(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );

        let brain = Brain::new(serve(app).await, Duration::from_secs(5)).unwrap();
        let error = brain.next_directive("task", &snapshot()).await.unwrap_err();
        assert!(matches!(error, GuideError::Transport(_)), "got {error:?}");
    }

    #[tokio::test]
    async fn malformed_body_maps_to_protocol_error() {
        let app = Router::new().route("/analyze_ui", post(|| async { "not a directive" }));

        let brain = Brain::new(serve(app).await, Duration::from_secs(5)).unwrap();
        let error = brain.next_directive("task", &snapshot()).await.unwrap_err();
        assert!(matches!(error, GuideError::Protocol(_)), "got {error:?}");
    }

    #[tokio::test]
    async fn slow_endpoint_maps_to_timeout_error() {
        let app = Router::new().route(
            "/analyze_ui",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"message": "too late"}))
            }),
        );

        let brain = Brain::new(serve(app).await, Duration::from_millis(200)).unwrap();
        let error = brain.next_directive("task", &snapshot()).await.unwrap_err();
        assert!(matches!(error, GuideError::Timeout(_)), "got {error:?}");
    }
}
