//! Functional routes, registered as one router.
//!
//! | Method | Path | Response |
//! |---|---|---|
//! | GET | `/v5` | `["Hello", "World!"]`, negotiated |
//! | GET | `/v6` | first `functional_limit` counters as NDJSON |
//! | POST | `/v7` | request body, uppercased |
//! | POST | `/v8` | `{"value": n}` documents in, `{"double": 2n}` events out |

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, post};
use ripple_core::Stream;
use tracing::debug;

use crate::ApiState;
use crate::body::{self, StreamFormat, StreamReply};
use crate::handlers::counting;
use crate::model::{Counter, Doubled};

pub fn routes() -> Router<ApiState> {
    Router::new()
        .route("/v5", get(hello))
        .route("/v6", get(stream))
        .route("/v7", post(echo))
        .route("/v8", post(post_stream))
}

/// GET /v5
pub async fn hello(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let words = Stream::just(vec!["Hello".to_string(), "World!".to_string()]);
    StreamReply::new(words, StreamFormat::negotiate(&headers))
        .keep_alive(state.config.sse_keep_alive())
        .render()
        .await
}

/// GET /v6
pub async fn stream(State(state): State<ApiState>) -> Response {
    let limit = state.config.functional_limit;
    debug!(limit, "streaming bounded counters");
    StreamReply::new(counting().take(limit), StreamFormat::Ndjson)
        .render()
        .await
}

/// POST /v7
pub async fn echo(State(state): State<ApiState>, request_body: Body) -> Response {
    let upper = body::text_body(request_body, state.config.max_body_bytes).map(|text| text.to_uppercase());
    body::text(upper).await
}

/// POST /v8
pub async fn post_stream(State(state): State<ApiState>, request_body: Body) -> Response {
    let counters = body::json_values::<Counter>(request_body, state.config.max_body_bytes);
    StreamReply::new(counters.try_map(Doubled::try_from), StreamFormat::EventStream)
        .keep_alive(state.config.sse_keep_alive())
        .render()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::http::header::CONTENT_TYPE;
    use ripple_core::ApiConfig;

    fn test_state(functional_limit: usize) -> ApiState {
        ApiState {
            config: ApiConfig {
                functional_limit,
                ..ApiConfig::default()
            },
        }
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn stream_honours_limit() {
        let resp = stream(State(test_state(4))).await;
        assert_eq!(resp.headers()[CONTENT_TYPE], body::NDJSON);
        let body = body_string(resp).await;
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#"{"value":0}"#);
        assert_eq!(lines[3], r#"{"value":3}"#);
    }

    #[tokio::test]
    async fn post_stream_doubles_values() {
        let input = Body::from("{\"value\":1}\n{\"value\":5}\n");
        let resp = post_stream(State(test_state(10)), input).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;
        let doubled = body.find(r#"data: {"double":2}"#).unwrap();
        let tenfold = body.find(r#"data: {"double":10}"#).unwrap();
        assert!(doubled < tenfold);
    }

    #[tokio::test]
    async fn echo_empty_body() {
        let resp = echo(State(test_state(10)), Body::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.is_empty());
    }
}
