//! Single-value and streaming route handlers.
//!
//! Each handler builds a pipeline and hands it to [`crate::body`] for
//! rendering; nothing in the pipeline runs until the response is
//! produced.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use ripple_core::{Single, Stream, zip3};
use tracing::info;

use crate::ApiState;
use crate::body::{self, StreamFormat, StreamReply};
use crate::model::Counter;

/// Logs each value a route emits.
fn emitted(route: &'static str) -> impl Fn(&String) + Send + Sync + 'static {
    move |value: &String| info!(route, %value, "emitted")
}

// ── Single-value routes ────────────────────────────────────────

fn greeting() -> Single<String> {
    Single::just("Hello, World!".to_string()).do_on_next(emitted("/mono"))
}

fn missing_greeting() -> Single<String> {
    Single::just_or_empty(None).do_on_next(emitted("/mono-empty"))
}

fn fallback_greeting() -> Single<String> {
    Single::just_or_empty(None)
        .switch_if_empty(|| Single::defer(|| Single::just("yeah, there is no one".to_string())))
        .default_if_empty("yeah, full".to_string())
        .do_on_next(emitted("/mono-switch"))
}

fn supplied_greeting() -> Single<String> {
    Single::from_supplier(|| {
        let mut greeting = "hello, world".to_string();
        greeting.push_str("~!");
        greeting
    })
    .on_error_resume(Single::error)
    .do_on_next(emitted("/mono-supplier"))
}

fn flat_mapped_text() -> Single<String> {
    Single::just("this is a text for test".to_string()).flat_map(|text| {
        text.contains("test")
            .then(|| Single::just("nooooooo test".to_string()))
    })
}

fn filtered_text() -> Single<String> {
    Single::just("this is a text for test".to_string()).filter(|text| text.starts_with("this"))
}

fn zipped_text() -> Single<String> {
    zip3(
        Single::just("This"),
        Single::just("is"),
        Single::just("a test String"),
    )
    .map(|(first, second, third)| format!("{first} {second} {third}"))
}

/// GET /mono
pub async fn mono() -> Response {
    body::text(greeting()).await
}

/// GET /mono-empty
pub async fn mono_empty() -> Response {
    body::text(missing_greeting()).await
}

/// GET /mono-switch
pub async fn mono_switch() -> Response {
    body::text(fallback_greeting()).await
}

/// GET /mono-supplier
pub async fn mono_supplier() -> Response {
    body::text(supplied_greeting()).await
}

/// GET /mono-flatmap
pub async fn mono_flatmap() -> Response {
    body::text(flat_mapped_text()).await
}

/// GET /mono-filter
pub async fn mono_filter() -> Response {
    body::text(filtered_text()).await
}

/// GET /mono-zip
pub async fn mono_zip() -> Response {
    body::text(zipped_text()).await
}

// ── Streaming routes ───────────────────────────────────────────

/// Unbounded `{"value": n}` sequence starting at zero.
pub(crate) fn counting() -> Stream<Counter> {
    Stream::iterate(0i64, |n| n + 1).map(Counter::new)
}

/// GET /v1
pub async fn hello(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let words = Stream::just(vec!["Hello".to_string(), "World".to_string()]);
    StreamReply::new(words, StreamFormat::negotiate(&headers))
        .keep_alive(state.config.sse_keep_alive())
        .render()
        .await
}

/// GET /v2
///
/// Never completes when streamed; refused with 406 as a JSON array.
pub async fn hello_stream(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    StreamReply::new(counting(), StreamFormat::negotiate(&headers))
        .unbounded()
        .keep_alive(state.config.sse_keep_alive())
        .render()
        .await
}

/// POST /v3
pub async fn echo(State(state): State<ApiState>, request_body: Body) -> Response {
    let upper = body::text_body(request_body, state.config.max_body_bytes).map(|text| text.to_uppercase());
    body::text(upper).await
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use ripple_core::ApiConfig;

    fn test_state() -> ApiState {
        ApiState {
            config: ApiConfig::default(),
        }
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn single_routes_resolve() {
        assert_eq!(greeting().block().await.unwrap().as_deref(), Some("Hello, World!"));
        assert_eq!(missing_greeting().block().await.unwrap(), None);
        assert_eq!(
            fallback_greeting().block().await.unwrap().as_deref(),
            Some("yeah, there is no one")
        );
        assert_eq!(supplied_greeting().block().await.unwrap().as_deref(), Some("hello, world~!"));
        assert_eq!(flat_mapped_text().block().await.unwrap().as_deref(), Some("nooooooo test"));
        assert_eq!(
            filtered_text().block().await.unwrap().as_deref(),
            Some("this is a text for test")
        );
        assert_eq!(zipped_text().block().await.unwrap().as_deref(), Some("This is a test String"));
    }

    #[tokio::test]
    async fn mono_returns_text() {
        let resp = mono().await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "Hello, World!");
    }

    #[tokio::test]
    async fn mono_empty_returns_empty_ok() {
        let resp = mono_empty().await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.is_empty());
    }

    #[tokio::test]
    async fn hello_defaults_to_json_array() {
        let resp = hello(State(test_state()), HeaderMap::new()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, r#"["Hello","World"]"#);
    }

    #[tokio::test]
    async fn unbounded_stream_as_array_is_refused() {
        let resp = hello_stream(State(test_state()), HeaderMap::new()).await;
        assert_eq!(resp.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn echo_uppercases_body() {
        let resp = echo(State(test_state()), Body::from("shout this")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "SHOUT THIS");
    }

    #[tokio::test]
    async fn counting_starts_at_zero() {
        let first = counting().take(3).collect_list().block().await.unwrap().unwrap();
        assert_eq!(first, vec![Counter::new(0), Counter::new(1), Counter::new(2)]);
    }
}
