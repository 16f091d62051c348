//! Bridges between HTTP bodies and pipelines.
//!
//! Inbound bodies are exposed as a [`Single`] that reads the transport
//! only when subscribed. Outbound pipelines are rendered according to
//! the request's `Accept` header:
//!
//! | Accept | Rendering |
//! |---|---|
//! | `text/event-stream` | one SSE `data:` event per element |
//! | `application/x-ndjson`, `application/stream+json` | one JSON document per line, streamed |
//! | anything else | a single JSON array (bounded streams only) |

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use ripple_core::{PipelineError, PipelineResult, Single, Stream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, trace};

pub const EVENT_STREAM: &str = "text/event-stream";
pub const NDJSON: &str = "application/x-ndjson";
const STREAM_JSON: &str = "application/stream+json";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Error envelope for failed responses.
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    error: String,
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse {
            success: false,
            error: msg.to_string(),
        }),
    )
        .into_response()
}

fn failure(err: &PipelineError) -> Response {
    error!(%err, "pipeline failed");
    error_response(&err.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

// ── Inbound ────────────────────────────────────────────────────

/// The request body as a lazily read Single, capped at `limit` bytes.
pub fn bytes_body(body: Body, limit: usize) -> Single<Bytes> {
    Single::from_future(async move {
        axum::body::to_bytes(body, limit)
            .await
            .map(Some)
            .map_err(PipelineError::transform)
    })
}

/// The request body as UTF-8 text.
pub fn text_body(body: Body, limit: usize) -> Single<String> {
    bytes_body(body, limit).try_map(|bytes| String::from_utf8(bytes.to_vec()))
}

/// Decode a request body holding JSON documents into a Stream of `T`.
///
/// Documents are decoded as their bytes arrive, so elements reach the
/// pipeline while the client is still uploading. Documents may be
/// separated by newlines or whitespace; a top-level array contributes
/// each of its elements. `limit` caps the size of a single document,
/// not the body.
///
/// The body can be read only once: a second subscription fails with
/// [`PipelineError::AbsentValue`].
pub fn json_values<T>(body: Body, limit: usize) -> Stream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let body = Arc::new(Mutex::new(Some(body)));
    Stream::from_factory(move || {
        let taken = body.lock().unwrap_or_else(PoisonError::into_inner).take();
        match taken {
            Some(body) => decode_documents(body, limit).boxed(),
            None => stream::once(future::ready(Err(PipelineError::AbsentValue(
                "request body already consumed".into(),
            ))))
            .boxed(),
        }
    })
}

/// Incremental JSON document splitter over body frames.
struct DocumentReader {
    frames: BoxStream<'static, Result<Bytes, axum::Error>>,
    pending: Vec<u8>,
    limit: usize,
    finished: bool,
}

impl DocumentReader {
    /// Decode every complete document in `pending`.
    ///
    /// Until the body ends, only bytes up to the last newline are parsed,
    /// so a number split across frames is never cut short.
    fn drain<T: DeserializeOwned>(&mut self, at_end: bool) -> Vec<PipelineResult<T>> {
        let end = if at_end {
            self.pending.len()
        } else {
            self.pending
                .iter()
                .rposition(|byte| *byte == b'\n')
                .map_or(0, |newline| newline + 1)
        };

        let mut decoded = Vec::new();
        let mut consumed = 0;
        let mut documents = serde_json::Deserializer::from_slice(&self.pending[..end]).into_iter::<serde_json::Value>();
        loop {
            match documents.next() {
                Some(Ok(document)) => {
                    let size = documents.byte_offset() - consumed;
                    consumed = documents.byte_offset();
                    if size > self.limit {
                        decoded.push(Err(oversized(self.limit)));
                        break;
                    }
                    match document {
                        serde_json::Value::Array(items) => decoded.extend(items.into_iter().map(from_document)),
                        other => decoded.push(from_document(other)),
                    }
                }
                Some(Err(err)) if err.is_eof() && !at_end => break,
                Some(Err(err)) => {
                    decoded.push(Err(PipelineError::transform(err)));
                    break;
                }
                None => {
                    consumed = end;
                    break;
                }
            }
        }
        self.pending.drain(..consumed);

        if decoded.iter().any(Result::is_err) {
            self.finished = true;
        } else if self.pending.len() > self.limit {
            self.finished = true;
            decoded.push(Err(oversized(self.limit)));
        }
        decoded
    }
}

fn from_document<T: DeserializeOwned>(document: serde_json::Value) -> PipelineResult<T> {
    serde_json::from_value(document).map_err(PipelineError::transform)
}

fn oversized(limit: usize) -> PipelineError {
    PipelineError::transform(format!("JSON document exceeds {limit} bytes"))
}

fn decode_documents<T>(body: Body, limit: usize) -> BoxStream<'static, PipelineResult<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let reader = DocumentReader {
        frames: body.into_data_stream().boxed(),
        pending: Vec::new(),
        limit,
        finished: false,
    };
    stream::unfold(reader, |mut reader| async move {
        while !reader.finished {
            let decoded = match reader.frames.next().await {
                Some(Ok(frame)) => {
                    reader.pending.extend_from_slice(&frame);
                    reader.drain::<T>(false)
                }
                Some(Err(err)) => {
                    reader.finished = true;
                    vec![Err(PipelineError::transform(err))]
                }
                None => {
                    reader.finished = true;
                    reader.drain::<T>(true)
                }
            };
            if !decoded.is_empty() {
                trace!(count = decoded.len(), "decoded request documents");
                return Some((stream::iter(decoded), reader));
            }
        }
        None
    })
    .flatten()
    .boxed()
}

// ── Outbound ───────────────────────────────────────────────────

/// Render a text Single: the value as `text/plain`, empty as an empty 200.
pub async fn text(single: Single<String>) -> Response {
    match single.block().await {
        Ok(Some(body)) => ([(CONTENT_TYPE, TEXT_PLAIN)], body).into_response(),
        Ok(None) => StatusCode::OK.into_response(),
        Err(err) => failure(&err),
    }
}

/// How a Stream is written to the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    JsonArray,
    Ndjson,
    EventStream,
}

impl StreamFormat {
    pub fn negotiate(headers: &HeaderMap) -> Self {
        let accept = headers
            .get(ACCEPT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if accept.contains(EVENT_STREAM) {
            Self::EventStream
        } else if accept.contains(NDJSON) || accept.contains(STREAM_JSON) {
            Self::Ndjson
        } else {
            Self::JsonArray
        }
    }
}

/// A Stream response waiting to be rendered.
pub struct StreamReply<T> {
    stream: Stream<T>,
    format: StreamFormat,
    bounded: bool,
    keep_alive: Duration,
}

impl<T: Serialize + Send + 'static> StreamReply<T> {
    pub fn new(stream: Stream<T>, format: StreamFormat) -> Self {
        Self {
            stream,
            format,
            bounded: true,
            keep_alive: Duration::from_secs(15),
        }
    }

    /// Mark the stream as never completing. Such streams are refused as
    /// a JSON array with 406 rather than held open forever.
    pub fn unbounded(mut self) -> Self {
        self.bounded = false;
        self
    }

    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    pub async fn render(self) -> Response {
        debug!(format = ?self.format, bounded = self.bounded, "rendering stream");
        match self.format {
            StreamFormat::JsonArray if !self.bounded => error_response(
                "unbounded stream cannot be rendered as a JSON array",
                StatusCode::NOT_ACCEPTABLE,
            ),
            StreamFormat::JsonArray => match self.stream.collect_list().block().await {
                Ok(items) => Json(items.unwrap_or_default()).into_response(),
                Err(err) => failure(&err),
            },
            StreamFormat::Ndjson => ndjson(self.stream),
            StreamFormat::EventStream => event_stream(self.stream, self.keep_alive),
        }
    }
}

fn ndjson<T: Serialize + Send + 'static>(stream: Stream<T>) -> Response {
    let lines = stream
        .subscribe()
        .map(|item| {
            let mut line = serde_json::to_vec(&item?).map_err(PipelineError::transform)?;
            line.push(b'\n');
            Ok::<_, PipelineError>(Bytes::from(line))
        })
        .inspect_err(|err| error!(%err, "ndjson body aborted"));
    ([(CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response()
}

fn event_stream<T: Serialize + Send + 'static>(stream: Stream<T>, keep_alive: Duration) -> Response {
    let events = stream
        .subscribe()
        .map(|item| {
            item.and_then(|value| Event::default().json_data(value).map_err(PipelineError::transform))
        })
        .inspect_err(|err| error!(%err, "event stream aborted"));
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(keep_alive))
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Counter;
    use axum::http::HeaderValue;

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn negotiate_formats() {
        assert_eq!(StreamFormat::negotiate(&HeaderMap::new()), StreamFormat::JsonArray);
        assert_eq!(StreamFormat::negotiate(&accept("application/json")), StreamFormat::JsonArray);
        assert_eq!(StreamFormat::negotiate(&accept("text/event-stream")), StreamFormat::EventStream);
        assert_eq!(StreamFormat::negotiate(&accept("application/x-ndjson")), StreamFormat::Ndjson);
        assert_eq!(StreamFormat::negotiate(&accept("application/stream+json")), StreamFormat::Ndjson);
    }

    #[tokio::test]
    async fn text_body_is_read_lazily_and_mapped() {
        let upper = text_body(Body::from("hello"), 1024).map(|s| s.to_uppercase());
        let resp = text(upper).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "HELLO");
    }

    #[tokio::test]
    async fn oversized_body_fails() {
        let resp = text(text_body(Body::from("too long"), 3)).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(resp).await.contains(r#""success":false"#));
    }

    #[tokio::test]
    async fn empty_single_is_empty_ok() {
        let resp = text(Single::empty()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.is_empty());
    }

    async fn counters(body: Body, limit: usize) -> PipelineResult<Option<Vec<Counter>>> {
        json_values::<Counter>(body, limit).collect_list().block().await
    }

    #[tokio::test]
    async fn json_values_accepts_lines_and_arrays() {
        let from_lines = counters(Body::from("{\"value\":1}\n{\"value\":2}\n"), 1024).await.unwrap();
        let from_array = counters(Body::from("[{\"value\":3},{\"value\":4}]"), 1024).await.unwrap();
        let pretty = counters(Body::from("[\n  {\"value\": 5},\n  {\"value\": 6}\n]\n"), 1024).await.unwrap();
        assert_eq!(from_lines, Some(vec![Counter::new(1), Counter::new(2)]));
        assert_eq!(from_array, Some(vec![Counter::new(3), Counter::new(4)]));
        assert_eq!(pretty, Some(vec![Counter::new(5), Counter::new(6)]));
    }

    #[tokio::test]
    async fn json_values_rejects_malformed() {
        let result = counters(Body::from("{\"value\":"), 1024).await;
        assert!(matches!(result, Err(PipelineError::Transform(_))));

        let mistyped = counters(Body::from("{\"value\":\"one\"}\n"), 1024).await;
        assert!(matches!(mistyped, Err(PipelineError::Transform(_))));
    }

    #[tokio::test]
    async fn json_values_caps_each_document_not_the_body() {
        let many = "{\"value\":7}\n".repeat(50);
        let decoded = counters(Body::from(many), 16).await.unwrap().unwrap();
        assert_eq!(decoded.len(), 50);

        let oversized = counters(Body::from("{\"value\":123456789012}\n"), 16).await;
        assert!(matches!(oversized, Err(PipelineError::Transform(_))));
    }

    #[tokio::test]
    async fn json_values_emits_before_upload_completes() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Bytes, std::io::Error>>();
        let frames = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|frame| (frame, rx)) });
        let mut decoded = json_values::<Counter>(Body::from_stream(frames), 1024).subscribe();

        tx.send(Ok(Bytes::from_static(b"{\"value\":1}\n{\"val"))).unwrap();
        assert_eq!(decoded.next().await.unwrap().unwrap(), Counter::new(1));

        tx.send(Ok(Bytes::from_static(b"ue\":2}\n"))).unwrap();
        assert_eq!(decoded.next().await.unwrap().unwrap(), Counter::new(2));

        drop(tx);
        assert!(decoded.next().await.is_none());
    }

    #[tokio::test]
    async fn json_values_reads_body_once() {
        let values = json_values::<Counter>(Body::from("{\"value\":1}"), 1024);
        assert_eq!(values.clone().collect_list().block().await.unwrap(), Some(vec![Counter::new(1)]));
        assert!(matches!(
            values.collect_list().block().await,
            Err(PipelineError::AbsentValue(_))
        ));
    }

    #[tokio::test]
    async fn bounded_json_array() {
        let reply = StreamReply::new(Stream::just(vec![1, 2, 3]), StreamFormat::JsonArray);
        let resp = reply.render().await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "[1,2,3]");
    }

    #[tokio::test]
    async fn unbounded_json_array_is_not_acceptable() {
        let reply = StreamReply::new(Stream::iterate(0, |n| n + 1), StreamFormat::JsonArray).unbounded();
        assert_eq!(reply.render().await.status(), StatusCode::NOT_ACCEPTABLE);
    }

    #[tokio::test]
    async fn ndjson_writes_one_document_per_line() {
        let stream = Stream::iterate(0, |n| n + 1).take(3).map(Counter::new);
        let resp = StreamReply::new(stream, StreamFormat::Ndjson).render().await;
        assert_eq!(resp.headers()[CONTENT_TYPE], NDJSON);
        assert_eq!(
            body_string(resp).await,
            "{\"value\":0}\n{\"value\":1}\n{\"value\":2}\n"
        );
    }

    #[tokio::test]
    async fn event_stream_writes_data_events() {
        let stream = Stream::just(vec!["Hello".to_string(), "World!".to_string()]);
        let resp = StreamReply::new(stream, StreamFormat::EventStream).render().await;
        assert!(resp.headers()[CONTENT_TYPE].to_str().unwrap().starts_with(EVENT_STREAM));
        let body = body_string(resp).await;
        assert!(body.contains("data: \"Hello\"\n\n"));
        assert!(body.contains("data: \"World!\"\n\n"));
    }
}
