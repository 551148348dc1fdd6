//! Log API Handlers
//!
//! Appending job output, reading it back and following it live over SSE.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::stream::{self, Stream};
use keel_core::dto::job::{AppendLogs, AppendLogsResponse};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::log::LogTail;
use crate::service::log_service;

/// POST /jobs/{id}/logs
/// Append a chunk of output to a job's log
pub async fn append_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AppendLogs>,
) -> ApiResult<Json<AppendLogsResponse>> {
    log_service::append(state.store.as_ref(), &state.logs, id, &req.chunk).await?;

    Ok(Json(AppendLogsResponse { success: true }))
}

/// GET /jobs/{id}/logs
/// Full log content as plain text. Unknown or silent jobs read as empty.
pub async fn get_logs(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    tracing::debug!("Getting logs for job: {}", id);

    let content = state.logs.read_all(id).await;

    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], content)
}

// =============================================================================
// Live Streaming
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub once: Option<String>,
    pub offset: Option<u64>,
}

impl StreamQuery {
    fn is_once(&self) -> bool {
        matches!(self.once.as_deref(), Some("1") | Some("true"))
    }
}

enum Phase {
    Connected,
    Tailing,
    Done,
}

struct TailState {
    tail: LogTail,
    poll_interval: Duration,
    once: bool,
    phase: Phase,
}

/// GET /jobs/{id}/logs/stream
/// Server-Sent Events carrying only output appended since the last event
///
/// Query parameters:
/// - `once` (`1` or `true`): emit at most one data event, then close
/// - `offset`: byte offset to start from (default 0)
pub async fn stream_logs(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("Streaming logs for job: {}", id);

    let initial = TailState {
        tail: state.logs.tail(id, query.offset.unwrap_or(0)),
        poll_interval: state.config.stream_poll_interval,
        once: query.is_once(),
        phase: Phase::Connected,
    };

    let events = stream::unfold(initial, |mut st| async move {
        match st.phase {
            Phase::Connected => {
                st.phase = Phase::Tailing;
                Some((connected_event(), st))
            }
            Phase::Tailing if st.once => {
                st.phase = Phase::Done;
                let delta = st.tail.poll_delta().await?;
                Some((data_event(&delta), st))
            }
            Phase::Tailing => loop {
                if let Some(delta) = st.tail.poll_delta().await {
                    return Some((data_event(&delta), st));
                }
                tokio::time::sleep(st.poll_interval).await;
            },
            Phase::Done => None,
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn connected_event() -> Result<Event, Infallible> {
    Ok(Event::default().comment("connected"))
}

fn data_event(text: &str) -> Result<Event, Infallible> {
    // SSE cannot carry bare carriage returns
    Ok(Event::default().data(text.replace('\r', "\n")))
}
