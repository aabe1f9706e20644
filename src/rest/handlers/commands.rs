use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::models::{CommandInput, CommandResult, ExecEvent};
use crate::rest::error::{ApiResponse, ApiResult};
use crate::rest::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    /// A string runs under the shell; an argv array execs directly.
    pub command: CommandInput,
    pub working_directory: Option<String>,
    pub timeout_seconds: Option<u64>,
}

pub async fn run_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> ApiResult<Json<ApiResponse<CommandResult>>> {
    let result = state
        .runner
        .run(
            &id,
            request.command,
            request.working_directory,
            request.timeout_seconds,
            state.shutdown.child_token(),
        )
        .await?;
    Ok(ApiResponse::ok(result))
}

/// Streams command output as server-sent events: `stdout`/`stderr` chunk
/// records followed by a single `exit` record.
pub async fn stream_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let receiver = state
        .runner
        .run_stream(
            &id,
            request.command,
            request.working_directory,
            request.timeout_seconds,
            state.shutdown.child_token(),
        )
        .await?;

    let stream = futures::stream::unfold(Some(receiver), |slot| async move {
        let mut receiver = slot?;
        let event = receiver.recv().await?;
        let (done, frame) = sse_frame(&event);
        Some((Ok::<_, Infallible>(frame), if done { None } else { Some(receiver) }))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_frame(event: &ExecEvent) -> (bool, Event) {
    match event {
        ExecEvent::Stdout { data } => (
            false,
            Event::default()
                .event("stdout")
                .data(json!({ "data": data }).to_string()),
        ),
        ExecEvent::Stderr { data } => (
            false,
            Event::default()
                .event("stderr")
                .data(json!({ "data": data }).to_string()),
        ),
        ExecEvent::Exit {
            exit_code,
            execution_time_ms,
        } => (
            true,
            Event::default().event("exit").data(
                json!({ "exitCode": exit_code, "executionTimeMs": execution_time_ms })
                    .to_string(),
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_frame_terminates_the_stream() {
        let (done, _) = sse_frame(&ExecEvent::Exit {
            exit_code: 0,
            execution_time_ms: 10,
        });
        assert!(done);

        let (done, _) = sse_frame(&ExecEvent::Stdout {
            data: "x".to_string(),
        });
        assert!(!done);
    }

    #[test]
    fn command_request_accepts_shell_and_argv() {
        let shell: CommandRequest =
            serde_json::from_str(r#"{"command": "echo hi", "timeoutSeconds": 5}"#).unwrap();
        assert!(matches!(shell.command, CommandInput::Shell(_)));
        assert_eq!(shell.timeout_seconds, Some(5));

        let argv: CommandRequest =
            serde_json::from_str(r#"{"command": ["echo", "hi"], "workingDirectory": "/tmp"}"#)
                .unwrap();
        assert!(matches!(argv.command, CommandInput::Argv(_)));
        assert_eq!(argv.working_directory.as_deref(), Some("/tmp"));
    }
}
