//! WebSocket bridge for duplex audio providers
//!
//! Speech synthesis and transcription on DashScope-style upstreams run
//! over a WebSocket task protocol: a `run-task` control frame opens the
//! task, events report progress, and audio travels as binary frames.
//! The drive loops are generic over the socket so they can be exercised
//! without a live connection.

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::utils::error::{RelayError, RelayResult};

/// Size of each uploaded audio chunk
pub const UPLOAD_CHUNK_SIZE: usize = 3072;

/// Parsed control event from a text frame
#[derive(Debug, Clone)]
pub struct WsEvent {
    pub kind: String,
    pub payload: Value,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

/// Parse an event frame
pub fn parse_event(text: &str) -> RelayResult<WsEvent> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RelayError::BadResponse(format!("malformed event frame: {}", e)))?;
    let header = &value["header"];
    let kind = header["event"]
        .as_str()
        .ok_or_else(|| RelayError::BadResponse("event frame missing header.event".to_string()))?
        .to_string();
    Ok(WsEvent {
        kind,
        payload: value.get("payload").cloned().unwrap_or(Value::Null),
        error_code: header["error_code"].as_str().map(str::to_string),
        error_message: header["error_message"].as_str().map(str::to_string),
    })
}

/// Build the run-task control frame
pub fn run_task_frame(task_id: &str, payload: &Value) -> String {
    json!({
        "header": {
            "action": "run-task",
            "task_id": task_id,
            "streaming": "duplex",
        },
        "payload": payload,
    })
    .to_string()
}

/// Build the finish-task control frame
pub fn finish_task_frame(task_id: &str) -> String {
    json!({
        "header": {
            "action": "finish-task",
            "task_id": task_id,
            "streaming": "duplex",
        },
        "payload": {"input": {}},
    })
    .to_string()
}

fn task_failure(event: &WsEvent) -> RelayError {
    RelayError::Upstream {
        status: 500,
        error_type: "upstream_error".to_string(),
        message: event
            .error_message
            .clone()
            .unwrap_or_else(|| "task failed".to_string()),
        code: event.error_code.clone(),
    }
}

/// Drive a synthesis task to completion, collecting audio frames
pub async fn drive_synthesis<S>(
    socket: &mut S,
    task_id: &str,
    payload: &Value,
) -> RelayResult<Vec<u8>>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    socket
        .send(Message::Text(run_task_frame(task_id, payload)))
        .await
        .map_err(|e| RelayError::WebSocket(e.to_string()))?;

    let mut audio = Vec::new();
    // Every exit below goes through the Close send after the loop
    let result = loop {
        let frame = match socket.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break Err(RelayError::WebSocket(e.to_string())),
            None => {
                break Err(RelayError::WebSocket(
                    "connection closed before task finished".to_string(),
                ))
            }
        };
        match frame {
            Message::Binary(chunk) => audio.extend_from_slice(&chunk),
            Message::Text(text) => {
                let event = match parse_event(&text) {
                    Ok(event) => event,
                    Err(e) => break Err(e),
                };
                match event.kind.as_str() {
                    "task-started" | "result-generated" => {
                        debug!("Synthesis event: {}", event.kind);
                    }
                    "task-finished" => break Ok(()),
                    "task-failed" => break Err(task_failure(&event)),
                    other => warn!("Ignoring unknown synthesis event: {}", other),
                }
            }
            Message::Close(_) => {
                break Err(RelayError::WebSocket(
                    "connection closed before task finished".to_string(),
                ))
            }
            _ => {}
        }
    };

    let _ = socket.send(Message::Close(None)).await;
    result.map(|_| audio)
}

async fn upload_audio<S>(socket: &mut S, task_id: &str, audio: &[u8]) -> RelayResult<()>
where
    S: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    for chunk in audio.chunks(UPLOAD_CHUNK_SIZE) {
        socket
            .send(Message::Binary(chunk.to_vec()))
            .await
            .map_err(|e| RelayError::WebSocket(e.to_string()))?;
    }
    socket
        .send(Message::Text(finish_task_frame(task_id)))
        .await
        .map_err(|e| RelayError::WebSocket(e.to_string()))
}

/// Drive a transcription task to completion: upload the audio after
/// task-started, then collect result payloads until task-finished
pub async fn drive_transcription<S>(
    socket: &mut S,
    task_id: &str,
    payload: &Value,
    audio: &[u8],
) -> RelayResult<Vec<Value>>
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    socket
        .send(Message::Text(run_task_frame(task_id, payload)))
        .await
        .map_err(|e| RelayError::WebSocket(e.to_string()))?;

    let mut results = Vec::new();
    let mut uploaded = false;
    // Every exit below goes through the Close send after the loop
    let result = loop {
        let frame = match socket.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => break Err(RelayError::WebSocket(e.to_string())),
            None => {
                break Err(RelayError::WebSocket(
                    "connection closed before task finished".to_string(),
                ))
            }
        };
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => {
                break Err(RelayError::WebSocket(
                    "connection closed before task finished".to_string(),
                ))
            }
            _ => continue,
        };
        let event = match parse_event(&text) {
            Ok(event) => event,
            Err(e) => break Err(e),
        };
        match event.kind.as_str() {
            "task-started" => {
                if uploaded {
                    continue;
                }
                debug!("Transcription task started, uploading {} bytes", audio.len());
                if let Err(e) = upload_audio(socket, task_id, audio).await {
                    break Err(e);
                }
                uploaded = true;
            }
            "result-generated" => results.push(event.payload),
            "task-finished" => break Ok(()),
            "task-failed" => break Err(task_failure(&event)),
            other => warn!("Ignoring unknown transcription event: {}", other),
        }
    };

    let _ = socket.send(Message::Close(None)).await;
    result.map(|_| results)
}

/// Connect to the upstream WebSocket endpoint with bearer auth
pub async fn connect(
    url: &str,
    api_key: &str,
    workspace: Option<&str>,
) -> RelayResult<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
> {
    let mut request = url
        .into_client_request()
        .map_err(|e| RelayError::WebSocket(format!("invalid upstream url: {}", e)))?;
    let headers = request.headers_mut();
    headers.insert(
        "Authorization",
        format!("Bearer {}", api_key)
            .parse()
            .map_err(|_| RelayError::Authentication("invalid api key".to_string()))?,
    );
    if let Some(workspace) = workspace {
        headers.insert(
            "X-DashScope-WorkSpace",
            workspace
                .parse()
                .map_err(|_| RelayError::Authentication("invalid workspace id".to_string()))?,
        );
    }

    let (socket, _response) = connect_async(request)
        .await
        .map_err(|e| RelayError::WebSocket(format!("upstream connect failed: {}", e)))?;
    Ok(socket)
}
