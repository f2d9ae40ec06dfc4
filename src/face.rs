//! Local web panel: enter a task, watch the loop's progress, cancel.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::controller::{CancelToken, LoopEvent};
use crate::error::{GuideError, Result};

#[derive(Clone)]
struct AppState {
    task_tx: mpsc::Sender<String>,
    events: broadcast::Sender<LoopEvent>,
    cancel: CancelToken,
}

#[derive(Deserialize)]
struct TaskPayload {
    task: String,
}

fn to_sse_event(event: &LoopEvent) -> Event {
    let name = match event {
        LoopEvent::State { .. } => "state",
        LoopEvent::Guidance { .. } => "guidance",
        LoopEvent::Miss { .. } => "miss",
        LoopEvent::Done { .. } => "done",
        LoopEvent::Failed { .. } => "failed",
        LoopEvent::Cancelled => "cancelled",
    };
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".into());
    Event::default().event(name).data(data)
}

/// Start the panel server. Tasks submitted through the page arrive on the
/// returned channel; loop events stream back to the page over SSE.
pub async fn start_server(
    port: u16,
    events: broadcast::Sender<LoopEvent>,
    cancel: CancelToken,
) -> Result<mpsc::Receiver<String>> {
    let (task_tx, task_rx) = mpsc::channel::<String>(1);

    let state = Arc::new(AppState {
        task_tx,
        events,
        cancel,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/task", post(task_handler))
        .route("/cancel", post(cancel_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    // Try the requested port, fall back to the next few if in use.
    let mut listener = None;
    let mut bound = port;
    for p in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(format!("127.0.0.1:{p}")).await {
            Ok(l) => {
                listener = Some(l);
                bound = p;
                break;
            }
            Err(_) => continue,
        }
    }
    let listener = listener.ok_or_else(|| {
        GuideError::Internal(format!(
            "could not bind the panel to any port in {port}..{}",
            port.saturating_add(10)
        ))
    })?;

    info!("panel running at http://localhost:{bound}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("panel server stopped: {e}");
        }
    });

    Ok(task_rx)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn task_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TaskPayload>,
) -> &'static str {
    info!("panel task: {}", payload.task);
    let _ = state.task_tx.send(payload.task).await;
    "ok"
}

async fn cancel_handler(State(state): State<Arc<AppState>>) -> &'static str {
    info!("panel cancel");
    state.cancel.cancel();
    "ok"
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
        Err(_) => None,
    });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Guidepost</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #0a0a0f;
    color: #e0e0e0;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    height: 100vh;
    display: flex;
    flex-direction: column;
  }
  header {
    padding: 20px 28px;
    border-bottom: 1px solid #1a1a2e;
    display: flex;
    align-items: center;
    gap: 12px;
  }
  header h1 { font-size: 18px; font-weight: 600; color: #fff; }
  header .dot {
    width: 8px; height: 8px;
    border-radius: 50%;
    background: #22c55e;
  }
  header .dot.busy { background: #f59e0b; }
  header #state { color: #777; font-size: 13px; margin-left: auto; }
  .main {
    flex: 1;
    display: flex;
    flex-direction: column;
    max-width: 760px;
    width: 100%;
    margin: 0 auto;
    padding: 20px 28px;
    gap: 14px;
    overflow: hidden;
  }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 8px; }
  .entry { padding: 10px 14px; border-radius: 8px; font-size: 14px; line-height: 1.5; }
  .entry.user { background: #1a1a2e; border-left: 3px solid #6366f1; }
  .entry.guidance { background: #111118; border-left: 3px solid #3b82f6; }
  .entry.miss { background: #18120a; border-left: 3px solid #f59e0b; color: #fcd34d; }
  .entry.error { background: #1a0a0a; border-left: 3px solid #ef4444; color: #fca5a5; }
  .entry.done { background: #0a1a0a; border-left: 3px solid #22c55e; color: #86efac; }
  .input-area { display: flex; gap: 8px; }
  #task {
    flex: 1;
    background: #111118;
    border: 1px solid #222;
    border-radius: 8px;
    padding: 12px 16px;
    color: #fff;
    font-size: 15px;
    outline: none;
  }
  #task:focus { border-color: #6366f1; }
  #task:disabled { opacity: 0.5; }
  button {
    background: #6366f1;
    color: #fff;
    border: none;
    border-radius: 8px;
    padding: 12px 20px;
    font-size: 14px;
    font-weight: 600;
    cursor: pointer;
  }
  button:disabled { background: #333; cursor: not-allowed; }
  #stop { background: #ef4444; }
</style>
</head>
<body>
  <header>
    <div class="dot" id="status-dot"></div>
    <h1>Guidepost</h1>
    <span id="state">idle</span>
  </header>
  <div class="main">
    <div id="log"></div>
    <div class="input-area">
      <input type="text" id="task" placeholder="What do you want to get done?" autofocus />
      <button id="send" onclick="send()">Guide me</button>
      <button id="stop" onclick="stop()" disabled>Stop</button>
    </div>
  </div>
<script>
  const log = document.getElementById('log');
  const task = document.getElementById('task');
  const sendBtn = document.getElementById('send');
  const stopBtn = document.getElementById('stop');
  const dot = document.getElementById('status-dot');
  const stateLabel = document.getElementById('state');
  let busy = false;

  function addEntry(cls, text) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.textContent = text;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function setBusy(b) {
    busy = b;
    task.disabled = b;
    sendBtn.disabled = b;
    stopBtn.disabled = !b;
    dot.className = b ? 'dot busy' : 'dot';
    if (!b) task.focus();
  }

  async function send() {
    const text = task.value.trim();
    if (!text || busy) return;
    task.value = '';
    addEntry('user', 'Task: ' + text);
    setBusy(true);
    await fetch('/task', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({task: text}),
    });
  }

  async function stop() {
    await fetch('/cancel', {method: 'POST'});
  }

  task.addEventListener('keydown', e => {
    if (e.key === 'Enter') send();
  });

  const es = new EventSource('/events');

  es.addEventListener('state', e => {
    const d = JSON.parse(e.data);
    stateLabel.textContent = d.state;
    if (d.state === 'idle') setBusy(false);
  });

  es.addEventListener('guidance', e => {
    const d = JSON.parse(e.data);
    addEntry('guidance', 'Step ' + d.step + ': ' + d.message);
  });

  es.addEventListener('miss', e => {
    const d = JSON.parse(e.data);
    addEntry('miss', 'Could not find the element for: ' + d.message);
  });

  es.addEventListener('done', e => {
    const d = JSON.parse(e.data);
    addEntry('done', 'Done: ' + d.message);
  });

  es.addEventListener('failed', e => {
    const d = JSON.parse(e.data);
    addEntry('error', 'Failed: ' + d.message);
  });

  es.addEventListener('cancelled', () => {
    addEntry('error', 'Task cancelled.');
  });

  addEntry('done', 'Guidepost ready. Describe a task to begin.');
</script>
</body>
</html>
"##;
