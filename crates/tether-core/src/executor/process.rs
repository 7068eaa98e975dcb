use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tether_config::{ExecutorSettings, DEFAULT_EXECUTOR_NAME};

use super::{CallReply, Executor, ExecutorLink};

const EXECUTE_SCRIPT_METHOD: &str = "executeApplicationScript";
const SCRIPT_DONE_EVENT: &str = "applicationScriptDone";

/// Process executor failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    NotConfigured,
    Spawn(String),
    Io(String),
    Protocol(String),
    ProcessExited { code: Option<i32> },
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => write!(f, "executor.command is not configured"),
            Self::Spawn(msg) => write!(f, "{msg}"),
            Self::Io(msg) => write!(f, "{msg}"),
            Self::Protocol(msg) => write!(f, "{msg}"),
            Self::ProcessExited { code } => write!(f, "engine process exited (code={code:?})"),
        }
    }
}

impl std::error::Error for ExecutorError {}

/// Executor that runs the engine as a child process speaking line-delimited
/// JSON over stdio.
///
/// Host to engine: `{"id", "method": "executeApplicationScript", "url",
/// "script", "inject"}` and `{"id", "method", "arguments"}`.
/// Engine to host: `{"replyID", "result"}` or `{"replyID", "error"}`, plus
/// `{"event": "applicationScriptDone"}`. A reply to the script message also
/// counts as script completion. A `result` given as a string is parsed as
/// JSON, which is how most engines hand back the flushed queue.
pub struct ProcessExecutor {
    settings: ExecutorSettings,
    link: ExecutorLink,
    injected: Map<String, Value>,
    next_id: u64,
    pending: Arc<Mutex<PendingReplies>>,
    session: Option<Session>,
}

#[derive(Default)]
struct PendingReplies {
    script_id: Option<u64>,
    script_done: bool,
    closing: bool,
    calls: HashMap<u64, CallReply>,
}

struct Session {
    child: Child,
    outbound: Option<Sender<Outbound>>,
}

struct Outbound {
    line: String,
    is_script: bool,
}

#[derive(Debug, Serialize)]
struct ScriptMessage<'a> {
    id: u64,
    method: &'static str,
    url: &'a str,
    script: &'a str,
    inject: &'a Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct CallMessage<'a> {
    id: u64,
    method: &'a str,
    arguments: &'a [Value],
}

#[derive(Debug, Deserialize)]
struct EngineMessage {
    #[serde(default, rename = "replyID")]
    reply_id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    event: Option<String>,
}

impl ProcessExecutor {
    pub fn new(link: ExecutorLink, settings: ExecutorSettings) -> Self {
        Self {
            settings,
            link,
            injected: Map::new(),
            next_id: 1,
            pending: Arc::new(Mutex::new(PendingReplies::default())),
            session: None,
        }
    }

    fn spawn(&self) -> std::result::Result<Session, ExecutorError> {
        let command_name = self
            .settings
            .command
            .as_deref()
            .ok_or(ExecutorError::NotConfigured)?;

        let mut child = Command::new(command_name)
            .args(&self.settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                ExecutorError::Spawn(format!("failed to spawn engine {command_name}: {err}"))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ExecutorError::Spawn("failed to capture engine stdin pipe".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ExecutorError::Spawn("failed to capture engine stdout pipe".to_string())
        })?;

        spawn_reader(stdout, Arc::clone(&self.pending), self.link.clone());
        let outbound = spawn_writer(stdin, self.settings.warmup(), self.link.clone());

        Ok(Session {
            child,
            outbound: Some(outbound),
        })
    }

    fn send(&mut self, line: String, is_script: bool) {
        let sent = self
            .session
            .as_ref()
            .and_then(|s| s.outbound.as_ref())
            .map(|tx| tx.send(Outbound { line, is_script }).is_ok())
            .unwrap_or(false);
        if !sent {
            tracing::warn!("engine process is not running; message dropped");
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl Executor for ProcessExecutor {
    fn name(&self) -> &str {
        DEFAULT_EXECUTOR_NAME
    }

    fn init(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = self.spawn()?;
        tracing::info!(
            pid = session.child.id(),
            generation = self.link.generation(),
            "engine process started"
        );
        self.session = Some(session);
        Ok(())
    }

    fn inject_json(&mut self, name: &str, value: Value) {
        self.injected.insert(name.to_string(), value);
    }

    fn execute_application_script(&mut self, code: String, source_url: &str) {
        let id = self.allocate_id();
        if let Ok(mut pending) = self.pending.lock() {
            pending.script_id = Some(id);
            pending.script_done = false;
        }
        let message = ScriptMessage {
            id,
            method: EXECUTE_SCRIPT_METHOD,
            url: source_url,
            script: &code,
            inject: &self.injected,
        };
        match serde_json::to_string(&message) {
            Ok(line) => self.send(line, true),
            Err(err) => {
                self.link
                    .fail(format!("failed to encode application script message: {err}"));
            }
        }
    }

    fn execute_js_call(&mut self, method: &str, args: Vec<Value>, reply: CallReply) {
        let id = self.allocate_id();
        let message = CallMessage {
            id,
            method,
            arguments: &args,
        };
        let line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(method, error = %err, "failed to encode engine call");
                reply.deliver(Value::Null);
                return;
            }
        };
        match self.pending.lock() {
            Ok(mut pending) => {
                pending.calls.insert(id, reply);
            }
            Err(_) => {
                reply.deliver(Value::Null);
                return;
            }
        }
        self.send(line, false);
    }

    fn shutdown(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if let Ok(mut pending) = self.pending.lock() {
            pending.closing = true;
        }
        // Closing the writer channel ends the writer thread and engine stdin.
        session.outbound = None;
        match session.child.try_wait() {
            Ok(Some(_)) => {}
            Ok(None) => {
                let _ = session.child.kill();
                let _ = session.child.wait();
            }
            Err(_) => {}
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.calls.clear();
        }
        tracing::debug!(generation = self.link.generation(), "engine process stopped");
    }
}

impl Drop for ProcessExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_writer(mut stdin: ChildStdin, warmup: Duration, link: ExecutorLink) -> Sender<Outbound> {
    let (tx, rx) = mpsc::channel::<Outbound>();
    thread::spawn(move || {
        let mut warmed_up = false;
        for message in rx {
            if message.is_script && !warmed_up {
                thread::sleep(warmup);
                warmed_up = true;
            }
            let written = stdin
                .write_all(message.line.as_bytes())
                .and_then(|_| stdin.write_all(b"\n"))
                .and_then(|_| stdin.flush());
            if let Err(err) = written {
                link.fail(ExecutorError::Io(format!("engine stdin write failed: {err}")).to_string());
                return;
            }
        }
    });
    tx
}

fn spawn_reader(stdout: ChildStdout, pending: Arc<Mutex<PendingReplies>>, link: ExecutorLink) {
    thread::spawn(move || {
        let reader = BufReader::new(stdout);
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) if pending.lock().map(|p| p.closing).unwrap_or(true) => return,
                Err(err) => {
                    link.fail(ExecutorError::Io(format!("engine stdout read error: {err}")).to_string());
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<EngineMessage>(&line) {
                Ok(message) => handle_engine_message(message, &pending, &link),
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring unparseable engine output line");
                }
            }
        }
        let closing = pending.lock().map(|p| p.closing).unwrap_or(true);
        if !closing {
            link.fail(ExecutorError::ProcessExited { code: None }.to_string());
        }
    });
}

fn handle_engine_message(
    message: EngineMessage,
    pending: &Mutex<PendingReplies>,
    link: &ExecutorLink,
) {
    let Ok(mut pending) = pending.lock() else {
        return;
    };

    if message.event.as_deref() == Some(SCRIPT_DONE_EVENT) {
        mark_script_done(&mut pending, link);
        return;
    }

    let Some(reply_id) = message.reply_id else {
        tracing::debug!(event = ?message.event, "ignoring engine message without replyID");
        return;
    };

    if pending.script_id == Some(reply_id) {
        if let Some(error) = message.error {
            link.fail(format!("application script failed: {error}"));
            return;
        }
        mark_script_done(&mut pending, link);
        return;
    }

    let Some(reply) = pending.calls.remove(&reply_id) else {
        tracing::warn!(reply_id, "engine replied to an unknown request");
        return;
    };
    drop(pending);

    if let Some(error) = message.error {
        reply.fail(error.as_str().map_or_else(|| error.to_string(), str::to_string));
        return;
    }
    reply.deliver(decode_result(message.result.unwrap_or(Value::Null)));
}

fn mark_script_done(pending: &mut PendingReplies, link: &ExecutorLink) {
    if pending.script_done {
        return;
    }
    pending.script_done = true;
    link.script_done();
}

fn decode_result(result: Value) -> Value {
    match result {
        Value::String(raw) => match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(raw),
        },
        other => other,
    }
}
