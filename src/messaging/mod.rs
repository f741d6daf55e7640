//! Messaging module - Native-messaging host bridging the browser extension.
//!
//! The browser starts the host with stdin/stdout pipes. Inbound frames are
//! either capture notifications (`{"type": ...}`, no reply) or operator
//! requests (`{"action": ...}`, exactly one reply). A request may carry an
//! `id`, which is echoed in its reply.

pub mod frame;

pub use frame::{read_frame, write_frame, MAX_INBOUND_FRAME, MAX_OUTBOUND_FRAME};

use crate::agent::Agent;
use crate::capture::Notification;
use crate::error::FrameError;
use crate::sync::{SyncFailure, SyncOutcome, SyncReport};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Operator request sent by the extension's popup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    ManualSync,
    GetStatus,
    AuthSuccess {
        token: String,
        #[serde(default)]
        email: Option<String>,
    },
    Logout,
    WipeLocalData,
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::ManualSync => "MANUAL_SYNC",
            Request::GetStatus => "GET_STATUS",
            Request::AuthSuccess { .. } => "AUTH_SUCCESS",
            Request::Logout => "LOGOUT",
            Request::WipeLocalData => "WIPE_LOCAL_DATA",
        }
    }
}

/// Reply to requests that only succeed or fail.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Ack {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    removed: Option<usize>,
}

impl Ack {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
            removed: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            removed: None,
        }
    }
}

type SharedWriter<W> = Arc<Mutex<W>>;

/// Native-messaging host serving one agent.
pub struct Host<'a> {
    agent: &'a Agent,
}

impl<'a> Host<'a> {
    pub fn new(agent: &'a Agent) -> Self {
        Self { agent }
    }

    /// Serve frames until end of input. Undecodable frames are skipped.
    /// Returns once every pending sync reply has been written.
    pub fn serve<R, W>(&self, mut reader: R, writer: W) -> Result<(), FrameError>
    where
        R: Read,
        W: Write + Send + 'static,
    {
        let writer = Arc::new(Mutex::new(writer));
        let mut pending: Vec<JoinHandle<()>> = Vec::new();

        info!("[Host] Listening for native messages");
        loop {
            let message = match read_frame(&mut reader) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e @ (FrameError::Json(_) | FrameError::TooLarge { .. })) => {
                    warn!("[Host] Dropping frame: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            pending.retain(|reply| !reply.is_finished());
            if let Some(reply) = self.dispatch(message, &writer)? {
                pending.push(reply);
            }
        }

        for reply in pending {
            if reply.join().is_err() {
                error!("[Host] Sync reply worker panicked");
            }
        }
        info!("[Host] Input closed, exiting");
        Ok(())
    }

    /// Handle one inbound message. A manual sync is answered from a worker
    /// thread whose handle is returned.
    fn dispatch<W>(
        &self,
        message: Value,
        writer: &SharedWriter<W>,
    ) -> Result<Option<JoinHandle<()>>, FrameError>
    where
        W: Write + Send + 'static,
    {
        if message.get("action").is_none() {
            match Notification::from_value(message) {
                Ok(notification) => {
                    self.agent.capture().handle(notification);
                }
                Err(e) => warn!("[Host] Ignoring malformed notification: {}", e),
            }
            return Ok(None);
        }

        let id = message.get("id").cloned();
        let request = match serde_json::from_value::<Request>(message) {
            Ok(request) => request,
            Err(e) => {
                warn!("[Host] Unknown request: {}", e);
                let reply = envelope(id, None, &Ack::failed(format!("Unknown request: {}", e)));
                send(writer, &reply)?;
                return Ok(None);
            }
        };
        debug!("[Host] {} requested", request.name());

        if request == Request::ManualSync {
            let outcome = self.agent.request_sync();
            let writer = writer.clone();
            let worker = thread::Builder::new()
                .name("tabtrail-sync-reply".to_string())
                .spawn(move || {
                    let outcome = outcome.recv().unwrap_or_else(|_| {
                        SyncOutcome::failed(SyncFailure::Unknown, "Sync worker stopped", 0)
                    });
                    let reply = envelope(id, Some("MANUAL_SYNC"), &SyncReport::from(&outcome));
                    if let Err(e) = send(&writer, &reply) {
                        error!("[Host] Cannot write sync reply: {}", e);
                    }
                })?;
            return Ok(Some(worker));
        }

        let reply = envelope(id, Some(request.name()), &self.answer(request));
        send(writer, &reply)?;
        Ok(None)
    }

    fn answer(&self, request: Request) -> Value {
        let reply = match request {
            Request::GetStatus => match self.agent.status() {
                Ok(status) => return to_value(&status),
                Err(e) => Ack::failed(e.to_string()),
            },
            Request::AuthSuccess { token, email } => match self.agent.login(&token) {
                Ok(()) => match self.agent.set_user_email(email.as_deref()) {
                    Ok(()) => Ack::ok(),
                    Err(e) => Ack::failed(e.to_string()),
                },
                Err(e) => Ack::failed(e.to_string()),
            },
            Request::Logout => match self.agent.logout() {
                Ok(()) => Ack::ok(),
                Err(e) => Ack::failed(format!("{:#}", e)),
            },
            Request::WipeLocalData => match self.agent.wipe_local_data() {
                Ok(removed) => Ack {
                    removed: Some(removed),
                    ..Ack::ok()
                },
                Err(e) => Ack::failed(format!("{:#}", e)),
            },
            Request::ManualSync => {
                return to_value(&SyncReport::from(&self.agent.trigger_manual_sync()))
            }
        };
        to_value(&reply)
    }
}

fn to_value<T: Serialize>(body: &T) -> Value {
    serde_json::to_value(body).unwrap_or_else(|e| json!({"success": false, "message": e.to_string()}))
}

/// Attach `action` and the request `id` to a reply body.
fn envelope<T: Serialize>(id: Option<Value>, action: Option<&str>, body: &T) -> Value {
    let mut reply = to_value(body);
    if let Value::Object(map) = &mut reply {
        if let Some(action) = action {
            map.insert("action".to_string(), Value::from(action));
        }
        if let Some(id) = id {
            map.insert("id".to_string(), id);
        }
    }
    reply
}

fn send<W: Write>(writer: &SharedWriter<W>, reply: &Value) -> Result<(), FrameError> {
    let mut writer = writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    write_frame(&mut *writer, reply)
}
