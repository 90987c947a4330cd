//! Outbound channel to the automation host.
//!
//! Every message is serialized to one JSON line and written under a lock, so
//! concurrent producers never interleave partial lines. There is no batching
//! and no acknowledgement.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::Result;
use crate::protocol::{BroadcastId, OutboundMessage, PluginInfo, StateId};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

/// Line-oriented writer shared by every producer.
#[derive(Clone)]
pub struct OutboundChannel {
    writer: SharedWriter,
}

impl std::fmt::Debug for OutboundChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundChannel").finish_non_exhaustive()
    }
}

impl OutboundChannel {
    /// Create a channel over any writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Create a channel writing to the process stdout.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    /// Create a channel that records lines in memory.
    pub fn in_memory() -> (Self, MemoryLog) {
        let log = MemoryLog::default();
        (Self::new(log.clone()), log)
    }

    /// Write a single message.
    pub fn send(&self, message: &OutboundMessage) -> Result<()> {
        let mut line = message.to_line()?;
        line.push('\n');

        let mut writer = self.writer.lock();
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        trace!(line = %line.trim_end(), "Sent to host");
        Ok(())
    }

    /// Emit a state update.
    pub fn emit_state(&self, id: StateId, value: impl ToString) -> Result<()> {
        self.send(&OutboundMessage::state(id, value))
    }

    /// Emit a broadcast event with optional payload fields.
    pub fn emit_event(&self, event: BroadcastId, payload: Option<Map<String, Value>>) -> Result<()> {
        let message = match payload {
            Some(payload) => OutboundMessage::broadcast_with(event, payload),
            None => OutboundMessage::broadcast(event),
        };
        self.send(&message)
    }

    /// Reply to an `info` request.
    pub fn emit_info(&self, info: &PluginInfo) -> Result<()> {
        self.send(&OutboundMessage::info(info))
    }

    /// Report a dispatch-level failure.
    pub fn emit_error(&self, message: impl Into<String>) -> Result<()> {
        self.send(&OutboundMessage::error(message))
    }

    /// Reset every display state to its zero value. Status is left untouched.
    pub fn reset_states(&self) -> Result<()> {
        for (id, value) in StateId::reset_list() {
            self.emit_state(id, value)?;
        }
        Ok(())
    }
}

/// In-memory sink used when the output must be inspected.
#[derive(Clone, Default)]
pub struct MemoryLog {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryLog {
    /// All complete lines written so far.
    pub fn lines(&self) -> Vec<String> {
        let buffer = self.buffer.lock();
        String::from_utf8_lossy(&buffer)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// All lines decoded as JSON; lines that fail to decode are skipped.
    pub fn messages(&self) -> Vec<Value> {
        self.lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// Values written to a state, in order.
    pub fn state_values(&self, id: StateId) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|m| m["type"] == "stateUpdate" && m["id"] == id.as_ref())
            .filter_map(|m| m["value"].as_str().map(str::to_string))
            .collect()
    }

    /// Broadcasts of one kind, in order.
    pub fn broadcasts(&self, event: BroadcastId) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["type"] == "broadcast" && m["event"] == event.as_ref())
            .collect()
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Write for MemoryLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
