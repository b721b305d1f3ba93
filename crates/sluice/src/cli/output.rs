//! Line-delimited JSON output.

use std::io::Write;

use anyhow::{Context, Result};
use sluice_protocol::Message;

/// Writes one protocol message per line.
pub struct MessageWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> MessageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn write(&mut self, message: &Message) -> Result<()> {
        let line = message
            .to_json_line()
            .with_context(|| format!("Failed to encode {} message", message.type_name()))?;
        writeln!(self.inner, "{}", line).context("Failed to write message")?;
        self.written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush().context("Failed to flush output")
    }

    /// Messages written so far.
    pub fn messages_written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
