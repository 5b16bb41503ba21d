//! Duplicating output sinks for script execution.
//!
//! During a reload the script's print/debug output must reach two places:
//! an in-memory buffer handed back to the host for display, and the original
//! destination stream. [`OutputRelay`] is the duplicating writer; a pair of
//! [`StreamSlot`]s stands in for the script-visible stdout/stderr so relays
//! can be installed for the duration of one reload and restored afterwards,
//! on both the success and the error path.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// A write-only sink that tags line starts and duplicates everything it sees.
///
/// Writes are forwarded unchanged to the wrapped destination and appended to
/// an internal buffer. A fixed prefix is prepended once per logical line: a
/// line written across several `write` calls receives the prefix only on the
/// first call, and partial (no-trailing-newline) content is never dropped.
pub struct OutputRelay<W: Write> {
    dest: W,
    buffer: String,
    prefix: String,
    at_line_start: bool,
}

impl<W: Write> OutputRelay<W> {
    /// Wrap `dest`, prefixing each logical line with `prefix`.
    pub fn new(dest: W, prefix: impl Into<String>) -> Self {
        Self {
            dest,
            buffer: String::new(),
            prefix: prefix.into(),
            at_line_start: true,
        }
    }

    /// The text captured so far, exactly as it was forwarded downstream.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Consume the relay, returning the destination and the captured text.
    ///
    /// Consuming the buffer does not truncate what was already forwarded.
    pub fn into_parts(self) -> (W, String) {
        (self.dest, self.buffer)
    }

    fn write_text(&mut self, text: &str) -> io::Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        if self.at_line_start {
            self.buffer.push_str(&self.prefix);
            self.dest.write_all(self.prefix.as_bytes())?;
        }
        self.at_line_start = text.ends_with('\n');
        self.buffer.push_str(text);
        self.dest.write_all(text.as_bytes())
    }
}

impl<W: Write> Write for OutputRelay<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.write_text(&text)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dest.flush()
    }
}

/// Split captured relay text into display lines.
///
/// Splits on `'\n'`. A single trailing empty element produced by a
/// terminating newline is dropped; a non-terminated final chunk is kept as a
/// pending partial line.
pub fn split_lines(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
    if lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }
    lines
}

enum SlotState {
    /// The original destination: console (or a sink when echo is off).
    Console(Box<dyn Write + Send>),
    /// A relay installed for the duration of one reload.
    Relay(OutputRelay<Box<dyn Write + Send>>),
}

/// A shared stream slot standing in for a script-visible standard stream.
///
/// Exclusively owned by at most one relay at a time; `restore` always puts
/// the original writer back.
#[derive(Clone)]
pub struct StreamSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl StreamSlot {
    /// A slot whose original destination is the given writer.
    pub fn new(console: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotState::Console(console))),
        }
    }

    /// A slot that discards everything (echo disabled).
    pub fn sink() -> Self {
        Self::new(Box::new(io::sink()))
    }

    /// Replace the original destination writer.
    ///
    /// No-op while a relay is installed; the relay keeps forwarding to the
    /// writer it captured.
    pub fn set_console(&self, console: Box<dyn Write + Send>) {
        let mut state = self.inner.lock();
        if matches!(*state, SlotState::Console(_)) {
            *state = SlotState::Console(console);
        }
    }

    /// Write a chunk of text to whatever currently owns the slot.
    ///
    /// Stream failures must never abort a reload, so errors are logged and
    /// swallowed here.
    pub fn write_str(&self, text: &str) {
        let mut state = self.inner.lock();
        let result = match &mut *state {
            SlotState::Console(w) => w.write_all(text.as_bytes()).and_then(|()| w.flush()),
            SlotState::Relay(r) => r.write_text(text),
        };
        if let Err(e) = result {
            tracing::warn!(target: "relay", "stream write failed: {e}");
        }
    }

    /// Install a relay wrapping the current writer.
    fn install(&self, prefix: &str) {
        let mut state = self.inner.lock();
        let prior = std::mem::replace(&mut *state, SlotState::Console(Box::new(io::sink())));
        *state = match prior {
            SlotState::Console(w) => SlotState::Relay(OutputRelay::new(w, prefix)),
            // Already installed; leave it alone (single session invariant).
            relay @ SlotState::Relay(_) => relay,
        };
    }

    /// Uninstall the relay, restore the original writer and return the
    /// captured text. Returns an empty string if no relay was installed.
    fn restore(&self) -> String {
        let mut state = self.inner.lock();
        let prior = std::mem::replace(&mut *state, SlotState::Console(Box::new(io::sink())));
        match prior {
            SlotState::Relay(relay) => {
                let (console, captured) = relay.into_parts();
                *state = SlotState::Console(console);
                captured
            }
            console @ SlotState::Console(_) => {
                *state = console;
                String::new()
            }
        }
    }
}

/// The pair of script-visible standard streams.
#[derive(Clone)]
pub struct StreamSlots {
    pub out: StreamSlot,
    pub err: StreamSlot,
}

impl StreamSlots {
    /// Slots forwarding to the process's real stdout/stderr.
    pub fn stdio() -> Self {
        Self {
            out: StreamSlot::new(Box::new(io::stdout())),
            err: StreamSlot::new(Box::new(io::stderr())),
        }
    }

    /// Slots that discard forwarded output (capture only).
    pub fn sink() -> Self {
        Self {
            out: StreamSlot::sink(),
            err: StreamSlot::sink(),
        }
    }

    /// Install a relay pair for the duration of one reload.
    ///
    /// The returned guard restores the original writers when finished, or on
    /// drop if the reload unwinds early.
    pub fn install(&self, prefix: &str) -> RelayGuard {
        self.out.install(prefix);
        self.err.install(prefix);
        RelayGuard {
            slots: self.clone(),
            finished: false,
        }
    }
}

/// Scoped ownership of both stream slots.
pub struct RelayGuard {
    slots: StreamSlots,
    finished: bool,
}

impl RelayGuard {
    /// Uninstall both relays and return `(stdout_text, stderr_text)`.
    pub fn finish(mut self) -> (String, String) {
        self.finished = true;
        (self.slots.out.restore(), self.slots.err.restore())
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.slots.out.restore();
            self.slots.err.restore();
        }
    }
}
