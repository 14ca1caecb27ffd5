//! Event sinks for lifecycle messages.
//!
//! The loop reports through [`Observer`] and never waits on a sink: every
//! method returns immediately, and sink failures are logged, not propagated.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::warn;

use crate::core::playback::PlaybackControl;
use crate::core::types::Message;

/// Receives lifecycle events from the execution loop.
pub trait Observer {
    fn on_message(&self, message: &Message);

    /// Called exactly once per run, on the terminal transition.
    fn on_shutdown(&self);

    /// Called when a stepwise run pauses for the next step.
    fn on_pause_entered(&self, _control: PlaybackControl) {}
}

/// Fans events out to several sinks, in order.
#[derive(Default)]
pub struct Observers {
    sinks: Vec<Box<dyn Observer + Send>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl Observer + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl Observer for Observers {
    fn on_message(&self, message: &Message) {
        for sink in &self.sinks {
            sink.on_message(message);
        }
    }

    fn on_shutdown(&self) {
        for sink in &self.sinks {
            sink.on_shutdown();
        }
    }

    fn on_pause_entered(&self, control: PlaybackControl) {
        for sink in &self.sinks {
            sink.on_pause_entered(control);
        }
    }
}

/// Renders messages as plain text lines on stdout.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

/// Single-line text rendering used by the console sink.
pub fn render_line(message: &Message) -> String {
    match message {
        Message::Goal { value } => format!("goal: {value}"),
        Message::Thinking => "thinking...".to_string(),
        Message::Task {
            id,
            value,
            status,
            result,
        } => match result {
            Some(result) => format!("[{}] {id} {value}\n  => {result}", status.as_str()),
            None => format!("[{}] {id} {value}", status.as_str()),
        },
        Message::System { text } => format!("system: {text}"),
    }
}

impl Observer for ConsoleObserver {
    fn on_message(&self, message: &Message) {
        println!("{}", render_line(message));
    }

    fn on_shutdown(&self) {
        println!("agent shut down");
    }

    fn on_pause_entered(&self, _control: PlaybackControl) {
        println!("paused: press enter to run the next step, or `q` to stop");
    }
}

/// Appends every message as one JSON line to a transcript file.
#[derive(Debug)]
pub struct TranscriptObserver {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl TranscriptObserver {
    /// Open (or create) the transcript at `path`, creating parent directories.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create transcript dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open transcript {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn write_line(&self, message: &Message) -> Result<()> {
        let mut line = serde_json::to_string(message).context("serialize message")?;
        line.push('\n');
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("transcript writer lock poisoned"))?;
        writer.write_all(line.as_bytes()).context("write transcript")?;
        writer.flush().context("flush transcript")
    }
}

impl Observer for TranscriptObserver {
    fn on_message(&self, message: &Message) {
        if let Err(err) = self.write_line(message) {
            warn!(path = %self.path.display(), err = %err, "failed to record message");
        }
    }

    fn on_shutdown(&self) {}
}
