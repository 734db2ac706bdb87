//! Status output worker
//!
//! Workers never print directly. They send [`StatusMessage`]s over a channel
//! to a single printer thread, so lines from concurrent tasks never
//! interleave and quiet modes are applied in one place.

use crossbeam::channel::Receiver;
use crossbeam::select;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, IsTerminal, Write};
use std::thread::{self, JoinHandle};

/// One user-facing status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMessage {
    /// A logical operation finished
    Success {
        operation: &'static str,
        description: String,
    },
    /// A logical operation failed
    Failure {
        operation: &'static str,
        description: String,
        error: String,
    },
    /// An operation was skipped
    Warning { message: String },
}

impl StatusMessage {
    /// Rendered line, without trailing newline
    pub fn render(&self) -> String {
        match self {
            Self::Success {
                operation,
                description,
            } => format!("{}: {}", operation, description),
            Self::Failure {
                operation,
                description,
                error,
            } => format!("{} failed: {} {}", operation, description, error),
            Self::Warning { message } => format!("warning: {}", message),
        }
    }

    fn is_error(&self) -> bool {
        !matches!(self, Self::Success { .. })
    }
}

/// Writes status lines to stdout/stderr with a running progress line
pub struct StatusPrinter {
    quiet: bool,
    only_show_errors: bool,
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    progress: ProgressBar,
    completed: u64,
    failed: u64,
}

impl StatusPrinter {
    /// Create a printer for the process's stdout and stderr
    pub fn new(quiet: bool, only_show_errors: bool) -> Self {
        let progress = if quiet || !io::stderr().is_terminal() {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
                bar.set_style(style);
            }
            bar
        };

        Self {
            quiet,
            only_show_errors,
            out: Box::new(io::stdout()),
            err: Box::new(io::stderr()),
            progress,
            completed: 0,
            failed: 0,
        }
    }

    /// Create a printer writing to the given sinks, without a progress line
    pub fn with_writers(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self {
            quiet: false,
            only_show_errors: false,
            out,
            err,
            progress: ProgressBar::hidden(),
            completed: 0,
            failed: 0,
        }
    }

    /// Suppress all output
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Suppress success lines
    pub fn only_show_errors(mut self, only_show_errors: bool) -> Self {
        self.only_show_errors = only_show_errors;
        self
    }

    /// Print one message according to the quiet settings
    pub fn print(&mut self, message: &StatusMessage) -> io::Result<()> {
        match message {
            StatusMessage::Success { .. } => self.completed += 1,
            StatusMessage::Failure { .. } => self.failed += 1,
            StatusMessage::Warning { .. } => {}
        }

        if self.quiet || (self.only_show_errors && !message.is_error()) {
            return Ok(());
        }

        let line = message.render();
        let sink = if message.is_error() {
            &mut self.err
        } else {
            &mut self.out
        };
        self.progress.suspend(|| {
            writeln!(sink, "{}", line)?;
            sink.flush()
        })?;

        self.progress.set_message(format!(
            "Completed {} operation(s), {} failed",
            self.completed, self.failed
        ));
        self.progress.tick();
        Ok(())
    }

    /// Print messages from `receiver` on a dedicated thread.
    ///
    /// The thread exits once `stop` fires or disconnects, after printing
    /// whatever is still buffered, or when every status sender is gone.
    pub fn spawn(
        mut self,
        receiver: Receiver<StatusMessage>,
        stop: Receiver<()>,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("status-printer".to_string())
            .spawn(move || {
                loop {
                    select! {
                        recv(receiver) -> message => match message {
                            Ok(message) => self.emit(&message),
                            Err(_) => break,
                        },
                        recv(stop) -> _ => {
                            for message in receiver.try_iter() {
                                self.emit(&message);
                            }
                            break;
                        }
                    }
                }
                self.progress.finish_and_clear();
            })
    }

    fn emit(&mut self, message: &StatusMessage) {
        if let Err(e) = self.print(message) {
            tracing::debug!("Could not write status line: {}", e);
        }
    }
}

/// In-memory sink shared between a printer and a test
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
