//! Timestamped progress output.
//!
//! Progress lines are part of the user-facing surface and are kept separate
//! from `log` diagnostics. Each line is prefixed with the time elapsed since
//! the printer was created, e.g. `[0:00:03] Up-to-date; skipping checkout.`.

use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared, thread-safe progress sink.
#[derive(Clone)]
pub struct Printer {
    inner: Arc<PrinterInner>,
}

struct PrinterInner {
    started: Instant,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl Printer {
    pub fn new<W: Write + Send + 'static>(sink: W) -> Self {
        Self {
            inner: Arc::new(PrinterInner {
                started: Instant::now(),
                sink: Mutex::new(Box::new(sink)),
            }),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// A printer writing into memory, for inspecting output.
    pub fn buffered() -> (Self, OutputBuffer) {
        let buffer = OutputBuffer::default();
        (Self::new(buffer.clone()), buffer)
    }

    /// Print `message` as one timestamped line.
    pub fn print(&self, message: impl AsRef<str>) {
        let line = format!(
            "[{}] {}\n",
            format_elapsed(self.inner.started.elapsed()),
            message.as_ref()
        );
        self.write(&line);
    }

    /// Print raw command output, terminating it with a newline if needed.
    pub fn raw(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        if text.ends_with('\n') {
            self.write(text);
        } else {
            self.write(&format!("{text}\n"));
        }
    }

    /// Announce a git command about to run in `cwd`.
    pub fn command_header(&self, args: &[&str], cwd: &Path) {
        self.write("\n");
        self.print(format!(
            "________ running 'git {}' in '{}'",
            args.join(" "),
            cwd.display()
        ));
    }

    fn write(&self, text: &str) {
        // A poisoned sink only means another thread panicked mid-write.
        let mut sink = match self.inner.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = sink.write_all(text.as_bytes());
        let _ = sink.flush();
    }
}

/// In-memory sink handed out by [`Printer::buffered`].
#[derive(Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    pub fn contents(&self) -> String {
        let bytes = match self.0.lock() {
            Ok(bytes) => bytes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut bytes) => bytes.extend_from_slice(buf),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
