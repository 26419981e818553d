//! Console capability handed to goals.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

/// Output streams a goal reports on
pub trait Console: Send + Sync {
    /// Write raw text to stdout
    fn write_stdout(&self, text: &str);

    /// Write a line to stdout
    fn print_stdout(&self, line: &str) {
        self.write_stdout(line);
        self.write_stdout("\n");
    }

    /// Write a line to stderr
    fn print_stderr(&self, line: &str);

    /// Flush buffered output
    fn flush(&self) {}
}

/// Console backed by the process's stdout and stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct StdConsole;

impl StdConsole {
    /// Create a process console
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Console for StdConsole {
    fn write_stdout(&self, text: &str) {
        if let Err(err) = io::stdout().lock().write_all(text.as_bytes()) {
            warn!(error = %err, "failed to write to stdout");
        }
    }

    fn print_stdout(&self, line: &str) {
        if let Err(err) = writeln!(io::stdout().lock(), "{line}") {
            warn!(error = %err, "failed to write to stdout");
        }
    }

    fn print_stderr(&self, line: &str) {
        if let Err(err) = writeln!(io::stderr().lock(), "{line}") {
            warn!(error = %err, "failed to write to stderr");
        }
    }

    fn flush(&self) {
        if let Err(err) = io::stdout().lock().flush() {
            warn!(error = %err, "failed to flush stdout");
        }
    }
}

/// Console that captures everything written to it
#[derive(Debug, Default)]
pub struct BufferedConsole {
    stdout: Mutex<String>,
    stderr: Mutex<String>,
}

impl BufferedConsole {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written to stdout so far
    #[must_use]
    pub fn stdout(&self) -> String {
        self.stdout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Everything written to stderr so far
    #[must_use]
    pub fn stderr(&self) -> String {
        self.stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Console for BufferedConsole {
    fn write_stdout(&self, text: &str) {
        self.stdout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_str(text);
    }

    fn print_stderr(&self, line: &str) {
        let mut stderr = self.stderr.lock().unwrap_or_else(PoisonError::into_inner);
        stderr.push_str(line);
        stderr.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_console_captures() {
        let console = BufferedConsole::new();
        console.write_stdout("partial");
        console.print_stdout(" line");
        console.print_stderr("oops");

        assert_eq!(console.stdout(), "partial line\n");
        assert_eq!(console.stderr(), "oops\n");
    }

    #[test]
    fn test_console_is_object_safe() {
        let console: Box<dyn Console> = Box::new(BufferedConsole::new());
        console.print_stdout("hello");
        console.flush();
    }
}
