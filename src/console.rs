//! Operator console
//!
//! Human-facing progress output for a run. Dynamic units receive the same
//! console through injection so their messages land next to the engine's.
//! Diagnostics that only matter to developers go through the `log` facade
//! instead.

use std::cell::RefCell;
use std::fmt;

/// Severity of a console line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Info,
    Warn,
    Error,
    /// Only shown in verbose mode
    Detail,
}

impl fmt::Display for ConsoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Detail => write!(f, "DETAIL"),
        }
    }
}

/// Sink for operator-facing messages
pub trait Console {
    /// Emit one message at `level`
    fn emit(&self, level: ConsoleLevel, message: &str);

    /// Whether `detail` messages are shown
    fn is_verbose(&self) -> bool;

    fn info(&self, message: &str) {
        self.emit(ConsoleLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.emit(ConsoleLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.emit(ConsoleLevel::Error, message);
    }

    fn detail(&self, message: &str) {
        if self.is_verbose() {
            self.emit(ConsoleLevel::Detail, message);
        }
    }
}

/// Console writing to the process's stdout and stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConsole {
    verbose: bool,
}

impl TerminalConsole {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Console for TerminalConsole {
    fn emit(&self, level: ConsoleLevel, message: &str) {
        match level {
            ConsoleLevel::Info => println!("{}", message),
            ConsoleLevel::Detail => println!("  {}", message),
            ConsoleLevel::Warn => eprintln!("WARNING: {}", message),
            ConsoleLevel::Error => eprintln!("ERROR: {}", message),
        }
    }

    fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Console that records every line, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryConsole {
    verbose: bool,
    lines: RefCell<Vec<(ConsoleLevel, String)>>,
}

impl MemoryConsole {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            lines: RefCell::new(Vec::new()),
        }
    }

    /// All recorded lines in emission order
    pub fn lines(&self) -> Vec<(ConsoleLevel, String)> {
        self.lines.borrow().clone()
    }

    /// Recorded messages at `level`
    pub fn messages(&self, level: ConsoleLevel) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Returns true if any line at `level` contains `needle`
    pub fn contains(&self, level: ConsoleLevel, needle: &str) -> bool {
        self.lines
            .borrow()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl Console for MemoryConsole {
    fn emit(&self, level: ConsoleLevel, message: &str) {
        self.lines.borrow_mut().push((level, message.to_string()));
    }

    fn is_verbose(&self) -> bool {
        self.verbose
    }
}
