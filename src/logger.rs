//! Warning and error reporting for index runs.
//!
//! Messages go to stderr. `set_log_file` additionally mirrors them to a
//! file so long batch runs keep a record, and parallel batch workers tag
//! their messages with the input they are indexing via [`scoped`].

use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{Result as IoResult, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

static MIRROR: OnceLock<Mutex<File>> = OnceLock::new();

thread_local! {
    static SCOPES: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone, Copy)]
enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Mirrors subsequent warnings and errors to `path` in addition to stderr.
/// The first caller wins; later calls keep the existing mirror.
///
/// # Errors
///
/// Returns an error if the log file cannot be created.
pub fn set_log_file(path: &Path) -> IoResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let _ = MIRROR.set(Mutex::new(file));
    Ok(())
}

/// Tags messages from this thread with `scope` (typically the input path a
/// batch worker is indexing) until the returned guard drops. Scopes nest;
/// each guard pops its own entry.
pub fn scoped(scope: impl Into<String>) -> ScopeGuard {
    SCOPES.with(|stack| stack.borrow_mut().push(scope.into()));
    ScopeGuard(())
}

pub struct ScopeGuard(());

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPES.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

fn emit(severity: Severity, message: &str) {
    let line = SCOPES.with(|stack| {
        let stack = stack.borrow();
        if stack.is_empty() {
            message.to_owned()
        } else {
            format!("{}: {message}", stack.join(": "))
        }
    });
    eprintln!("{line}");
    if let Some(mirror) = MIRROR.get()
        && let Ok(mut file) = mirror.lock()
    {
        let _ = writeln!(file, "{severity}: {line}");
    }
}

pub fn log_warn(message: &str) {
    emit(Severity::Warning, message);
}

pub fn log_error(message: &str) {
    emit(Severity::Error, message);
}
