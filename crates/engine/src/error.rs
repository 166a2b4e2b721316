//! Error taxonomy for the workflow engine.
//!
//! Every failure carries a kind, the operation that raised it, a human
//! message, an optional key-value context, and an optional source chain.
//! Kinds drive propagation policy: validation and configuration errors abort
//! the run before any job starts, execution and action errors fold into the
//! owning job's failed flag, file errors surface from the loader, and
//! security errors come out of the expression evaluator.

use std::fmt;

/// Classification of an engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Schema or identifier violation in the workflow model.
    Validation,
    /// Semantic workflow error: missing or cyclic dependency, excessive
    /// repetition bounds.
    Configuration,
    /// Job or step failure surfaced from an action result or a test.
    Execution,
    /// RPC-level failure from the action dispatcher.
    Action,
    /// Load or resolve failure for workflow and embedded-job files.
    File,
    /// Expression banlist, environment-access ban, length, or timeout.
    Security,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Execution => "execution",
            ErrorKind::Action => "action",
            ErrorKind::File => "file",
            ErrorKind::Security => "security",
        };
        f.write_str(label)
    }
}

/// Engine error with operation label, context map, and cause chain.
///
/// The context map keeps Display from fitting a derive attribute, so both
/// `Display` and `Error` are implemented by hand.
#[derive(Debug)]
pub struct ProbeError {
    pub kind: ErrorKind,
    /// Short operation label, e.g. `scheduler.validate` or `expr.eval`.
    pub op: String,
    pub message: String,
    /// Free-form key-value pairs attached at the failure site.
    pub context: Vec<(String, String)>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error in {}: {}", self.kind, self.op, self.message)?;
        for (key, value) in &self.context {
            write!(f, " [{key}={value}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl ProbeError {
    fn new(kind: ErrorKind, op: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            op: op.into(),
            message: message.into(),
            context: Vec::new(),
            source: None,
        }
    }

    /// Create a validation error.
    pub fn validation(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, op, message)
    }

    /// Create a configuration error.
    pub fn configuration(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, op, message)
    }

    /// Create an execution error.
    pub fn execution(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, op, message)
    }

    /// Create an action dispatch error.
    pub fn action(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Action, op, message)
    }

    /// Create a file error.
    pub fn file(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::File, op, message)
    }

    /// Create a security error.
    pub fn security(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, op, message)
    }

    /// Attach a key-value pair to the error context.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Attach a causing error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// True when the error came from the expression security layer.
    pub fn is_security(&self) -> bool {
        self.kind == ErrorKind::Security
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_op_and_context() {
        let error = ProbeError::configuration("scheduler.validate", "job 'b' needs unknown job 'a'")
            .with_context("job", "b")
            .with_context("needs", "a");

        let rendered = error.to_string();
        assert!(rendered.contains("configuration error in scheduler.validate"));
        assert!(rendered.contains("[job=b]"));
        assert!(rendered.contains("[needs=a]"));
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error = ProbeError::file("loader.read", "cannot read workflow").with_source(io);

        let source = std::error::Error::source(&error).expect("source");
        assert!(source.to_string().contains("no such file"));
    }
}
