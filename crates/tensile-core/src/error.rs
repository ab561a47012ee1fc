//! Diagnostics shared by every pass.
//!
//! All pipeline failures are [`Diagnostic`] values: a kind, a severity, a
//! source location, and the name of the offending entity. Passes return
//! `Result<_, Diagnostic>` and the driver aborts on the first fatal one;
//! only explicitly-downgraded conditions become warnings, which the driver
//! collects instead.

use crate::loc::SourceLoc;
use std::fmt;
use thiserror::Error;

/// How severe a diagnostic is. Anything `Error` aborts the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// The failure classes the pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Object-graph pattern the pipeline cannot normalize.
    Structural,
    /// Unsupported aliasing: shared submodules, cyclic instantiation.
    Aliasing,
    /// Public signature not expressible in the external contract.
    Convention,
    /// Mandatory decomposition with no legal rule.
    Decomposition,
    /// Contradictory type information.
    TypeConflict,
    /// Inter-stage validation failure.
    Verify,
    /// Invariant breach inside the pipeline itself.
    Internal,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::Structural => "structural",
            DiagnosticKind::Aliasing => "aliasing",
            DiagnosticKind::Convention => "convention",
            DiagnosticKind::Decomposition => "decomposition",
            DiagnosticKind::TypeConflict => "type-conflict",
            DiagnosticKind::Verify => "verify",
            DiagnosticKind::Internal => "internal",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single reported condition.
///
/// `subject` names the entity the diagnostic is about (a function, slot,
/// class, or operation name), so reports are actionable without re-running
/// the analysis that produced them.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{severity}[{kind}] at {loc} ({subject}): {message}")]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub loc: SourceLoc,
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    fn error(kind: DiagnosticKind, loc: SourceLoc, subject: &str, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            kind,
            severity: Severity::Error,
            loc,
            subject: subject.to_string(),
            message: message.into(),
        }
    }

    pub fn structural(loc: SourceLoc, subject: &str, message: impl Into<String>) -> Diagnostic {
        Self::error(DiagnosticKind::Structural, loc, subject, message)
    }

    pub fn aliasing(loc: SourceLoc, subject: &str, message: impl Into<String>) -> Diagnostic {
        Self::error(DiagnosticKind::Aliasing, loc, subject, message)
    }

    pub fn convention(loc: SourceLoc, subject: &str, message: impl Into<String>) -> Diagnostic {
        Self::error(DiagnosticKind::Convention, loc, subject, message)
    }

    pub fn decomposition(loc: SourceLoc, subject: &str, message: impl Into<String>) -> Diagnostic {
        Self::error(DiagnosticKind::Decomposition, loc, subject, message)
    }

    pub fn type_conflict(loc: SourceLoc, subject: &str, message: impl Into<String>) -> Diagnostic {
        Self::error(DiagnosticKind::TypeConflict, loc, subject, message)
    }

    pub fn verify(loc: SourceLoc, subject: &str, message: impl Into<String>) -> Diagnostic {
        Self::error(DiagnosticKind::Verify, loc, subject, message)
    }

    pub fn internal(loc: SourceLoc, subject: &str, message: impl Into<String>) -> Diagnostic {
        Self::error(DiagnosticKind::Internal, loc, subject, message)
    }

    /// The warning form of a diagnostic.
    pub fn warning(kind: DiagnosticKind, loc: SourceLoc, subject: &str, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            kind,
            severity: Severity::Warning,
            loc,
            subject: subject.to_string(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Error
    }
}
