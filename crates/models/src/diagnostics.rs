use crate::Range;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

/// Diagnostic is one configuration problem, anchored to source ranges.
/// Diagnostics accumulate: a fatal problem in one resource block does
/// not stop the decoding of its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Short problem statement, e.g. "Resource not supported".
    pub summary: String,
    /// Longer explanation, possibly with a suggested fix.
    pub detail: String,
    /// The specific range at fault, e.g. an attribute's expression.
    pub subject: Option<Range>,
    /// A wider enclosing range, e.g. the whole block.
    pub context: Option<Range>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            subject: None,
            context: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
            subject: None,
            context: None,
        }
    }

    pub fn with_subject(mut self, range: Range) -> Self {
        self.subject = Some(range);
        self
    }

    pub fn with_context(mut self, range: Range) -> Self {
        self.context = Some(range);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{sev}: {}", self.summary)?;
        if !self.detail.is_empty() {
            write!(f, "; {}", self.detail)?;
        }
        if let Some(subject) = &self.subject {
            write!(f, " (at {subject})")?;
        }
        Ok(())
    }
}

/// Diagnostics is an accumulated collection of [`Diagnostic`]s.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    /// True if any accumulated diagnostic is an error. Callers must not
    /// use a decoded graph when its diagnostics are fatal.
    pub fn is_fatal(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }
}

impl std::ops::Deref for Diagnostics {
    type Target = Vec<Diagnostic>;
    fn deref(&self) -> &Vec<Diagnostic> {
        &self.0
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for diagnostic in &self.0 {
            writeln!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Pos;

    #[test]
    fn fatal_only_when_an_error_is_present() {
        let mut diags = Diagnostics::new();
        assert!(!diags.is_fatal());

        diags.push(Diagnostic::warning("odd spacing", ""));
        assert!(!diags.is_fatal());

        diags.push(Diagnostic::error("Resource not supported", "no such type"));
        assert!(diags.is_fatal());
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn renders_with_subject_position() {
        let range = Range::new(
            Pos {
                line: 3,
                column: 7,
                byte: 40,
            },
            Pos {
                line: 3,
                column: 12,
                byte: 45,
            },
        );
        let diag = Diagnostic::error("Unsupported argument", "no \"grotto\" here").with_subject(range);
        insta::assert_snapshot!(
            diag.to_string(),
            @"error: Unsupported argument; no \"grotto\" here (at 3:7)"
        );
    }
}
