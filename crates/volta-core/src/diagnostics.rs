//! Diagnostics collected while checking a network before analysis.
//!
//! Validation walks the whole model and records every issue it finds rather
//! than stopping at the first, so a caller fixing a network sees all problems
//! at once. Errors block analysis; warnings are informational.
//!
//! ```
//! use volta_core::diagnostics::Diagnostics;
//!
//! let mut diag = Diagnostics::new();
//! diag.add_warning("structure", "Network has no loads");
//! diag.add_error_with_entity("reference", "Load references unknown bus", "L1");
//!
//! assert_eq!(diag.warning_count(), 1);
//! assert!(diag.into_result().is_err());
//! ```

use serde::Serialize;

use crate::error::{VoltaError, VoltaResult};

/// Severity level for diagnostic issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Analysis can proceed
    Warning,
    /// Analysis must not start
    Error,
}

/// A single diagnostic issue
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticIssue {
    pub severity: Severity,
    /// Category for grouping (e.g. "structure", "reference", "topology", "parameter")
    pub category: String,
    pub message: String,
    /// Id of the offending element
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
}

impl DiagnosticIssue {
    pub fn new(
        severity: Severity,
        category: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            entity: None,
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl std::fmt::Display for DiagnosticIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };

        write!(f, "[{}:{}] {}", severity, self.category, self.message)?;

        if let Some(entity) = &self.entity {
            write!(f, " ({})", entity)?;
        }

        Ok(())
    }
}

/// Collection of diagnostic issues
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<DiagnosticIssue>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: DiagnosticIssue) {
        self.issues.push(issue);
    }

    pub fn add_warning(&mut self, category: &str, message: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Warning, category, message));
    }

    pub fn add_warning_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Warning, category, message).with_entity(entity));
    }

    pub fn add_error(&mut self, category: &str, message: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Error, category, message));
    }

    pub fn add_error_with_entity(&mut self, category: &str, message: &str, entity: &str) {
        self.issues
            .push(DiagnosticIssue::new(Severity::Error, category, message).with_entity(entity));
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &DiagnosticIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn issues_by_category<'a>(
        &'a self,
        category: &'a str,
    ) -> impl Iterator<Item = &'a DiagnosticIssue> {
        self.issues.iter().filter(move |i| i.category == category)
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.issues.extend(other.issues);
    }

    pub fn summary(&self) -> String {
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        match (self.warning_count(), self.error_count()) {
            (0, 0) => "No issues".to_string(),
            (w, 0) => format!("{} warning{}", w, plural(w)),
            (0, e) => format!("{} error{}", e, plural(e)),
            (w, e) => format!("{} warning{}, {} error{}", w, plural(w), e, plural(e)),
        }
    }

    /// Fold collected errors into a single [`VoltaError::Validation`].
    ///
    /// Warnings never fail. The message lists every error, one per line.
    pub fn into_result(self) -> VoltaResult<Diagnostics> {
        if !self.has_errors() {
            return Ok(self);
        }
        let message = self
            .errors()
            .map(|issue| match &issue.entity {
                Some(entity) => format!("{} ({})", issue.message, entity),
                None => issue.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(VoltaError::Validation(message))
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Diagnostics: {}", self.summary())?;
        for issue in &self.issues {
            writeln!(f, "  {}", issue)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_summary() {
        let mut diag = Diagnostics::new();
        assert_eq!(diag.summary(), "No issues");

        diag.add_warning("structure", "w1");
        diag.add_warning("structure", "w2");
        diag.add_error("topology", "e1");

        assert_eq!(diag.warning_count(), 2);
        assert_eq!(diag.error_count(), 1);
        assert_eq!(diag.summary(), "2 warnings, 1 error");
        assert_eq!(diag.issues_by_category("topology").count(), 1);
    }

    #[test]
    fn test_into_result_passes_warnings() {
        let mut diag = Diagnostics::new();
        diag.add_warning("structure", "no loads");
        let diag = diag.into_result().unwrap();
        assert_eq!(diag.warning_count(), 1);
    }

    #[test]
    fn test_into_result_joins_errors() {
        let mut diag = Diagnostics::new();
        diag.add_error_with_entity("reference", "unknown bus", "L1");
        diag.add_error("topology", "no slack bus");

        let err = diag.into_result().unwrap_err();
        let text = err.to_string();
        assert!(text.contains("unknown bus (L1)"));
        assert!(text.contains("no slack bus"));
    }

    #[test]
    fn test_display_includes_entity() {
        let issue = DiagnosticIssue::new(Severity::Error, "reference", "bad ref").with_entity("B7");
        assert_eq!(issue.to_string(), "[error:reference] bad ref (B7)");
    }
}
