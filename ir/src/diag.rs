// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used by every analysis and transform. Failures are
// collected into `Vec<Diagnostic>` result structs and returned to the caller;
// no pass aborts at the first violation and no pass repairs the graph.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::graph::OpId;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0200`, `W0100`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code must never be reassigned to a different semantic meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable codes, one per entry of the error taxonomy.
pub mod codes {
    use super::DiagCode;

    /// Rank, element-type, layout, or kind disagreement; op in wrong region.
    pub const TYPE_MISMATCH: DiagCode = DiagCode("E0100");
    /// Asserted or declared box smaller than the inferred requirement.
    pub const COVERAGE_VIOLATION: DiagCode = DiagCode("E0200");
    /// Operand/result/argument count mismatch.
    pub const ARITY_VIOLATION: DiagCode = DiagCode("E0300");
    /// Multiple Asserts/Stores, or a field both read and written.
    pub const UNIQUENESS_VIOLATION: DiagCode = DiagCode("E0400");
    /// Unroll factor does not evenly divide the iteration extent.
    pub const DIVISIBILITY_VIOLATION: DiagCode = DiagCode("E0500");
    /// A box was required downstream but never resolved.
    pub const UNRESOLVED_SHAPE: DiagCode = DiagCode("E0600");
    /// Dead output left without a box — diagnostic only.
    pub const UNRESOLVED_SHAPE_DEAD: DiagCode = DiagCode("W0100");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related op ───────────────────────────────────────────────────────────

/// A secondary op providing context for a diagnostic (e.g., the Assert a
/// coverage failure is measured against).
#[derive(Debug, Clone, Serialize)]
pub struct RelatedOp {
    pub op: OpId,
    pub label: String,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any pass, attributed to its source op.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// The op the violation is attributed to. `None` for graph-level
    /// failures that have no single source op.
    pub op: Option<OpId>,
    pub message: String,
    pub hint: Option<String>,
    pub related_ops: Vec<RelatedOp>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, or related ops.
    pub fn new(level: DiagLevel, op: Option<OpId>, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            op,
            message: message.into(),
            hint: None,
            related_ops: Vec::new(),
        }
    }

    pub fn error(op: OpId, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, Some(op), message)
    }

    pub fn warning(op: OpId, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, Some(op), message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related op.
    pub fn with_related(mut self, op: OpId, label: impl Into<String>) -> Self {
        self.related_ops.push(RelatedOp {
            op,
            label: label.into(),
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(op) = self.op {
            write!(f, " (op {})", op.0)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// True if any diagnostic is error-level.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Machine-readable report: a JSON array of diagnostics, stable field order.
pub fn to_json(diags: &[Diagnostic]) -> String {
    serde_json::to_string_pretty(diags).unwrap_or_else(|_| "[]".to_string())
}

// ── Tests ────────────────────────────────────────────────────────────────
