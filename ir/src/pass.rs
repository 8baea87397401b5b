// pass.rs — Pass descriptor module: metadata and dependency resolution
//
// Declares the analysis and transform passes the pipeline runner can
// execute, with their dependency edges. Used by the runner for ordering and
// for verbose reporting, and by callers that want to run a prefix of the
// pipeline.

use std::collections::HashSet;

// ── Pass identifiers ───────────────────────────────────────────────────────

/// Identifies each pass (graph construction is outside the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    /// Region, type, arity, and uniqueness checks on the raw graph.
    VerifyPre,
    /// Backward bounding-box propagation.
    InferShapes,
    /// Full verification including coverage and resolution.
    VerifyPost,
    /// Fixed-point local rewrites.
    Canonicalize,
    /// Return-operand replication. Optional; skipped unless requested.
    Unroll,
    /// Full verification of the transformed graph.
    VerifyFinal,
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (passes that must have run before this one).
    pub inputs: &'static [PassId],
    /// Whether this pass mutates the graph.
    pub mutates: bool,
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::VerifyPre => PassDescriptor {
            name: "verify_pre",
            inputs: &[],
            mutates: false,
            invariants: "regions, types, arity, and field uniqueness hold",
        },
        PassId::InferShapes => PassDescriptor {
            name: "infer_shapes",
            inputs: &[PassId::VerifyPre],
            mutates: true,
            invariants: "every consumed load/apply carries a box; declared boxes not shrunk",
        },
        PassId::VerifyPost => PassDescriptor {
            name: "verify_post",
            inputs: &[PassId::InferShapes],
            mutates: false,
            invariants: "asserted boxes cover all inferred requirements",
        },
        PassId::Canonicalize => PassDescriptor {
            name: "canonicalize",
            inputs: &[PassId::VerifyPost],
            mutates: true,
            invariants: "no rewrite rule fires on the result",
        },
        PassId::Unroll => PassDescriptor {
            name: "unroll",
            inputs: &[PassId::Canonicalize],
            mutates: true,
            invariants: "return carries factor slots per result; boxes re-inferred",
        },
        PassId::VerifyFinal => PassDescriptor {
            name: "verify_final",
            inputs: &[PassId::Canonicalize],
            mutates: false,
            invariants: "transformed graph satisfies every structural invariant",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in execution order.
pub const ALL_PASSES: [PassId; 6] = [
    PassId::VerifyPre,
    PassId::InferShapes,
    PassId::VerifyPost,
    PassId::Canonicalize,
    PassId::Unroll,
    PassId::VerifyFinal,
];

/// Compute the minimal ordered set of passes needed before `terminal` can
/// run. Returns passes in execution order. `Unroll` is never pulled in as a
/// dependency; the runner inserts it only on request.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────
