// pipeline.rs — Analysis state and pass orchestration
//
// Holds the graph under analysis plus accumulated diagnostics and runs the
// fixed pass sequence: verify_pre → infer_shapes → verify_post →
// canonicalize → (unroll) → verify_final. The unroll pass runs only when an
// `UnrollRequest` is supplied; canonicalization can be switched off.
//
// Preconditions: `state.graph` is a fully constructed top-level graph.
// Postconditions: on Ok the graph passed final verification and
//                 `state.provenance` carries its fingerprint; on Err the
//                 failing pass is named and its diagnostics are in
//                 `state.diagnostics`.
// Failure modes: any pass emitting error-level diagnostics.
// Side effects: calls on_pass_complete after each pass for immediate display.

use std::time::Instant;

use crate::canonicalize::canonicalize;
use crate::diag::{has_errors, Diagnostic};
use crate::graph::{Graph, OpId};
use crate::pass::{descriptor, PassId};
use crate::shape_infer::infer_shapes;
use crate::unroll::unroll;
use crate::verify::{verify, verify_structure};

// ── Options ────────────────────────────────────────────────────────────────

/// Request to unroll one Apply as part of the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct UnrollRequest {
    pub apply: OpId,
    pub factor: i64,
    pub dim: usize,
}

/// Knobs for one pipeline run.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Skip the canonicalize pass when false.
    pub canonicalize: bool,
    pub unroll: Option<UnrollRequest>,
    /// Per-pass timing on stderr.
    pub verbose: bool,
}

impl PipelineOptions {
    pub fn standard() -> Self {
        PipelineOptions {
            canonicalize: true,
            unroll: None,
            verbose: false,
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Reproducibility metadata for one analyzed graph.
///
/// `graph_fingerprint`: SHA-256 of the canonical textual dump.
/// `version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub graph_fingerprint: [u8; 32],
    pub version: &'static str,
}

impl Provenance {
    /// Hex string of the fingerprint (64 characters).
    pub fn fingerprint_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.graph_fingerprint {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
        }
        s
    }

    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"graph_fingerprint\": \"{}\",\n  \"version\": \"{}\"\n}}\n",
            self.fingerprint_hex(),
            self.version,
        )
    }
}

/// SHA-256 over the canonical dump. Two graphs fingerprint equal iff their
/// dumps are byte-identical.
pub fn compute_fingerprint(graph: &Graph) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(graph.dump().as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

pub fn compute_provenance(graph: &Graph) -> Provenance {
    Provenance {
        graph_fingerprint: compute_fingerprint(graph),
        version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Analysis state ─────────────────────────────────────────────────────────

/// The graph under analysis and everything the passes accumulated.
pub struct AnalysisState {
    pub graph: Graph,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl AnalysisState {
    pub fn new(graph: Graph) -> Self {
        AnalysisState {
            graph,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `AnalysisState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

// ── Helper: per-pass post-processing ───────────────────────────────────────

/// Callback, accumulate, verbose, error check. Returns Err if error
/// diagnostics were found.
fn finish_pass(
    state: &mut AnalysisState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "stir: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the pass sequence over `state.graph`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose →
/// error check. Stops at the first pass with error-level diagnostics.
pub fn run_pipeline(
    state: &mut AnalysisState,
    options: &PipelineOptions,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let t = Instant::now();
    let result = verify_structure(&state.graph);
    finish_pass(
        state,
        PassId::VerifyPre,
        result.diagnostics,
        t.elapsed(),
        options.verbose,
        &mut on_pass_complete,
    )?;

    let t = Instant::now();
    let result = infer_shapes(&mut state.graph);
    finish_pass(
        state,
        PassId::InferShapes,
        result.diagnostics,
        t.elapsed(),
        options.verbose,
        &mut on_pass_complete,
    )?;

    let t = Instant::now();
    let result = verify(&state.graph);
    finish_pass(
        state,
        PassId::VerifyPost,
        result.diagnostics,
        t.elapsed(),
        options.verbose,
        &mut on_pass_complete,
    )?;

    if options.canonicalize {
        let t = Instant::now();
        let result = canonicalize(&mut state.graph);
        if options.verbose && result.changed() {
            eprintln!("stir: canonicalize applied {} rewrites", result.rewrites);
        }
        finish_pass(
            state,
            PassId::Canonicalize,
            Vec::new(),
            t.elapsed(),
            options.verbose,
            &mut on_pass_complete,
        )?;
    }

    if let Some(request) = options.unroll {
        let t = Instant::now();
        let result = unroll(&mut state.graph, request.apply, request.factor, request.dim);
        let mut diags = result.diagnostics;
        if !has_errors(&diags) {
            // Replication widened the access set; settle the boxes again.
            diags.extend(infer_shapes(&mut state.graph).diagnostics);
        }
        finish_pass(
            state,
            PassId::Unroll,
            diags,
            t.elapsed(),
            options.verbose,
            &mut on_pass_complete,
        )?;
    }

    let t = Instant::now();
    let result = verify(&state.graph);
    finish_pass(
        state,
        PassId::VerifyFinal,
        result.diagnostics,
        t.elapsed(),
        options.verbose,
        &mut on_pass_complete,
    )?;

    state.provenance = Some(compute_provenance(&state.graph));
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
