// Reproducibility tests.
//
// The same graph construction must produce byte-identical dumps, identical
// fingerprints, and identical diagnostic reports across runs — the
// fingerprint is what downstream caching keys on.

use stir::bounds::{BoundingBox, Offset};
use stir::diag;
use stir::graph::{ArithOp, Graph};
use stir::pipeline::{
    compute_fingerprint, compute_provenance, run_pipeline, AnalysisState, PipelineOptions,
};
use stir::types::{ElemType, GridType, ValueType};

fn bb(lb: &[i64], ub: &[i64]) -> BoundingBox {
    BoundingBox::new(lb.to_vec(), ub.to_vec()).unwrap()
}

fn sample_graph() -> Graph {
    let mut g = Graph::new();
    let input = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 2)));
    let output = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 2)));
    g.assert(input, bb(&[-2, -2], &[66, 66]));
    g.assert(output, bb(&[0, 0], &[64, 64]));
    let tmp = g.load(input);

    let mut body = Graph::with_args(vec![ValueType::Grid(GridType::temp(ElemType::F64, 2))]);
    let arg = body.arg(0);
    let a = body.access(arg, Offset(vec![-1, 0]));
    let b = body.access(arg, Offset(vec![0, 1]));
    let half = body.constant(0.5, ElemType::F64);
    let sum = body.arith(ArithOp::Add, a, b);
    let avg = body.arith(ArithOp::Mul, sum, half);
    body.ret(vec![avg]);

    let r = g.apply(vec![tmp], body, &[ElemType::F64], 2);
    g.store(r[0], output, bb(&[0, 0], &[64, 64]));
    g
}

/// Identical construction yields byte-identical dumps.
#[test]
fn same_construction_identical_dump() {
    assert_eq!(sample_graph().dump(), sample_graph().dump());
}

#[test]
fn same_construction_identical_fingerprint() {
    assert_eq!(
        compute_fingerprint(&sample_graph()),
        compute_fingerprint(&sample_graph())
    );
}

/// Running the full pipeline twice yields the same transformed graph, the
/// same fingerprint, and the same diagnostics.
#[test]
fn pipeline_runs_are_byte_identical() {
    let run = || {
        let mut state = AnalysisState::new(sample_graph());
        run_pipeline(&mut state, &PipelineOptions::standard(), |_, _| {})
            .expect("pipeline should pass");
        (
            state.graph.dump(),
            state.provenance.unwrap().fingerprint_hex(),
            diag::to_json(&state.diagnostics),
        )
    };
    let first = run();
    let second = run();
    assert_eq!(first.0, second.0);
    assert_eq!(first.1, second.1);
    assert_eq!(first.2, second.2);
}

/// Inference changes the fingerprint (boxes were added), but re-running it
/// does not.
#[test]
fn inference_is_idempotent_on_the_fingerprint() {
    let mut g = sample_graph();
    let raw = compute_fingerprint(&g);
    stir::shape_infer::infer_shapes(&mut g);
    let inferred = compute_fingerprint(&g);
    assert_ne!(raw, inferred);
    stir::shape_infer::infer_shapes(&mut g);
    assert_eq!(compute_fingerprint(&g), inferred);
}

#[test]
fn provenance_json_is_stable() {
    let a = compute_provenance(&sample_graph()).to_json();
    let b = compute_provenance(&sample_graph()).to_json();
    assert_eq!(a, b);
    assert!(a.contains(env!("CARGO_PKG_VERSION")));
}

/// Failed runs report the same diagnostics in the same order every time.
#[test]
fn failing_diagnostics_are_ordered_deterministically() {
    let broken = || {
        let mut g = sample_graph();
        // A second assert on the output field, plus a dead load.
        let output = g.arg(1);
        g.load(g.arg(0));
        g.assert(output, bb(&[0, 0], &[32, 32]));
        g
    };
    let run = |g: Graph| {
        let mut state = AnalysisState::new(g);
        let _ = run_pipeline(&mut state, &PipelineOptions::standard(), |_, _| {});
        diag::to_json(&state.diagnostics)
    };
    assert_eq!(run(broken()), run(broken()));
}
