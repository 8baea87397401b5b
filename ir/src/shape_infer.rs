// shape_infer.rs — Backward bounding-box propagation
//
// Computes the minimal box every producer (Load, Apply) must satisfy so that
// each downstream Access offset is covered, then assigns the boxes in place.
// The graph is acyclic and built operands-first, so one backward pass in
// reverse op order visits every consumer before its producers — no fixed
// point is needed.
//
// Preconditions: `graph` is a fully constructed top-level graph; Store and
//                Assert boxes (the seeds) are populated by the front end.
// Postconditions: every Load/Apply reachable from a seed carries a box;
//                 user-declared boxes are never shrunk (load boxes may widen
//                 to meet a grown requirement, apply boxes stand as declared).
// Failure modes: offset/box rank mismatches → `E0100` error diagnostics;
//                dead outputs → `W0100` warnings.
// Side effects: `infer_shapes` mutates box attributes in place.

use std::collections::HashMap;

use crate::bounds::BoundingBox;
use crate::diag::{codes, Diagnostic};
use crate::graph::{Graph, OpId, OpKind, ValueId};

// ── Public types ─────────────────────────────────────────────────────────

/// Result of shape inference.
#[derive(Debug)]
pub struct InferenceResult {
    pub diagnostics: Vec<Diagnostic>,
}

/// Requirement maps computed by the backward pass. Pure data: the verifier
/// reads these without mutating the graph; `infer_shapes` writes them back
/// as attributes.
#[derive(Debug, Default)]
pub struct Requirements {
    /// Required read box per top-level value (union over all use sites).
    pub value: HashMap<ValueId, BoundingBox>,
    /// Per-Field coverage union: every loaded and stored range. The box an
    /// Assert must cover.
    pub field: HashMap<ValueId, BoundingBox>,
    /// Settled iteration box per Apply (declared, or derived from result
    /// consumers).
    pub apply_bounds: HashMap<OpId, BoundingBox>,
    /// Per-Apply, per-operand required boxes.
    pub apply_operands: HashMap<OpId, Vec<Option<BoundingBox>>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Requirements {
    fn merge_value(&mut self, v: ValueId, bounds: BoundingBox, op: OpId) {
        merge_into(&mut self.value, v, bounds, op, &mut self.diagnostics);
    }

    fn merge_field(&mut self, v: ValueId, bounds: BoundingBox, op: OpId) {
        merge_into(&mut self.field, v, bounds, op, &mut self.diagnostics);
    }
}

fn merge_into(
    map: &mut HashMap<ValueId, BoundingBox>,
    v: ValueId,
    bounds: BoundingBox,
    op: OpId,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match map.get(&v) {
        None => {
            map.insert(v, bounds);
        }
        Some(existing) => match existing.union(&bounds) {
            Some(u) => {
                map.insert(v, u);
            }
            None => diagnostics.push(
                Diagnostic::error(
                    op,
                    format!(
                        "rank mismatch while merging requirements on {v}: {existing} vs {bounds}"
                    ),
                )
                .with_code(codes::TYPE_MISMATCH),
            ),
        },
    }
}

// ── Requirement computation ──────────────────────────────────────────────

/// Compute the requirement maps without touching the graph.
///
/// Single backward pass: Stores and Asserts seed the maps, Applies project
/// their settled box through every body Access offset onto their operands,
/// Loads forward the requirement on their Temp result to the Field.
pub fn compute_requirements(graph: &Graph) -> Requirements {
    let mut req = Requirements::default();

    let ops: Vec<OpId> = graph.ops().map(|op| op.id).collect();
    for &id in ops.iter().rev() {
        let op = graph.op(id);
        match &op.kind {
            OpKind::Store { value, bounds, field } => {
                req.merge_value(*value, bounds.clone(), id);
                req.merge_field(*field, bounds.clone(), id);
            }
            OpKind::Apply(ap) => {
                // Settle the iteration box: the user-declared box is
                // authoritative (never shrunk), otherwise the union of what
                // every result consumer demands.
                let derived = op
                    .results
                    .iter()
                    .filter_map(|r| req.value.get(r).cloned())
                    .reduce(|a, b| match a.union(&b) {
                        Some(u) => u,
                        None => a,
                    });
                let settled = match (&ap.bounds, derived) {
                    (Some(declared), _) => Some(declared.clone()),
                    (None, Some(d)) => Some(d),
                    (None, None) => None,
                };
                let Some(apply_box) = settled else {
                    req.diagnostics.push(
                        Diagnostic::warning(id, "apply has no consumers; no box reaches it")
                            .with_code(codes::UNRESOLVED_SHAPE_DEAD),
                    );
                    continue;
                };
                req.apply_bounds.insert(id, apply_box.clone());

                // Individual dead results of an otherwise live apply.
                for r in &op.results {
                    if !req.value.contains_key(r) {
                        req.diagnostics.push(
                            Diagnostic::warning(id, format!("apply result {r} is never consumed"))
                                .with_code(codes::UNRESOLVED_SHAPE_DEAD),
                        );
                    }
                }

                // Project through every body access onto the operands.
                let mut operand_boxes: Vec<Option<BoundingBox>> =
                    vec![None; ap.operands.len()];
                for body_op in ap.body.ops() {
                    let OpKind::Access { temp, offset } = &body_op.kind else {
                        continue;
                    };
                    let Some(arg_pos) = ap.body.args().iter().position(|a| a == temp) else {
                        continue;
                    };
                    let Some(shifted) = apply_box.translate(offset) else {
                        req.diagnostics.push(
                            Diagnostic::error(
                                id,
                                format!(
                                    "access offset {offset} has rank {} but the apply \
                                     iterates over {apply_box} (rank {})",
                                    offset.rank(),
                                    apply_box.rank()
                                ),
                            )
                            .with_code(codes::TYPE_MISMATCH),
                        );
                        continue;
                    };
                    operand_boxes[arg_pos] = Some(match &operand_boxes[arg_pos] {
                        None => shifted.clone(),
                        Some(existing) => existing.union(&shifted).unwrap_or(shifted.clone()),
                    });
                    req.merge_value(ap.operands[arg_pos], shifted, id);
                }
                req.apply_operands.insert(id, operand_boxes);
            }
            OpKind::Load { field, bounds } => {
                let required = req.value.get(&op.results[0]).cloned();
                if bounds.is_none() && required.is_none() {
                    req.diagnostics.push(
                        Diagnostic::warning(id, "load result is never consumed; no box reaches it")
                            .with_code(codes::UNRESOLVED_SHAPE_DEAD),
                    );
                }
                // The field must cover both the declared range and whatever
                // the consumers demand.
                if let Some(b) = bounds {
                    req.merge_field(*field, b.clone(), id);
                }
                if let Some(r) = required {
                    req.merge_field(*field, r, id);
                }
            }
            // Asserts are seeds for verification, not read requirements.
            _ => {}
        }
    }

    req
}

// ── In-place inference ───────────────────────────────────────────────────

/// Run shape inference: compute requirements and assign every derivable box
/// attribute in place. Declared boxes are left untouched.
pub fn infer_shapes(graph: &mut Graph) -> InferenceResult {
    let req = compute_requirements(graph);

    let ids: Vec<OpId> = graph.ops().map(|op| op.id).collect();
    for id in ids {
        let load_box = {
            let op = graph.op(id);
            match &op.kind {
                // A load box only ever widens: re-running inference after a
                // transform that grew the requirement unions the old range
                // with the new one.
                OpKind::Load { bounds, .. } => {
                    let required = req.value.get(&op.results[0]);
                    match (bounds, required) {
                        (Some(b), Some(r)) => b.union(r).or_else(|| Some(b.clone())),
                        (Some(b), None) => Some(b.clone()),
                        (None, Some(r)) => Some(r.clone()),
                        (None, None) => None,
                    }
                }
                _ => None,
            }
        };
        match &mut graph.op_mut(id).kind {
            OpKind::Load { bounds, .. } => {
                *bounds = load_box;
            }
            OpKind::Apply(ap) => {
                if ap.bounds.is_none() {
                    ap.bounds = req.apply_bounds.get(&id).cloned();
                }
                if let Some(operand_boxes) = req.apply_operands.get(&id) {
                    ap.operand_bounds = operand_boxes.clone();
                }
            }
            _ => {}
        }
    }

    InferenceResult {
        diagnostics: req.diagnostics,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::Offset;
    use crate::graph::ArithOp;
    use crate::types::{ElemType, GridType, ValueType};

    fn bb(lb: &[i64], ub: &[i64]) -> BoundingBox {
        BoundingBox::new(lb.to_vec(), ub.to_vec()).unwrap()
    }

    fn field3(g: &mut Graph) -> ValueId {
        g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 3)))
    }

    fn temp_ty(rank: usize) -> ValueType {
        ValueType::Grid(GridType::temp(ElemType::F64, rank))
    }

    /// The minimal pipeline: assert [-3,-3,0]:[67,67,60], load, apply with
    /// accesses at [-1,0,0] and [1,0,0], store over [0,0,0]:[64,64,60].
    fn minimal_pipeline() -> Graph {
        let mut g = Graph::new();
        let input = field3(&mut g);
        let output = field3(&mut g);
        g.assert(input, bb(&[-3, -3, 0], &[67, 67, 60]));
        g.assert(output, bb(&[0, 0, 0], &[64, 64, 60]));
        let tmp = g.load(input);

        let mut body = Graph::with_args(vec![temp_ty(3)]);
        let arg = body.arg(0);
        let left = body.access(arg, Offset(vec![-1, 0, 0]));
        let right = body.access(arg, Offset(vec![1, 0, 0]));
        let sum = body.arith(ArithOp::Add, left, right);
        body.ret(vec![sum]);

        let results = g.apply(vec![tmp], body, &[ElemType::F64], 3);
        g.store(results[0], output, bb(&[0, 0, 0], &[64, 64, 60]));
        g
    }

    fn find(g: &Graph, name: &str) -> OpId {
        g.ops().find(|op| op.kind.name() == name).unwrap().id
    }

    #[test]
    fn minimal_pipeline_boxes() {
        let mut g = minimal_pipeline();
        let result = infer_shapes(&mut g);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

        let apply = find(&g, "apply");
        assert_eq!(
            g.op(apply).kind.bounds(),
            Some(&bb(&[0, 0, 0], &[64, 64, 60]))
        );

        let load = find(&g, "load");
        assert_eq!(
            g.op(load).kind.bounds(),
            Some(&bb(&[-1, 0, 0], &[65, 64, 60]))
        );
    }

    #[test]
    fn operand_bounds_recorded() {
        let mut g = minimal_pipeline();
        infer_shapes(&mut g);
        let apply = find(&g, "apply");
        if let OpKind::Apply(ap) = &g.op(apply).kind {
            assert_eq!(ap.operand_bounds.len(), 1);
            assert_eq!(ap.operand_bounds[0], Some(bb(&[-1, 0, 0], &[65, 64, 60])));
        } else {
            panic!("expected apply");
        }
    }

    #[test]
    fn multiple_consumers_union() {
        // One load feeding two applies with disjoint halos: the load box is
        // the union of both requirements.
        let mut g = Graph::new();
        let input = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 1)));
        let out_a = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 1)));
        let out_b = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 1)));
        g.assert(input, bb(&[-4], &[68]));
        g.assert(out_a, bb(&[0], &[64]));
        g.assert(out_b, bb(&[0], &[64]));
        let tmp = g.load(input);

        let mut body_a = Graph::with_args(vec![temp_ty(1)]);
        let arg = body_a.arg(0);
        let v = body_a.access(arg, Offset(vec![-3]));
        body_a.ret(vec![v]);
        let ra = g.apply(vec![tmp], body_a, &[ElemType::F64], 1);

        let mut body_b = Graph::with_args(vec![temp_ty(1)]);
        let arg = body_b.arg(0);
        let v = body_b.access(arg, Offset(vec![2]));
        body_b.ret(vec![v]);
        let rb = g.apply(vec![tmp], body_b, &[ElemType::F64], 1);

        g.store(ra[0], out_a, bb(&[0], &[64]));
        g.store(rb[0], out_b, bb(&[0], &[64]));

        let result = infer_shapes(&mut g);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let load = find(&g, "load");
        assert_eq!(g.op(load).kind.bounds(), Some(&bb(&[-3], &[66])));
    }

    #[test]
    fn chained_applies_propagate_backward() {
        // load → apply(+1 halo) → apply(+2 halo) → store: the first apply's
        // box grows by the second's access offsets.
        let mut g = Graph::new();
        let input = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 1)));
        let output = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 1)));
        g.assert(input, bb(&[-3], &[67]));
        g.assert(output, bb(&[0], &[64]));
        let tmp = g.load(input);

        let mut body1 = Graph::with_args(vec![temp_ty(1)]);
        let arg = body1.arg(0);
        let v = body1.access(arg, Offset(vec![-1]));
        body1.ret(vec![v]);
        let mid = g.apply(vec![tmp], body1, &[ElemType::F64], 1);

        let mut body2 = Graph::with_args(vec![temp_ty(1)]);
        let arg = body2.arg(0);
        let a = body2.access(arg, Offset(vec![-2]));
        let b = body2.access(arg, Offset(vec![2]));
        let sum = body2.arith(ArithOp::Add, a, b);
        body2.ret(vec![sum]);
        let out = g.apply(vec![mid[0]], body2, &[ElemType::F64], 1);

        g.store(out[0], output, bb(&[0], &[64]));

        let result = infer_shapes(&mut g);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

        let applies: Vec<OpId> = g
            .ops()
            .filter(|op| op.kind.name() == "apply")
            .map(|op| op.id)
            .collect();
        // Second apply iterates the store box, first the union of ±2 shifts.
        assert_eq!(g.op(applies[1]).kind.bounds(), Some(&bb(&[0], &[64])));
        assert_eq!(g.op(applies[0]).kind.bounds(), Some(&bb(&[-2], &[66])));
        // The load covers the first apply's -1 access over [-2, 66).
        let load = find(&g, "load");
        assert_eq!(g.op(load).kind.bounds(), Some(&bb(&[-3], &[65])));
    }

    #[test]
    fn declared_load_box_is_not_shrunk() {
        let mut g = Graph::new();
        let input = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 1)));
        let output = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 1)));
        g.assert(input, bb(&[-8], &[72]));
        g.assert(output, bb(&[0], &[64]));
        let tmp = g.load_with_bounds(input, bb(&[-8], &[72]));

        let mut body = Graph::with_args(vec![temp_ty(1)]);
        let arg = body.arg(0);
        let v = body.access(arg, Offset(vec![0]));
        body.ret(vec![v]);
        let r = g.apply(vec![tmp], body, &[ElemType::F64], 1);
        g.store(r[0], output, bb(&[0], &[64]));

        let result = infer_shapes(&mut g);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
        let load = find(&g, "load");
        // Declared range stands even though only [0, 64) is required.
        assert_eq!(g.op(load).kind.bounds(), Some(&bb(&[-8], &[72])));
    }

    #[test]
    fn partially_dead_apply_result_warns() {
        let mut g = Graph::new();
        let input = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 1)));
        let output = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 1)));
        g.assert(input, bb(&[-1], &[65]));
        g.assert(output, bb(&[0], &[64]));
        let tmp = g.load(input);

        let mut body = Graph::with_args(vec![temp_ty(1)]);
        let arg = body.arg(0);
        let a = body.access(arg, Offset(vec![-1]));
        let b = body.access(arg, Offset(vec![1]));
        body.ret(vec![a, b]);
        let r = g.apply(vec![tmp], body, &[ElemType::F64, ElemType::F64], 1);
        // Only the first result is stored.
        g.store(r[0], output, bb(&[0], &[64]));

        let result = infer_shapes(&mut g);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(
            result.diagnostics[0].code,
            Some(codes::UNRESOLVED_SHAPE_DEAD)
        );
        // The live result still settles the box.
        let apply = find(&g, "apply");
        assert_eq!(g.op(apply).kind.bounds(), Some(&bb(&[0], &[64])));
    }

    #[test]
    fn dead_load_reports_unresolved_shape_warning() {
        let mut g = Graph::new();
        let input = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 1)));
        g.assert(input, bb(&[0], &[64]));
        g.load(input);

        let mut g2 = g.clone();
        let result = infer_shapes(&mut g2);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(
            result.diagnostics[0].code,
            Some(codes::UNRESOLVED_SHAPE_DEAD)
        );
        // The dead load keeps no box.
        let load = find(&g2, "load");
        assert!(g2.op(load).kind.bounds().is_none());
    }

    #[test]
    fn offset_rank_mismatch_is_hard_error() {
        let mut g = Graph::new();
        let input = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 2)));
        let output = g.add_arg(ValueType::Grid(GridType::field(ElemType::F64, 2)));
        g.assert(input, bb(&[0, 0], &[64, 64]));
        g.assert(output, bb(&[0, 0], &[64, 64]));
        let tmp = g.load(input);

        let mut body = Graph::with_args(vec![temp_ty(2)]);
        let arg = body.arg(0);
        // 1-component offset against a rank-2 iteration box.
        let v = body.access(arg, Offset(vec![1]));
        body.ret(vec![v]);
        let r = g.apply(vec![tmp], body, &[ElemType::F64], 2);
        g.store(r[0], output, bb(&[0, 0], &[64, 64]));

        let result = infer_shapes(&mut g);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == Some(codes::TYPE_MISMATCH)));
    }

    #[test]
    fn requirements_are_pure() {
        let g = minimal_pipeline();
        let before = g.dump();
        let _ = compute_requirements(&g);
        assert_eq!(g.dump(), before);
    }
}
