// unroll.rs — Return-operand unrolling
//
// Rewrites one Apply so that each iteration of its body computes `factor`
// consecutive elements along one dimension instead of one. The backward
// slice feeding every Return operand is replicated once per step, with all
// Access and Index offsets shifted by the step along the unroll dimension.
// The new Return lists the replicas result-major: slot `j * factor + step`
// holds step `step` of logical result `j`. The Apply's signature and its
// consumers are untouched.
//
// Preconditions: the graph verified cleanly and the target Apply carries a
//               resolved iteration box.
// Postconditions: on success the body terminator carries `UnrollInfo`; on
//                 any diagnostic the graph is unchanged.
// Failure modes: non-positive or non-dividing factor → `E0500`; out-of-range
//                dimension → `E0100`; unresolved box → `E0600`; an already
//                unrolled body → `E0300`.
// Side effects: replaces the target Apply's body in place.

use std::collections::HashMap;

use crate::bounds::Offset;
use crate::diag::{codes, Diagnostic};
use crate::graph::{Graph, OpId, OpKind, UnrollInfo, ValueDef, ValueId};

// ── Result ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct UnrollResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl UnrollResult {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

// ── Entry point ──────────────────────────────────────────────────────────

/// Unroll `apply` by `factor` along `dim`.
pub fn unroll(graph: &mut Graph, apply: OpId, factor: i64, dim: usize) -> UnrollResult {
    let mut diagnostics = Vec::new();

    let ap = match &graph.op(apply).kind {
        OpKind::Apply(ap) => ap,
        other => {
            diagnostics.push(
                Diagnostic::error(apply, format!("cannot unroll a {} op", other.name()))
                    .with_code(codes::TYPE_MISMATCH),
            );
            return UnrollResult { diagnostics };
        }
    };

    let rank = graph
        .op(apply)
        .results
        .first()
        .and_then(|r| graph.value_ty(*r).rank())
        .unwrap_or(0);
    if dim >= rank {
        diagnostics.push(
            Diagnostic::error(
                apply,
                format!("unroll dimension {dim} is out of range for rank {rank}"),
            )
            .with_code(codes::TYPE_MISMATCH),
        );
    }
    if factor < 1 {
        diagnostics.push(
            Diagnostic::error(apply, format!("unroll factor {factor} must be positive"))
                .with_code(codes::DIVISIBILITY_VIOLATION),
        );
    }

    match &ap.bounds {
        None => {
            diagnostics.push(
                Diagnostic::error(apply, "unroll requires a resolved iteration box")
                    .with_code(codes::UNRESOLVED_SHAPE)
                    .with_hint("run shape inference first"),
            );
        }
        Some(b) if dim < rank && factor >= 1 => {
            let extent = b.extent(dim);
            if extent % factor != 0 {
                diagnostics.push(
                    Diagnostic::error(
                        apply,
                        format!(
                            "unroll factor {factor} does not divide extent {extent} along \
                             dimension {dim}"
                        ),
                    )
                    .with_code(codes::DIVISIBILITY_VIOLATION),
                );
            }
        }
        Some(_) => {}
    }

    let term = ap.body.terminator();
    let already = term.is_some_and(|t| {
        matches!(ap.body.op(t).kind, OpKind::Return { unroll: Some(_), .. })
    });
    if term.is_none() {
        diagnostics.push(
            Diagnostic::error(apply, "apply body has no return").with_code(codes::ARITY_VIOLATION),
        );
    } else if already {
        diagnostics.push(
            Diagnostic::error(apply, "apply body is already unrolled")
                .with_code(codes::ARITY_VIOLATION),
        );
    }

    if !diagnostics.is_empty() {
        return UnrollResult { diagnostics };
    }

    let old_body = ap.body.clone();
    let new_body = replicate_body(&old_body, factor, dim);
    if let OpKind::Apply(ap) = &mut graph.op_mut(apply).kind {
        ap.body = new_body;
    }

    UnrollResult { diagnostics }
}

// ── Body replication ─────────────────────────────────────────────────────

fn shifted(offset: &Offset, dim: usize, step: i64) -> Offset {
    let mut components = offset.0.clone();
    components[dim] += step;
    Offset(components)
}

fn replicate_body(old: &Graph, factor: i64, dim: usize) -> Graph {
    let arg_types = old
        .args()
        .iter()
        .map(|a| old.value_ty(*a).clone())
        .collect();
    let mut body = Graph::with_args(arg_types);

    let return_operands = match old.terminator().map(|t| &old.op(t).kind) {
        Some(OpKind::Return { operands, .. }) => operands.clone(),
        _ => Vec::new(),
    };

    // (old value, step) → new value. Shared subexpressions are cloned once
    // per step, not once per use.
    let mut memo: HashMap<(ValueId, i64), ValueId> = HashMap::new();
    let mut slots = Vec::with_capacity(return_operands.len() * factor as usize);
    for operand in &return_operands {
        for step in 0..factor {
            slots.push(clone_slice(old, &mut body, *operand, dim, step, &mut memo));
        }
    }

    body.push_op(
        OpKind::Return {
            operands: slots,
            unroll: Some(UnrollInfo { factor, dim }),
        },
        Vec::new(),
    );
    body
}

fn clone_slice(
    old: &Graph,
    body: &mut Graph,
    value: ValueId,
    dim: usize,
    step: i64,
    memo: &mut HashMap<(ValueId, i64), ValueId>,
) -> ValueId {
    if let Some(v) = memo.get(&(value, step)) {
        return *v;
    }
    let new = match old.value(value).def {
        ValueDef::Arg { index } => body.arg(index),
        ValueDef::Result { op, .. } => match &old.op(op).kind {
            OpKind::Access { temp, offset } => {
                let temp = clone_slice(old, body, *temp, dim, step, memo);
                body.access(temp, shifted(offset, dim, step))
            }
            OpKind::Index { offset } => body.index(shifted(offset, dim, step)),
            OpKind::Constant { value: c, ty } => body.constant(*c, *ty),
            OpKind::Arith { op: kind, lhs, rhs } => {
                let lhs = clone_slice(old, body, *lhs, dim, step, memo);
                let rhs = clone_slice(old, body, *rhs, dim, step, memo);
                body.arith(*kind, lhs, rhs)
            }
            // Verified bodies hold no other producers.
            _ => body.constant(0.0, crate::types::ElemType::F64),
        },
    };
    memo.insert((value, step), new);
    new
}

// ── Tests ────────────────────────────────────────────────────────────────
