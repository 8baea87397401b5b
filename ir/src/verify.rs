// verify.rs — Structural verification
//
// One deterministic, read-only pass over the graph that checks every
// structural invariant and returns ALL violations at once. Verification
// never repairs anything; callers decide what a failed result means.
//
// Two entry points: `verify_structure` checks region placement, types,
// arity, and per-Field uniqueness and is safe to run before shape
// inference. `verify` additionally checks box coverage, shape resolution,
// and unroll divisibility, and is meant for graphs inference has seen.
//
// Preconditions: none — any graph may be verified.
// Postconditions: the graph is unchanged; running twice yields the same
//                 diagnostics in the same order.
// Failure modes: none (violations are data, not errors).
// Side effects: none.

use std::collections::BTreeMap;

use crate::diag::{codes, has_errors, Diagnostic};
use crate::graph::{Graph, Op, OpId, OpKind, ValueId};
use crate::shape_infer::compute_requirements;
use crate::types::{GridKind, Layout, ValueType};

// ── Result ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct VerifyResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl VerifyResult {
    pub fn is_ok(&self) -> bool {
        !has_errors(&self.diagnostics)
    }
}

// ── Entry points ─────────────────────────────────────────────────────────

/// Check region placement, operand types, arity, and per-Field uniqueness.
/// Box attributes are not consulted, so this runs before inference.
pub fn verify_structure(graph: &Graph) -> VerifyResult {
    let mut v = Verifier::new(graph);
    v.check_ops();
    v.check_uniqueness();
    VerifyResult {
        diagnostics: v.diagnostics,
    }
}

/// Full verification: everything `verify_structure` checks plus coverage of
/// asserted and declared boxes, shape resolution, and unroll divisibility.
pub fn verify(graph: &Graph) -> VerifyResult {
    let mut v = Verifier::new(graph);
    v.check_ops();
    v.check_uniqueness();
    let req = compute_requirements(graph);
    v.check_coverage(&req);
    v.check_resolution(&req);
    v.check_unroll();
    VerifyResult {
        diagnostics: v.diagnostics,
    }
}

// ── Per-field usage record ───────────────────────────────────────────────

#[derive(Default)]
struct FieldUsage {
    asserts: Vec<OpId>,
    loads: Vec<OpId>,
    stores: Vec<OpId>,
}

// ── Verifier ─────────────────────────────────────────────────────────────

struct Verifier<'g> {
    graph: &'g Graph,
    diagnostics: Vec<Diagnostic>,
    // BTreeMap keyed by ValueId keeps report order deterministic.
    fields: BTreeMap<ValueId, FieldUsage>,
}

impl<'g> Verifier<'g> {
    fn new(graph: &'g Graph) -> Self {
        Verifier {
            graph,
            diagnostics: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    fn error(&mut self, d: Diagnostic) {
        self.diagnostics.push(d);
    }

    fn is_field(&self, v: ValueId) -> bool {
        matches!(self.graph.value_ty(v), ValueType::Grid(g) if g.kind == GridKind::Field)
    }

    fn is_temp(&self, v: ValueId) -> bool {
        matches!(self.graph.value_ty(v), ValueType::Grid(g) if g.kind == GridKind::Temp)
    }

    // ── Op checks ────────────────────────────────────────────────────

    fn check_ops(&mut self) {
        for op in self.graph.ops() {
            match &op.kind {
                OpKind::Assert { field, bounds } => {
                    self.check_field_operand(op, *field, "assert");
                    self.check_box_rank(op, *field, bounds.rank());
                    self.check_assert_extents(op, *field);
                    self.fields.entry(*field).or_default().asserts.push(op.id);
                }
                OpKind::Load { field, bounds } => {
                    self.check_field_operand(op, *field, "load");
                    if let Some(b) = bounds {
                        self.check_box_rank(op, *field, b.rank());
                    }
                    self.fields.entry(*field).or_default().loads.push(op.id);
                }
                OpKind::Store { value, field, bounds } => {
                    self.check_field_operand(op, *field, "store");
                    self.check_box_rank(op, *field, bounds.rank());
                    self.check_store_value(op, *value, *field);
                    self.fields.entry(*field).or_default().stores.push(op.id);
                }
                OpKind::Apply(ap) => {
                    self.check_apply(op, ap);
                }
                // Body-only ops at the top level.
                OpKind::Index { .. }
                | OpKind::Access { .. }
                | OpKind::Constant { .. }
                | OpKind::Arith { .. }
                | OpKind::Return { .. } => {
                    self.error(
                        Diagnostic::error(
                            op.id,
                            format!("{} op is only allowed inside an apply body", op.kind.name()),
                        )
                        .with_code(codes::TYPE_MISMATCH),
                    );
                }
            }
        }
    }

    fn check_field_operand(&mut self, op: &Op, field: ValueId, what: &str) {
        if !self.is_field(field) {
            self.error(
                Diagnostic::error(
                    op.id,
                    format!(
                        "{what} operand {field} must be a field, got {}",
                        self.graph.value_ty(field)
                    ),
                )
                .with_code(codes::TYPE_MISMATCH),
            );
        }
    }

    fn check_box_rank(&mut self, op: &Op, field: ValueId, box_rank: usize) {
        if let Some(rank) = self.graph.value_ty(field).rank() {
            if rank != box_rank {
                self.error(
                    Diagnostic::error(
                        op.id,
                        format!(
                            "bounding box has rank {box_rank} but {field} has rank {rank}"
                        ),
                    )
                    .with_code(codes::TYPE_MISMATCH),
                );
            }
        }
    }

    /// An Assert pins extents that are still dynamic. A field whose static
    /// extents are already concrete cannot be asserted.
    fn check_assert_extents(&mut self, op: &Op, field: ValueId) {
        if let ValueType::Grid(t) = self.graph.value_ty(field) {
            if !t.is_fully_dynamic() {
                self.error(
                    Diagnostic::error(
                        op.id,
                        format!("asserted field {field} ({t}) already has static extents"),
                    )
                    .with_code(codes::TYPE_MISMATCH),
                );
            }
        }
    }

    fn check_store_value(&mut self, op: &Op, value: ValueId, field: ValueId) {
        if !self.is_temp(value) {
            self.error(
                Diagnostic::error(
                    op.id,
                    format!(
                        "stored value {value} must be a temp, got {}",
                        self.graph.value_ty(value)
                    ),
                )
                .with_code(codes::TYPE_MISMATCH),
            );
            return;
        }
        if !self.is_field(field) {
            return;
        }
        let (ValueType::Grid(vt), ValueType::Grid(ft)) =
            (self.graph.value_ty(value), self.graph.value_ty(field))
        else {
            return;
        };
        if vt.elem != ft.elem || vt.rank() != ft.rank() {
            self.error(
                Diagnostic::error(
                    op.id,
                    format!(
                        "stored value {value} ({vt}) does not match field {field} ({ft})"
                    ),
                )
                .with_code(codes::TYPE_MISMATCH),
            );
        } else if vt.layout != ft.layout {
            self.error(
                Diagnostic::error(
                    op.id,
                    format!(
                        "stored value {value} has {} layout but field {field} is {}",
                        layout_name(vt.layout),
                        layout_name(ft.layout)
                    ),
                )
                .with_code(codes::TYPE_MISMATCH),
            );
        }
    }

    fn check_apply(&mut self, op: &Op, ap: &crate::graph::ApplyOp) {
        if ap.operands.len() != ap.body.args().len() {
            self.error(
                Diagnostic::error(
                    op.id,
                    format!(
                        "apply has {} operands but its body declares {} arguments",
                        ap.operands.len(),
                        ap.body.args().len()
                    ),
                )
                .with_code(codes::ARITY_VIOLATION),
            );
        }
        for (operand, arg) in ap.operands.iter().zip(ap.body.args()) {
            if self.is_field(*operand) {
                self.error(
                    Diagnostic::error(
                        op.id,
                        format!("apply operand {operand} is a field; load it into a temp first"),
                    )
                    .with_code(codes::TYPE_MISMATCH),
                );
                continue;
            }
            let operand_ty = self.graph.value_ty(*operand);
            let arg_ty = ap.body.value_ty(*arg);
            if !operand_ty.compatible(arg_ty) {
                self.error(
                    Diagnostic::error(
                        op.id,
                        format!(
                            "apply operand {operand} ({operand_ty}) is incompatible with \
                             body argument {arg} ({arg_ty})"
                        ),
                    )
                    .with_code(codes::TYPE_MISMATCH),
                );
            }
        }

        let rank = op
            .results
            .first()
            .and_then(|r| self.graph.value_ty(*r).rank())
            .unwrap_or(0);
        if let Some(b) = &ap.bounds {
            if b.rank() != rank {
                self.error(
                    Diagnostic::error(
                        op.id,
                        format!(
                            "apply iteration box has rank {} but results have rank {rank}",
                            b.rank()
                        ),
                    )
                    .with_code(codes::TYPE_MISMATCH),
                );
            }
        }

        self.check_body(op, ap, rank);
    }

    fn check_body(&mut self, op: &Op, ap: &crate::graph::ApplyOp, rank: usize) {
        let body = &ap.body;
        let mut returns: Vec<OpId> = Vec::new();
        for body_op in body.ops() {
            match &body_op.kind {
                OpKind::Index { offset } => {
                    if offset.rank() != rank {
                        self.error(
                            Diagnostic::error(
                                op.id,
                                format!(
                                    "index offset {offset} has rank {} inside a rank-{rank} apply",
                                    offset.rank()
                                ),
                            )
                            .with_code(codes::TYPE_MISMATCH),
                        );
                    }
                }
                OpKind::Access { temp, offset } => {
                    let ty = body.value_ty(*temp);
                    match ty.rank() {
                        Some(r) if r == offset.rank() => {}
                        Some(r) => self.error(
                            Diagnostic::error(
                                op.id,
                                format!(
                                    "access offset {offset} has rank {} but {temp} has rank {r}",
                                    offset.rank()
                                ),
                            )
                            .with_code(codes::TYPE_MISMATCH),
                        ),
                        None => self.error(
                            Diagnostic::error(
                                op.id,
                                format!("access operand {temp} must be a grid, got {ty}"),
                            )
                            .with_code(codes::TYPE_MISMATCH),
                        ),
                    }
                }
                OpKind::Arith { lhs, rhs, .. } => {
                    let lt = body.value_ty(*lhs);
                    let rt = body.value_ty(*rhs);
                    let scalar_pair = matches!((lt, rt), (ValueType::Scalar(a), ValueType::Scalar(b)) if a == b);
                    if !scalar_pair {
                        self.error(
                            Diagnostic::error(
                                op.id,
                                format!("arith operands must be scalars of one type, got {lt} and {rt}"),
                            )
                            .with_code(codes::TYPE_MISMATCH),
                        );
                    }
                }
                OpKind::Constant { .. } => {}
                OpKind::Return { operands, unroll } => {
                    returns.push(body_op.id);
                    let factor = unroll.map(|u| u.factor).unwrap_or(1).max(1) as usize;
                    if operands.len() != op.results.len() * factor {
                        self.error(
                            Diagnostic::error(
                                op.id,
                                format!(
                                    "return carries {} operands but the apply produces {} \
                                     results (unroll factor {factor})",
                                    operands.len(),
                                    op.results.len()
                                ),
                            )
                            .with_code(codes::ARITY_VIOLATION),
                        );
                    } else {
                        // Slot j * factor + step feeds result j.
                        for (slot, operand) in operands.iter().enumerate() {
                            let result = op.results[slot / factor];
                            let want = self.graph.value_ty(result).elem();
                            let got = body.value_ty(*operand);
                            let slot_ok = matches!(
                                (got, want),
                                (ValueType::Scalar(e), Some(w)) if *e == w
                            );
                            if !slot_ok {
                                self.error(
                                    Diagnostic::error(
                                        op.id,
                                        format!(
                                            "return slot {slot} ({got}) does not match the \
                                             element type of result {result}"
                                        ),
                                    )
                                    .with_code(codes::TYPE_MISMATCH),
                                );
                            }
                        }
                    }
                }
                // Top-level ops inside a body.
                other => {
                    self.error(
                        Diagnostic::error(
                            op.id,
                            format!("{} op is not allowed inside an apply body", other.name()),
                        )
                        .with_code(codes::TYPE_MISMATCH),
                    );
                }
            }
        }
        match returns.len() {
            1 => {
                // The return must terminate the body.
                if body.ops().last().map(|o| o.id) != Some(returns[0]) {
                    self.error(
                        Diagnostic::error(op.id, "return must be the last op of an apply body")
                            .with_code(codes::ARITY_VIOLATION),
                    );
                }
            }
            0 => self.error(
                Diagnostic::error(op.id, "apply body has no return")
                    .with_code(codes::ARITY_VIOLATION),
            ),
            n => self.error(
                Diagnostic::error(op.id, format!("apply body has {n} returns, expected one"))
                    .with_code(codes::ARITY_VIOLATION),
            ),
        }
    }

    // ── Uniqueness checks ────────────────────────────────────────────

    fn check_uniqueness(&mut self) {
        let fields = std::mem::take(&mut self.fields);
        for (field, usage) in &fields {
            match usage.asserts.len() {
                1 => {}
                0 => {
                    if !usage.loads.is_empty() || !usage.stores.is_empty() {
                        let op = usage.loads.first().or(usage.stores.first());
                        self.diagnostics.push(
                            Diagnostic::new(
                                crate::diag::DiagLevel::Error,
                                op.copied(),
                                format!("field {field} is accessed but its extents are never asserted"),
                            )
                            .with_code(codes::UNIQUENESS_VIOLATION)
                            .with_hint(format!("add exactly one assert for {field}")),
                        );
                    }
                }
                _ => {
                    let mut d = Diagnostic::error(
                        usage.asserts[1],
                        format!("field {field} has multiple asserts"),
                    )
                    .with_code(codes::UNIQUENESS_VIOLATION);
                    d = d.with_related(usage.asserts[0], "first assert here");
                    self.diagnostics.push(d);
                }
            }
            if usage.stores.len() > 1 {
                let mut d = Diagnostic::error(
                    usage.stores[1],
                    format!("field {field} is stored more than once"),
                )
                .with_code(codes::UNIQUENESS_VIOLATION);
                d = d.with_related(usage.stores[0], "first store here");
                self.diagnostics.push(d);
            }
            if !usage.loads.is_empty() && !usage.stores.is_empty() {
                let d = Diagnostic::error(
                    usage.stores[0],
                    format!("field {field} is both loaded and stored"),
                )
                .with_code(codes::UNIQUENESS_VIOLATION)
                .with_related(usage.loads[0], "loaded here")
                .with_hint("route the value through a separate output field");
                self.diagnostics.push(d);
            }
        }
        self.fields = fields;
    }

    // ── Coverage checks ──────────────────────────────────────────────

    fn check_coverage(&mut self, req: &crate::shape_infer::Requirements) {
        for op in self.graph.ops() {
            match &op.kind {
                OpKind::Assert { field, bounds } => {
                    if let Some(required) = req.field.get(field) {
                        if !bounds.covers(required) {
                            self.diagnostics.push(
                                Diagnostic::error(
                                    op.id,
                                    format!(
                                        "asserted box {bounds} for {field} does not cover the \
                                         required range {required}"
                                    ),
                                )
                                .with_code(codes::COVERAGE_VIOLATION)
                                .with_hint(format!("widen the assert to at least {required}")),
                            );
                        }
                    }
                }
                OpKind::Load { bounds: Some(b), .. } => {
                    if let Some(required) = req.value.get(&op.results[0]) {
                        if !b.covers(required) {
                            self.diagnostics.push(
                                Diagnostic::error(
                                    op.id,
                                    format!(
                                        "declared load box {b} does not cover the required \
                                         range {required}"
                                    ),
                                )
                                .with_code(codes::COVERAGE_VIOLATION),
                            );
                        }
                    }
                }
                OpKind::Apply(ap) => {
                    if let Some(b) = &ap.bounds {
                        for r in &op.results {
                            if let Some(required) = req.value.get(r) {
                                if !b.covers(required) {
                                    self.diagnostics.push(
                                        Diagnostic::error(
                                            op.id,
                                            format!(
                                                "apply iteration box {b} does not cover the range \
                                                 {required} required of result {r}"
                                            ),
                                        )
                                        .with_code(codes::COVERAGE_VIOLATION),
                                    );
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // ── Resolution checks ────────────────────────────────────────────

    /// A Load or Apply whose result is required downstream must carry a box
    /// once inference has run. A producer feeding only a dead chain is a
    /// warning during inference, not an error here.
    fn check_resolution(&mut self, req: &crate::shape_infer::Requirements) {
        for op in self.graph.ops() {
            let needs_box = matches!(op.kind, OpKind::Load { .. } | OpKind::Apply(_));
            if !needs_box || op.kind.bounds().is_some() {
                continue;
            }
            if op.results.iter().any(|r| req.value.contains_key(r)) {
                self.diagnostics.push(
                    Diagnostic::error(
                        op.id,
                        format!("{} result is consumed but no box was resolved for it", op.kind.name()),
                    )
                    .with_code(codes::UNRESOLVED_SHAPE)
                    .with_hint("run shape inference, or declare the box explicitly"),
                );
            }
        }
    }

    // ── Unroll checks ────────────────────────────────────────────────

    fn check_unroll(&mut self) {
        for op in self.graph.ops() {
            let OpKind::Apply(ap) = &op.kind else { continue };
            let Some(term) = ap.body.terminator() else { continue };
            let OpKind::Return { unroll: Some(u), .. } = &ap.body.op(term).kind else {
                continue;
            };
            let rank = op
                .results
                .first()
                .and_then(|r| self.graph.value_ty(*r).rank())
                .unwrap_or(0);
            if u.dim >= rank {
                self.diagnostics.push(
                    Diagnostic::error(
                        op.id,
                        format!("unroll dimension {} is out of range for rank {rank}", u.dim),
                    )
                    .with_code(codes::TYPE_MISMATCH),
                );
                continue;
            }
            if u.factor <= 0 {
                self.diagnostics.push(
                    Diagnostic::error(op.id, format!("unroll factor {} must be positive", u.factor))
                        .with_code(codes::DIVISIBILITY_VIOLATION),
                );
                continue;
            }
            if let Some(b) = &ap.bounds {
                let extent = b.extent(u.dim);
                if extent % u.factor != 0 {
                    self.diagnostics.push(
                        Diagnostic::error(
                            op.id,
                            format!(
                                "unroll factor {} does not divide extent {extent} along \
                                 dimension {}",
                                u.factor, u.dim
                            ),
                        )
                        .with_code(codes::DIVISIBILITY_VIOLATION),
                    );
                }
            }
        }
    }
}

fn layout_name(layout: Layout) -> &'static str {
    match layout {
        Layout::RowMajor => "row-major",
        Layout::ColumnMajor => "column-major",
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
