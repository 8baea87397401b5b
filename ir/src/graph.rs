// graph.rs — Stencil operation graph
//
// Arena-based dataflow graph: typed ops (Assert, Load, Apply, Store at the
// top level; Index, Access, Constant, Arith, Return inside Apply bodies)
// connected by value-use edges. An Apply exclusively owns its nested body
// sub-graph; the body's free variables are its arguments, bound one-to-one
// to the Apply's operands. Top-level graph arguments model the externally
// supplied Field values.
//
// Preconditions: none — graphs are built op-by-op through the builder
//                methods; structural invariants are checked by `verify`.
// Postconditions: op and value ids are stable for the lifetime of the graph
//                 (erasure is a tombstone, never a removal).
// Failure modes: none (malformed graphs are diagnosed later, not here).
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::bounds::{BoundingBox, Offset};
use crate::types::{ElemType, GridType, ValueType};

// ── Identifiers ──────────────────────────────────────────────────────────

/// Unique identifier for an op within one graph (top-level or body).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OpId(pub u32);

/// Unique identifier for a value within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

// ── Values ───────────────────────────────────────────────────────────────

/// How a value comes into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueDef {
    /// Produced as result `index` of an op.
    Result { op: OpId, index: usize },
    /// Graph argument `index`: a Field handed in by the front end at the top
    /// level, or a body free variable bound to an Apply operand.
    Arg { index: usize },
}

/// A value in the graph arena.
#[derive(Debug, Clone, Serialize)]
pub struct Value {
    pub ty: ValueType,
    pub def: ValueDef,
}

// ── Ops ──────────────────────────────────────────────────────────────────

/// Scalar arithmetic inside Apply bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
        };
        write!(f, "{s}")
    }
}

/// Unrolling record on a Return: the operand list holds `factor` slots per
/// logical result, stepped along `dim`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnrollInfo {
    pub factor: i64,
    pub dim: usize,
}

/// An Apply op: N operands bound to a nested body, M Temp results.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOp {
    pub operands: Vec<ValueId>,
    pub body: Graph,
    /// Iteration box. User-declared or filled by shape inference.
    pub bounds: Option<BoundingBox>,
    /// Per-operand required box, filled by shape inference.
    pub operand_bounds: Vec<Option<BoundingBox>>,
}

/// The kind of an op, with its operand references and attributes.
#[derive(Debug, Clone, Serialize)]
pub enum OpKind {
    /// Pins the dynamic extents of a Field. Exactly one per Field.
    Assert { field: ValueId, bounds: BoundingBox },
    /// Reads a Field into a Temp over an optional declared range.
    Load { field: ValueId, bounds: Option<BoundingBox> },
    /// Writes a Temp into a Field over a fixed range.
    Store { value: ValueId, field: ValueId, bounds: BoundingBox },
    Apply(ApplyOp),
    /// Probes the iteration position at a constant displacement.
    Index { offset: Offset },
    /// Reads one element of a Temp at a constant displacement.
    Access { temp: ValueId, offset: Offset },
    Constant { value: f64, ty: ElemType },
    Arith { op: ArithOp, lhs: ValueId, rhs: ValueId },
    /// Terminates an Apply body.
    Return { operands: Vec<ValueId>, unroll: Option<UnrollInfo> },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Assert { .. } => "assert",
            OpKind::Load { .. } => "load",
            OpKind::Store { .. } => "store",
            OpKind::Apply(_) => "apply",
            OpKind::Index { .. } => "index",
            OpKind::Access { .. } => "access",
            OpKind::Constant { .. } => "constant",
            OpKind::Arith { .. } => "arith",
            OpKind::Return { .. } => "return",
        }
    }

    /// Shape capability: the bounding box this op exposes, if any.
    pub fn bounds(&self) -> Option<&BoundingBox> {
        match self {
            OpKind::Assert { bounds, .. } | OpKind::Store { bounds, .. } => Some(bounds),
            OpKind::Load { bounds, .. } => bounds.as_ref(),
            OpKind::Apply(apply) => apply.bounds.as_ref(),
            _ => None,
        }
    }

    /// Offset capability: the constant displacement this op exposes, if any.
    pub fn offset(&self) -> Option<&Offset> {
        match self {
            OpKind::Index { offset } | OpKind::Access { offset, .. } => Some(offset),
            _ => None,
        }
    }

    /// All values this op consumes, in operand order.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            OpKind::Assert { field, .. } => vec![*field],
            OpKind::Load { field, .. } => vec![*field],
            OpKind::Store { value, field, .. } => vec![*value, *field],
            OpKind::Apply(apply) => apply.operands.clone(),
            OpKind::Index { .. } | OpKind::Constant { .. } => Vec::new(),
            OpKind::Access { temp, .. } => vec![*temp],
            OpKind::Arith { lhs, rhs, .. } => vec![*lhs, *rhs],
            OpKind::Return { operands, .. } => operands.clone(),
        }
    }
}

/// An op in the graph arena.
#[derive(Debug, Clone, Serialize)]
pub struct Op {
    pub id: OpId,
    pub kind: OpKind,
    pub results: Vec<ValueId>,
    erased: bool,
}

impl Op {
    pub fn is_erased(&self) -> bool {
        self.erased
    }
}

// ── Graph ────────────────────────────────────────────────────────────────

/// One region of ops: the top-level graph, or an Apply body.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Graph {
    pub(crate) ops: Vec<Op>,
    pub(crate) values: Vec<Value>,
    pub(crate) args: Vec<ValueId>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// A body graph whose free variables have the given types.
    pub fn with_args(arg_types: Vec<ValueType>) -> Self {
        let mut g = Graph::new();
        for ty in arg_types {
            g.add_arg(ty);
        }
        g
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn args(&self) -> &[ValueId] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> ValueId {
        self.args[index]
    }

    pub fn op(&self, id: OpId) -> &Op {
        &self.ops[id.0 as usize]
    }

    pub(crate) fn op_mut(&mut self, id: OpId) -> &mut Op {
        &mut self.ops[id.0 as usize]
    }

    /// Live (non-erased) ops in creation order. Creation order is
    /// topological: operands are created before their consumers.
    pub fn ops(&self) -> impl DoubleEndedIterator<Item = &Op> {
        self.ops.iter().filter(|op| !op.erased)
    }

    pub fn live_op_count(&self) -> usize {
        self.ops().count()
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn value_ty(&self, id: ValueId) -> &ValueType {
        &self.values[id.0 as usize].ty
    }

    /// Live ops consuming `v`, in op order.
    pub fn value_uses(&self, v: ValueId) -> Vec<OpId> {
        self.ops()
            .filter(|op| op.kind.operands().contains(&v))
            .map(|op| op.id)
            .collect()
    }

    pub fn has_uses(&self, v: ValueId) -> bool {
        self.ops().any(|op| op.kind.operands().contains(&v))
    }

    /// The body terminator: the last live Return, if any.
    pub fn terminator(&self) -> Option<OpId> {
        let mut found = None;
        for op in self.ops() {
            if matches!(op.kind, OpKind::Return { .. }) {
                found = Some(op.id);
            }
        }
        found
    }

    // ── Construction ─────────────────────────────────────────────────

    fn new_value(&mut self, ty: ValueType, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value { ty, def });
        id
    }

    /// Append an op producing results of the given types.
    pub fn push_op(&mut self, kind: OpKind, result_types: Vec<ValueType>) -> OpId {
        let id = OpId(self.ops.len() as u32);
        let results = result_types
            .into_iter()
            .enumerate()
            .map(|(index, ty)| self.new_value(ty, ValueDef::Result { op: id, index }))
            .collect();
        self.ops.push(Op {
            id,
            kind,
            results,
            erased: false,
        });
        id
    }

    /// Add a graph argument: an external Field at the top level, or a body
    /// free variable.
    pub fn add_arg(&mut self, ty: ValueType) -> ValueId {
        let index = self.args.len();
        let id = self.new_value(ty, ValueDef::Arg { index });
        self.args.push(id);
        id
    }

    pub fn assert(&mut self, field: ValueId, bounds: BoundingBox) -> OpId {
        self.push_op(OpKind::Assert { field, bounds }, Vec::new())
    }

    /// Load a Field into a fresh Temp. The range is inferred later.
    pub fn load(&mut self, field: ValueId) -> ValueId {
        self.load_op(field, None)
    }

    /// Load a Field over a user-declared range.
    pub fn load_with_bounds(&mut self, field: ValueId, bounds: BoundingBox) -> ValueId {
        self.load_op(field, Some(bounds))
    }

    fn load_op(&mut self, field: ValueId, bounds: Option<BoundingBox>) -> ValueId {
        // Mirror the field's element type, rank, and layout; a non-grid
        // operand is a structural defect the verifier reports.
        let result = match self.value_ty(field) {
            ValueType::Grid(t) => ValueType::Grid(t.to_temp()),
            _ => ValueType::Grid(GridType::temp(ElemType::F64, 0)),
        };
        let op = self.push_op(OpKind::Load { field, bounds }, vec![result]);
        self.ops[op.0 as usize].results[0]
    }

    pub fn store(&mut self, value: ValueId, field: ValueId, bounds: BoundingBox) -> OpId {
        self.push_op(OpKind::Store { value, field, bounds }, Vec::new())
    }

    /// Create an Apply with `result_elems.len()` Temp results of the given
    /// iteration rank. The body's arguments bind to `operands` in order.
    pub fn apply(
        &mut self,
        operands: Vec<ValueId>,
        body: Graph,
        result_elems: &[ElemType],
        rank: usize,
    ) -> Vec<ValueId> {
        self.apply_op(operands, body, result_elems, rank, None)
    }

    /// Create an Apply with a user-declared iteration box.
    pub fn apply_with_bounds(
        &mut self,
        operands: Vec<ValueId>,
        body: Graph,
        result_elems: &[ElemType],
        bounds: BoundingBox,
    ) -> Vec<ValueId> {
        let rank = bounds.rank();
        self.apply_op(operands, body, result_elems, rank, Some(bounds))
    }

    fn apply_op(
        &mut self,
        operands: Vec<ValueId>,
        body: Graph,
        result_elems: &[ElemType],
        rank: usize,
        bounds: Option<BoundingBox>,
    ) -> Vec<ValueId> {
        let operand_bounds = vec![None; operands.len()];
        let result_types = result_elems
            .iter()
            .map(|e| ValueType::Grid(GridType::temp(*e, rank)))
            .collect();
        let op = self.push_op(
            OpKind::Apply(ApplyOp {
                operands,
                body,
                bounds,
                operand_bounds,
            }),
            result_types,
        );
        self.ops[op.0 as usize].results.clone()
    }

    // ── Body construction ────────────────────────────────────────────

    pub fn index(&mut self, offset: Offset) -> ValueId {
        let op = self.push_op(OpKind::Index { offset }, vec![ValueType::Index]);
        self.ops[op.0 as usize].results[0]
    }

    pub fn access(&mut self, temp: ValueId, offset: Offset) -> ValueId {
        let elem = self.value_ty(temp).elem().unwrap_or(ElemType::F64);
        let op = self.push_op(
            OpKind::Access { temp, offset },
            vec![ValueType::Scalar(elem)],
        );
        self.ops[op.0 as usize].results[0]
    }

    pub fn constant(&mut self, value: f64, ty: ElemType) -> ValueId {
        let op = self.push_op(OpKind::Constant { value, ty }, vec![ValueType::Scalar(ty)]);
        self.ops[op.0 as usize].results[0]
    }

    pub fn arith(&mut self, op: ArithOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.value_ty(lhs).clone();
        let id = self.push_op(OpKind::Arith { op, lhs, rhs }, vec![ty]);
        self.ops[id.0 as usize].results[0]
    }

    pub fn ret(&mut self, operands: Vec<ValueId>) -> OpId {
        self.push_op(
            OpKind::Return {
                operands,
                unroll: None,
            },
            Vec::new(),
        )
    }

    // ── Mutation (passes only) ───────────────────────────────────────

    /// Tombstone an op. Ids stay stable; iteration skips it.
    pub(crate) fn erase_op(&mut self, id: OpId) {
        self.ops[id.0 as usize].erased = true;
    }

    /// Remove operand `index` from an Apply together with the matching body
    /// argument, remapping the remaining argument indices.
    pub(crate) fn remove_apply_operand(&mut self, apply: OpId, index: usize) {
        if let OpKind::Apply(ap) = &mut self.ops[apply.0 as usize].kind {
            ap.operands.remove(index);
            if index < ap.operand_bounds.len() {
                ap.operand_bounds.remove(index);
            }
            if index < ap.body.args.len() {
                ap.body.args.remove(index);
                for v in &mut ap.body.values {
                    if let ValueDef::Arg { index: i } = &mut v.def {
                        if *i > index {
                            *i -= 1;
                        }
                    }
                }
            }
        }
    }

    /// Canonical textual dump. Deterministic; used for fingerprinting.
    pub fn dump(&self) -> String {
        format!("{self}")
    }
}

// ── Display ──────────────────────────────────────────────────────────────

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_region(f, self, "graph", 0)
    }
}

fn fmt_region(f: &mut fmt::Formatter<'_>, g: &Graph, label: &str, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    write!(f, "{pad}{label}(")?;
    for (i, arg) in g.args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}: {}", g.value_ty(*arg))?;
    }
    writeln!(f, ") {{")?;
    for op in g.ops() {
        fmt_op(f, op, depth + 1)?;
    }
    writeln!(f, "{pad}}}")
}

fn fmt_op(f: &mut fmt::Formatter<'_>, op: &Op, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    write!(f, "{pad}")?;
    if !op.results.is_empty() {
        for (i, r) in op.results.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{r}")?;
        }
        write!(f, " = ")?;
    }
    match &op.kind {
        OpKind::Assert { field, bounds } => writeln!(f, "assert {field} {bounds}"),
        OpKind::Load { field, bounds } => {
            write!(f, "load {field}")?;
            if let Some(b) = bounds {
                write!(f, " {b}")?;
            }
            writeln!(f)
        }
        OpKind::Store { value, field, bounds } => {
            writeln!(f, "store {value} to {field} {bounds}")
        }
        OpKind::Apply(ap) => {
            write!(f, "apply(")?;
            for (i, operand) in ap.operands.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{operand}")?;
            }
            write!(f, ")")?;
            if let Some(b) = &ap.bounds {
                write!(f, " {b}")?;
            }
            writeln!(f, " {{")?;
            fmt_region(f, &ap.body, "body", depth + 1)?;
            writeln!(f, "{pad}}}")
        }
        OpKind::Index { offset } => writeln!(f, "index {offset}"),
        OpKind::Access { temp, offset } => writeln!(f, "access {temp} {offset}"),
        OpKind::Constant { value, ty } => writeln!(f, "constant {value} : {ty}"),
        OpKind::Arith { op: kind, lhs, rhs } => writeln!(f, "{kind} {lhs}, {rhs}"),
        OpKind::Return { operands, unroll } => {
            write!(f, "return")?;
            for (i, operand) in operands.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, " {operand}")?;
            }
            if let Some(u) = unroll {
                write!(f, " (unroll {} along {})", u.factor, u.dim)?;
            }
            writeln!(f)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
