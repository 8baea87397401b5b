// types.rs — Grid type model for stencil values
//
// Two value kinds flow through the operation graph: Field (persistent,
// externally backed storage) and Temp (transient, produced and consumed
// inside the graph). Both carry a rank, a scalar element type, per-dimension
// extents, and an allocation-layout tag.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Element type ─────────────────────────────────────────────────────────

/// Scalar element type of a grid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElemType {
    F32,
    F64,
    I32,
    I64,
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElemType::F32 => "f32",
            ElemType::F64 => "f64",
            ElemType::I32 => "i32",
            ElemType::I64 => "i64",
        };
        write!(f, "{s}")
    }
}

// ── Extents and layout ───────────────────────────────────────────────────

/// Per-dimension extent: concrete, or unspecified until an Assert pins it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Extent {
    Dynamic,
    Fixed(i64),
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extent::Dynamic => write!(f, "?"),
            Extent::Fixed(n) => write!(f, "{n}"),
        }
    }
}

/// Allocation-layout tag. Every Load/Store/Assert touching a Field must
/// agree on this tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Layout {
    #[default]
    RowMajor,
    ColumnMajor,
}

// ── Grid types ───────────────────────────────────────────────────────────

/// Whether a grid value is externally backed (Field) or graph-internal (Temp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GridKind {
    Field,
    Temp,
}

/// The type of a multi-dimensional grid value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridType {
    pub kind: GridKind,
    pub elem: ElemType,
    pub extents: Vec<Extent>,
    pub layout: Layout,
}

impl GridType {
    /// A Field with fully dynamic extents (the usual declaration form;
    /// extents are pinned later by exactly one Assert).
    pub fn field(elem: ElemType, rank: usize) -> Self {
        GridType {
            kind: GridKind::Field,
            elem,
            extents: vec![Extent::Dynamic; rank],
            layout: Layout::default(),
        }
    }

    /// A Temp with dynamic extents; its box is filled in by shape inference.
    pub fn temp(elem: ElemType, rank: usize) -> Self {
        GridType {
            kind: GridKind::Temp,
            elem,
            extents: vec![Extent::Dynamic; rank],
            layout: Layout::default(),
        }
    }

    /// The Temp type a Load of this grid produces: same element type, rank,
    /// and layout, extents dynamic until inference.
    pub fn to_temp(&self) -> GridType {
        GridType {
            kind: GridKind::Temp,
            elem: self.elem,
            extents: vec![Extent::Dynamic; self.rank()],
            layout: self.layout,
        }
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    pub fn is_field(&self) -> bool {
        self.kind == GridKind::Field
    }

    /// True if no extent has been pinned to a concrete value.
    pub fn is_fully_dynamic(&self) -> bool {
        self.extents.iter().all(|e| matches!(e, Extent::Dynamic))
    }
}

impl fmt::Display for GridType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            GridKind::Field => "field",
            GridKind::Temp => "temp",
        };
        write!(f, "{kind}<{}", self.elem)?;
        for e in &self.extents {
            write!(f, "x{e}")?;
        }
        write!(f, ">")
    }
}

// ── Value types ──────────────────────────────────────────────────────────

/// The type of any value flowing along a use edge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValueType {
    Grid(GridType),
    Scalar(ElemType),
    /// Result of an Index op: the iteration position along one axis.
    Index,
}

impl ValueType {
    pub fn rank(&self) -> Option<usize> {
        match self {
            ValueType::Grid(g) => Some(g.rank()),
            _ => None,
        }
    }

    pub fn elem(&self) -> Option<ElemType> {
        match self {
            ValueType::Grid(g) => Some(g.elem),
            ValueType::Scalar(e) => Some(*e),
            ValueType::Index => None,
        }
    }

    /// Structural compatibility for Apply signatures: grid values match on
    /// kind, element type, and rank (extents are pinned independently on
    /// either side of the body boundary), scalars on element type.
    pub fn compatible(&self, other: &ValueType) -> bool {
        match (self, other) {
            (ValueType::Grid(a), ValueType::Grid(b)) => {
                a.kind == b.kind && a.elem == b.elem && a.rank() == b.rank()
            }
            (ValueType::Scalar(a), ValueType::Scalar(b)) => a == b,
            (ValueType::Index, ValueType::Index) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Grid(g) => write!(f, "{g}"),
            ValueType::Scalar(e) => write!(f, "{e}"),
            ValueType::Index => write!(f, "index"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
