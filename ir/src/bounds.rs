// bounds.rs — Bounding-box and offset algebra
//
// The two capability contracts of the IR live on this data: ops that expose a
// read/write axis-aligned integer bounding box carry a `BoundingBox`, and ops
// that probe a displaced position carry an `Offset`. All arithmetic is exact
// signed 64-bit; rank mismatches surface as `None` and are turned into hard
// diagnostics by the caller.
//
// Boxes are inclusive-exclusive: `[lb, ub)` per dimension, `lb[i] <= ub[i]`.

use std::fmt;

use serde::Serialize;

// ── Offset ───────────────────────────────────────────────────────────────

/// Constant integer displacement relative to the enclosing Apply's current
/// iteration index. One component per dimension of the referenced value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Offset(pub Vec<i64>);

impl Offset {
    pub fn zero(rank: usize) -> Self {
        Offset(vec![0; rank])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "]")
    }
}

// ── BoundingBox ──────────────────────────────────────────────────────────

/// Inclusive-exclusive index range an operation reads or writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    lb: Vec<i64>,
    ub: Vec<i64>,
}

impl BoundingBox {
    /// Build a box. Returns `None` if the vectors disagree in rank or any
    /// lower bound exceeds its upper bound.
    pub fn new(lb: Vec<i64>, ub: Vec<i64>) -> Option<Self> {
        if lb.len() != ub.len() || lb.iter().zip(&ub).any(|(l, u)| l > u) {
            return None;
        }
        Some(BoundingBox { lb, ub })
    }

    pub fn rank(&self) -> usize {
        self.lb.len()
    }

    pub fn lb(&self) -> &[i64] {
        &self.lb
    }

    pub fn ub(&self) -> &[i64] {
        &self.ub
    }

    /// Extent (number of covered indices) along one dimension.
    pub fn extent(&self, dim: usize) -> i64 {
        self.ub[dim] - self.lb[dim]
    }

    pub fn extents(&self) -> Vec<i64> {
        self.lb.iter().zip(&self.ub).map(|(l, u)| u - l).collect()
    }

    /// Smallest box containing both (component-wise min of lowers, max of
    /// uppers). `None` on rank mismatch.
    pub fn union(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if self.rank() != other.rank() {
            return None;
        }
        let lb = self.lb.iter().zip(&other.lb).map(|(a, b)| (*a).min(*b)).collect();
        let ub = self.ub.iter().zip(&other.ub).map(|(a, b)| (*a).max(*b)).collect();
        Some(BoundingBox { lb, ub })
    }

    /// The box displaced by a constant offset. `None` on rank mismatch.
    pub fn translate(&self, offset: &Offset) -> Option<BoundingBox> {
        if self.rank() != offset.rank() {
            return None;
        }
        let lb = self.lb.iter().zip(&offset.0).map(|(a, o)| a + o).collect();
        let ub = self.ub.iter().zip(&offset.0).map(|(a, o)| a + o).collect();
        Some(BoundingBox { lb, ub })
    }

    /// True if `other` lies entirely inside this box (component-wise).
    /// Rank mismatch is not coverage.
    pub fn covers(&self, other: &BoundingBox) -> bool {
        self.rank() == other.rank()
            && self.lb.iter().zip(&other.lb).all(|(a, b)| a <= b)
            && self.ub.iter().zip(&other.ub).all(|(a, b)| a >= b)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmt_vec = |f: &mut fmt::Formatter<'_>, v: &[i64]| -> fmt::Result {
            write!(f, "[")?;
            for (i, c) in v.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{c}")?;
            }
            write!(f, "]")
        };
        fmt_vec(f, &self.lb)?;
        write!(f, " : ")?;
        fmt_vec(f, &self.ub)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
