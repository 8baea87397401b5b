// canonicalize.rs — Fixed-point local rewrites
//
// A worklist driver applying a small set of independent, simplifying
// rewrite rules until none fires:
//
//   dead load         a Load whose Temp has no consumers is erased
//   load/assert merge a Load box covered by its Field's single Assert is
//                     widened to the asserted box
//   dead apply        an Apply none of whose results are consumed is erased
//   dead operand      an Apply operand whose body argument is never accessed
//                     is dropped together with the argument
//   redundant assert  of two Asserts pinning one Field, the looser
//                     (covering) one is erased; of equal boxes the later
//
// Every rule either removes something or moves a load box to a fixed target
// it can reach once, so the rewrite count is bounded by graph size and the
// fixed point is reached without a convergence proof per rule combination.
// A step cap guards against a rule regression anyway.
//
// Preconditions: the graph passed structural verification.
// Postconditions: no rule fires on the result; op ids of surviving ops are
//                 unchanged.
// Failure modes: none.
// Side effects: erases ops and drops apply operands in place.

use std::collections::{HashSet, VecDeque};

use crate::graph::{Graph, OpId, OpKind, ValueDef, ValueId};

// ── Result ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct CanonicalizeResult {
    /// Number of rule applications performed.
    pub rewrites: usize,
}

impl CanonicalizeResult {
    pub fn changed(&self) -> bool {
        self.rewrites > 0
    }
}

// ── Driver ───────────────────────────────────────────────────────────────

/// Rewrite `graph` to its canonical form.
pub fn canonicalize(graph: &mut Graph) -> CanonicalizeResult {
    let mut queue: VecDeque<OpId> = graph.ops().map(|op| op.id).collect();
    let mut queued: HashSet<OpId> = queue.iter().copied().collect();
    let mut rewrites = 0;

    let cap = graph.live_op_count() * 16 + 64;
    let mut steps = 0;

    while let Some(id) = queue.pop_front() {
        queued.remove(&id);
        steps += 1;
        if steps > cap {
            break;
        }
        if graph.op(id).is_erased() {
            continue;
        }
        if let Some(touched) = try_rewrite(graph, id) {
            rewrites += 1;
            for t in touched {
                if !graph.op(t).is_erased() && queued.insert(t) {
                    queue.push_back(t);
                }
            }
            // The op itself may admit further rewrites.
            if !graph.op(id).is_erased() && queued.insert(id) {
                queue.push_back(id);
            }
        }
    }

    CanonicalizeResult { rewrites }
}

fn producer(graph: &Graph, v: ValueId) -> Option<OpId> {
    match graph.value(v).def {
        ValueDef::Result { op, .. } => Some(op),
        ValueDef::Arg { .. } => None,
    }
}

/// Apply the first matching rule to `id`. Returns the ops whose own rules
/// may now fire, or `None` if nothing matched.
fn try_rewrite(graph: &mut Graph, id: OpId) -> Option<Vec<OpId>> {
    match &graph.op(id).kind {
        OpKind::Load { field, bounds } => {
            let field = *field;
            let declared = bounds.clone();

            // dead load
            if !graph.op(id).results.iter().any(|r| graph.has_uses(*r)) {
                graph.erase_op(id);
                return Some(Vec::new());
            }

            // load/assert merge: with exactly one governing assert whose box
            // covers the load range, the load takes the full asserted range.
            let declared = declared?;
            let mut asserts: Vec<_> = graph
                .ops()
                .filter_map(|op| match &op.kind {
                    OpKind::Assert { field: f, bounds: b } if *f == field => Some(b.clone()),
                    _ => None,
                })
                .collect();
            if asserts.len() != 1 {
                return None;
            }
            let assert_box = asserts.remove(0);
            if assert_box == declared || !assert_box.covers(&declared) {
                return None;
            }
            if let OpKind::Load { bounds, .. } = &mut graph.op_mut(id).kind {
                *bounds = Some(assert_box);
            }
            Some(Vec::new())
        }

        OpKind::Apply(ap) => {
            let operands = ap.operands.clone();

            // dead apply
            if !graph.op(id).results.iter().any(|r| graph.has_uses(*r)) {
                graph.erase_op(id);
                let touched = operands.iter().filter_map(|v| producer(graph, *v)).collect();
                return Some(touched);
            }

            // dead operand
            let OpKind::Apply(ap) = &graph.op(id).kind else { return None };
            let dead = ap
                .body
                .args()
                .iter()
                .position(|arg| !ap.body.has_uses(*arg))?;
            let operand = operands[dead];
            graph.remove_apply_operand(id, dead);
            Some(producer(graph, operand).into_iter().collect())
        }

        OpKind::Assert { field, bounds } => {
            let field = *field;
            let bounds = bounds.clone();
            // This assert is redundant if a stricter one pins the same field.
            let redundant = graph.ops().any(|other| {
                other.id != id
                    && match &other.kind {
                        OpKind::Assert { field: f, bounds: b } => {
                            *f == field
                                && bounds.covers(b)
                                // Of two equal boxes the earlier one wins.
                                && (other.id < id || !b.covers(&bounds))
                        }
                        _ => false,
                    }
            });
            if !redundant {
                return None;
            }
            graph.erase_op(id);
            Some(Vec::new())
        }

        _ => None,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
