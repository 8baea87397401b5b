// stir — Stencil IR
//
// Library root. Graph construction, shape inference, verification, and the
// transform passes live in the modules below.

pub mod bounds;
pub mod canonicalize;
pub mod diag;
pub mod graph;
pub mod pass;
pub mod pipeline;
pub mod shape_infer;
pub mod types;
pub mod unroll;
pub mod verify;
