//! Pure, non-suspending evaluation of the read path's hot loop: rendering
//! reference values to concrete JSON (`reference`) and turning
//! `(value, overrides, context)` into a final value (`evaluator`).
//!
//! Nothing in this crate performs I/O. The reference resolver depends on a
//! caller-supplied [`ConfigValueResolver`] rather than the replica store
//! directly, so it stays testable without a running replica.

pub mod evaluator;
pub mod reference;

pub use evaluator::{evaluate, EvalResult, TraceEntry};
pub use reference::{render_overrides, ConfigValueResolver};
