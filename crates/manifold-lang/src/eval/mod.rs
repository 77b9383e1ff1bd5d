//! Evaluation: scopes, the evaluation context, the statement/expression
//! evaluator, operators, functions, subscripts, and collectors.

pub mod access;
pub mod collector;
pub mod context;
pub mod evaluator;
pub mod frame;
pub mod functions;
pub mod operators;
pub mod scope;

pub use context::{EvaluationContext, MAX_STACK_DEPTH};
pub use evaluator::{finalize, Evaluator};
pub use frame::StackFrame;
pub use scope::{Scope, ScopeRef};
