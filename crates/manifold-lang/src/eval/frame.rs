//! Language-level call stack frames.

use super::scope::ScopeRef;
use crate::ast::AstContext;
use crate::error::BacktraceFrame;

/// One frame of the language call stack: what is executing, its scope,
/// and the AST context of its current expression.
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub name: String,
    pub scope: ScopeRef,
    /// Updated as evaluation progresses through the frame.
    pub context: Option<AstContext>,
}

impl StackFrame {
    pub fn new(name: impl Into<String>, scope: ScopeRef) -> Self {
        Self {
            name: name.into(),
            scope,
            context: None,
        }
    }

    /// The loggable form of this frame.
    pub fn to_backtrace_frame(&self) -> BacktraceFrame {
        BacktraceFrame {
            name: self.name.clone(),
            path: self
                .context
                .as_ref()
                .map(|context| context.tree.path().to_string()),
            line: self
                .context
                .as_ref()
                .map(|context| context.span.begin.line)
                .unwrap_or(0),
        }
    }
}
