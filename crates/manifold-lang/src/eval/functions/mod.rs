//! Function dispatch.
//!
//! Calls resolve in order: built-in functions, language-defined functions
//! (lazily imported through the environment), then the remote extension
//! channel. Built-ins carry a table of `(Callable signature, body)` pairs;
//! the first signature matching the call's arguments and block wins.

mod builtins;

use super::evaluator::Evaluator;
use super::scope::ScopeRef;
use crate::ast::{AstContext, Lambda, SyntaxTree};
use crate::environment::FoundFunction;
use crate::error::EvaluationError;
use crate::extension::{Call, Continue, Reply};
use crate::types::{infer, RecursionGuard, Type};
use crate::value::{SharedValue, Value};
use std::rc::Rc;
use std::sync::Arc;

/// A lambda captured at its call site.
#[derive(Debug, Clone)]
pub struct LambdaClosure {
    pub lambda: Lambda,
    /// The scope the lambda closes over.
    pub scope: ScopeRef,
    /// Snapshot of the active match scope.
    pub matches: Option<Rc<Vec<SharedValue>>>,
    pub tree: Arc<SyntaxTree>,
}

/// One function call being dispatched.
pub struct CallContext {
    pub name: String,
    pub name_context: AstContext,
    pub call_context: AstContext,
    pub arguments: Vec<Value>,
    pub argument_contexts: Vec<AstContext>,
    pub lambda: Option<LambdaClosure>,
}

impl CallContext {
    /// The context of an argument, falling back to the call itself.
    pub fn argument_context(&self, index: usize) -> AstContext {
        self.argument_contexts
            .get(index)
            .cloned()
            .unwrap_or_else(|| self.call_context.clone())
    }
}

/// The body of a built-in function.
pub type BuiltinBody =
    fn(&mut Evaluator<'_, '_>, &mut CallContext) -> Result<Value, EvaluationError>;

/// A dispatchable signature.
pub struct Signature {
    pub callable: Type,
    pub body: BuiltinBody,
}

/// A built-in function's dispatch table.
pub struct Descriptor {
    pub name: &'static str,
    pub signatures: Vec<Signature>,
}

impl Descriptor {
    /// Dispatch to the first matching signature.
    pub fn dispatch(
        &self,
        evaluator: &mut Evaluator<'_, '_>,
        call: &mut CallContext,
    ) -> Result<Value, EvaluationError> {
        for signature in &self.signatures {
            if signature_matches(&signature.callable, call) {
                return (signature.body)(evaluator, call);
            }
        }
        let given: Vec<String> = call
            .arguments
            .iter()
            .map(|argument| infer(argument).to_string())
            .collect();
        Err(evaluator.context.raise(
            format!(
                "function '{}' cannot be called with arguments ({}).",
                call.name,
                given.join(", ")
            ),
            Some(call.call_context.clone()),
        ))
    }
}

fn signature_matches(callable: &Type, call: &CallContext) -> bool {
    let Type::Callable {
        types,
        min,
        max,
        block,
    } = callable
    else {
        return false;
    };
    let count = call.arguments.len();
    let min = min.unwrap_or(types.len());
    let max = max.unwrap_or(types.len());
    if count < min || count > max {
        return false;
    }
    if block.is_some() != call.lambda.is_some() {
        return false;
    }
    if types.is_empty() {
        return true;
    }
    let mut guard = RecursionGuard::new();
    call.arguments.iter().enumerate().all(|(i, argument)| {
        let t = &types[i.min(types.len() - 1)];
        t.is_instance(argument, &mut guard)
    })
}

/// Whether a name denotes a built-in function.
pub fn is_builtin(name: &str) -> bool {
    builtins::descriptor(name).is_some()
}

/// Dispatch a call: built-ins, language functions, remote functions.
pub fn dispatch(
    evaluator: &mut Evaluator<'_, '_>,
    mut call: CallContext,
) -> Result<Value, EvaluationError> {
    if let Some(descriptor) = builtins::descriptor(&call.name) {
        return descriptor.dispatch(evaluator, &mut call);
    }

    let environment = evaluator.context.environment.clone();
    let logger = evaluator.context.logger.clone();
    let name = crate::registry::normalize(&call.name);
    let found = environment
        .find_function(&logger, &name)
        .map_err(|e| {
            evaluator
                .context
                .raise(e.message, Some(call.name_context.clone()))
        })?;

    match found {
        Some(FoundFunction::Local(definition)) => {
            if call.lambda.is_some() {
                return Err(evaluator.context.raise(
                    format!("function '{}' does not accept a block.", call.name),
                    Some(call.call_context.clone()),
                ));
            }
            evaluator.call_language_function(&definition, call.arguments, &call.call_context)
        }
        Some(FoundFunction::Remote(_)) => invoke_remote(evaluator, &mut call),
        None => Err(evaluator.context.raise(
            format!("function '{}' was not found.", call.name),
            Some(call.name_context.clone()),
        )),
    }
}

/// Drive the remote invoke state machine, yielding to the local block when
/// the remote side asks for it.
fn invoke_remote(
    evaluator: &mut Evaluator<'_, '_>,
    call: &mut CallContext,
) -> Result<Value, EvaluationError> {
    let environment = evaluator.context.environment.clone();
    let Some(channel) = environment.channel().cloned() else {
        return Err(evaluator.context.raise(
            format!("function '{}' was not found.", call.name),
            Some(call.name_context.clone()),
        ));
    };

    let mut reply = channel
        .invoke(Call {
            environment: environment.name().to_string(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        })
        .map_err(|e| {
            evaluator
                .context
                .raise(e.to_string(), Some(call.call_context.clone()))
        })?;

    loop {
        match reply {
            Reply::Result(value) => return Ok(value),
            Reply::Exception(exception) => {
                let mut error = evaluator
                    .context
                    .raise(exception.message, Some(call.call_context.clone()));
                error.backtrace.extend(exception.backtrace);
                return Err(error);
            }
            Reply::Yield {
                arguments,
                continuation,
            } => {
                let answer = match &call.lambda {
                    Some(closure) => {
                        let closure = closure.clone();
                        match evaluator.yield_to(&closure, arguments, &call.call_context) {
                            Ok(value) => Continue::Result(value),
                            Err(error) => {
                                // Tell the remote side, then surface the
                                // local failure.
                                let _ = continuation.resume(Continue::Exception(
                                    crate::extension::RemoteException {
                                        message: error.message.clone(),
                                        backtrace: error.backtrace.clone(),
                                    },
                                ));
                                return Err(error);
                            }
                        }
                    }
                    None => {
                        return Err(evaluator.context.raise(
                            format!(
                                "function '{}' requires a block but none was given.",
                                call.name
                            ),
                            Some(call.call_context.clone()),
                        ))
                    }
                };
                reply = continuation.resume(answer).map_err(|e| {
                    evaluator
                        .context
                        .raise(e.to_string(), Some(call.call_context.clone()))
                })?;
            }
        }
    }
}
