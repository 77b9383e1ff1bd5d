//! The remote extension channel contract.
//!
//! Environments may be constructed with a channel to a sister runtime that
//! hosts additional functions and resource types. Only the contract lives
//! here: a unary describe call and a bidirectional invoke stream modeled
//! as an explicit state machine. No transport is implemented in this
//! crate; embedders provide one.

use crate::error::BacktraceFrame;
use crate::registry::ResourceTypeDefinition;
use crate::value::Value;

/// What a describe call is asking about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeKind {
    ResourceType,
    Function,
}

/// A remotely-described function.
#[derive(Debug, Clone)]
pub struct FunctionDescriptor {
    pub name: String,
    /// Defining file on the remote side, for conflict diagnostics.
    pub file: String,
    pub line: usize,
}

/// Result of a describe call.
#[derive(Debug, Clone)]
pub enum Described {
    ResourceType(ResourceTypeDefinition),
    Function(FunctionDescriptor),
    NotFound,
}

/// A serialized evaluation failure from the remote side.
#[derive(Debug, Clone)]
pub struct RemoteException {
    pub message: String,
    pub backtrace: Vec<BacktraceFrame>,
}

/// One remote invocation request.
#[derive(Debug, Clone)]
pub struct Call {
    pub environment: String,
    pub name: String,
    pub arguments: Vec<Value>,
}

/// What the remote side sends back on the invoke stream.
#[derive(Debug)]
pub enum Reply {
    /// The call completed.
    Result(Value),
    /// The call failed remotely.
    Exception(RemoteException),
    /// The remote side wants the local evaluator to run a block with the
    /// given arguments; answer through the continuation.
    Yield {
        arguments: Vec<Value>,
        continuation: Box<dyn Continuation>,
    },
}

/// The local answer to a yield.
#[derive(Debug, Clone)]
pub enum Continue {
    Result(Value),
    Exception(RemoteException),
}

/// Continues an invoke stream after a yield.
pub trait Continuation: Send {
    fn resume(self: Box<Self>, answer: Continue) -> Result<Reply, ChannelError>;
}

impl std::fmt::Debug for dyn Continuation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Continuation").finish_non_exhaustive()
    }
}

/// Transport-level channel failure; surfaced as an evaluation error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("extension channel error: {message}")]
pub struct ChannelError {
    pub message: String,
}

/// The extension channel an environment may be constructed with.
pub trait ExtensionChannel: Send + Sync {
    /// Describe a remote function or resource type.
    fn describe(
        &self,
        kind: DescribeKind,
        environment: &str,
        name: &str,
    ) -> Result<Described, ChannelError>;

    /// Start an invocation; the caller drives the reply state machine.
    fn invoke(&self, call: Call) -> Result<Reply, ChannelError>;
}
