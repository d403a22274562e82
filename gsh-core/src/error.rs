//! Error taxonomy for the evaluator.
//!
//! Three distinct channels, matching the script language's own distinctions:
//!
//! - [`ControlFlowError`]: an internal unwinding signal (break/continue/return),
//!   never exposed to `try`/`catch`.
//! - [`RuntimeError`]: a stack-trace-carrying error raised by the evaluator itself
//!   (type mismatch, division by zero, undefined name, arity mismatch, ...).
//! - [`ThrownError`]: raised by a script's own `throw` statement, carrying an
//!   arbitrary [`Value`](crate::value::Value).
//!
//! Calls into collaborators (the provider registry, the MCP/ACP managers)
//! surface their own failures as plain [`RuntimeError`]s (the MCP transport
//! has its own internal [`crate::mcp::McpSessionError`], converted at the
//! manager boundary); every collaborator converges on [`RuntimeError`] before
//! it reaches the evaluator, so `try`/`catch` sees one uniform shape.

use std::fmt;

use crate::value::Value;

/// One frame of a rendered stack trace.
///
/// Pushed by the evaluator each time a [`RuntimeError`] unwinds through a tool
/// call; `<script>` is used for the top-level frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub location: String,
}

impl StackFrame {
    pub fn new(function: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            location: location.into(),
        }
    }

    pub fn top_level(location: impl Into<String>) -> Self {
        Self::new("<script>", location)
    }
}

/// A runtime error: a message plus an ordered stack trace.
///
/// Frames are pushed deepest-first as the error propagates outward through
/// tool calls (`push_frame` is called once per tool call boundary crossed).
/// [`RuntimeError::render`] prints deepest frame first, matching §4.3 / §7 of
/// the specification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    frames: Vec<StackFrame>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            frames: Vec::new(),
        }
    }

    /// Pushes a frame as the error unwinds through one more tool call.
    pub fn push_frame(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Renders `message`, a blank line, `Stack trace:`, then one `  at NAME
    /// (LOC)` line per frame, deepest first (the order frames are stored in).
    pub fn render(&self) -> String {
        let mut out = format!("{}\n\nStack trace:", self.message);
        for frame in &self.frames {
            out.push_str(&format!("\n  at {} ({})", frame.function, frame.location));
        }
        out
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl std::error::Error for RuntimeError {}

/// Raised by a script `throw` statement; carries the thrown value verbatim.
///
/// Caught by `try`/`catch` exactly like a [`RuntimeError`]; the catch
/// parameter is bound to `.value` rather than a synthesized `{message: ...}`
/// object (§4.3).
#[derive(Clone, Debug, PartialEq)]
pub struct ThrownError {
    pub value: Value,
}

impl ThrownError {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

impl fmt::Display for ThrownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value.to_display_string())
    }
}

impl std::error::Error for ThrownError {}

/// One of the two user-visible error channels that `try`/`catch` can observe.
///
/// Everything that reaches a catch block (a [`RuntimeError`] from the
/// evaluator, or a collaborator error converted to one) is represented as
/// `ScriptError::Runtime`, or `ScriptError::Thrown` for a script `throw`.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptError {
    Runtime(RuntimeError),
    Thrown(ThrownError),
}

impl ScriptError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(RuntimeError::new(message))
    }

    /// The object bound to a `catch (e)` parameter: `.value` for a thrown
    /// error, `{message: <stringified error>}` for a runtime error (§4.3).
    pub fn to_catch_value(&self) -> Value {
        match self {
            ScriptError::Runtime(e) => {
                let mut obj = crate::value::ObjectMap::new();
                obj.insert(
                    "message".to_string(),
                    crate::value::Property::new(Value::String(e.message.clone())),
                );
                Value::object(obj)
            }
            ScriptError::Thrown(e) => e.value.clone(),
        }
    }

    pub fn push_frame(self, frame: StackFrame) -> Self {
        match self {
            ScriptError::Runtime(e) => ScriptError::Runtime(e.push_frame(frame)),
            other => other,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ScriptError::Runtime(e) => e.message.clone(),
            ScriptError::Thrown(e) => e.value.to_display_string(),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Runtime(e) => write!(f, "{}", e),
            ScriptError::Thrown(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ScriptError {}

impl From<RuntimeError> for ScriptError {
    fn from(e: RuntimeError) -> Self {
        ScriptError::Runtime(e)
    }
}

impl From<ThrownError> for ScriptError {
    fn from(e: ThrownError) -> Self {
        ScriptError::Thrown(e)
    }
}

/// An internal unwinding signal for break/continue/return.
///
/// Never user-visible and never caught by `try`/`catch` (§4.3, property 5).
/// If one escapes its structural boundary (a `break` outside any loop, a
/// `return` outside any tool call) [`ControlFlow::escaped`] converts it into
/// a [`RuntimeError`] describing the misuse.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlFlow {
    Break,
    Continue,
    Return(Value),
}

impl ControlFlow {
    pub fn escaped(&self) -> RuntimeError {
        let what = match self {
            ControlFlow::Break => "break",
            ControlFlow::Continue => "continue",
            ControlFlow::Return(_) => "return",
        };
        RuntimeError::new(format!("{} outside of loop", what))
    }
}

/// Everything a single evaluation step can fail with: a script-visible error
/// (catchable) or a control-flow signal (not catchable, intercepted
/// structurally by loops/tool calls).
#[derive(Clone, Debug, PartialEq)]
pub enum EvalError {
    Script(ScriptError),
    ControlFlow(ControlFlow),
}

impl EvalError {
    pub fn runtime(message: impl Into<String>) -> Self {
        EvalError::Script(ScriptError::runtime(message))
    }

    /// `try`/`catch` only ever intercepts `Script` errors; a `ControlFlow`
    /// passes straight through unchanged.
    pub fn as_catchable(self) -> Result<ScriptError, ControlFlow> {
        match self {
            EvalError::Script(e) => Ok(e),
            EvalError::ControlFlow(c) => Err(c),
        }
    }

    pub fn push_frame(self, frame: StackFrame) -> Self {
        match self {
            EvalError::Script(e) => EvalError::Script(e.push_frame(frame)),
            other => other,
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Script(e) => write!(f, "{}", e),
            EvalError::ControlFlow(c) => write!(f, "{}", c.escaped()),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<RuntimeError> for EvalError {
    fn from(e: RuntimeError) -> Self {
        EvalError::Script(ScriptError::Runtime(e))
    }
}

impl From<ThrownError> for EvalError {
    fn from(e: ThrownError) -> Self {
        EvalError::Script(ScriptError::Thrown(e))
    }
}

impl From<ScriptError> for EvalError {
    fn from(e: ScriptError) -> Self {
        EvalError::Script(e)
    }
}

pub type EvalResult<T> = Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_orders_frames_deepest_first() {
        let err = RuntimeError::new("array index out of bounds")
            .push_frame(StackFrame::new("level3", "level3:1"))
            .push_frame(StackFrame::new("level2", "level2:1"))
            .push_frame(StackFrame::new("level1", "level1:1"));
        let rendered = err.render();
        let level3_pos = rendered.find("level3").unwrap();
        let level2_pos = rendered.find("level2").unwrap();
        let level1_pos = rendered.find("level1").unwrap();
        assert!(level3_pos < level2_pos);
        assert!(level2_pos < level1_pos);
    }

    #[test]
    fn control_flow_escape_messages() {
        assert!(ControlFlow::Break.escaped().message.contains("break"));
        assert!(ControlFlow::Continue
            .escaped()
            .message
            .contains("continue"));
        assert!(ControlFlow::Return(Value::Null)
            .escaped()
            .message
            .contains("return"));
    }

    #[test]
    fn thrown_error_catch_value_is_the_raw_value() {
        let thrown = ScriptError::Thrown(ThrownError::new(Value::Number(42.0)));
        assert_eq!(thrown.to_catch_value(), Value::Number(42.0));
    }
}
