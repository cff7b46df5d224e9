//! The Portico template expression language.
//!
//! HTTP-backed tools describe their URL path, headers, request body and
//! response shaping as expressions over a JSON context:
//!
//! ```text
//! config.baseUrl + "/users/" + toString(args.id)
//! response.body | pick("id", "name") | toJSON
//! args.tags | join(",")
//! ```
//!
//! Evaluation is pure: the same `{args, config, request}` context always
//! yields the same value (only `response.*` varies per HTTP exchange), and
//! a failed evaluation never has side effects. Missing identifiers and
//! members evaluate to `null` rather than erroring, so templates degrade
//! gracefully when optional context is absent.

mod ast;
mod eval;
mod functions;
mod lexer;
mod parser;
mod value;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use eval::evaluate;
pub use parser::parse;
pub use value::{member, to_display_string, truthy, type_name};

/// The context and result type of every evaluation.
pub type Value = serde_json::Value;

/// An error from any stage of template processing.
///
/// All failure modes (lexing, parsing, type errors, division by zero,
/// unknown functions) collapse into this one type; callers surface it as a
/// `dsl_error` on the owning tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DslError {
    pub message: String,
    /// Byte offset into the source expression, when known.
    pub position: Option<usize>,
}

impl DslError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
        }
    }

    pub(crate) fn at(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position: Some(position),
        }
    }
}

impl std::fmt::Display for DslError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.position {
            Some(pos) => write!(f, "{} (at offset {pos})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DslError {}

/// Parse and evaluate `source` against `context` in one step.
///
/// # Errors
///
/// Returns a [`DslError`] for any lex, parse or evaluation failure.
pub fn eval_str(source: &str, context: &Value) -> Result<Value, DslError> {
    let expr = parse(source)?;
    evaluate(&expr, context)
}

/// Evaluate `source` and render the result as a string.
///
/// Rendering follows `toString` semantics: `null` becomes the empty string,
/// scalars print bare, and arrays/objects print as JSON.
///
/// # Errors
///
/// Returns a [`DslError`] for any lex, parse or evaluation failure.
pub fn render(source: &str, context: &Value) -> Result<String, DslError> {
    Ok(to_display_string(&eval_str(source, context)?))
}
