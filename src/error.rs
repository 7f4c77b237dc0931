use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A recipe-body error that can flow through the graph and be compared for
/// equality "by concrete type and value", the way the source's
/// `ExceptionResult` compares `type(exc) == type(other.exc) and exc.args ==
/// other.exc.args` without either side knowing the other's concrete type.
///
/// There's no `thiserror`/`anyhow` dependency on this crate's own error
/// types (see DESIGN.md); this trait plus the blanket impl below is the
/// whole mechanism.
pub trait RecipeFailure: std::error::Error + Send + Sync + 'static {
    fn eq_failure(&self, other: &dyn RecipeFailure) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T> RecipeFailure for T
where
    T: std::error::Error + Send + Sync + PartialEq + 'static,
{
    fn eq_failure(&self, other: &dyn RecipeFailure) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|o| o == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// What a node's result slot holds after its recipe body fails: the
/// original error, kept around so a subsequent read observes the failure
/// instead of "not available".
#[derive(Clone)]
pub struct ExceptionResult(pub Arc<dyn RecipeFailure>);

impl ExceptionResult {
    pub fn new<E: RecipeFailure>(err: E) -> Self {
        ExceptionResult(Arc::new(err))
    }
}

impl PartialEq for ExceptionResult {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_failure(other.0.as_ref())
    }
}

impl fmt::Debug for ExceptionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExceptionResult({})", self.0)
    }
}

impl fmt::Display for ExceptionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The crate-wide error type. Each variant corresponds to one of the four
/// error kinds this engine distinguishes: construction, wiring, protocol,
/// and recipe-body failures.
#[derive(Debug, Clone)]
pub enum Error {
    /// Synchronous misuse of the construction API: wrong arity, an
    /// out-of-range sub-result projection, and the like.
    Construction(String),
    /// Raised from `run` before scheduling starts: an unavailable input
    /// that isn't a Node, or a malformed context binding.
    Wiring(String),
    /// A violation of the step protocol: double-set result, zero or
    /// multiple terminal yields, unexpectedly-blocked nodes at the end of
    /// a pool run.
    Protocol(String),
    /// A recipe body returned an error. Carries the same `ExceptionResult`
    /// stashed in the failing node's result slot.
    Recipe(ExceptionResult),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Construction(msg) => write!(f, "{msg}"),
            Error::Wiring(msg) => write!(f, "{msg}"),
            Error::Protocol(msg) => write!(f, "{msg}"),
            Error::Recipe(exc) => write!(f, "{exc}"),
        }
    }
}

impl std::error::Error for Error {}
