//! Structured diagnostics emitted while building and querying confidence regions.
//!
//! Builders take a [`DiagnosticSink`] instead of writing to process-wide state.
//! The default [`LogSink`] forwards everything to the `log` facade, so binaries
//! that initialise `env_logger` see the same messages a terminal user would.

use std::fmt;
use std::sync::{Arc, Mutex};

/// A condition worth reporting that does not stop the computation.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A confidence level below 1%, most likely a fraction passed where a percentage was expected.
    SuspiciousConfidenceLevel { level: f64 },
    /// One objective evaluation of the non-gauge projection search.
    OptimizerProgress { evaluation: usize, objective: f64 },
    /// The projection search has stopped; `converged` is false when a cap was hit.
    OptimizerFinished {
        evaluations: usize,
        best_objective: f64,
        converged: bool,
    },
}

impl Diagnostic {
    pub fn level(&self) -> log::Level {
        match self {
            Diagnostic::SuspiciousConfidenceLevel { .. } => log::Level::Warn,
            Diagnostic::OptimizerProgress { .. } => log::Level::Debug,
            Diagnostic::OptimizerFinished { .. } => log::Level::Info,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SuspiciousConfidenceLevel { level } => write!(
                f,
                "You've specified a {level}% confidence interval, which is usually small. \
                 Be sure to specify this number as a percentage in (0,100) and not a fraction in (0,1)."
            ),
            Diagnostic::OptimizerProgress {
                evaluation,
                objective,
            } => write!(
                f,
                "Projection search evaluation {evaluation}: sqrt(sum(gateCIs^2)) = {objective:.8e}"
            ),
            Diagnostic::OptimizerFinished {
                evaluations,
                best_objective,
                converged,
            } => write!(
                f,
                "Projection search finished after {evaluations} evaluations (converged: {converged}). \
                 The resulting min sqrt(sum(gateCIs^2)): {best_objective:.6e}"
            ),
        }
    }
}

/// Receiver for [`Diagnostic`]s. Implementations must be shareable across threads.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics to the `log` facade at the level given by [`Diagnostic::level`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&self, diagnostic: Diagnostic) {
        log::log!(diagnostic.level(), "{diagnostic}");
    }
}

/// Keeps every diagnostic in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        match self.diagnostics.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        match self.diagnostics.lock() {
            Ok(mut guard) => guard.push(diagnostic),
            Err(poisoned) => poisoned.into_inner().push(diagnostic),
        }
    }
}

impl<T: DiagnosticSink + ?Sized> DiagnosticSink for Arc<T> {
    fn emit(&self, diagnostic: Diagnostic) {
        (**self).emit(diagnostic);
    }
}

/// The sink used when a builder is not given one.
pub fn default_sink() -> Arc<dyn DiagnosticSink> {
    Arc::new(LogSink)
}
