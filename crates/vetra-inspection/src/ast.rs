//! Campaign condition AST.
//!
//! The AST is immutable once a campaign is active and shared behind an
//! `Arc`. Every textual occurrence of a custom-function call carries the
//! [`InvocationId`] assigned at parse time; the id is stable for the
//! campaign's lifetime and globally unique across campaigns so functions can
//! key per-call-site state on it.

use std::collections::HashSet;

use vetra_core::SignalId;

/// Stable identity of one textual custom-function call site.
pub type InvocationId = u32;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation
    Not,
    /// Arithmetic negation
    Negate,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Subtract,
    /// `*`
    Multiply,
    /// `/`
    Divide,
    /// `%`
    Modulo,
    /// `<`
    Less,
    /// `<=`
    LessEq,
    /// `>`
    Greater,
    /// `>=`
    GreaterEq,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `&&`, short-circuit
    And,
    /// `||`, short-circuit
    Or,
}

impl BinaryOp {
    /// Returns `true` for the short-circuiting logical operators.
    #[must_use]
    pub fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

/// Rolling aggregate over a history window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Minimum numeric sample
    Min,
    /// Maximum numeric sample
    Max,
    /// Mean of numeric samples
    Avg,
    /// Sum of numeric samples
    Sum,
    /// Number of numeric samples
    Count,
}

/// Immutable condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Numeric literal
    Number(f64),
    /// String literal
    Text(String),
    /// Boolean literal
    Boolean(bool),
    /// Latest value of a signal
    Signal(SignalId),
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expression>,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand, evaluated first
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
    /// `condition ? if_true : if_false`
    Conditional {
        /// Branch selector
        condition: Box<Expression>,
        /// Taken when the selector is true
        if_true: Box<Expression>,
        /// Taken when the selector is false
        if_false: Box<Expression>,
    },
    /// Aggregate over the samples of the last `window_ms` milliseconds
    TimeWindow {
        /// Aggregate kind
        aggregate: Aggregate,
        /// Signal whose history is queried
        signal_id: SignalId,
        /// Window length in milliseconds
        window_ms: u64,
    },
    /// Aggregate over the last `samples` samples
    SampleWindow {
        /// Aggregate kind
        aggregate: Aggregate,
        /// Signal whose history is queried
        signal_id: SignalId,
        /// Number of most recent samples
        samples: usize,
    },
    /// Second-most-recent value of a signal
    Previous {
        /// Signal whose history is queried
        signal_id: SignalId,
    },
    /// Presence predicate: a sample arrived within the last `window_ms`
    HasReceivedSince {
        /// Signal whose history is queried
        signal_id: SignalId,
        /// Look-back in milliseconds
        window_ms: u64,
    },
    /// `custom_function('name', args…)`
    CustomFunction {
        /// Registered function name
        name: String,
        /// Stable call-site identity
        invocation_id: InvocationId,
        /// Argument expressions, evaluated left to right
        args: Vec<Expression>,
    },
}

impl Expression {
    /// Collects every signal id the expression reads.
    pub fn referenced_signals(&self, out: &mut HashSet<SignalId>) {
        match self {
            Self::Number(_) | Self::Text(_) | Self::Boolean(_) => {}
            Self::Signal(id) => {
                out.insert(*id);
            }
            Self::Unary { operand, .. } => operand.referenced_signals(out),
            Self::Binary { left, right, .. } => {
                left.referenced_signals(out);
                right.referenced_signals(out);
            }
            Self::Conditional {
                condition,
                if_true,
                if_false,
            } => {
                condition.referenced_signals(out);
                if_true.referenced_signals(out);
                if_false.referenced_signals(out);
            }
            Self::TimeWindow { signal_id, .. }
            | Self::SampleWindow { signal_id, .. }
            | Self::Previous { signal_id }
            | Self::HasReceivedSince { signal_id, .. } => {
                out.insert(*signal_id);
            }
            Self::CustomFunction { args, .. } => {
                for arg in args {
                    arg.referenced_signals(out);
                }
            }
        }
    }

    /// Collects `(name, invocation id)` pairs of every custom-function call
    /// site, in textual order.
    pub fn custom_function_sites(&self, out: &mut Vec<(String, InvocationId)>) {
        match self {
            Self::Number(_) | Self::Text(_) | Self::Boolean(_) | Self::Signal(_) => {}
            Self::Unary { operand, .. } => operand.custom_function_sites(out),
            Self::Binary { left, right, .. } => {
                left.custom_function_sites(out);
                right.custom_function_sites(out);
            }
            Self::Conditional {
                condition,
                if_true,
                if_false,
            } => {
                condition.custom_function_sites(out);
                if_true.custom_function_sites(out);
                if_false.custom_function_sites(out);
            }
            Self::TimeWindow { .. }
            | Self::SampleWindow { .. }
            | Self::Previous { .. }
            | Self::HasReceivedSince { .. } => {}
            Self::CustomFunction {
                name,
                invocation_id,
                args,
            } => {
                out.push((name.clone(), *invocation_id));
                for arg in args {
                    arg.custom_function_sites(out);
                }
            }
        }
    }

    /// Visits every `(signal id, window)` requirement the expression places
    /// on history sizing.
    pub fn window_requirements(&self, visit: &mut impl FnMut(SignalId, WindowRequirement)) {
        match self {
            Self::Number(_) | Self::Text(_) | Self::Boolean(_) => {}
            Self::Signal(id) => visit(*id, WindowRequirement::Samples(1)),
            Self::Unary { operand, .. } => operand.window_requirements(visit),
            Self::Binary { left, right, .. } => {
                left.window_requirements(visit);
                right.window_requirements(visit);
            }
            Self::Conditional {
                condition,
                if_true,
                if_false,
            } => {
                condition.window_requirements(visit);
                if_true.window_requirements(visit);
                if_false.window_requirements(visit);
            }
            Self::TimeWindow {
                signal_id,
                window_ms,
                ..
            } => visit(*signal_id, WindowRequirement::TimeMs(*window_ms)),
            Self::SampleWindow {
                signal_id, samples, ..
            } => visit(*signal_id, WindowRequirement::Samples(*samples)),
            Self::Previous { signal_id } => visit(*signal_id, WindowRequirement::Samples(2)),
            Self::HasReceivedSince {
                signal_id,
                window_ms,
            } => visit(*signal_id, WindowRequirement::TimeMs(*window_ms)),
            Self::CustomFunction { args, .. } => {
                for arg in args {
                    arg.window_requirements(visit);
                }
            }
        }
    }
}

/// How much history a query needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRequirement {
    /// At least this many samples
    Samples(usize),
    /// At least this much time
    TimeMs(u64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referenced_signals() {
        let expr = Expression::Binary {
            op: BinaryOp::And,
            left: Box::new(Expression::Signal(1)),
            right: Box::new(Expression::TimeWindow {
                aggregate: Aggregate::Max,
                signal_id: 2,
                window_ms: 1_000,
            }),
        };
        let mut out = HashSet::new();
        expr.referenced_signals(&mut out);
        assert_eq!(out, HashSet::from([1, 2]));
    }

    #[test]
    fn test_custom_function_sites_in_textual_order() {
        let expr = Expression::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expression::CustomFunction {
                name: "pow".into(),
                invocation_id: 0,
                args: vec![Expression::Signal(1), Expression::Number(2.0)],
            }),
            right: Box::new(Expression::CustomFunction {
                name: "abs".into(),
                invocation_id: 1,
                args: vec![Expression::Signal(2)],
            }),
        };
        let mut sites = Vec::new();
        expr.custom_function_sites(&mut sites);
        assert_eq!(sites, vec![("pow".into(), 0), ("abs".into(), 1)]);
    }
}
