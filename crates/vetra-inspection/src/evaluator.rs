//! Campaign condition evaluator.
//!
//! A straight recursive walk over the immutable AST, left to right, with
//! short-circuit on `&&` and `||`. Any undefined operand makes the result
//! undefined; type mismatches do the same and bump a counter. Custom
//! functions short-circuited away are not invoked and therefore get no
//! `condition_end` for the round.

use std::collections::HashMap;

use vetra_core::{metrics, InspectionMetrics, SignalId, SignalValue, Timestamp};

use crate::ast::{BinaryOp, Expression, UnaryOp};
use crate::custom::{CustomFunctionRegistry, CustomFunctionResult};
use crate::history::SignalHistory;

/// Evaluation state for one round.
pub struct EvaluationContext<'a> {
    /// Histories of every signal referenced by active campaigns
    pub histories: &'a HashMap<SignalId, SignalHistory>,
    /// Custom-function registry
    pub registry: &'a mut CustomFunctionRegistry,
    /// Monotonic now, the reference for time windows
    pub now: Timestamp,
    /// Counters
    pub metrics: &'a InspectionMetrics,
    /// Names of custom functions invoked this round, in invocation order
    pub invoked_functions: Vec<String>,
}

impl<'a> EvaluationContext<'a> {
    /// Creates a context for one evaluation round.
    pub fn new(
        histories: &'a HashMap<SignalId, SignalHistory>,
        registry: &'a mut CustomFunctionRegistry,
        now: Timestamp,
        metrics: &'a InspectionMetrics,
    ) -> Self {
        Self {
            histories,
            registry,
            now,
            metrics,
            invoked_functions: Vec::new(),
        }
    }

    fn latest(&self, signal_id: SignalId) -> SignalValue {
        self.histories
            .get(&signal_id)
            .and_then(|h| h.latest())
            .map(|s| s.value.clone())
            .unwrap_or(SignalValue::Undefined)
    }

    fn type_mismatch(&self) -> SignalValue {
        metrics::bump(&self.metrics.type_mismatch_evaluations);
        SignalValue::Undefined
    }
}

/// Evaluates an expression to a value.
pub fn evaluate(expression: &Expression, ctx: &mut EvaluationContext<'_>) -> SignalValue {
    match expression {
        Expression::Number(v) => SignalValue::Double(*v),
        Expression::Text(s) => SignalValue::text(s),
        Expression::Boolean(b) => SignalValue::Bool(*b),
        Expression::Signal(id) => ctx.latest(*id),
        Expression::Unary { op, operand } => {
            let value = evaluate(operand, ctx);
            if value.is_undefined() {
                return SignalValue::Undefined;
            }
            match op {
                UnaryOp::Not => match value.as_bool() {
                    Some(b) => SignalValue::Bool(!b),
                    None => ctx.type_mismatch(),
                },
                UnaryOp::Negate => match value.as_f64() {
                    Some(v) => SignalValue::Double(-v),
                    None => ctx.type_mismatch(),
                },
            }
        }
        Expression::Binary { op, left, right } => match op {
            BinaryOp::And => {
                let lhs = evaluate(left, ctx);
                match lhs.as_bool() {
                    Some(false) => SignalValue::Bool(false),
                    Some(true) => {
                        let rhs = evaluate(right, ctx);
                        match rhs.as_bool() {
                            Some(b) => SignalValue::Bool(b),
                            None if rhs.is_undefined() => SignalValue::Undefined,
                            None => ctx.type_mismatch(),
                        }
                    }
                    None if lhs.is_undefined() => SignalValue::Undefined,
                    None => ctx.type_mismatch(),
                }
            }
            BinaryOp::Or => {
                let lhs = evaluate(left, ctx);
                match lhs.as_bool() {
                    Some(true) => SignalValue::Bool(true),
                    Some(false) => {
                        let rhs = evaluate(right, ctx);
                        match rhs.as_bool() {
                            Some(b) => SignalValue::Bool(b),
                            None if rhs.is_undefined() => SignalValue::Undefined,
                            None => ctx.type_mismatch(),
                        }
                    }
                    None if lhs.is_undefined() => SignalValue::Undefined,
                    None => ctx.type_mismatch(),
                }
            }
            _ => {
                let lhs = evaluate(left, ctx);
                let rhs = evaluate(right, ctx);
                if lhs.is_undefined() || rhs.is_undefined() {
                    return SignalValue::Undefined;
                }
                apply_binary(*op, &lhs, &rhs, ctx)
            }
        },
        Expression::Conditional {
            condition,
            if_true,
            if_false,
        } => {
            let selector = evaluate(condition, ctx);
            match selector.as_bool() {
                Some(true) => evaluate(if_true, ctx),
                Some(false) => evaluate(if_false, ctx),
                None if selector.is_undefined() => SignalValue::Undefined,
                None => ctx.type_mismatch(),
            }
        }
        Expression::TimeWindow {
            aggregate,
            signal_id,
            window_ms,
        } => window_query(ctx, *signal_id, |h| {
            h.aggregate_by_time(*aggregate, *window_ms, ctx.now)
        }),
        Expression::SampleWindow {
            aggregate,
            signal_id,
            samples,
        } => window_query(ctx, *signal_id, |h| {
            h.aggregate_by_count(*aggregate, *samples)
        }),
        Expression::Previous { signal_id } => ctx
            .histories
            .get(signal_id)
            .and_then(|h| h.previous())
            .map(|s| s.value.clone())
            .unwrap_or(SignalValue::Undefined),
        Expression::HasReceivedSince {
            signal_id,
            window_ms,
        } => {
            let since = ctx.now.saturating_sub(*window_ms);
            let received = ctx
                .histories
                .get(signal_id)
                .is_some_and(|h| h.has_received_since(since));
            SignalValue::Bool(received)
        }
        Expression::CustomFunction {
            name,
            invocation_id,
            args,
        } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, ctx));
            }
            ctx.invoked_functions.push(name.clone());
            match ctx.registry.invoke(name, *invocation_id, &values) {
                CustomFunctionResult::Ok(value) => value,
                CustomFunctionResult::TypeMismatch => ctx.type_mismatch(),
                CustomFunctionResult::RuntimeError => {
                    metrics::bump(&ctx.metrics.custom_function_errors);
                    SignalValue::Undefined
                }
            }
        }
    }
}

fn window_query(
    ctx: &EvaluationContext<'_>,
    signal_id: SignalId,
    query: impl Fn(&SignalHistory) -> SignalValue,
) -> SignalValue {
    ctx.histories
        .get(&signal_id)
        .map(query)
        .unwrap_or(SignalValue::Undefined)
}

fn apply_binary(
    op: BinaryOp,
    lhs: &SignalValue,
    rhs: &SignalValue,
    ctx: &EvaluationContext<'_>,
) -> SignalValue {
    // Exact string comparison; ordering on strings is a type mismatch.
    if let (Some(a), Some(b)) = (lhs.as_text(), rhs.as_text()) {
        return match op {
            BinaryOp::Equal => SignalValue::Bool(a == b),
            BinaryOp::NotEqual => SignalValue::Bool(a != b),
            _ => ctx.type_mismatch(),
        };
    }
    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
        return ctx.type_mismatch();
    };
    match op {
        BinaryOp::Add => finite(a + b),
        BinaryOp::Subtract => finite(a - b),
        BinaryOp::Multiply => finite(a * b),
        BinaryOp::Divide => finite(a / b),
        BinaryOp::Modulo => finite(a % b),
        BinaryOp::Less => SignalValue::Bool(a < b),
        BinaryOp::LessEq => SignalValue::Bool(a <= b),
        BinaryOp::Greater => SignalValue::Bool(a > b),
        BinaryOp::GreaterEq => SignalValue::Bool(a >= b),
        BinaryOp::Equal => SignalValue::Bool(a == b),
        BinaryOp::NotEqual => SignalValue::Bool(a != b),
        BinaryOp::And | BinaryOp::Or => unreachable!("logical ops handled with short-circuit"),
    }
}

/// Division by zero and friends resolve to undefined, not a fired trigger.
fn finite(value: f64) -> SignalValue {
    if value.is_finite() {
        SignalValue::Double(value)
    } else {
        SignalValue::Undefined
    }
}
