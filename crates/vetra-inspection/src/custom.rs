//! Custom functions invocable from campaign expressions.
//!
//! A custom function is registered by name and carries three entry points:
//! `invoke` per call site per evaluation, `condition_end` once per
//! evaluation round the function ran in, and `cleanup` when an invocation
//! identity retires. Per-call-site state is keyed on the [`InvocationId`]
//! assigned at parse time. All entry points run synchronously on the
//! inspection worker and must not block.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use vetra_core::{
    CollectedDataFrame, CollectedSignal, SignalId, SignalType, SignalValue, Timestamp,
};

use crate::ast::InvocationId;

/// Outcome of one custom-function invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum CustomFunctionResult {
    /// The call produced a value (possibly `Undefined` by choice)
    Ok(SignalValue),
    /// Argument arity or types were wrong
    TypeMismatch,
    /// The call failed at runtime
    RuntimeError,
}

/// An externally supplied expression primitive.
pub trait CustomFunction: Send {
    /// Performs one invocation for the call site `invocation_id`.
    fn invoke(&mut self, invocation_id: InvocationId, args: &[SignalValue])
        -> CustomFunctionResult;

    /// Called once per evaluation round the function was invoked in, after
    /// the overall condition resolved. May append signals to the pending
    /// collection frame; the engine discards the frame unless the campaign
    /// triggered, and appended ids outside `collected_signal_ids` are the
    /// function's responsibility to avoid.
    fn condition_end(
        &mut self,
        _collected_signal_ids: &HashSet<SignalId>,
        _timestamp: Timestamp,
        _output: &mut CollectedDataFrame,
    ) {
    }

    /// Called when an invocation identity retires.
    fn cleanup(&mut self, _invocation_id: InvocationId) {}
}

/// Name-keyed registry of custom functions, owned by the inspection engine.
#[derive(Default)]
pub struct CustomFunctionRegistry {
    functions: HashMap<String, Box<dyn CustomFunction>>,
}

impl CustomFunctionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in functions registered.
    ///
    /// `multi_edge_signal_id` is the signal the multi-rising-edge trigger
    /// appends its risen-names payload under, resolved from the
    /// fully-qualified name [`MultiRisingEdgeTrigger::DEFAULT_SIGNAL_NAME`].
    #[must_use]
    pub fn with_builtins(multi_edge_signal_id: SignalId) -> Self {
        let mut registry = Self::new();
        registry.register("abs", Box::new(Math::Abs));
        registry.register("ceil", Box::new(Math::Ceil));
        registry.register("floor", Box::new(Math::Floor));
        registry.register("min", Box::new(Math::Min));
        registry.register("max", Box::new(Math::Max));
        registry.register("pow", Box::new(Math::Pow));
        registry.register("log", Box::new(Math::Log));
        registry.register(
            "MULTI_RISING_EDGE_TRIGGER",
            Box::new(MultiRisingEdgeTrigger::new(multi_edge_signal_id)),
        );
        registry
    }

    /// Registers a function, replacing any previous entry with the name.
    pub fn register(&mut self, name: impl Into<String>, function: Box<dyn CustomFunction>) {
        self.functions.insert(name.into(), function);
    }

    /// Returns `true` when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Invokes `name` for one call site. Unknown names are a runtime error.
    pub fn invoke(
        &mut self,
        name: &str,
        invocation_id: InvocationId,
        args: &[SignalValue],
    ) -> CustomFunctionResult {
        match self.functions.get_mut(name) {
            Some(function) => function.invoke(invocation_id, args),
            None => {
                warn!(function = name, "unknown custom function");
                CustomFunctionResult::RuntimeError
            }
        }
    }

    /// Runs `condition_end` for every function named in `invoked`.
    pub fn condition_end(
        &mut self,
        invoked: &[String],
        collected_signal_ids: &HashSet<SignalId>,
        timestamp: Timestamp,
        output: &mut CollectedDataFrame,
    ) {
        for name in invoked {
            if let Some(function) = self.functions.get_mut(name) {
                function.condition_end(collected_signal_ids, timestamp, output);
            }
        }
    }

    /// Retires one invocation identity of `name`.
    pub fn cleanup(&mut self, name: &str, invocation_id: InvocationId) {
        if let Some(function) = self.functions.get_mut(name) {
            function.cleanup(invocation_id);
        }
    }
}

/// Coerced numeric arguments: `Ok(None)` when any argument is undefined,
/// `Err(())` on a non-numeric argument.
fn numeric_args(args: &[SignalValue]) -> Result<Option<Vec<f64>>, ()> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        if arg.is_undefined() {
            return Ok(None);
        }
        match arg.as_f64() {
            Some(v) => values.push(v),
            None => return Err(()),
        }
    }
    Ok(Some(values))
}

/// Stateless numeric built-ins.
enum Math {
    Abs,
    Ceil,
    Floor,
    Min,
    Max,
    Pow,
    Log,
}

impl CustomFunction for Math {
    fn invoke(&mut self, _invocation_id: InvocationId, args: &[SignalValue])
        -> CustomFunctionResult
    {
        let values = match numeric_args(args) {
            Ok(Some(values)) => values,
            Ok(None) => return CustomFunctionResult::Ok(SignalValue::Undefined),
            Err(()) => return CustomFunctionResult::TypeMismatch,
        };
        let result = match self {
            Self::Abs | Self::Ceil | Self::Floor => {
                if values.len() != 1 {
                    return CustomFunctionResult::TypeMismatch;
                }
                match self {
                    Self::Abs => values[0].abs(),
                    Self::Ceil => values[0].ceil(),
                    _ => values[0].floor(),
                }
            }
            Self::Min | Self::Max => {
                if values.len() < 2 {
                    return CustomFunctionResult::TypeMismatch;
                }
                let fold = |acc: f64, v: &f64| match self {
                    Self::Min => acc.min(*v),
                    _ => acc.max(*v),
                };
                values[1..].iter().fold(values[0], fold)
            }
            Self::Pow => {
                if values.len() != 2 {
                    return CustomFunctionResult::TypeMismatch;
                }
                values[0].powf(values[1])
            }
            Self::Log => {
                if values.len() != 2 {
                    return CustomFunctionResult::TypeMismatch;
                }
                let (base, x) = (values[0], values[1]);
                if base <= 0.0 || base == 1.0 || x <= 0.0 {
                    return CustomFunctionResult::RuntimeError;
                }
                x.ln() / base.ln()
            }
        };
        if result.is_finite() {
            CustomFunctionResult::Ok(SignalValue::Double(result))
        } else {
            CustomFunctionResult::RuntimeError
        }
    }
}

/// `MULTI_RISING_EDGE_TRIGGER((name, bool), …)`.
///
/// Returns `true` when at least one named boolean rose since the last
/// invocation for the same call site. At `condition_end` the names that
/// rose this round are appended, JSON-encoded, under the configured output
/// signal id when that id is in the collect set.
pub struct MultiRisingEdgeTrigger {
    output_signal_id: SignalId,
    previous: HashMap<InvocationId, HashMap<String, bool>>,
    risen_this_round: Vec<String>,
}

impl MultiRisingEdgeTrigger {
    /// Fully-qualified name the output signal id is looked up by.
    pub const DEFAULT_SIGNAL_NAME: &'static str = "Vehicle.MultiRisingEdgeTrigger";

    /// Creates the trigger appending under `output_signal_id`.
    #[must_use]
    pub fn new(output_signal_id: SignalId) -> Self {
        Self {
            output_signal_id,
            previous: HashMap::new(),
            risen_this_round: Vec::new(),
        }
    }
}

impl CustomFunction for MultiRisingEdgeTrigger {
    fn invoke(&mut self, invocation_id: InvocationId, args: &[SignalValue])
        -> CustomFunctionResult
    {
        if args.is_empty() || args.len() % 2 != 0 {
            return CustomFunctionResult::TypeMismatch;
        }
        // Validate fully before touching state: an undefined argument must
        // leave the per-invocation memory unchanged.
        let mut pairs = Vec::with_capacity(args.len() / 2);
        for pair in args.chunks_exact(2) {
            if pair[0].is_undefined() || pair[1].is_undefined() {
                return CustomFunctionResult::Ok(SignalValue::Undefined);
            }
            let Some(name) = pair[0].as_text() else {
                return CustomFunctionResult::TypeMismatch;
            };
            let Some(state) = pair[1].as_bool() else {
                return CustomFunctionResult::TypeMismatch;
            };
            pairs.push((name.to_string(), state));
        }

        let known = self.previous.entry(invocation_id).or_default();
        let mut any_rising = false;
        for (name, state) in pairs {
            let was = known.insert(name.clone(), state).unwrap_or(false);
            if state && !was {
                any_rising = true;
                self.risen_this_round.push(name);
            }
        }
        CustomFunctionResult::Ok(SignalValue::Bool(any_rising))
    }

    fn condition_end(
        &mut self,
        collected_signal_ids: &HashSet<SignalId>,
        timestamp: Timestamp,
        output: &mut CollectedDataFrame,
    ) {
        let risen = std::mem::take(&mut self.risen_this_round);
        if risen.is_empty() || !collected_signal_ids.contains(&self.output_signal_id) {
            return;
        }
        match serde_json::to_string(&risen) {
            Ok(json) => output.signals.push(CollectedSignal::new(
                self.output_signal_id,
                timestamp,
                SignalValue::text(json),
                SignalType::Text,
            )),
            Err(e) => warn!(error = %e, "failed to encode risen edge names"),
        }
    }

    fn cleanup(&mut self, invocation_id: InvocationId) {
        self.previous.remove(&invocation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_value(result: CustomFunctionResult) -> SignalValue {
        match result {
            CustomFunctionResult::Ok(v) => v,
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn test_math_builtins() {
        let mut registry = CustomFunctionRegistry::with_builtins(99);
        assert_eq!(
            ok_value(registry.invoke("abs", 0, &[SignalValue::Double(-4.0)])),
            SignalValue::Double(4.0)
        );
        assert_eq!(
            ok_value(registry.invoke("ceil", 0, &[SignalValue::Double(1.2)])),
            SignalValue::Double(2.0)
        );
        assert_eq!(
            ok_value(registry.invoke("floor", 0, &[SignalValue::Double(1.8)])),
            SignalValue::Double(1.0)
        );
        assert_eq!(
            ok_value(registry.invoke(
                "min",
                0,
                &[
                    SignalValue::Double(3.0),
                    SignalValue::Double(1.0),
                    SignalValue::Double(2.0)
                ]
            )),
            SignalValue::Double(1.0)
        );
        assert_eq!(
            ok_value(registry.invoke(
                "max",
                0,
                &[SignalValue::Double(3.0), SignalValue::Double(7.0)]
            )),
            SignalValue::Double(7.0)
        );
        assert_eq!(
            ok_value(registry.invoke(
                "pow",
                0,
                &[SignalValue::Double(2.0), SignalValue::Double(10.0)]
            )),
            SignalValue::Double(1024.0)
        );
        assert_eq!(
            ok_value(registry.invoke(
                "log",
                0,
                &[SignalValue::Double(10.0), SignalValue::Double(1000.0)]
            )),
            SignalValue::Double(3.0)
        );
    }

    #[test]
    fn test_math_arity_and_type_mismatch() {
        let mut registry = CustomFunctionRegistry::with_builtins(99);
        assert_eq!(
            registry.invoke("abs", 0, &[]),
            CustomFunctionResult::TypeMismatch
        );
        assert_eq!(
            registry.invoke("min", 0, &[SignalValue::Double(1.0)]),
            CustomFunctionResult::TypeMismatch
        );
        assert_eq!(
            registry.invoke("abs", 0, &[SignalValue::text("x")]),
            CustomFunctionResult::TypeMismatch
        );
    }

    #[test]
    fn test_math_undefined_argument() {
        let mut registry = CustomFunctionRegistry::with_builtins(99);
        assert_eq!(
            registry.invoke(
                "pow",
                0,
                &[SignalValue::Undefined, SignalValue::Double(2.0)]
            ),
            CustomFunctionResult::Ok(SignalValue::Undefined)
        );
    }

    #[test]
    fn test_log_domain_errors() {
        let mut registry = CustomFunctionRegistry::with_builtins(99);
        assert_eq!(
            registry.invoke(
                "log",
                0,
                &[SignalValue::Double(1.0), SignalValue::Double(10.0)]
            ),
            CustomFunctionResult::RuntimeError
        );
        assert_eq!(
            registry.invoke(
                "log",
                0,
                &[SignalValue::Double(10.0), SignalValue::Double(-1.0)]
            ),
            CustomFunctionResult::RuntimeError
        );
    }

    #[test]
    fn test_unknown_function_is_runtime_error() {
        let mut registry = CustomFunctionRegistry::new();
        assert_eq!(
            registry.invoke("nope", 0, &[]),
            CustomFunctionResult::RuntimeError
        );
    }

    fn edge_args(pairs: &[(&str, bool)]) -> Vec<SignalValue> {
        pairs
            .iter()
            .flat_map(|(name, state)| [SignalValue::text(*name), SignalValue::Bool(*state)])
            .collect()
    }

    #[test]
    fn test_multi_rising_edge_detects_rises() {
        let mut trigger = MultiRisingEdgeTrigger::new(50);
        assert_eq!(
            trigger.invoke(1, &edge_args(&[("ALARM1", false), ("ALARM3", false)])),
            CustomFunctionResult::Ok(SignalValue::Bool(false))
        );
        assert_eq!(
            trigger.invoke(1, &edge_args(&[("ALARM1", true), ("ALARM3", false)])),
            CustomFunctionResult::Ok(SignalValue::Bool(true))
        );
        // Still true: no new rise.
        assert_eq!(
            trigger.invoke(1, &edge_args(&[("ALARM1", true), ("ALARM3", false)])),
            CustomFunctionResult::Ok(SignalValue::Bool(false))
        );
    }

    #[test]
    fn test_multi_rising_edge_condition_end_payload() {
        let mut trigger = MultiRisingEdgeTrigger::new(50);
        trigger.invoke(1, &edge_args(&[("ALARM1", true), ("ALARM3", true)]));

        let mut frame = CollectedDataFrame::default();
        trigger.condition_end(&HashSet::from([50]), Timestamp::new(5), &mut frame);
        assert_eq!(frame.signals.len(), 1);
        assert_eq!(frame.signals[0].signal_id, 50);
        assert_eq!(
            frame.signals[0].value.as_text(),
            Some(r#"["ALARM1","ALARM3"]"#)
        );

        // Round state was consumed.
        let mut second = CollectedDataFrame::default();
        trigger.condition_end(&HashSet::from([50]), Timestamp::new(6), &mut second);
        assert!(second.signals.is_empty());
    }

    #[test]
    fn test_multi_rising_edge_respects_collect_set() {
        let mut trigger = MultiRisingEdgeTrigger::new(50);
        trigger.invoke(1, &edge_args(&[("ALARM1", true)]));
        let mut frame = CollectedDataFrame::default();
        trigger.condition_end(&HashSet::from([99]), Timestamp::new(5), &mut frame);
        assert!(frame.signals.is_empty());
    }

    #[test]
    fn test_multi_rising_edge_undefined_leaves_state() {
        let mut trigger = MultiRisingEdgeTrigger::new(50);
        trigger.invoke(1, &edge_args(&[("ALARM1", false)]));
        assert_eq!(
            trigger.invoke(
                1,
                &[SignalValue::text("ALARM1"), SignalValue::Undefined]
            ),
            CustomFunctionResult::Ok(SignalValue::Undefined)
        );
        // State unchanged: the rise is still detected afterwards.
        assert_eq!(
            trigger.invoke(1, &edge_args(&[("ALARM1", true)])),
            CustomFunctionResult::Ok(SignalValue::Bool(true))
        );
    }

    #[test]
    fn test_multi_rising_edge_cleanup_drops_memory() {
        let mut trigger = MultiRisingEdgeTrigger::new(50);
        trigger.invoke(1, &edge_args(&[("ALARM1", true)]));
        trigger.risen_this_round.clear();
        trigger.cleanup(1);
        // After cleanup the same true reads as a fresh rise.
        assert_eq!(
            trigger.invoke(1, &edge_args(&[("ALARM1", true)])),
            CustomFunctionResult::Ok(SignalValue::Bool(true))
        );
    }

    #[test]
    fn test_multi_rising_edge_separate_invocations() {
        let mut trigger = MultiRisingEdgeTrigger::new(50);
        trigger.invoke(1, &edge_args(&[("ALARM1", true)]));
        // A different call site has its own memory: same name rises again.
        assert_eq!(
            trigger.invoke(2, &edge_args(&[("ALARM1", true)])),
            CustomFunctionResult::Ok(SignalValue::Bool(true))
        );
    }

    #[test]
    fn test_multi_rising_edge_shape_mismatch() {
        let mut trigger = MultiRisingEdgeTrigger::new(50);
        assert_eq!(
            trigger.invoke(1, &[SignalValue::text("A")]),
            CustomFunctionResult::TypeMismatch
        );
        assert_eq!(
            trigger.invoke(
                1,
                &[SignalValue::Double(1.0), SignalValue::Bool(true)]
            ),
            CustomFunctionResult::TypeMismatch
        );
    }
}
