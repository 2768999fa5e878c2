//! Property tests for the inspection engine invariants.

use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use vetra_core::{
    BoundedSignalQueue, CollectedDataFrame, CollectedSignal, InspectionConfig,
    InspectionMetrics, OverflowPolicy, SignalBufferDistributor, SignalType, SignalValue,
    Timestamp,
};
use vetra_inspection::{
    Aggregate, Campaign, CampaignDocument, CollectionInspectionEngine, CustomFunction,
    CustomFunctionRegistry, CustomFunctionResult, InvocationId, SignalHistory, SignalNameMap,
    TriggeredCollection,
};

proptest! {
    /// After ingest, the stored age never exceeds the time window plus one
    /// inter-sample interval.
    #[test]
    fn history_age_stays_within_window(
        window_ms in 50u64..500,
        deltas in proptest::collection::vec(1u64..50, 1..200),
    ) {
        let mut history = SignalHistory::new(1, window_ms, 10_000);
        let mut ts = 0u64;
        let mut max_delta = 0u64;
        for delta in deltas {
            ts += delta;
            max_delta = max_delta.max(delta);
            history.append(Timestamp::new(ts), SignalValue::Double(ts as f64));
            prop_assert!(history.stored_age_ms() <= window_ms + max_delta);
        }
    }

    /// Samples still inside the time window survive any change of
    /// ingestion rate, including bursts far faster than the steady state
    /// seen before them.
    #[test]
    fn burst_ingestion_never_evicts_in_window_samples(
        window_ms in 100u64..1000,
        periods in proptest::collection::vec((1u64..200, 1usize..30), 2..8),
    ) {
        let mut history = SignalHistory::new(1, window_ms, 100_000);
        let mut ingested: Vec<u64> = Vec::new();
        let mut ts = 0u64;
        for (gap, count) in periods {
            for _ in 0..count {
                ts += gap;
                ingested.push(ts);
                history.append(Timestamp::new(ts), SignalValue::Double(ts as f64));

                let horizon = ts.saturating_sub(window_ms);
                let expected = ingested.iter().filter(|&&t| t >= horizon).count();
                let stored = history
                    .recent_samples(None, Some(window_ms), Timestamp::new(ts))
                    .len();
                prop_assert_eq!(stored, expected);
            }
        }
    }

    /// Rolling count over N samples never exceeds N.
    #[test]
    fn sample_window_count_bounded(
        n in 1usize..16,
        samples in proptest::collection::vec(0.0f64..100.0, 0..64),
    ) {
        let mut history = SignalHistory::new(64, 0, 1_000);
        for (i, v) in samples.iter().enumerate() {
            history.append(Timestamp::new(i as u64), SignalValue::Double(*v));
        }
        if let SignalValue::Double(count) = history.aggregate_by_count(Aggregate::Count, n) {
            prop_assert!(count as usize <= n);
        } else {
            prop_assert!(samples.is_empty());
        }
    }

    /// A rising-edge campaign fires at most once per false→true transition
    /// of its expression.
    #[test]
    fn rising_edge_fires_bounded_by_transitions(levels in proptest::collection::vec(0.0f64..2.0, 1..80)) {
        let uplink = Arc::new(BoundedSignalQueue::new(
            256,
            "uplink",
            OverflowPolicy::DropNewest,
        ));
        let mut distributor = SignalBufferDistributor::<TriggeredCollection>::new();
        distributor.register_queue(Arc::clone(&uplink));

        let mut engine = CollectionInspectionEngine::new(
            InspectionConfig::default(),
            CustomFunctionRegistry::with_builtins(u32::MAX - 1),
            Arc::new(distributor),
            Arc::new(InspectionMetrics::default()),
        );

        let mut names = SignalNameMap::new();
        names.insert("x", 1);
        let doc = CampaignDocument::from_json(
            r#"{
                "campaignId": "edges",
                "collectionScheme": {"conditionBasedCollectionScheme": {
                    "conditionLanguageVersion": 1,
                    "expression": "x > 1",
                    "triggerMode": "RISING_EDGE"
                }},
                "signalsToCollect": [{"name": "x"}]
            }"#,
        )
        .unwrap();
        let campaign = Campaign::from_document(&doc, &names, engine.invocation_counter()).unwrap();
        engine.apply_campaigns(vec![campaign]);

        let mut transitions = 0u32;
        let mut prev = false;
        for (i, level) in levels.iter().enumerate() {
            let ts = (i as u64 + 1) * 10;
            engine.ingest_frame(CollectedDataFrame {
                raw_frame: None,
                signals: vec![CollectedSignal::new(
                    1,
                    Timestamp::new(ts),
                    SignalValue::Double(*level),
                    SignalType::Double,
                )],
            });
            engine.evaluate_round(Timestamp::new(ts), chrono::Utc::now());
            let current = *level > 1.0;
            if current && !prev {
                transitions += 1;
            }
            prev = current;
        }

        let mut fires = 0u32;
        while uplink.pop().is_some() {
            fires += 1;
        }
        prop_assert!(fires <= transitions);
        prop_assert_eq!(fires, transitions);
    }
}

/// Records cleanup calls per invocation identity.
struct CleanupProbe {
    cleaned: Arc<Mutex<Vec<InvocationId>>>,
}

impl CustomFunction for CleanupProbe {
    fn invoke(
        &mut self,
        _invocation_id: InvocationId,
        _args: &[SignalValue],
    ) -> CustomFunctionResult {
        CustomFunctionResult::Ok(SignalValue::Bool(false))
    }

    fn cleanup(&mut self, invocation_id: InvocationId) {
        self.cleaned.lock().push(invocation_id);
    }
}

/// Cleanup runs exactly once per invocation identity that ever ran, across
/// repeated campaign reloads.
#[test]
fn cleanup_exactly_once_per_identity_across_reloads() {
    let uplink = Arc::new(BoundedSignalQueue::new(
        16,
        "uplink",
        OverflowPolicy::DropNewest,
    ));
    let mut distributor = SignalBufferDistributor::<TriggeredCollection>::new();
    distributor.register_queue(Arc::clone(&uplink));

    let cleaned = Arc::new(Mutex::new(Vec::new()));
    let mut registry = CustomFunctionRegistry::new();
    registry.register(
        "probe",
        Box::new(CleanupProbe {
            cleaned: Arc::clone(&cleaned),
        }),
    );

    let mut engine = CollectionInspectionEngine::new(
        InspectionConfig::default(),
        registry,
        Arc::new(distributor),
        Arc::new(InspectionMetrics::default()),
    );

    let mut names = SignalNameMap::new();
    names.insert("x", 1);
    let doc = CampaignDocument::from_json(
        r#"{
            "campaignId": "probe-campaign",
            "collectionScheme": {"conditionBasedCollectionScheme": {
                "conditionLanguageVersion": 1,
                "expression": "custom_function('probe', x) || custom_function('probe', x)",
                "triggerMode": "RISING_EDGE"
            }},
            "signalsToCollect": [{"name": "x"}]
        }"#,
    )
    .unwrap();

    let mut all_sites = Vec::new();
    for generation in 0..3 {
        let campaign =
            Campaign::from_document(&doc, &names, engine.invocation_counter()).unwrap();
        let sites: Vec<InvocationId> =
            campaign.invocation_sites.iter().map(|(_, id)| *id).collect();
        assert_eq!(sites.len(), 2, "generation {generation}");
        all_sites.extend(sites);
        engine.apply_campaigns(vec![campaign]);

        engine.ingest_frame(CollectedDataFrame {
            raw_frame: None,
            signals: vec![CollectedSignal::new(
                1,
                Timestamp::new(generation as u64 * 10 + 1),
                SignalValue::Double(1.0),
                SignalType::Double,
            )],
        });
        engine.evaluate_round(Timestamp::new(generation as u64 * 10 + 1), chrono::Utc::now());
    }
    engine.apply_campaigns(Vec::new());

    let mut cleaned = cleaned.lock().clone();
    cleaned.sort_unstable();
    let mut expected = all_sites;
    expected.sort_unstable();
    assert_eq!(cleaned, expected);
}
