//! Collection inspection engine.
//!
//! The engine owns the per-signal history rings, the active campaign set,
//! the custom-function registry and the raw-frame ring. It ingests
//! [`CollectedDataFrame`] records from its input queue, re-evaluates the
//! campaigns a new sample touched, and on a fire assembles a bounded,
//! deduplicated [`TriggeredCollection`] for the uplink queue. All state is
//! owned by the inspection worker thread; campaign swaps are staged through
//! a pending slot the worker applies between iterations.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use vetra_core::{
    metrics, BoundedSignalQueue, Clock, CollectedCanRawFrame, CollectedDataFrame,
    CollectedSignal, CoreError, CoreResult, InspectionConfig, InspectionMetrics,
    SignalBufferDistributor, SignalId, SignalType, Timestamp,
};

use crate::ast::{InvocationId, WindowRequirement};
use crate::campaign::{Campaign, CampaignId, CompressionMode, TriggerMode};
use crate::custom::CustomFunctionRegistry;
use crate::evaluator::{evaluate, EvaluationContext};
use crate::history::SignalHistory;

/// The bundle emitted when a campaign fires.
#[derive(Debug, Clone)]
pub struct TriggeredCollection {
    /// Campaign that fired
    pub campaign_id: CampaignId,
    /// Unique id of this fire
    pub event_id: Uuid,
    /// Monotonic trigger time
    pub trigger_time: Timestamp,
    /// Wall-clock fire time for the cloud payload
    pub fire_time: DateTime<Utc>,
    /// Collected signal samples, including custom-function additions
    pub signals: Vec<CollectedSignal>,
    /// Raw frames within the campaign's raw window
    pub raw_frames: Vec<CollectedCanRawFrame>,
    /// Compression the transport should apply
    pub compression: CompressionMode,
}

/// Per-campaign evaluation state.
#[derive(Debug)]
struct CampaignRuntime {
    campaign: Campaign,
    /// Last evaluation result; `None` records undefined distinctly
    prev_result: Option<bool>,
    last_trigger: Option<Timestamp>,
    dirty: bool,
}

/// The inspection engine. Owned and driven by one worker thread.
pub struct CollectionInspectionEngine {
    config: InspectionConfig,
    campaigns: Vec<CampaignRuntime>,
    histories: HashMap<SignalId, SignalHistory>,
    signal_campaigns: HashMap<SignalId, Vec<usize>>,
    signal_types: HashMap<SignalId, SignalType>,
    raw_frames: VecDeque<CollectedCanRawFrame>,
    registry: CustomFunctionRegistry,
    uplink: Arc<SignalBufferDistributor<TriggeredCollection>>,
    metrics: Arc<InspectionMetrics>,
    next_invocation: InvocationId,
}

impl CollectionInspectionEngine {
    /// Creates an engine with no active campaigns.
    #[must_use]
    pub fn new(
        config: InspectionConfig,
        registry: CustomFunctionRegistry,
        uplink: Arc<SignalBufferDistributor<TriggeredCollection>>,
        metrics: Arc<InspectionMetrics>,
    ) -> Self {
        Self {
            config,
            campaigns: Vec::new(),
            histories: HashMap::new(),
            signal_campaigns: HashMap::new(),
            signal_types: HashMap::new(),
            raw_frames: VecDeque::new(),
            registry,
            uplink,
            metrics,
            next_invocation: 0,
        }
    }

    /// The engine-owned counter handing out globally unique invocation ids.
    ///
    /// Pass this to [`Campaign::from_document`] so call-site state never
    /// collides across campaigns.
    pub fn invocation_counter(&mut self) -> &mut InvocationId {
        &mut self.next_invocation
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &InspectionConfig {
        &self.config
    }

    /// Number of active campaigns.
    #[must_use]
    pub fn campaign_count(&self) -> usize {
        self.campaigns.len()
    }

    /// History of one signal, if any campaign references it.
    #[must_use]
    pub fn history(&self, signal_id: SignalId) -> Option<&SignalHistory> {
        self.histories.get(&signal_id)
    }

    /// Replaces the active campaign set.
    ///
    /// Every invocation identity of the outgoing set retires through
    /// `cleanup`; histories are created, resized or dropped to match the
    /// new windows. Existing samples of signals that stay referenced are
    /// kept.
    pub fn apply_campaigns(&mut self, campaigns: Vec<Campaign>) {
        for state in &self.campaigns {
            for (name, invocation_id) in &state.campaign.invocation_sites {
                self.registry.cleanup(name, *invocation_id);
            }
        }
        info!(
            outgoing = self.campaigns.len(),
            incoming = campaigns.len(),
            "replacing campaign set"
        );
        self.campaigns = campaigns
            .into_iter()
            .map(|campaign| CampaignRuntime {
                campaign,
                prev_result: None,
                last_trigger: None,
                dirty: true,
            })
            .collect();
        self.rebuild_histories();
        self.rebuild_signal_index();
    }

    /// Sizes each referenced signal's ring to the largest window any
    /// campaign asks of it.
    fn rebuild_histories(&mut self) {
        let mut count_bounds: HashMap<SignalId, usize> = HashMap::new();
        let mut time_bounds: HashMap<SignalId, u64> = HashMap::new();
        for state in &self.campaigns {
            state.campaign.window_requirements(&mut |signal_id, req| match req {
                WindowRequirement::Samples(n) => {
                    let bound = count_bounds.entry(signal_id).or_insert(0);
                    *bound = (*bound).max(n);
                }
                WindowRequirement::TimeMs(ms) => {
                    let bound = time_bounds.entry(signal_id).or_insert(0);
                    *bound = (*bound).max(ms);
                }
            });
        }

        let referenced: HashSet<SignalId> = count_bounds
            .keys()
            .chain(time_bounds.keys())
            .copied()
            .collect();
        self.histories.retain(|signal_id, _| referenced.contains(signal_id));

        let hard_cap = self.config.max_history_samples_per_signal;
        for signal_id in referenced {
            let count_bound = count_bounds.get(&signal_id).copied().unwrap_or(1).max(2);
            let window_ms = time_bounds.get(&signal_id).copied().unwrap_or(0);
            match self.histories.get_mut(&signal_id) {
                Some(history) => history.resize(count_bound, window_ms),
                None => {
                    self.histories.insert(
                        signal_id,
                        SignalHistory::new(count_bound, window_ms, hard_cap),
                    );
                }
            }
        }
    }

    fn rebuild_signal_index(&mut self) {
        self.signal_campaigns.clear();
        for (idx, state) in self.campaigns.iter().enumerate() {
            for signal_id in state.campaign.referenced_signals() {
                self.signal_campaigns.entry(signal_id).or_default().push(idx);
            }
        }
    }

    /// Ingests one collected data frame.
    ///
    /// Raw frames enter the raw ring; signals enter their history (only
    /// signals some campaign references keep a ring) and mark the
    /// campaigns referencing them dirty.
    pub fn ingest_frame(&mut self, frame: CollectedDataFrame) {
        if let Some(raw) = frame.raw_frame {
            self.raw_frames.push_back(raw);
            while self.raw_frames.len() > self.config.raw_frame_ring_capacity {
                self.raw_frames.pop_front();
            }
        }
        for signal in frame.signals {
            let appended = match self.histories.get_mut(&signal.signal_id) {
                Some(history) => history.append(signal.timestamp, signal.value),
                None => continue,
            };
            self.signal_types.insert(signal.signal_id, signal.signal_type);
            if appended {
                if let Some(indices) = self.signal_campaigns.get(&signal.signal_id) {
                    for &idx in indices {
                        self.campaigns[idx].dirty = true;
                    }
                }
            } else {
                metrics::bump(&self.metrics.out_of_order_samples);
            }
        }
    }

    /// Re-evaluates every dirty, unexpired campaign and emits collections
    /// for the ones that fire.
    pub fn evaluate_round(&mut self, now: Timestamp, wall_clock: DateTime<Utc>) {
        for idx in 0..self.campaigns.len() {
            if !self.campaigns[idx].dirty {
                continue;
            }
            self.campaigns[idx].dirty = false;
            if self.campaigns[idx].campaign.is_expired(wall_clock) {
                continue;
            }
            self.evaluate_campaign(idx, now, wall_clock);
        }
    }

    fn evaluate_campaign(&mut self, idx: usize, now: Timestamp, wall_clock: DateTime<Utc>) {
        let campaign = self.campaigns[idx].campaign.clone();

        let mut ctx =
            EvaluationContext::new(&self.histories, &mut self.registry, now, &self.metrics);
        let value = evaluate(&campaign.condition, &mut ctx);
        let invoked = dedup_preserve_order(ctx.invoked_functions);

        // Undefined in boolean context is false for activation but recorded
        // distinctly through prev_result = None and a counter.
        let result = value.as_bool();
        if result.is_none() {
            metrics::bump(&self.metrics.undefined_evaluations);
        }
        let current = result.unwrap_or(false);

        let state = &mut self.campaigns[idx];
        let should_fire = match campaign.trigger_mode {
            TriggerMode::RisingEdge => current && state.prev_result != Some(true),
            TriggerMode::Always => current,
        };
        state.prev_result = result;

        let mut fire = should_fire;
        if fire {
            if let Some(last) = state.last_trigger {
                if now.elapsed_since(last) < campaign.min_trigger_interval_ms {
                    metrics::bump(&self.metrics.suppressed_triggers);
                    fire = false;
                }
            }
        }
        if fire {
            state.last_trigger = Some(now);
        }

        let collect_set = campaign.collect_set();
        let mut pending = CollectedDataFrame::default();
        if fire {
            pending.signals = self.collect_signals(&campaign, now);
        }
        // Functions invoked this round see the round end exactly once; the
        // pending frame is discarded below unless the campaign fired.
        self.registry
            .condition_end(&invoked, &collect_set, now, &mut pending);

        if !fire {
            return;
        }

        let raw_frames = if campaign.collect_raw_frames {
            let horizon = now.saturating_sub(campaign.raw_frame_window_ms);
            self.raw_frames
                .iter()
                .filter(|f| f.receive_time >= horizon)
                .copied()
                .collect()
        } else {
            Vec::new()
        };

        let collection = TriggeredCollection {
            campaign_id: campaign.campaign_id.clone(),
            event_id: Uuid::new_v4(),
            trigger_time: now,
            fire_time: wall_clock,
            signals: pending.signals,
            raw_frames,
            compression: campaign.compression,
        };
        debug!(
            campaign = %collection.campaign_id,
            signals = collection.signals.len(),
            raw_frames = collection.raw_frames.len(),
            "campaign fired"
        );
        metrics::bump(&self.metrics.triggers_emitted);
        let dropped = self.uplink.push(collection);
        if dropped > 0 {
            self.metrics
                .uplink_drops
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    /// Pulls the campaign's collect set from history, deduplicated by
    /// `(signal id, timestamp)` and bounded by the configured ceiling.
    fn collect_signals(&self, campaign: &Campaign, now: Timestamp) -> Vec<CollectedSignal> {
        let mut out = Vec::new();
        let mut seen: HashSet<(SignalId, Timestamp)> = HashSet::new();
        'collect: for entry in &campaign.signals_to_collect {
            let Some(history) = self.histories.get(&entry.signal_id) else {
                continue;
            };
            // Latest-only when the entry carries no window at all.
            let max_samples = entry
                .max_samples
                .or_else(|| entry.window_ms.is_none().then_some(1));
            let signal_type = self
                .signal_types
                .get(&entry.signal_id)
                .copied()
                .unwrap_or_default();
            for sample in history.recent_samples(max_samples, entry.window_ms, now) {
                if out.len() >= self.config.max_collected_signals {
                    warn!(
                        campaign = %campaign.campaign_id,
                        limit = self.config.max_collected_signals,
                        "collection frame truncated"
                    );
                    break 'collect;
                }
                if seen.insert((entry.signal_id, sample.timestamp)) {
                    out.push(CollectedSignal::new(
                        entry.signal_id,
                        sample.timestamp,
                        sample.value,
                        signal_type,
                    ));
                }
            }
        }
        out
    }
}

fn dedup_preserve_order(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Dedicated worker thread driving a [`CollectionInspectionEngine`].
pub struct InspectionWorker {
    stop: Arc<AtomicBool>,
    pending_campaigns: Arc<Mutex<Option<Vec<Campaign>>>>,
    handle: Option<JoinHandle<()>>,
}

impl InspectionWorker {
    /// Spawns the worker. The engine moves onto the thread; campaign swaps
    /// go through [`update_campaigns`].
    ///
    /// [`update_campaigns`]: InspectionWorker::update_campaigns
    pub fn start(
        mut engine: CollectionInspectionEngine,
        input: Arc<BoundedSignalQueue<CollectedDataFrame>>,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let pending_campaigns: Arc<Mutex<Option<Vec<Campaign>>>> = Arc::new(Mutex::new(None));
        let poll = Duration::from_millis(engine.config.poll_interval_ms.max(1));

        let stop_flag = Arc::clone(&stop);
        let pending = Arc::clone(&pending_campaigns);
        let handle = std::thread::Builder::new()
            .name("vetra-inspection".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Acquire) {
                    if let Some(campaigns) = pending.lock().take() {
                        engine.apply_campaigns(campaigns);
                    }
                    if let Some(frame) = input.pop_timeout(poll) {
                        engine.ingest_frame(frame);
                        // Drain whatever arrived in the meantime before
                        // evaluating, so one round covers the batch.
                        while let Some(frame) = input.pop() {
                            engine.ingest_frame(frame);
                        }
                    }
                    engine.evaluate_round(clock.now_ms(), Utc::now());
                }
                debug!("inspection worker stopped");
            })
            .map_err(|e| CoreError::WorkerStart {
                name: "inspection".into(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            stop,
            pending_campaigns,
            handle: Some(handle),
        })
    }

    /// Stages a campaign set swap; the worker applies it between
    /// iterations.
    pub fn update_campaigns(&self, campaigns: Vec<Campaign>) {
        *self.pending_campaigns.lock() = Some(campaigns);
    }

    /// Stops the worker cooperatively. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("inspection worker panicked");
            }
        }
    }
}

impl Drop for InspectionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::CampaignDocument;
    use crate::custom::{CustomFunction, CustomFunctionResult};
    use crate::names::SignalNameMap;
    use vetra_core::{OverflowPolicy, SignalValue};

    const MULTI_EDGE_ID: SignalId = 99;

    fn names() -> SignalNameMap {
        let mut names = SignalNameMap::new();
        names.insert("x", 1);
        names.insert("y", 2);
        names.insert("Vehicle.A1", 11);
        names.insert("Vehicle.A2", 12);
        names.insert("Vehicle.A3", 13);
        names.insert(
            crate::custom::MultiRisingEdgeTrigger::DEFAULT_SIGNAL_NAME,
            MULTI_EDGE_ID,
        );
        names
    }

    struct Fixture {
        engine: CollectionInspectionEngine,
        uplink: Arc<BoundedSignalQueue<TriggeredCollection>>,
    }

    fn fixture() -> Fixture {
        let uplink = Arc::new(BoundedSignalQueue::new(
            16,
            "uplink",
            OverflowPolicy::DropNewest,
        ));
        let mut distributor = SignalBufferDistributor::new();
        distributor.register_queue(Arc::clone(&uplink));
        let engine = CollectionInspectionEngine::new(
            InspectionConfig::default(),
            CustomFunctionRegistry::with_builtins(MULTI_EDGE_ID),
            Arc::new(distributor),
            Arc::new(InspectionMetrics::default()),
        );
        Fixture { engine, uplink }
    }

    fn campaign_from_json(
        engine: &mut CollectionInspectionEngine,
        expression: &str,
        trigger_mode: &str,
        signals: &str,
    ) -> Campaign {
        let json = format!(
            r#"{{
                "campaignId": "test-campaign",
                "collectionScheme": {{
                    "conditionBasedCollectionScheme": {{
                        "conditionLanguageVersion": 1,
                        "expression": {},
                        "triggerMode": "{trigger_mode}"
                    }}
                }},
                "signalsToCollect": {signals}
            }}"#,
            serde_json::to_string(expression).unwrap(),
        );
        let doc = CampaignDocument::from_json(&json).unwrap();
        Campaign::from_document(&doc, &names(), engine.invocation_counter()).unwrap()
    }

    fn frame(signal_id: SignalId, ts: u64, value: f64) -> CollectedDataFrame {
        CollectedDataFrame {
            raw_frame: None,
            signals: vec![CollectedSignal::new(
                signal_id,
                Timestamp::new(ts),
                SignalValue::Double(value),
                SignalType::Double,
            )],
        }
    }

    fn bool_frame(signal_id: SignalId, ts: u64, value: bool) -> CollectedDataFrame {
        CollectedDataFrame {
            raw_frame: None,
            signals: vec![CollectedSignal::new(
                signal_id,
                Timestamp::new(ts),
                SignalValue::Bool(value),
                SignalType::Bool,
            )],
        }
    }

    fn wall() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_magnitude_campaign_rising_edge() {
        let mut fx = fixture();
        let campaign = campaign_from_json(
            &mut fx.engine,
            "custom_function('pow', custom_function('pow', x, 2) + \
             custom_function('pow', y, 2), 0.5) > 100",
            "RISING_EDGE",
            r#"[{"name": "x"}, {"name": "y"}]"#,
        );
        fx.engine.apply_campaigns(vec![campaign]);

        // Magnitude 5: no fire.
        fx.engine.ingest_frame(frame(1, 10, 3.0));
        fx.engine.ingest_frame(frame(2, 10, 4.0));
        fx.engine.evaluate_round(Timestamp::new(10), wall());
        assert!(fx.uplink.pop().is_none());

        // Magnitude ~113: rising edge fires once.
        fx.engine.ingest_frame(frame(1, 20, 80.0));
        fx.engine.ingest_frame(frame(2, 20, 80.0));
        fx.engine.evaluate_round(Timestamp::new(20), wall());
        let collection = fx.uplink.pop().expect("campaign fired");
        assert_eq!(collection.campaign_id, "test-campaign");
        assert_eq!(collection.signals.len(), 2);

        // Still above threshold: no second fire.
        fx.engine.ingest_frame(frame(1, 30, 90.0));
        fx.engine.ingest_frame(frame(2, 30, 90.0));
        fx.engine.evaluate_round(Timestamp::new(30), wall());
        assert!(fx.uplink.pop().is_none());

        // Falling below and rising again re-arms the edge.
        fx.engine.ingest_frame(frame(1, 40, 1.0));
        fx.engine.ingest_frame(frame(2, 40, 1.0));
        fx.engine.evaluate_round(Timestamp::new(40), wall());
        fx.engine.ingest_frame(frame(1, 50, 80.0));
        fx.engine.ingest_frame(frame(2, 50, 80.0));
        fx.engine.evaluate_round(Timestamp::new(50), wall());
        assert!(fx.uplink.pop().is_some());
    }

    #[test]
    fn test_always_mode_fires_every_true_round() {
        let mut fx = fixture();
        let campaign = campaign_from_json(
            &mut fx.engine,
            "x > 10",
            "ALWAYS",
            r#"[{"name": "x"}]"#,
        );
        fx.engine.apply_campaigns(vec![campaign]);

        for ts in [10u64, 20, 30] {
            fx.engine.ingest_frame(frame(1, ts, 50.0));
            fx.engine.evaluate_round(Timestamp::new(ts), wall());
        }
        assert!(fx.uplink.pop().is_some());
        assert!(fx.uplink.pop().is_some());
        assert!(fx.uplink.pop().is_some());
        assert!(fx.uplink.pop().is_none());
    }

    #[test]
    fn test_min_trigger_interval_suppresses() {
        let mut fx = fixture();
        let mut campaign = campaign_from_json(
            &mut fx.engine,
            "x > 10",
            "ALWAYS",
            r#"[{"name": "x"}]"#,
        );
        campaign.min_trigger_interval_ms = 100;
        fx.engine.apply_campaigns(vec![campaign]);

        fx.engine.ingest_frame(frame(1, 10, 50.0));
        fx.engine.evaluate_round(Timestamp::new(10), wall());
        fx.engine.ingest_frame(frame(1, 50, 50.0));
        fx.engine.evaluate_round(Timestamp::new(50), wall());
        fx.engine.ingest_frame(frame(1, 120, 50.0));
        fx.engine.evaluate_round(Timestamp::new(120), wall());

        // Fires at 10 and 120; the 50ms round is suppressed.
        assert!(fx.uplink.pop().is_some());
        let second = fx.uplink.pop().expect("second fire");
        assert_eq!(second.trigger_time, Timestamp::new(120));
        assert!(fx.uplink.pop().is_none());
        assert_eq!(
            metrics::read(&fx.engine.metrics.suppressed_triggers),
            1
        );
    }

    #[test]
    fn test_multi_rising_edge_scenario() {
        let mut fx = fixture();
        let campaign = campaign_from_json(
            &mut fx.engine,
            "custom_function('MULTI_RISING_EDGE_TRIGGER', \
             'ALARM1', Vehicle.A1, 'ALARM2', Vehicle.A2, 'ALARM3', Vehicle.A3)",
            "RISING_EDGE",
            r#"[{"name": "Vehicle.MultiRisingEdgeTrigger"}]"#,
        );
        fx.engine.apply_campaigns(vec![campaign]);

        // All false: no fire.
        fx.engine.ingest_frame(bool_frame(11, 10, false));
        fx.engine.ingest_frame(bool_frame(12, 10, false));
        fx.engine.ingest_frame(bool_frame(13, 10, false));
        fx.engine.evaluate_round(Timestamp::new(10), wall());
        assert!(fx.uplink.pop().is_none());

        // A1 rises: one fire carrying ["ALARM1"].
        fx.engine.ingest_frame(bool_frame(11, 20, true));
        fx.engine.evaluate_round(Timestamp::new(20), wall());
        let collection = fx.uplink.pop().expect("fired on ALARM1 rise");
        let text: Vec<&str> = collection
            .signals
            .iter()
            .filter_map(|s| s.value.as_text())
            .collect();
        assert_eq!(text, vec![r#"["ALARM1"]"#]);

        // A1 stays true: the function returns false, the edge re-arms, no fire.
        fx.engine.ingest_frame(bool_frame(11, 30, true));
        fx.engine.evaluate_round(Timestamp::new(30), wall());
        assert!(fx.uplink.pop().is_none());

        // Reset all to false, then A1 and A3 rise together: one fire with both.
        fx.engine.ingest_frame(bool_frame(11, 40, false));
        fx.engine.ingest_frame(bool_frame(13, 40, false));
        fx.engine.evaluate_round(Timestamp::new(40), wall());
        fx.engine.ingest_frame(bool_frame(11, 50, true));
        fx.engine.ingest_frame(bool_frame(13, 50, true));
        fx.engine.evaluate_round(Timestamp::new(50), wall());
        let collection = fx.uplink.pop().expect("fired on simultaneous rise");
        let text: Vec<&str> = collection
            .signals
            .iter()
            .filter_map(|s| s.value.as_text())
            .collect();
        assert_eq!(text, vec![r#"["ALARM1","ALARM3"]"#]);
    }

    #[test]
    fn test_collect_windows_and_dedup() {
        let mut fx = fixture();
        let campaign = campaign_from_json(
            &mut fx.engine,
            "x > 10",
            "RISING_EDGE",
            r#"[{"name": "x", "maxSampleCount": 3}, {"name": "x", "windowDurationMs": 1000}]"#,
        );
        fx.engine.apply_campaigns(vec![campaign]);

        for ts in [10u64, 20, 30, 40] {
            fx.engine.ingest_frame(frame(1, ts, ts as f64));
        }
        fx.engine.evaluate_round(Timestamp::new(40), wall());
        let collection = fx.uplink.pop().expect("fired");
        // Four samples within the time window, three via the count window;
        // dedup keeps each (signal, timestamp) once.
        assert_eq!(collection.signals.len(), 4);
        let timestamps: Vec<u64> = collection
            .signals
            .iter()
            .map(|s| s.timestamp.as_millis())
            .collect();
        assert_eq!(timestamps, vec![20, 30, 40, 10]);
    }

    #[test]
    fn test_raw_frames_attached_within_window() {
        let mut fx = fixture();
        let mut campaign = campaign_from_json(
            &mut fx.engine,
            "x > 10",
            "RISING_EDGE",
            r#"[{"name": "x"}]"#,
        );
        campaign.collect_raw_frames = true;
        campaign.raw_frame_window_ms = 100;
        fx.engine.apply_campaigns(vec![campaign]);

        let old_raw = CollectedCanRawFrame::new(0, 0x100, Timestamp::new(10), &[1, 2]);
        let new_raw = CollectedCanRawFrame::new(0, 0x200, Timestamp::new(460), &[3, 4]);
        fx.engine.ingest_frame(CollectedDataFrame {
            raw_frame: Some(old_raw),
            signals: vec![],
        });
        fx.engine.ingest_frame(CollectedDataFrame {
            raw_frame: Some(new_raw),
            signals: vec![],
        });
        fx.engine.ingest_frame(frame(1, 500, 50.0));
        fx.engine.evaluate_round(Timestamp::new(500), wall());

        let collection = fx.uplink.pop().expect("fired");
        assert_eq!(collection.raw_frames.len(), 1);
        assert_eq!(collection.raw_frames[0].frame_id, 0x200);
    }

    #[test]
    fn test_expired_campaign_does_not_fire() {
        let mut fx = fixture();
        let mut campaign = campaign_from_json(
            &mut fx.engine,
            "x > 10",
            "ALWAYS",
            r#"[{"name": "x"}]"#,
        );
        campaign.expiry = Some(Utc::now() - chrono::Duration::hours(1));
        fx.engine.apply_campaigns(vec![campaign]);

        fx.engine.ingest_frame(frame(1, 10, 50.0));
        fx.engine.evaluate_round(Timestamp::new(10), wall());
        assert!(fx.uplink.pop().is_none());
    }

    /// Counts invoke and cleanup calls per invocation identity.
    #[derive(Default)]
    struct Recording {
        invoked: Arc<Mutex<Vec<InvocationId>>>,
        cleaned: Arc<Mutex<Vec<InvocationId>>>,
    }

    impl CustomFunction for Recording {
        fn invoke(
            &mut self,
            invocation_id: InvocationId,
            _args: &[SignalValue],
        ) -> CustomFunctionResult {
            self.invoked.lock().push(invocation_id);
            CustomFunctionResult::Ok(SignalValue::Bool(true))
        }

        fn cleanup(&mut self, invocation_id: InvocationId) {
            self.cleaned.lock().push(invocation_id);
        }
    }

    #[test]
    fn test_cleanup_once_per_identity_on_reload() {
        let mut fx = fixture();
        let recording = Recording::default();
        let invoked = Arc::clone(&recording.invoked);
        let cleaned = Arc::clone(&recording.cleaned);
        fx.engine.registry.register("probe", Box::new(recording));

        let first = campaign_from_json(
            &mut fx.engine,
            "custom_function('probe', x)",
            "ALWAYS",
            r#"[{"name": "x"}]"#,
        );
        let first_sites: Vec<InvocationId> =
            first.invocation_sites.iter().map(|(_, id)| *id).collect();
        fx.engine.apply_campaigns(vec![first]);

        fx.engine.ingest_frame(frame(1, 10, 1.0));
        fx.engine.evaluate_round(Timestamp::new(10), wall());
        assert_eq!(invoked.lock().as_slice(), first_sites.as_slice());

        // Reload: same document text, fresh identities.
        let second = campaign_from_json(
            &mut fx.engine,
            "custom_function('probe', x)",
            "ALWAYS",
            r#"[{"name": "x"}]"#,
        );
        let second_sites: Vec<InvocationId> =
            second.invocation_sites.iter().map(|(_, id)| *id).collect();
        assert_ne!(first_sites, second_sites);
        fx.engine.apply_campaigns(vec![second]);
        assert_eq!(cleaned.lock().as_slice(), first_sites.as_slice());

        // Removing every campaign retires the second identity too.
        fx.engine.apply_campaigns(Vec::new());
        let cleaned = cleaned.lock();
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[1], second_sites[0]);
    }

    #[test]
    fn test_out_of_order_sample_dropped_with_counter() {
        let mut fx = fixture();
        let campaign = campaign_from_json(
            &mut fx.engine,
            "x > 10",
            "ALWAYS",
            r#"[{"name": "x"}]"#,
        );
        fx.engine.apply_campaigns(vec![campaign]);

        fx.engine.ingest_frame(frame(1, 100, 1.0));
        fx.engine.ingest_frame(frame(1, 50, 99.0));
        fx.engine.evaluate_round(Timestamp::new(100), wall());
        assert!(fx.uplink.pop().is_none());
        assert_eq!(metrics::read(&fx.engine.metrics.out_of_order_samples), 1);
        // The stale high value never entered history.
        assert_eq!(fx.engine.history(1).unwrap().len(), 1);
    }

    #[test]
    fn test_unreferenced_signals_keep_no_history() {
        let mut fx = fixture();
        let campaign = campaign_from_json(
            &mut fx.engine,
            "x > 10",
            "ALWAYS",
            r#"[{"name": "x"}]"#,
        );
        fx.engine.apply_campaigns(vec![campaign]);
        fx.engine.ingest_frame(frame(42, 10, 1.0));
        assert!(fx.engine.history(42).is_none());
    }
}
