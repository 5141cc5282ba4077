use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sensorlog_core::Verdict;
use std::collections::{BTreeMap, HashMap};

/// Bookkeeping for one routing key, never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRuntimeState {
    pub first_seen: DateTime<Utc>,
    pub last_message: DateTime<Utc>,
    pub total_count: u64,
    pub last_info_count: u64,
    pub last_info_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FieldTally {
    pub replaced: u64,
    pub unparseable: u64,
}

/// Bad values seen since the last bad-values notification
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BadTally {
    pub count: u64,
    pub fields: BTreeMap<String, FieldTally>,
}

pub struct SensorContainer {
    states: Mutex<HashMap<String, SensorRuntimeState>>,
    bad: Mutex<HashMap<String, BadTally>>,
    last_report: Mutex<Option<DateTime<Utc>>>,
}

impl SensorContainer {
    pub fn new() -> Self {
        SensorContainer {
            states: Mutex::new(HashMap::new()),
            bad: Mutex::new(HashMap::new()),
            last_report: Mutex::new(None),
        }
    }

    pub fn record_message(&self, routing_key: &str, now: DateTime<Utc>) {
        let mut states = self.states.lock();
        let state = states
            .entry(routing_key.to_owned())
            .or_insert_with(|| SensorRuntimeState {
                first_seen: now,
                last_message: now,
                total_count: 0,
                last_info_count: 0,
                // sensors appearing later are measured from the latest report
                last_info_time: *self.last_report.lock(),
            });
        state.last_message = now;
        state.total_count += 1;
    }

    pub fn state(&self, routing_key: &str) -> Option<SensorRuntimeState> {
        self.states.lock().get(routing_key).cloned()
    }

    pub fn last_message(&self, routing_key: &str) -> Option<DateTime<Utc>> {
        self.states.lock().get(routing_key).map(|s| s.last_message)
    }

    /// Moves the "since last heartbeat" baseline of every sensor to `now`
    pub fn mark_info(&self, now: DateTime<Utc>) {
        let mut states = self.states.lock();
        for state in states.values_mut() {
            state.last_info_count = state.total_count;
            state.last_info_time = Some(now);
        }
        *self.last_report.lock() = Some(now);
    }

    pub fn add_bad(&self, routing_key: &str, hits: &[(String, Verdict)]) {
        if hits.is_empty() {
            return;
        }
        let mut bad = self.bad.lock();
        let tally = bad.entry(routing_key.to_owned()).or_default();
        for (field, verdict) in hits {
            let field_tally = tally.fields.entry(field.clone()).or_default();
            match verdict {
                Verdict::Replaced => field_tally.replaced += 1,
                Verdict::Unparseable => field_tally.unparseable += 1,
                Verdict::Good => continue,
            }
            tally.count += 1;
        }
    }

    pub fn bad_tally(&self, routing_key: &str) -> Option<BadTally> {
        self.bad.lock().get(routing_key).cloned()
    }

    /// Sorted by routing key
    pub fn bad_tallies(&self) -> Vec<(String, BadTally)> {
        let mut tallies: Vec<(String, BadTally)> = self
            .bad
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        tallies.sort_by(|a, b| a.0.cmp(&b.0));
        tallies
    }

    pub fn reset_bad(&self, routing_key: &str) {
        self.bad.lock().remove(routing_key);
    }
}
