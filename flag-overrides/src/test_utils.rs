use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use crate::evaluator::{EvaluationError, FlagEvaluator, FlagOptions};
use crate::overrides::{FlagValue, OverridesBag};
use crate::sync::{FlagSource, OverrideTransport, SyncError};

/// In-memory evaluator that records how it was called.
#[derive(Default)]
pub struct MockFlagEvaluator {
    flags: HashMap<String, FlagValue>,
    payloads: HashMap<String, Value>,
    failing: bool,
    get_flag_calls: AtomicUsize,
    get_payload_calls: AtomicUsize,
    last_match_value: Mutex<Option<FlagValue>>,
}

impl MockFlagEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(mut self, key: &str, value: FlagValue, payload: Option<Value>) -> Self {
        self.flags.insert(key.to_string(), value);
        if let Some(payload) = payload {
            self.payloads.insert(key.to_string(), payload);
        }
        self
    }

    /// Every call fails as if the flags service were down.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn get_flag_calls(&self) -> usize {
        self.get_flag_calls.load(Ordering::SeqCst)
    }

    pub fn get_payload_calls(&self) -> usize {
        self.get_payload_calls.load(Ordering::SeqCst)
    }

    pub fn last_match_value(&self) -> Option<FlagValue> {
        self.last_match_value.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), EvaluationError> {
        if self.failing {
            Err(EvaluationError::UnexpectedStatus(
                StatusCode::SERVICE_UNAVAILABLE,
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FlagEvaluator for MockFlagEvaluator {
    async fn get_flag(
        &self,
        key: &str,
        _distinct_id: &str,
        _options: &FlagOptions,
    ) -> Result<FlagValue, EvaluationError> {
        self.get_flag_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.flags.get(key).cloned().unwrap_or_default())
    }

    async fn get_flag_payload(
        &self,
        key: &str,
        _distinct_id: &str,
        match_value: Option<FlagValue>,
        _options: &FlagOptions,
    ) -> Result<Option<Value>, EvaluationError> {
        self.get_payload_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_match_value.lock().unwrap() = match_value;
        self.check()?;
        Ok(self.payloads.get(key).cloned())
    }

    async fn get_all_flags(
        &self,
        _distinct_id: &str,
        _options: &FlagOptions,
    ) -> Result<HashMap<String, FlagValue>, EvaluationError> {
        self.check()?;
        Ok(self.flags.clone())
    }
}

/// A client-side flag library stand-in. Flags change only when the test says
/// so, and listeners are told only through `notify_change`.
pub struct MockFlagSource {
    // Insertion order, so keys come back the way they were added.
    flags: Mutex<Vec<(String, Option<FlagValue>, Option<Value>)>>,
    ready: watch::Sender<bool>,
    changes: broadcast::Sender<()>,
}

impl Default for MockFlagSource {
    fn default() -> Self {
        let (ready, _) = watch::channel(false);
        let (changes, _) = broadcast::channel(16);
        MockFlagSource {
            flags: Mutex::new(Vec::new()),
            ready,
            changes,
        }
    }
}

impl MockFlagSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(self, key: &str, value: Option<FlagValue>, payload: Option<Value>) -> Self {
        self.flags
            .lock()
            .unwrap()
            .push((key.to_string(), value, payload));
        self
    }

    /// Updates a value in place, or appends the key if it is new.
    pub fn set_flag(&self, key: &str, value: Option<FlagValue>) {
        let mut flags = self.flags.lock().unwrap();
        match flags.iter_mut().find(|(k, _, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => flags.push((key.to_string(), value, None)),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    pub fn notify_change(&self) {
        // No subscribers is fine.
        self.changes.send(()).ok();
    }
}

#[async_trait]
impl FlagSource for MockFlagSource {
    async fn flags_ready(&self) {
        let mut ready = self.ready.subscribe();
        if ready.wait_for(|ready| *ready).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }

    fn flag_keys(&self) -> Vec<String> {
        let flags = self.flags.lock().unwrap();
        flags.iter().map(|(key, _, _)| key.clone()).collect()
    }

    fn flag_value(&self, key: &str) -> Option<FlagValue> {
        let flags = self.flags.lock().unwrap();
        flags
            .iter()
            .find(|(k, _, _)| k == key)
            .and_then(|(_, value, _)| value.clone())
    }

    fn flag_payload(&self, key: &str) -> Option<Value> {
        let flags = self.flags.lock().unwrap();
        flags
            .iter()
            .find(|(k, _, _)| k == key)
            .and_then(|(_, _, payload)| payload.clone())
    }
}

/// Records what would have been sent to the override endpoint.
#[derive(Default)]
pub struct RecordingTransport {
    pushes: Mutex<Vec<OverridesBag>>,
    attempts: AtomicUsize,
    clears: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Successful pushes only.
    pub fn pushes(&self) -> Vec<OverridesBag> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), SyncError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SyncError::UnexpectedStatus(StatusCode::INTERNAL_SERVER_ERROR))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl OverrideTransport for RecordingTransport {
    async fn push(&self, bag: &OverridesBag) -> Result<(), SyncError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.pushes.lock().unwrap().push(bag.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SyncError> {
        self.check()?;
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
