//! Decision adapter trait and the scripted test advisor.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use warden_core::BoxFuture;

use crate::error::AdvisorResult;
use crate::types::{Decision, DecisionRequest};

/// Source of decisions for dispatched entries.
pub trait DecisionAdapter: Send + Sync {
    fn decide(&self, request: DecisionRequest) -> BoxFuture<'_, AdvisorResult<Decision>>;
}

/// Arc wrapper for DecisionAdapter trait objects.
pub type DynAdvisor = Arc<dyn DecisionAdapter>;

/// Advisor that replays queued responses per symbol.
///
/// When a symbol's queue is empty the fallback decision is returned
/// (`skip` unless changed).
pub struct ScriptedAdvisor {
    scripts: Mutex<HashMap<String, VecDeque<AdvisorResult<Decision>>>>,
    fallback: Mutex<Decision>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl Default for ScriptedAdvisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAdvisor {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Decision::skip("no script")),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response for the next request about `symbol`.
    pub fn push(&self, symbol: &str, response: AdvisorResult<Decision>) {
        self.scripts
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn set_fallback(&self, decision: Decision) {
        *self.fallback.lock() = decision;
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().clone()
    }
}

impl DecisionAdapter for ScriptedAdvisor {
    fn decide(&self, request: DecisionRequest) -> BoxFuture<'_, AdvisorResult<Decision>> {
        Box::pin(async move {
            let scripted = self
                .scripts
                .lock()
                .get_mut(&request.symbol)
                .and_then(VecDeque::pop_front);
            self.requests.lock().push(request);
            match scripted {
                Some(response) => response.and_then(|d| d.validate().map(|()| d)),
                None => Ok(self.fallback.lock().clone()),
            }
        })
    }
}
