//! Scripted delegation redeemer.
//!
//! Outcomes are queued per subscription and consumed in order. When a
//! subscription's queue is empty the default outcome applies, which starts
//! out as a successful settlement.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::foundation::SubscriptionId;
use crate::ports::{DelegationRedeemer, RedemptionError, RedemptionRequest, SettlementReference};

type Outcome = Result<SettlementReference, RedemptionError>;

struct State {
    scripted: HashMap<SubscriptionId, VecDeque<Outcome>>,
    default_outcome: Outcome,
    calls: Vec<RedemptionRequest>,
}

pub struct MockDelegationRedeemer {
    state: Mutex<State>,
}

impl Default for MockDelegationRedeemer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDelegationRedeemer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                scripted: HashMap::new(),
                default_outcome: Ok(SettlementReference::new("0xsettled")),
                calls: Vec::new(),
            }),
        }
    }

    /// Every unscripted call fails with `error`.
    pub fn failing_with(error: RedemptionError) -> Self {
        let redeemer = Self::new();
        redeemer.lock().default_outcome = Err(error);
        redeemer
    }

    pub fn push_outcome(&self, subscription_id: SubscriptionId, outcome: Outcome) {
        self.lock()
            .scripted
            .entry(subscription_id)
            .or_default()
            .push_back(outcome);
    }

    pub fn calls(&self) -> Vec<RedemptionRequest> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, subscription_id: &SubscriptionId) -> Vec<RedemptionRequest> {
        self.lock()
            .calls
            .iter()
            .filter(|r| &r.subscription_id == subscription_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DelegationRedeemer for MockDelegationRedeemer {
    async fn redeem(&self, request: &RedemptionRequest) -> Outcome {
        let mut state = self.lock();
        state.calls.push(request.clone());
        let scripted = state
            .scripted
            .get_mut(&request.subscription_id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(outcome) => outcome,
            None => state.default_outcome.clone(),
        }
    }
}
