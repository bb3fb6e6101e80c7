//! Finalization state machine for the delivery negotiation.
//!
//! The state is a pure derivation of the order draft, advanced monotonically
//! so a late tool call can never drag the negotiation backwards. Entering a
//! state produces at most one guidance utterance for the agent to speak, and
//! reaching `ReadyToSubmit` arms a grace timer that auto-submits unless the
//! customer confirms or cancels first.

use crate::order::draft::{DeliveryMethod, OrderDraft};
use serde::Serialize;
use std::time::Duration;
use strum::Display;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FinalizationState {
    CollectingItems,
    AwaitingDeliveryMethod,
    AwaitingAddress,
    ReadyToSubmit,
    Submitted,
}

/// Derives the negotiation state from draft fields alone. `Submitted` is
/// never derived; only an explicit confirmation or the grace timer reaches
/// it, through [`FinalizationFlow`].
pub fn derive_state(draft: &OrderDraft) -> FinalizationState {
    if !draft.is_finalized() {
        return FinalizationState::CollectingItems;
    }
    match draft.delivery_method {
        None => FinalizationState::AwaitingDeliveryMethod,
        Some(DeliveryMethod::Delivery) if draft.delivery_address.is_none() => {
            FinalizationState::AwaitingAddress
        }
        Some(_) => FinalizationState::ReadyToSubmit,
    }
}

/// Guidance the agent should speak when the negotiation enters a state.
/// Collection has no prompt (the greeting covers it) and `Submitted` text
/// is only spoken on an explicit confirmation, never after the grace timer
/// already let the agent say goodbye.
pub fn guidance_prompt(state: FinalizationState) -> Option<&'static str> {
    match state {
        FinalizationState::CollectingItems => None,
        FinalizationState::AwaitingDeliveryMethod => Some(
            "Ask the customer whether this order is for pickup or delivery before anything else.",
        ),
        FinalizationState::AwaitingAddress => {
            Some("Ask the customer for their delivery address.")
        }
        FinalizationState::ReadyToSubmit => Some(
            "Read the full order back to the customer with the total, tell them it \
             will be sent to the kitchen in a moment, and say goodbye.",
        ),
        FinalizationState::Submitted => Some(
            "Tell the customer their order has been sent to the kitchen and thank them.",
        ),
    }
}

/// What a refresh decided, for the controller to act on.
#[derive(Debug, Default)]
pub struct FlowChange {
    pub entered: Option<FinalizationState>,
    pub prompt: Option<&'static str>,
    pub arm_auto_submit: Option<(CancellationToken, Duration)>,
}

/// Owns the monotone state, the one-prompt-per-state bookkeeping, and the
/// pending auto-submit token. The controller executes the side effects.
#[derive(Debug)]
pub struct FinalizationFlow {
    state: FinalizationState,
    prompted: Option<FinalizationState>,
    grace: Duration,
    auto_submit: Option<CancellationToken>,
}

impl FinalizationFlow {
    pub fn new(grace: Duration) -> Self {
        FinalizationFlow {
            state: FinalizationState::CollectingItems,
            prompted: None,
            grace,
            auto_submit: None,
        }
    }

    pub fn state(&self) -> FinalizationState {
        self.state
    }

    /// Re-derives the state from the draft and advances if it moved forward.
    ///
    /// Calling this repeatedly in the same state changes nothing; a prompt
    /// fires once per state entry. Advancing out of `ReadyToSubmit` by any
    /// path disarms the pending auto-submit.
    pub fn refresh(&mut self, draft: &OrderDraft) -> FlowChange {
        let derived = derive_state(draft);
        let mut change = FlowChange::default();
        if derived <= self.state {
            return change;
        }
        self.disarm();
        log::info!("📋 Finalization: {} -> {}", self.state, derived);
        self.state = derived;
        change.entered = Some(derived);
        if self.prompted != Some(derived) {
            self.prompted = Some(derived);
            change.prompt = guidance_prompt(derived);
        }
        if derived == FinalizationState::ReadyToSubmit {
            let token = CancellationToken::new();
            self.auto_submit = Some(token.clone());
            change.arm_auto_submit = Some((token, self.grace));
        }
        change
    }

    /// Explicit customer confirmation. True only on the one transition
    /// out of `ReadyToSubmit`.
    pub fn confirm(&mut self) -> bool {
        self.submit_from_ready("confirmed by customer")
    }

    /// Grace timer expiry. True only if the order was still awaiting
    /// submission when the timer fired.
    pub fn auto_submit_fired(&mut self) -> bool {
        self.submit_from_ready("auto-submitted after grace period")
    }

    /// Customer asked to hold the order. State stays `ReadyToSubmit`; only
    /// an explicit confirmation submits after this.
    pub fn cancel_auto_submit(&mut self) {
        if self.auto_submit.is_some() {
            log::info!("⏸️ Auto-submit cancelled by customer");
        }
        self.disarm();
    }

    /// Session teardown. Disarms any pending timer so nothing fires after
    /// close.
    pub fn shutdown(&mut self) {
        self.disarm();
    }

    fn submit_from_ready(&mut self, reason: &str) -> bool {
        if self.state != FinalizationState::ReadyToSubmit {
            return false;
        }
        self.disarm();
        self.state = FinalizationState::Submitted;
        self.prompted = Some(FinalizationState::Submitted);
        log::info!("📦 Order submitted ({reason})");
        true
    }

    fn disarm(&mut self) {
        if let Some(token) = self.auto_submit.take() {
            token.cancel();
        }
    }
}
