//! Interprets agent tool calls as order draft edits.
//!
//! The contract is deliberately permissive: every call in a batch is
//! acknowledged with `{success: true}`, including malformed payloads and
//! impossible edits, because the agent's conversational flow stalls on any
//! tool failure. Malformed payloads become logged no-ops.

use crate::menu::MenuCatalog;
use crate::order::draft::{DeliveryMethod, OrderDraft};
use crate::session::wire::{ToolCall, ToolResult};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum UpdateAction {
    Add,
    Update,
    Remove,
}

#[derive(Debug, Deserialize)]
struct UpdateOrderArgs {
    action: UpdateAction,
    item: UpdateItem,
}

#[derive(Debug, Deserialize)]
struct UpdateItem {
    name: String,
    #[serde(default)]
    variation: String,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompleteOrderArgs {
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    customer_phone: Option<String>,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    delivery_address: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// What a dispatched batch did, so the controller knows which downstream
/// updates to publish.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub results: Vec<ToolResult>,
    pub cart_changed: bool,
    pub finalization_touched: bool,
}

/// Applies `updateOrder` and `completeOrder` calls to the draft.
///
/// Holds the menu catalog only to cross-check prices the agent reports;
/// a mismatch is logged, never corrected, since the agent quoted that
/// price to the customer out loud.
pub struct ToolDispatcher {
    menu: MenuCatalog,
}

impl ToolDispatcher {
    pub fn new(menu: MenuCatalog) -> Self {
        ToolDispatcher { menu }
    }

    /// Processes one tool-call batch against the draft.
    ///
    /// Results come back for every call, in call order, and must be flushed
    /// to the agent as one batch after the whole event is processed.
    pub fn dispatch_batch(&self, draft: &mut OrderDraft, calls: &[ToolCall]) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        for call in calls {
            match call.name.as_str() {
                "updateOrder" => {
                    if self.apply_update(draft, call) {
                        outcome.cart_changed = true;
                    }
                }
                "completeOrder" => {
                    if self.apply_completion(draft, call) {
                        outcome.finalization_touched = true;
                    }
                }
                other => {
                    log::warn!("Ignoring unknown tool call '{}' (id {})", other, call.id);
                }
            }
            outcome.results.push(ToolResult::success(call.id.clone()));
        }
        outcome
    }

    /// Records a user-made delivery choice on the draft. Goes through the
    /// dispatcher so tool calls and user intents funnel draft mutations
    /// through one place.
    pub fn apply_delivery_choice(
        &self,
        draft: &mut OrderDraft,
        method: DeliveryMethod,
        address: Option<String>,
    ) {
        draft.delivery_method = Some(method);
        if let Some(address) = address {
            draft.delivery_address = Some(address);
        }
        log::info!("🛵 Delivery method set by customer: {method}");
    }

    fn apply_update(&self, draft: &mut OrderDraft, call: &ToolCall) -> bool {
        let args: UpdateOrderArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(e) => {
                log::warn!("Malformed updateOrder payload (id {}): {e}", call.id);
                return false;
            }
        };
        let item = &args.item;
        if let (Some(reported), Some(listed)) =
            (item.price, self.menu.find_price(&item.name, &item.variation))
        {
            if (reported - listed).abs() > f64::EPSILON {
                log::warn!(
                    "Agent quoted {} / {} at ${:.2}, menu says ${:.2}",
                    item.name,
                    item.variation,
                    reported,
                    listed
                );
            }
        }
        let changed = match args.action {
            UpdateAction::Add => draft.add_line(&item.name, &item.variation, item.price, item.quantity),
            UpdateAction::Update => {
                draft.update_line(&item.name, &item.variation, item.price, item.quantity)
            }
            UpdateAction::Remove => draft.remove_line(&item.name, &item.variation),
        };
        if changed {
            log::info!(
                "🛒 Cart {:?}: {} / {} (qty {:?})",
                args.action,
                item.name,
                item.variation,
                item.quantity.unwrap_or(1)
            );
        }
        changed
    }

    fn apply_completion(&self, draft: &mut OrderDraft, call: &ToolCall) -> bool {
        let args: CompleteOrderArgs = match serde_json::from_value(call.args.clone()) {
            Ok(args) => args,
            Err(e) => {
                log::warn!("Malformed completeOrder payload (id {}): {e}", call.id);
                return false;
            }
        };
        if let Some(name) = args.customer_name.filter(|n| !n.trim().is_empty()) {
            draft.customer_name = name;
        }
        if let Some(phone) = args.customer_phone.filter(|p| !p.trim().is_empty()) {
            draft.customer_phone = phone;
        }
        // An absent orderType leaves the method alone so a follow-up call
        // that only carries the address cannot flip delivery back to pickup.
        if let Some(order_type) = args.order_type {
            draft.delivery_method = Some(if order_type.eq_ignore_ascii_case("delivery") {
                DeliveryMethod::Delivery
            } else {
                DeliveryMethod::Pickup
            });
        }
        if let Some(address) = args.delivery_address.filter(|a| !a.trim().is_empty()) {
            draft.delivery_address = Some(address);
        }
        if let Some(summary) = args.summary {
            log::debug!("Agent order summary: {summary}");
        }
        draft.finalize();
        log::info!(
            "✅ Order finalized: {} line(s), method {:?}",
            draft.lines().len(),
            draft.delivery_method
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::{MenuCategory, MenuItem, MenuVariation};
    use serde_json::json;

    fn menu() -> MenuCatalog {
        MenuCatalog {
            restaurant: "Pozolería La Villa".to_string(),
            categories: vec![MenuCategory {
                name: "Pozoles".to_string(),
                items: vec![MenuItem {
                    name: "Pozole".to_string(),
                    variations: vec![MenuVariation {
                        label: "Chico".to_string(),
                        price: 50.0,
                    }],
                }],
            }],
        }
    }

    fn update_call(id: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "updateOrder".to_string(),
            args,
        }
    }

    fn complete_call(id: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "completeOrder".to_string(),
            args,
        }
    }

    #[test]
    fn test_add_then_add_accumulates_one_line() {
        let dispatcher = ToolDispatcher::new(menu());
        let mut draft = OrderDraft::new();
        let calls = vec![
            update_call(
                "1",
                json!({"action": "add", "item": {"name": "Pozole", "variation": "Chico", "price": 50.0, "quantity": 1}}),
            ),
            update_call(
                "2",
                json!({"action": "add", "item": {"name": "Pozole", "variation": "Chico", "quantity": 2}}),
            ),
        ];
        let outcome = dispatcher.dispatch_batch(&mut draft, &calls);
        assert!(outcome.cart_changed);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(draft.lines().len(), 1);
        assert_eq!(draft.lines()[0].quantity, 3);
        assert_eq!(draft.lines()[0].unit_price, 50.0);
    }

    #[test]
    fn test_malformed_payload_is_acked_and_ignored() {
        let dispatcher = ToolDispatcher::new(menu());
        let mut draft = OrderDraft::new();
        let calls = vec![update_call("1", json!({"action": "add"}))];
        let outcome = dispatcher.dispatch_batch(&mut draft, &calls);
        assert!(!outcome.cart_changed);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].response["success"], true);
        assert!(draft.is_empty());
    }

    #[test]
    fn test_unknown_tool_is_acked_and_ignored() {
        let dispatcher = ToolDispatcher::new(menu());
        let mut draft = OrderDraft::new();
        let calls = vec![ToolCall {
            id: "x".to_string(),
            name: "launchMissiles".to_string(),
            args: json!({}),
        }];
        let outcome = dispatcher.dispatch_batch(&mut draft, &calls);
        assert_eq!(outcome.results.len(), 1);
        assert!(!outcome.cart_changed);
        assert!(!outcome.finalization_touched);
    }

    #[test]
    fn test_remove_absent_line_still_acks() {
        let dispatcher = ToolDispatcher::new(menu());
        let mut draft = OrderDraft::new();
        let calls = vec![update_call(
            "1",
            json!({"action": "remove", "item": {"name": "Tacos", "variation": ""}}),
        )];
        let outcome = dispatcher.dispatch_batch(&mut draft, &calls);
        assert!(!outcome.cart_changed);
        assert_eq!(outcome.results[0].response["success"], true);
    }

    #[test]
    fn test_completion_records_contact_and_method() {
        let dispatcher = ToolDispatcher::new(menu());
        let mut draft = OrderDraft::new();
        let calls = vec![complete_call(
            "1",
            json!({"customerName": "Ana", "customerPhone": "555-1", "orderType": "pickup", "summary": "1 pozole"}),
        )];
        let outcome = dispatcher.dispatch_batch(&mut draft, &calls);
        assert!(outcome.finalization_touched);
        assert!(draft.is_finalized());
        assert_eq!(draft.customer_name, "Ana");
        assert_eq!(draft.customer_phone, "555-1");
        assert_eq!(draft.delivery_method, Some(DeliveryMethod::Pickup));
    }

    #[test]
    fn test_completion_without_order_type_keeps_existing_method() {
        let dispatcher = ToolDispatcher::new(menu());
        let mut draft = OrderDraft::new();
        dispatcher.dispatch_batch(
            &mut draft,
            &[complete_call("1", json!({"orderType": "delivery"}))],
        );
        assert_eq!(draft.delivery_method, Some(DeliveryMethod::Delivery));
        assert!(draft.delivery_address.is_none());

        dispatcher.dispatch_batch(
            &mut draft,
            &[complete_call("2", json!({"deliveryAddress": "Calle 1"}))],
        );
        assert_eq!(draft.delivery_method, Some(DeliveryMethod::Delivery));
        assert_eq!(draft.delivery_address.as_deref(), Some("Calle 1"));
    }

    #[test]
    fn test_unrecognized_order_type_falls_back_to_pickup() {
        let dispatcher = ToolDispatcher::new(menu());
        let mut draft = OrderDraft::new();
        dispatcher.dispatch_batch(
            &mut draft,
            &[complete_call("1", json!({"orderType": "dine-in"}))],
        );
        assert_eq!(draft.delivery_method, Some(DeliveryMethod::Pickup));
    }

    #[test]
    fn test_line_edits_after_completion_are_acked_noops() {
        let dispatcher = ToolDispatcher::new(menu());
        let mut draft = OrderDraft::new();
        dispatcher.dispatch_batch(
            &mut draft,
            &[
                update_call(
                    "1",
                    json!({"action": "add", "item": {"name": "Pozole", "variation": "Chico", "price": 50.0}}),
                ),
                complete_call("2", json!({"orderType": "pickup"})),
            ],
        );
        let outcome = dispatcher.dispatch_batch(
            &mut draft,
            &[update_call(
                "3",
                json!({"action": "add", "item": {"name": "Tostadas", "variation": ""}}),
            )],
        );
        assert!(!outcome.cart_changed);
        assert_eq!(outcome.results[0].response["success"], true);
        assert_eq!(draft.lines().len(), 1);
    }

    #[test]
    fn test_user_delivery_choice_applies_through_dispatcher() {
        let dispatcher = ToolDispatcher::new(menu());
        let mut draft = OrderDraft::new();
        dispatcher.apply_delivery_choice(
            &mut draft,
            DeliveryMethod::Delivery,
            Some("Calle 5 de Mayo 12".to_string()),
        );
        assert_eq!(draft.delivery_method, Some(DeliveryMethod::Delivery));
        assert_eq!(draft.delivery_address.as_deref(), Some("Calle 5 de Mayo 12"));
    }
}
