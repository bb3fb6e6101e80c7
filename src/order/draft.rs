//! The shared order draft: cart lines plus delivery and contact fields.
//!
//! Line identity is the normalized (item name, variation) pair, so the
//! agent saying "pozole chico" twice lands on one line with quantity 2
//! instead of two lines. Line edits stop once the order is finalized;
//! delivery and contact fields keep merging until submission because the
//! agent fills them in over several turns.

use crate::menu::{normalize, CustomerIdentity};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Pickup,
    Delivery,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    pub id: String,
    pub item_name: String,
    pub variation_label: String,
    pub unit_price: f64,
    pub quantity: u32,
}

impl CartLine {
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

#[derive(Debug, Default)]
pub struct OrderDraft {
    lines: Vec<CartLine>,
    pub customer_name: String,
    pub customer_phone: String,
    pub delivery_method: Option<DeliveryMethod>,
    pub delivery_address: Option<String>,
    finalized: bool,
}

impl OrderDraft {
    pub fn new() -> Self {
        OrderDraft::default()
    }

    /// Starts a draft with the logged-in customer's contact details filled
    /// in, so a pickup order can finalize without the agent restating them.
    pub fn for_customer(customer: &CustomerIdentity) -> Self {
        OrderDraft {
            customer_name: customer.name.clone(),
            customer_phone: customer.phone.clone(),
            ..OrderDraft::default()
        }
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Marks the draft finalized. Line edits become no-ops from here on.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn total(&self) -> f64 {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Adds to the line for this identity key, or inserts one.
    ///
    /// An existing line keeps its price and gains `quantity` (default 1);
    /// a new line takes the given price (default 0). Returns false when
    /// the draft is finalized and nothing changed.
    pub fn add_line(
        &mut self,
        name: &str,
        variation: &str,
        price: Option<f64>,
        quantity: Option<u32>,
    ) -> bool {
        if self.finalized {
            log::debug!("Ignoring cart add after finalization: {name} / {variation}");
            return false;
        }
        let added = quantity.unwrap_or(1);
        match self.position(name, variation) {
            // The wire puts no bound on quantity; saturate instead of
            // overflowing.
            Some(i) => {
                let line = &mut self.lines[i];
                line.quantity = line.quantity.saturating_add(added);
            }
            None => self.lines.push(CartLine {
                id: Uuid::new_v4().to_string(),
                item_name: name.trim().to_string(),
                variation_label: variation.trim().to_string(),
                unit_price: price.unwrap_or(0.0),
                quantity: added,
            }),
        }
        true
    }

    /// Overwrites quantity (default 1) and, when given, price on the line
    /// for this identity key. Missing line falls back to an add.
    pub fn update_line(
        &mut self,
        name: &str,
        variation: &str,
        price: Option<f64>,
        quantity: Option<u32>,
    ) -> bool {
        if self.finalized {
            log::debug!("Ignoring cart update after finalization: {name} / {variation}");
            return false;
        }
        match self.position(name, variation) {
            Some(i) => {
                let line = &mut self.lines[i];
                line.quantity = quantity.unwrap_or(1);
                if let Some(price) = price {
                    line.unit_price = price;
                }
                true
            }
            None => self.add_line(name, variation, price, quantity),
        }
    }

    /// Deletes the line for this identity key. Absent key is a no-op.
    pub fn remove_line(&mut self, name: &str, variation: &str) -> bool {
        if self.finalized {
            log::debug!("Ignoring cart remove after finalization: {name} / {variation}");
            return false;
        }
        match self.position(name, variation) {
            Some(i) => {
                self.lines.remove(i);
                true
            }
            None => false,
        }
    }

    fn position(&self, name: &str, variation: &str) -> Option<usize> {
        let want = (normalize(name), normalize(variation));
        self.lines.iter().position(|line| {
            (normalize(&line.item_name), normalize(&line.variation_label)) == want
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_accumulates_quantity_on_same_identity_key() {
        let mut draft = OrderDraft::new();
        draft.add_line("Pozole", "Chico", Some(50.0), Some(1));
        draft.add_line("pozole", "  chico ", None, Some(2));
        assert_eq!(draft.lines().len(), 1);
        assert_eq!(draft.lines()[0].quantity, 3);
        assert_eq!(draft.lines()[0].unit_price, 50.0);
    }

    #[test]
    fn test_add_saturates_quantity_instead_of_overflowing() {
        let mut draft = OrderDraft::new();
        draft.add_line("Pozole", "Chico", Some(50.0), Some(3_000_000_000));
        draft.add_line("Pozole", "Chico", None, Some(3_000_000_000));
        assert_eq!(draft.lines().len(), 1);
        assert_eq!(draft.lines()[0].quantity, u32::MAX);
    }

    #[test]
    fn test_distinct_variations_are_distinct_lines() {
        let mut draft = OrderDraft::new();
        draft.add_line("Pozole", "Chico", Some(50.0), None);
        draft.add_line("Pozole", "Grande", Some(80.0), None);
        assert_eq!(draft.lines().len(), 2);
        assert_eq!(draft.total(), 130.0);
    }

    #[test]
    fn test_update_overwrites_quantity_and_price() {
        let mut draft = OrderDraft::new();
        draft.add_line("Pozole", "Chico", Some(50.0), Some(3));
        draft.update_line("Pozole", "Chico", Some(55.0), Some(2));
        assert_eq!(draft.lines()[0].quantity, 2);
        assert_eq!(draft.lines()[0].unit_price, 55.0);
    }

    #[test]
    fn test_update_without_price_keeps_existing_price() {
        let mut draft = OrderDraft::new();
        draft.add_line("Pozole", "Chico", Some(50.0), Some(3));
        draft.update_line("Pozole", "Chico", None, Some(5));
        assert_eq!(draft.lines()[0].quantity, 5);
        assert_eq!(draft.lines()[0].unit_price, 50.0);
    }

    #[test]
    fn test_update_missing_line_behaves_like_add() {
        let mut draft = OrderDraft::new();
        draft.update_line("Tostadas", "", Some(20.0), None);
        assert_eq!(draft.lines().len(), 1);
        assert_eq!(draft.lines()[0].quantity, 1);
    }

    #[test]
    fn test_remove_deletes_and_tolerates_absent_key() {
        let mut draft = OrderDraft::new();
        draft.add_line("Pozole", "Chico", Some(50.0), None);
        assert!(draft.remove_line("POZOLE", "chico"));
        assert!(draft.is_empty());
        assert!(!draft.remove_line("Pozole", "Chico"));
    }

    #[test]
    fn test_line_edits_stop_after_finalization() {
        let mut draft = OrderDraft::new();
        draft.add_line("Pozole", "Chico", Some(50.0), None);
        draft.finalize();
        assert!(!draft.add_line("Tostadas", "", Some(20.0), None));
        assert!(!draft.update_line("Pozole", "Chico", None, Some(9)));
        assert!(!draft.remove_line("Pozole", "Chico"));
        assert_eq!(draft.lines().len(), 1);
        assert_eq!(draft.lines()[0].quantity, 1);
    }

    #[test]
    fn test_missing_price_defaults_to_zero() {
        let mut draft = OrderDraft::new();
        draft.add_line("Agua de Jamaica", "Medio litro", None, None);
        assert_eq!(draft.lines()[0].unit_price, 0.0);
        assert_eq!(draft.total(), 0.0);
    }

    #[test]
    fn test_customer_prefill() {
        let customer = CustomerIdentity {
            name: "Ana".to_string(),
            phone: "555-0123".to_string(),
            saved_addresses: vec![],
        };
        let draft = OrderDraft::for_customer(&customer);
        assert_eq!(draft.customer_name, "Ana");
        assert_eq!(draft.customer_phone, "555-0123");
    }
}
