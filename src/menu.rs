//! Menu catalog, customer identity, and agent instruction assembly.
//!
//! The catalog is loaded from a JSON file at startup and is read-only for
//! the rest of the session. It feeds two consumers: the system instructions
//! sent in the session setup, and price lookup when the agent reports a
//! cart change without a price.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MenuError {
    #[error("Failed to read menu file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid menu JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Menu has no items")]
    Empty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuVariation {
    pub label: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    pub name: String,
    #[serde(default)]
    pub variations: Vec<MenuVariation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuCategory {
    pub name: String,
    #[serde(default)]
    pub items: Vec<MenuItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuCatalog {
    pub restaurant: String,
    #[serde(default)]
    pub categories: Vec<MenuCategory>,
}

/// Returning customer details injected into the agent instructions so the
/// agent can greet by name and skip re-asking for contact details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerIdentity {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub saved_addresses: Vec<String>,
}

impl MenuCatalog {
    pub fn from_json_file(path: &Path) -> Result<Self, MenuError> {
        let raw = std::fs::read_to_string(path)?;
        let catalog: MenuCatalog = serde_json::from_str(&raw)?;
        if catalog.item_count() == 0 {
            return Err(MenuError::Empty);
        }
        Ok(catalog)
    }

    pub fn item_count(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum()
    }

    /// Case- and whitespace-insensitive price lookup for a menu variation.
    /// Items without variations match on an empty variation label.
    pub fn find_price(&self, item_name: &str, variation_label: &str) -> Option<f64> {
        let want_item = normalize(item_name);
        let want_variation = normalize(variation_label);
        for category in &self.categories {
            for item in &category.items {
                if normalize(&item.name) != want_item {
                    continue;
                }
                for variation in &item.variations {
                    if normalize(&variation.label) == want_variation {
                        return Some(variation.price);
                    }
                }
            }
        }
        None
    }
}

/// Lowercases, trims, and collapses inner whitespace runs to single spaces.
/// Shared by price lookup here and cart line identity in the order draft.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Builds the system instructions for the ordering agent from the catalog
/// and optional returning-customer context.
pub fn build_instructions(menu: &MenuCatalog, customer: Option<&CustomerIdentity>) -> String {
    let mut sections = Vec::new();

    sections.push(format!(
        "You are a friendly waiter taking a phone order for {}. \
         Speak naturally and conversationally, like a real person on a call. \
         No markdown, no lists, no emoji in your speech. Keep each reply short.",
        menu.restaurant
    ));

    let mut listing = String::from("MENU:\n");
    for category in &menu.categories {
        listing.push_str(&format!("{}:\n", category.name));
        for item in &category.items {
            if item.variations.is_empty() {
                listing.push_str(&format!("- {}\n", item.name));
            } else {
                let variations = item
                    .variations
                    .iter()
                    .map(|v| format!("{} ${:.2}", v.label, v.price))
                    .collect::<Vec<_>>()
                    .join(", ");
                listing.push_str(&format!("- {}: {}\n", item.name, variations));
            }
        }
    }
    sections.push(listing.trim_end().to_string());

    sections.push(
        "ORDER TOOL RULES:\n\
         1. Call updateOrder the moment the customer adds, changes, or removes \
         anything. Never wait until the end to report the cart.\n\
         2. Every updateOrder item needs the exact menu name, the variation, the \
         price from the menu, and the quantity.\n\
         3. When the customer says they are done, confirm the order back to them, \
         then call completeOrder with their name, phone number, whether it is \
         pickup or delivery, the delivery address if they chose delivery, and a \
         short summary of the order.\n\
         4. Only offer what is on the menu. If something is not on the menu, say \
         so and suggest the closest thing that is."
            .to_string(),
    );

    if let Some(customer) = customer {
        let mut context = format!(
            "KNOWN CUSTOMER: {} (phone {}). Greet them by name and do not ask \
             for their name or phone again.",
            customer.name, customer.phone
        );
        if !customer.saved_addresses.is_empty() {
            context.push_str(&format!(
                " Saved delivery addresses: {}. If they choose delivery, offer \
                 these before asking for a new address.",
                customer.saved_addresses.join("; ")
            ));
        }
        sections.push(context);
    }

    sections.join("\n\n")
}

/// First message to the agent once the session opens, so the agent speaks
/// first instead of sitting silent until the customer does.
pub fn greeting_prompt(customer: Option<&CustomerIdentity>) -> String {
    match customer {
        Some(c) if !c.name.is_empty() => format!(
            "Greet {} by name and ask what they would like to order today.",
            c.name
        ),
        _ => "Greet the customer and ask what they would like to order today.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_menu() -> MenuCatalog {
        MenuCatalog {
            restaurant: "Pozolería La Villa".to_string(),
            categories: vec![
                MenuCategory {
                    name: "Pozoles".to_string(),
                    items: vec![MenuItem {
                        name: "Pozole Rojo".to_string(),
                        variations: vec![
                            MenuVariation {
                                label: "Chico".to_string(),
                                price: 65.0,
                            },
                            MenuVariation {
                                label: "Grande".to_string(),
                                price: 85.0,
                            },
                        ],
                    }],
                },
                MenuCategory {
                    name: "Bebidas".to_string(),
                    items: vec![MenuItem {
                        name: "Agua de Jamaica".to_string(),
                        variations: vec![MenuVariation {
                            label: "Medio litro".to_string(),
                            price: 25.0,
                        }],
                    }],
                },
            ],
        }
    }

    #[test]
    fn test_load_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&sample_menu()).unwrap();
        file.write_all(json.as_bytes()).unwrap();
        let catalog = MenuCatalog::from_json_file(file.path()).unwrap();
        assert_eq!(catalog.restaurant, "Pozolería La Villa");
        assert_eq!(catalog.item_count(), 2);
    }

    #[test]
    fn test_empty_menu_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"restaurant": "Nada", "categories": []}"#)
            .unwrap();
        assert!(matches!(
            MenuCatalog::from_json_file(file.path()),
            Err(MenuError::Empty)
        ));
    }

    #[test]
    fn test_price_lookup_ignores_case_and_whitespace() {
        let menu = sample_menu();
        assert_eq!(menu.find_price("  pozole   ROJO ", "grande"), Some(85.0));
        assert_eq!(menu.find_price("Pozole Rojo", "Mediano"), None);
        assert_eq!(menu.find_price("Tacos", "Chico"), None);
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize("  Pozole \t Rojo  "), "pozole rojo");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_instructions_carry_menu_and_rules() {
        let menu = sample_menu();
        let instructions = build_instructions(&menu, None);
        assert!(instructions.contains("Pozolería La Villa"));
        assert!(instructions.contains("Pozole Rojo: Chico $65.00, Grande $85.00"));
        assert!(instructions.contains("updateOrder"));
        assert!(instructions.contains("completeOrder"));
        assert!(!instructions.contains("KNOWN CUSTOMER"));
    }

    #[test]
    fn test_instructions_include_customer_context() {
        let menu = sample_menu();
        let customer = CustomerIdentity {
            name: "Ana".to_string(),
            phone: "555-0123".to_string(),
            saved_addresses: vec!["Calle 5 de Mayo 12".to_string()],
        };
        let instructions = build_instructions(&menu, Some(&customer));
        assert!(instructions.contains("KNOWN CUSTOMER: Ana (phone 555-0123)"));
        assert!(instructions.contains("Calle 5 de Mayo 12"));
    }

    #[test]
    fn test_greeting_uses_customer_name_when_known() {
        let customer = CustomerIdentity {
            name: "Ana".to_string(),
            ..Default::default()
        };
        assert!(greeting_prompt(Some(&customer)).contains("Ana"));
        assert!(greeting_prompt(None).contains("customer"));
    }
}
