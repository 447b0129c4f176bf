//! Static catalog of purchasable repair services.
//!
//! The catalog is read-only at runtime; price changes require a deploy.
//! Item keys referenced from session state must be re-validated against
//! the catalog at order finalization, because a key picked early in a
//! long-lived session may no longer exist when the order is created.

use rust_decimal::Decimal;

use crate::error::BotError;

/// Sentinel selection value meaning "no second item".
pub const NO_SECOND_ITEM: &str = "none";

/// One purchasable catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct CatalogItem {
    /// Stable item key used in menu selection ids.
    pub key: &'static str,
    /// Customer-facing label.
    pub label: &'static str,
    /// Price in the configured currency.
    pub price: Decimal,
}

/// Read-only price table keyed by item key.
#[derive(Debug, Clone)]
pub struct Catalog {
    items: Vec<CatalogItem>,
}

impl Catalog {
    /// Creates a catalog from an explicit item list (used in tests to
    /// simulate catalog changes between selection and finalization).
    #[must_use]
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }

    /// The production price table.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            CatalogItem {
                key: "screen",
                label: "📱 מסך",
                price: Decimal::new(39_900, 2),
            },
            CatalogItem {
                key: "battery",
                label: "🔋 סוללה",
                price: Decimal::new(29_900, 2),
            },
            CatalogItem {
                key: "charge",
                label: "🔌 שקע טעינה",
                price: Decimal::new(34_900, 2),
            },
            CatalogItem {
                key: "delivery",
                label: "🚚 שליחות",
                price: Decimal::new(6_990, 2),
            },
            CatalogItem {
                key: "glass",
                label: "🛡️ מגן זכוכית",
                price: Decimal::new(4_900, 2),
            },
        ])
    }

    /// Looks up an item by key.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::InvalidItem`] if the key is not registered.
    pub fn price_of(&self, key: &str) -> Result<&CatalogItem, BotError> {
        self.items
            .iter()
            .find(|item| item.key == key)
            .ok_or_else(|| BotError::InvalidItem(key.to_string()))
    }

    /// Returns all items in display order.
    #[must_use]
    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }
}

/// Formats an amount for customer-facing text, e.g. `399.00 ₪`.
#[must_use]
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2} ₪", amount)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_of_known_item() {
        let catalog = Catalog::standard();
        let item = catalog.price_of("screen");
        let Ok(item) = item else {
            panic!("screen should be in the catalog");
        };
        assert_eq!(item.price, dec!(399.00));
        assert_eq!(item.label, "📱 מסך");
    }

    #[test]
    fn price_of_unknown_item_fails() {
        let catalog = Catalog::standard();
        let result = catalog.price_of("tape");
        assert!(matches!(result, Err(BotError::InvalidItem(_))));
    }

    #[test]
    fn sentinel_is_not_a_catalog_item() {
        let catalog = Catalog::standard();
        assert!(catalog.price_of(NO_SECOND_ITEM).is_err());
    }

    #[test]
    fn standard_catalog_has_five_items() {
        assert_eq!(Catalog::standard().items().len(), 5);
    }

    #[test]
    fn format_amount_two_decimals() {
        assert_eq!(format_amount(dec!(69.9)), "69.90 ₪");
        assert_eq!(format_amount(dec!(399)), "399.00 ₪");
    }
}
