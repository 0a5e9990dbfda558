//! Cart Aggregate
//!
//! The cart lives inside the user document. Lines are keyed by product plus
//! the chosen variant option; prices are never stored on the line and are
//! resolved against the current catalog whenever the cart is viewed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::product::{Product, ProductError, Selection};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    lines: Vec<CartLine>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub option_id: Option<Uuid>,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    fn matches(&self, product_id: Uuid, variant_id: Option<Uuid>, option_id: Option<Uuid>) -> bool {
        self.product_id == product_id && self.variant_id == variant_id && self.option_id == option_id
    }
}

/// A cart line resolved against the catalog.
#[derive(Clone, Debug, Serialize)]
pub struct PricedLine {
    pub line_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub option_id: Option<Uuid>,
    pub quantity: u32,
    pub name: String,
    pub image: Option<String>,
    pub variant_name: Option<String>,
    pub option_name: Option<String>,
    pub sku: Option<String>,
    pub unit_price: i64,
    pub weight: u32,
    pub line_total: i64,
    pub stock: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable: Option<String>,
}

impl PricedLine {
    pub fn is_available(&self) -> bool { self.unavailable.is_none() }
}

#[derive(Clone, Debug, Serialize)]
pub struct CartView {
    pub lines: Vec<PricedLine>,
    pub subtotal: i64,
    /// Grams, available lines only
    pub total_weight: u32,
    pub item_count: u32,
}

impl CartView {
    pub fn unavailable_lines(&self) -> impl Iterator<Item = &PricedLine> {
        self.lines.iter().filter(|l| !l.is_available())
    }
}

impl Cart {
    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn line(&self, line_id: Uuid) -> Option<&CartLine> { self.lines.iter().find(|l| l.id == line_id) }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }
    pub fn item_count(&self) -> u32 { self.lines.iter().map(|l| l.quantity).sum() }
    pub fn product_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.lines.iter().map(|l| l.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Adds `quantity` of the selected option. An existing line for the same
    /// product and option is incremented instead of duplicated.
    pub fn add(&mut self, selection: Selection<'_>, quantity: u32) -> Result<&CartLine, CartError> {
        if quantity == 0 { return Err(CartError::InvalidQuantity); }
        let product_id = selection.product.id;
        let variant_id = selection.variant.map(|v| v.id);
        let option_id = selection.option.map(|o| o.id);
        let available = selection.stock();

        let idx = match self.lines.iter().position(|l| l.matches(product_id, variant_id, option_id)) {
            Some(idx) => {
                let wanted = self.lines[idx].quantity.saturating_add(quantity);
                if wanted > available { return Err(CartError::ExceedsStock { available }); }
                self.lines[idx].quantity = wanted;
                idx
            }
            None => {
                if quantity > available { return Err(CartError::ExceedsStock { available }); }
                self.lines.push(CartLine { id: Uuid::now_v7(), product_id, variant_id, option_id, quantity, added_at: Utc::now() });
                self.lines.len() - 1
            }
        };
        Ok(&self.lines[idx])
    }

    /// Replaces the quantity of a line; zero removes it.
    pub fn set_quantity(&mut self, line_id: Uuid, quantity: u32, available: u32) -> Result<(), CartError> {
        if quantity == 0 { return self.remove(line_id); }
        let line = self.lines.iter_mut().find(|l| l.id == line_id).ok_or(CartError::ItemNotFound)?;
        if quantity > available { return Err(CartError::ExceedsStock { available }); }
        line.quantity = quantity;
        Ok(())
    }

    pub fn remove(&mut self, line_id: Uuid) -> Result<(), CartError> {
        let before = self.lines.len();
        self.lines.retain(|l| l.id != line_id);
        if self.lines.len() == before { return Err(CartError::ItemNotFound); }
        Ok(())
    }

    pub fn clear(&mut self) { self.lines.clear(); }

    pub fn price(&self, products: &HashMap<Uuid, Product>) -> CartView {
        let lines: Vec<PricedLine> = self.lines.iter().map(|line| price_line(line, products.get(&line.product_id))).collect();
        let available = lines.iter().filter(|l| l.is_available());
        CartView {
            subtotal: available.clone().fold(0, |total, l| total.saturating_add(l.line_total)),
            total_weight: available.clone().fold(0, |total, l| total.saturating_add(l.weight.saturating_mul(l.quantity))),
            item_count: available.fold(0, |total, l| total.saturating_add(l.quantity)),
            lines,
        }
    }
}

fn price_line(line: &CartLine, product: Option<&Product>) -> PricedLine {
    let mut priced = PricedLine {
        line_id: line.id, product_id: line.product_id, variant_id: line.variant_id, option_id: line.option_id,
        quantity: line.quantity, name: String::new(), image: None, variant_name: None, option_name: None, sku: None,
        unit_price: 0, weight: 0, line_total: 0, stock: 0, unavailable: None,
    };
    let Some(product) = product else {
        priced.unavailable = Some(ProductError::Unavailable.to_string());
        return priced;
    };
    priced.name = product.name.clone();
    priced.image = product.images.first().cloned();
    match product.select(line.variant_id, line.option_id) {
        Ok(sel) => {
            priced.variant_name = sel.variant_name().map(str::to_string);
            priced.option_name = sel.option_name().map(str::to_string);
            priced.sku = sel.sku().map(|s| s.to_string());
            priced.unit_price = sel.unit_price();
            priced.weight = sel.weight();
            priced.line_total = sel.unit_price().saturating_mul(i64::from(line.quantity));
            priced.stock = sel.stock();
            if line.quantity > sel.stock() {
                priced.unavailable = Some(ProductError::InsufficientStock { available: sel.stock() }.to_string());
            }
        }
        Err(e) => priced.unavailable = Some(e.to_string()),
    }
    priced
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CartError { ItemNotFound, InvalidQuantity, ExceedsStock { available: u32 } }
impl std::error::Error for CartError {}
impl std::fmt::Display for CartError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ItemNotFound => write!(f, "Item not found in cart"),
            Self::InvalidQuantity => write!(f, "Quantity must be at least 1"),
            Self::ExceedsStock { available } => write!(f, "Only {available} left in stock"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::tests::{plain_draft, shirt_draft};

    #[test]
    fn test_same_option_twice_increments_quantity() {
        let shirt = Product::create(shirt_draft(Uuid::now_v7())).unwrap();
        let (v, o) = (Some(shirt.variants[0].id), Some(shirt.variants[0].options[1].id));
        let mut cart = Cart::default();
        cart.add(shirt.select(v, o).unwrap(), 2).unwrap();
        cart.add(shirt.select(v, o).unwrap(), 1).unwrap();
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 3);

        let other = Some(shirt.variants[0].options[0].id);
        cart.add(shirt.select(v, other).unwrap(), 1).unwrap();
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.item_count(), 4);
    }

    #[test]
    fn test_huge_prices_saturate_instead_of_overflowing() {
        let mut draft = plain_draft(Uuid::now_v7());
        draft.price = i64::MAX;
        let gold = Product::create(draft).unwrap();
        let kopi = Product::create(plain_draft(Uuid::now_v7())).unwrap();
        let mut cart = Cart::default();
        cart.add(gold.select(None, None).unwrap(), 3).unwrap();
        cart.add(kopi.select(None, None).unwrap(), 1).unwrap();

        let view = cart.price(&HashMap::from([(gold.id, gold.clone()), (kopi.id, kopi.clone())]));
        assert_eq!(view.lines[0].line_total, i64::MAX);
        assert_eq!(view.subtotal, i64::MAX);
    }

    #[test]
    fn test_add_is_bounded_by_stock() {
        let kopi = Product::create(plain_draft(Uuid::now_v7())).unwrap();
        let mut cart = Cart::default();
        cart.add(kopi.select(None, None).unwrap(), 8).unwrap();
        assert_eq!(cart.add(kopi.select(None, None).unwrap(), 3).unwrap_err(), CartError::ExceedsStock { available: 10 });
        assert_eq!(cart.add(kopi.select(None, None).unwrap(), 0).unwrap_err(), CartError::InvalidQuantity);
    }

    #[test]
    fn test_zero_quantity_removes_line() {
        let kopi = Product::create(plain_draft(Uuid::now_v7())).unwrap();
        let mut cart = Cart::default();
        let line_id = cart.add(kopi.select(None, None).unwrap(), 1).unwrap().id;
        cart.set_quantity(line_id, 4, kopi.stock).unwrap();
        assert_eq!(cart.lines()[0].quantity, 4);
        cart.set_quantity(line_id, 0, kopi.stock).unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.remove(line_id).unwrap_err(), CartError::ItemNotFound);
    }

    #[test]
    fn test_price_resolves_options_and_flags_missing_products() {
        let category = Uuid::now_v7();
        let kopi = Product::create(plain_draft(category)).unwrap();
        let shirt = Product::create(shirt_draft(category)).unwrap();
        let (v, o) = (Some(shirt.variants[0].id), Some(shirt.variants[0].options[0].id));

        let mut cart = Cart::default();
        cart.add(kopi.select(None, None).unwrap(), 2).unwrap();
        cart.add(shirt.select(v, o).unwrap(), 1).unwrap();

        let mut products = HashMap::from([(kopi.id, kopi.clone()), (shirt.id, shirt.clone())]);
        let view = cart.price(&products);
        assert_eq!(view.subtotal, 2 * 85_000 + 60_000);
        assert_eq!(view.total_weight, 2 * 250 + 200);
        assert_eq!(view.item_count, 3);
        assert_eq!(view.lines[1].option_name.as_deref(), Some("Red"));

        products.remove(&shirt.id);
        let view = cart.price(&products);
        assert_eq!(view.subtotal, 170_000);
        assert_eq!(view.unavailable_lines().count(), 1);
    }
}
