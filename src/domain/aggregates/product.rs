//! Product Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::value_objects::{not_blank, Sku};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    /// Rupiah. For products with variants this is the cheapest option price.
    pub price: i64,
    /// For products with variants this is the sum of option stock.
    pub stock: u32,
    /// Grams
    pub weight: u32,
    pub category_id: Uuid,
    pub subcategory_id: Option<Uuid>,
    pub images: Vec<String>,
    pub variants: Vec<Variant>,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Variant { pub id: Uuid, pub name: String, pub options: Vec<VariantOption> }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantOption { pub id: Uuid, pub name: String, pub stock: u32, pub price: i64, pub weight: u32, pub sku: Option<Sku> }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus { #[default] Active, Archived }

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Active => "active", Self::Archived => "archived" }
    }
}

impl std::str::FromStr for ProductStatus {
    type Err = crate::domain::value_objects::UnknownVariant;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            other => Err(crate::domain::value_objects::UnknownVariant(other.to_string())),
        }
    }
}

/// Editable product fields, as submitted by the back office.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct ProductDraft {
    #[validate(length(min = 1, max = 200, message = "name is required"), custom = "not_blank")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[validate(range(min = 0, message = "price cannot be negative"))]
    pub price: i64,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub weight: u32,
    pub category_id: Uuid,
    pub subcategory_id: Option<Uuid>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    #[validate]
    pub variants: Vec<VariantDraft>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct VariantDraft {
    pub id: Option<Uuid>,
    #[validate(length(min = 1, message = "variant name is required"), custom = "not_blank")]
    pub name: String,
    #[validate]
    pub options: Vec<OptionDraft>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct OptionDraft {
    pub id: Option<Uuid>,
    #[validate(length(min = 1, message = "option name is required"), custom = "not_blank")]
    pub name: String,
    #[serde(default)]
    pub stock: u32,
    #[validate(range(min = 0, message = "price cannot be negative"))]
    pub price: i64,
    #[serde(default)]
    pub weight: u32,
    pub sku: Option<String>,
}

/// A product narrowed down to the variant option a shopper picked.
#[derive(Clone, Copy, Debug)]
pub struct Selection<'a> {
    pub product: &'a Product,
    pub variant: Option<&'a Variant>,
    pub option: Option<&'a VariantOption>,
}

impl Selection<'_> {
    pub fn unit_price(&self) -> i64 { self.option.map_or(self.product.price, |o| o.price) }
    pub fn stock(&self) -> u32 { self.option.map_or(self.product.stock, |o| o.stock) }

    /// Option weight wins unless it was left at zero.
    pub fn weight(&self) -> u32 {
        match self.option {
            Some(o) if o.weight > 0 => o.weight,
            _ => self.product.weight,
        }
    }

    pub fn sku(&self) -> Option<&Sku> { self.option.and_then(|o| o.sku.as_ref()) }
    pub fn variant_name(&self) -> Option<&str> { self.variant.map(|v| v.name.as_str()) }
    pub fn option_name(&self) -> Option<&str> { self.option.map(|o| o.name.as_str()) }
}

impl Product {
    pub fn create(draft: ProductDraft) -> Result<Self, ProductError> {
        let now = Utc::now();
        let mut product = Self {
            id: Uuid::now_v7(), name: String::new(), description: String::new(), price: 0, stock: 0, weight: 0,
            category_id: draft.category_id, subcategory_id: None, images: vec![], variants: vec![],
            status: ProductStatus::Active, created_at: now, updated_at: now,
        };
        product.apply(draft)?;
        Ok(product)
    }

    /// Replaces every editable field. Variant and option ids submitted with the
    /// draft are kept so existing cart lines stay valid.
    pub fn apply(&mut self, draft: ProductDraft) -> Result<(), ProductError> {
        let variants = draft.variants.into_iter().map(|v| {
            let options = v.options.into_iter().map(|o| {
                let sku = o.sku.filter(|s| !s.trim().is_empty()).map(Sku::new).transpose()
                    .map_err(|e| ProductError::Invalid(e.to_string()))?;
                Ok(VariantOption { id: o.id.unwrap_or_else(Uuid::now_v7), name: o.name, stock: o.stock, price: o.price, weight: o.weight, sku })
            }).collect::<Result<Vec<_>, ProductError>>()?;
            if options.is_empty() { return Err(ProductError::Invalid(format!("variant `{}` has no options", v.name))); }
            Ok(Variant { id: v.id.unwrap_or_else(Uuid::now_v7), name: v.name, options })
        }).collect::<Result<Vec<_>, ProductError>>()?;

        self.name = draft.name.trim().to_string();
        self.description = draft.description;
        self.price = draft.price;
        self.stock = draft.stock;
        self.weight = draft.weight;
        self.category_id = draft.category_id;
        self.subcategory_id = draft.subcategory_id;
        self.images = draft.images;
        self.variants = variants;
        self.normalize();
        self.touch();
        Ok(())
    }

    pub fn is_active(&self) -> bool { self.status == ProductStatus::Active }
    pub fn has_variants(&self) -> bool { !self.variants.is_empty() }

    pub fn archive(&mut self) { self.status = ProductStatus::Archived; self.touch(); }

    pub fn select(&self, variant_id: Option<Uuid>, option_id: Option<Uuid>) -> Result<Selection<'_>, ProductError> {
        if !self.is_active() { return Err(ProductError::Unavailable); }
        if !self.has_variants() {
            if variant_id.is_some() || option_id.is_some() { return Err(ProductError::VariantNotFound); }
            return Ok(Selection { product: self, variant: None, option: None });
        }
        let (Some(variant_id), Some(option_id)) = (variant_id, option_id) else {
            return Err(ProductError::OptionRequired);
        };
        let variant = self.variants.iter().find(|v| v.id == variant_id).ok_or(ProductError::VariantNotFound)?;
        let option = variant.options.iter().find(|o| o.id == option_id).ok_or(ProductError::OptionNotFound)?;
        Ok(Selection { product: self, variant: Some(variant), option: Some(option) })
    }

    pub fn take_stock(&mut self, variant_id: Option<Uuid>, option_id: Option<Uuid>, qty: u32) -> Result<(), ProductError> {
        let available = self.select(variant_id, option_id)?.stock();
        if qty > available { return Err(ProductError::InsufficientStock { available }); }
        match self.option_mut(variant_id, option_id) {
            Some(option) => option.stock -= qty,
            None => self.stock -= qty,
        }
        self.normalize();
        self.touch();
        Ok(())
    }

    /// Puts stock back after a failed or cancelled order. Returns false when
    /// the option was removed from the product in the meantime.
    pub fn return_stock(&mut self, variant_id: Option<Uuid>, option_id: Option<Uuid>, qty: u32) -> bool {
        if self.has_variants() {
            let Some(option) = self.option_mut(variant_id, option_id) else { return false };
            option.stock = option.stock.saturating_add(qty);
        } else {
            if variant_id.is_some() || option_id.is_some() { return false; }
            self.stock = self.stock.saturating_add(qty);
        }
        self.normalize();
        self.touch();
        true
    }

    fn option_mut(&mut self, variant_id: Option<Uuid>, option_id: Option<Uuid>) -> Option<&mut VariantOption> {
        let (variant_id, option_id) = (variant_id?, option_id?);
        self.variants.iter_mut().find(|v| v.id == variant_id)?.options.iter_mut().find(|o| o.id == option_id)
    }

    fn normalize(&mut self) {
        if !self.has_variants() { return; }
        let options = self.variants.iter().flat_map(|v| v.options.iter());
        self.stock = options.clone().fold(0u32, |total, o| total.saturating_add(o.stock));
        if let Some(min) = options.map(|o| o.price).min() { self.price = min; }
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductError { Unavailable, VariantNotFound, OptionNotFound, OptionRequired, InsufficientStock { available: u32 }, Invalid(String) }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "Product is no longer available"),
            Self::VariantNotFound => write!(f, "Variant not found"),
            Self::OptionNotFound => write!(f, "Variant option not found"),
            Self::OptionRequired => write!(f, "Choose a variant option for this product"),
            Self::InsufficientStock { available } => write!(f, "Insufficient stock, {available} left"),
            Self::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn plain_draft(category_id: Uuid) -> ProductDraft {
        ProductDraft {
            name: "Kopi Arabica 250g".into(), description: "Single origin".into(), price: 85_000, stock: 10, weight: 250,
            category_id, subcategory_id: None, images: vec!["https://cdn.test/kopi.jpg".into()], variants: vec![],
        }
    }

    pub(crate) fn shirt_draft(category_id: Uuid) -> ProductDraft {
        ProductDraft {
            name: "Kaos Polos".into(), description: String::new(), price: 0, stock: 0, weight: 200,
            category_id, subcategory_id: None, images: vec![],
            variants: vec![VariantDraft { id: None, name: "Color".into(), options: vec![
                OptionDraft { id: None, name: "Red".into(), stock: 3, price: 60_000, weight: 0, sku: Some("kaos-red".into()) },
                OptionDraft { id: None, name: "Blue".into(), stock: 5, price: 55_000, weight: 220, sku: None },
            ] }],
        }
    }

    #[test]
    fn test_product_create() {
        let p = Product::create(plain_draft(Uuid::now_v7())).unwrap();
        assert_eq!(p.name, "Kopi Arabica 250g");
        assert!(p.is_active());
    }

    #[test]
    fn test_option_stock_total_saturates() {
        let mut draft = shirt_draft(Uuid::now_v7());
        for option in &mut draft.variants[0].options {
            option.stock = u32::MAX;
        }
        let mut p = Product::create(draft).unwrap();
        assert_eq!(p.stock, u32::MAX);

        let (v, o) = (Some(p.variants[0].id), Some(p.variants[0].options[0].id));
        p.take_stock(v, o, 1).unwrap();
        assert_eq!(p.stock, u32::MAX);
    }

    #[test]
    fn test_variants_supersede_top_level_values() {
        let p = Product::create(shirt_draft(Uuid::now_v7())).unwrap();
        assert_eq!(p.stock, 8);
        assert_eq!(p.price, 55_000);
        let red = &p.variants[0].options[0];
        assert_eq!(red.sku.as_ref().unwrap().as_str(), "KAOS-RED");

        let sel = p.select(Some(p.variants[0].id), Some(red.id)).unwrap();
        assert_eq!(sel.unit_price(), 60_000);
        assert_eq!(sel.weight(), 200);
        assert_eq!(sel.option_name(), Some("Red"));
    }

    #[test]
    fn test_select_requires_option_when_variants_exist() {
        let p = Product::create(shirt_draft(Uuid::now_v7())).unwrap();
        assert_eq!(p.select(None, None).unwrap_err(), ProductError::OptionRequired);
        assert_eq!(p.select(Some(Uuid::now_v7()), Some(Uuid::now_v7())).unwrap_err(), ProductError::VariantNotFound);
        assert_eq!(p.select(Some(p.variants[0].id), Some(Uuid::now_v7())).unwrap_err(), ProductError::OptionNotFound);
    }

    #[test]
    fn test_stock_take_and_return() {
        let mut p = Product::create(shirt_draft(Uuid::now_v7())).unwrap();
        let (v, o) = (Some(p.variants[0].id), Some(p.variants[0].options[0].id));
        assert_eq!(p.take_stock(v, o, 4).unwrap_err(), ProductError::InsufficientStock { available: 3 });
        p.take_stock(v, o, 3).unwrap();
        assert_eq!(p.variants[0].options[0].stock, 0);
        assert_eq!(p.stock, 5);
        assert!(p.return_stock(v, o, 1));
        assert_eq!(p.stock, 6);
        assert!(!p.return_stock(v, Some(Uuid::now_v7()), 1));
    }

    #[test]
    fn test_archived_product_cannot_be_selected() {
        let mut p = Product::create(plain_draft(Uuid::now_v7())).unwrap();
        p.archive();
        assert_eq!(p.select(None, None).unwrap_err(), ProductError::Unavailable);
    }

    #[test]
    fn test_apply_keeps_submitted_option_ids() {
        let mut p = Product::create(shirt_draft(Uuid::now_v7())).unwrap();
        let (variant_id, option_id) = (p.variants[0].id, p.variants[0].options[0].id);
        let mut draft = shirt_draft(p.category_id);
        draft.variants[0].id = Some(variant_id);
        draft.variants[0].options[0].id = Some(option_id);
        draft.variants[0].options[0].stock = 9;
        p.apply(draft).unwrap();
        assert_eq!(p.select(Some(variant_id), Some(option_id)).unwrap().stock(), 9);
    }
}
