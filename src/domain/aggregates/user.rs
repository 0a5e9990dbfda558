//! User Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::cart::Cart;
use crate::domain::value_objects::{not_blank, Email};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Email,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub phone: Option<String>,
    pub addresses: Vec<Address>,
    #[serde(skip_serializing)]
    pub cart: Cart,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub id: Uuid,
    pub label: Option<String>,
    pub recipient: String,
    pub phone: String,
    pub street: String,
    pub province_id: String,
    pub province: String,
    pub city_id: String,
    pub city: String,
    pub postal_code: String,
    pub is_default: bool,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AddressDraft {
    #[validate(length(max = 50))]
    pub label: Option<String>,
    #[validate(length(min = 1, message = "recipient is required"), custom = "not_blank")]
    pub recipient: String,
    #[validate(length(min = 6, max = 20, message = "phone must be 6 to 20 characters"))]
    pub phone: String,
    #[validate(length(min = 1, message = "street is required"), custom = "not_blank")]
    pub street: String,
    #[validate(length(min = 1, message = "province is required"))]
    pub province_id: String,
    #[validate(length(min = 1, message = "province is required"))]
    pub province: String,
    #[validate(length(min = 1, message = "city is required"))]
    pub city_id: String,
    #[validate(length(min = 1, message = "city is required"))]
    pub city: String,
    #[validate(length(min = 1, max = 10, message = "postal code is required"))]
    pub postal_code: String,
    #[serde(default)]
    pub is_default: bool,
}

impl User {
    pub fn register(name: impl Into<String>, email: Email, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), name: name.into(), email, password_hash, phone: None,
            addresses: vec![], cart: Cart::default(), created_at: now, updated_at: now,
        }
    }

    pub fn update_profile(&mut self, name: String, phone: Option<String>) {
        self.name = name;
        self.phone = phone.filter(|p| !p.trim().is_empty());
        self.touch();
    }

    pub fn set_password_hash(&mut self, hash: String) { self.password_hash = hash; self.touch(); }

    pub fn address(&self, id: Uuid) -> Option<&Address> { self.addresses.iter().find(|a| a.id == id) }
    pub fn default_address(&self) -> Option<&Address> { self.addresses.iter().find(|a| a.is_default) }

    /// The first address a user saves becomes the default.
    pub fn add_address(&mut self, draft: AddressDraft) -> &Address {
        let make_default = draft.is_default || self.addresses.is_empty();
        let id = Uuid::now_v7();
        self.addresses.push(address_from(id, draft));
        self.touch();
        if make_default { self.mark_default(id); }
        let idx = self.addresses.len() - 1;
        &self.addresses[idx]
    }

    pub fn update_address(&mut self, id: Uuid, draft: AddressDraft) -> Result<&Address, UserError> {
        let idx = self.addresses.iter().position(|a| a.id == id).ok_or(UserError::AddressNotFound)?;
        let make_default = draft.is_default;
        let was_default = self.addresses[idx].is_default;
        self.addresses[idx] = address_from(id, draft);
        self.addresses[idx].is_default = was_default;
        if make_default { self.mark_default(id); }
        self.touch();
        Ok(&self.addresses[idx])
    }

    pub fn remove_address(&mut self, id: Uuid) -> Result<(), UserError> {
        let idx = self.addresses.iter().position(|a| a.id == id).ok_or(UserError::AddressNotFound)?;
        let removed = self.addresses.remove(idx);
        if removed.is_default {
            if let Some(next) = self.addresses.first_mut() { next.is_default = true; }
        }
        self.touch();
        Ok(())
    }

    pub fn set_default_address(&mut self, id: Uuid) -> Result<(), UserError> {
        if self.address(id).is_none() { return Err(UserError::AddressNotFound); }
        self.mark_default(id);
        self.touch();
        Ok(())
    }

    pub fn touch(&mut self) { self.updated_at = Utc::now(); }

    fn mark_default(&mut self, id: Uuid) {
        for a in &mut self.addresses { a.is_default = a.id == id; }
    }
}

fn address_from(id: Uuid, d: AddressDraft) -> Address {
    Address {
        id, label: d.label, recipient: d.recipient, phone: d.phone, street: d.street, province_id: d.province_id,
        province: d.province, city_id: d.city_id, city: d.city, postal_code: d.postal_code, is_default: false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum UserError { AddressNotFound }
impl std::error::Error for UserError {}
impl std::fmt::Display for UserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Address not found") }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn address_draft(city_id: &str) -> AddressDraft {
        AddressDraft {
            label: Some("Home".into()), recipient: "Siti".into(), phone: "081234567890".into(), street: "Jl. Merdeka 1".into(),
            province_id: "9".into(), province: "Jawa Barat".into(), city_id: city_id.into(), city: "Bandung".into(),
            postal_code: "40111".into(), is_default: false,
        }
    }

    fn user() -> User { User::register("Siti", Email::parse("siti@example.com").unwrap(), "hash".into()) }

    #[test]
    fn test_first_address_becomes_default() {
        let mut u = user();
        let first = u.add_address(address_draft("23")).id;
        let second = u.add_address(address_draft("24")).id;
        assert_eq!(u.default_address().unwrap().id, first);
        u.set_default_address(second).unwrap();
        assert_eq!(u.default_address().unwrap().id, second);
        assert_eq!(u.addresses.iter().filter(|a| a.is_default).count(), 1);
    }

    #[test]
    fn test_removing_default_promotes_next() {
        let mut u = user();
        let first = u.add_address(address_draft("23")).id;
        let second = u.add_address(address_draft("24")).id;
        u.remove_address(first).unwrap();
        assert_eq!(u.default_address().unwrap().id, second);
        assert_eq!(u.remove_address(first).unwrap_err(), UserError::AddressNotFound);
    }

    #[test]
    fn test_update_keeps_default_flag() {
        let mut u = user();
        let id = u.add_address(address_draft("23")).id;
        let updated = u.update_address(id, address_draft("151")).unwrap();
        assert!(updated.is_default);
        assert_eq!(updated.city_id, "151");
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let json = serde_json::to_value(user()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("cart").is_none());
        assert_eq!(json["email"], "siti@example.com");
    }
}
