//! Storefront domain: catalog, carts, orders and customers.
pub mod aggregates;
pub mod events;
pub mod value_objects;
