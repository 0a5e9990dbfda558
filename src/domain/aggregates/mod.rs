//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;
pub mod user;
pub mod category;

pub use product::{Product, ProductDraft, ProductError, ProductStatus, Selection, Variant, VariantOption};
pub use order::{CourierChoice, Order, OrderError, OrderItem, OrderStatus, PaymentMethod, PaymentStatus};
pub use cart::{Cart, CartError, CartLine, CartView, PricedLine};
pub use user::{Address, AddressDraft, User, UserError};
pub use category::{Category, CategoryDraft, SubCategory, SubCategoryDraft};
