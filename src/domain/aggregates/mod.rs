//! Aggregates module
pub mod cart;

pub use cart::{Cart, CartItem, CartMutation, CartStatus};
