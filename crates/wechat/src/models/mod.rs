//! Domain models for the binding workflow.
//!
//! These types represent the application's view of bindings and the
//! account records it reads from the main application.

pub mod account;
pub mod binding;

pub use account::{AccountBook, AccountUser};
pub use binding::{Binding, BindingWrite};
