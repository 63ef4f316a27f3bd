//! Zhiweijz Core - Shared types library.
//!
//! This crate provides the types shared by the WeChat integration components:
//! - `wechat` - Webhook receiver and account-binding pages
//! - `cli` - Command-line tools for migrations and platform setup
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, emails, external identities
//!   and account book kinds

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
