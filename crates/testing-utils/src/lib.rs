//! # Mailer Testing Utils
//!
//! Shared test doubles for the mailer workspace.
//!
//! - **Mocks**: a scripted email provider, a fault-injecting queue wrapper and a
//!   fault-injecting store wrapper
//! - **Builders**: campaign input builder and a helper that seeds a store
//! - **Helpers**: polling helpers for asynchronous assertions
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! mailer-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
