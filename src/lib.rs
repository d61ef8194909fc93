//! BMI Bridge - runtime bridge to native simulation models
//!
//! Drives an independently compiled model library through the Basic Model
//! Interface: a fixed set of C entry points for the model lifecycle
//! (initialize, update, finalize), variable introspection, variable access
//! and compound type introspection. The library is found and loaded at run
//! time, and the types and shapes of its variables are discovered by asking
//! it.
//!
//! # Features
//!
//! - **Library resolution**: platform naming and a fixed search order, with
//!   every tried path reported when nothing is found
//! - **Declarative call binding**: one signature table, one generic invoker
//! - **Compound types**: struct layouts built from runtime field queries
//! - **Validated writes**: whole, sliced and indexed writes checked against
//!   the variable's shape and type before the library sees the buffer
//! - **Scoped lifecycle**: the model's working directory is always restored
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  BmiWrapper      │  lifecycle, working directory, logger
//! └────────┬─────────┘
//!          │
//!     ┌────┴──────────────┬───────────────────┐
//!     ▼                   ▼                   ▼
//! ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐
//! │ Introspector │  │ Marshaler    │  │ Compound builder │
//! └──────┬───────┘  └──────┬───────┘  └────────┬─────────┘
//!        └─────────────────┼───────────────────┘
//!                          ▼
//!                 ┌─────────────────┐
//!                 │  NativeHandle   │  signature checked calls
//!                 └────────┬────────┘
//!                          ▼
//!                 ┌─────────────────┐
//!                 │ Model library   │  .so / .dylib / .dll
//!                 └─────────────────┘
//! ```

pub mod bmi;
pub mod config;
pub mod error;
pub mod ffi;

pub use bmi::{Bmi, BmiWrapper};
pub use error::{BmiError, BmiResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
