//! FFI Module for the model bridge
//!
//! Locates, loads and calls into a native model library whose entry points
//! are only known by name at run time.
//!
//! # Architecture
//!
//! ```text
//! BmiWrapper (host API)
//!       │
//!       ▼
//! Signature table (name, parameter kinds, return kind)
//!       │
//!       ▼
//! NativeHandle::call (argument checking + lowering)
//!       │
//!       ▼
//! Dynamic Loader (libloading) or StaticSymbols
//!       │
//!       ▼
//! Native Function Call
//! ```
//!
//! # Example
//!
//! ```ignore
//! let path = LibraryLocator::new("model").resolve()?;
//! let handle = NativeHandle::load(&path)?;
//!
//! let mut count = 0;
//! handle.call(&GET_VAR_COUNT, &mut [Arg::IntRef(&mut count)])?;
//! ```

mod handle;
mod loader;
mod types;

pub use handle::NativeHandle;
pub use loader::{
    expand_tilde, DynamicLibrary, LibraryLocator, Platform, SearchPathGuard, StaticSymbols,
    SymbolSource,
};
pub use types::{
    path_bytes, Arg, Convention, LogCallback, NativeValue, ParamKind, ReturnKind, Signature,
    StrBuf, MAXDIMS, MAXSTRLEN,
};
