//! Model interface bridge
//!
//! Built on the FFI layer: the entry point signature table, the type
//! registry, metadata introspection, compound layouts, data marshaling, the
//! logger callback and the lifecycle controller.
//!
//! # Example
//!
//! ```no_run
//! use bmi::bmi::BmiWrapper;
//!
//! # fn main() -> bmi::error::BmiResult<()> {
//! let mut model = BmiWrapper::new("model")?.with_config("model.ini");
//! let mut session = model.enter()?;
//! while session.get_current_time()? < session.get_end_time()? {
//!     session.update(None)?;
//! }
//! session.exit()?;
//! # Ok(())
//! # }
//! ```

mod api;
mod compound;
pub mod functions;
mod introspect;
pub mod logger;
mod marshal;
mod types;
mod workdir;
mod wrapper;

#[cfg(test)]
mod mock;

pub use api::Bmi;
pub use compound::{
    CompoundLayout, CompoundTypeBuilder, FieldInfo, FieldLayout, FieldValue, Record, Records,
};
pub use introspect::{VariableInfo, VariableIntrospector};
pub use logger::{LogCrateSink, LogRecord, LogSink, Severity};
pub use marshal::{copy_region, ArrayMarshaler};
pub use types::{ArrayValue, NativeBuffer, NativeElement, ScalarType, VarType, VarValue, VarView};
pub use workdir::WorkingDirGuard;
pub use wrapper::{BmiWrapper, EngineDescriptor, LifecycleState, ModelSession};
