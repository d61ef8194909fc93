//! Model lifecycle
//!
//! [`BmiWrapper`] binds one engine: it resolves and loads the library,
//! runs `initialize` from the model's directory, drives `update`, and on
//! `finalize` puts the working directory back.
//!
//! ```text
//! Unloaded --load--> Loaded --initialize--> Initialized --finalize--> Finalized
//!                      |                                    ^
//!                      +-------------finalize---------------+
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use log::{debug, info, warn};

use super::compound::{CompoundLayout, CompoundTypeBuilder, FieldInfo, FieldValue};
use super::functions;
use super::introspect::{VariableInfo, VariableIntrospector};
use super::logger::{self, LogSink};
use super::marshal::ArrayMarshaler;
use super::types::{ArrayValue, VarType, VarValue, VarView};
use super::workdir::WorkingDirGuard;
use crate::error::{BmiError, BmiResult};
use crate::ffi::{path_bytes, Arg, LibraryLocator, NativeHandle, Signature, StaticSymbols};

/// Where the bridge is in the model lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Initialized,
    Finalized,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unloaded => "unloaded",
            LifecycleState::Loaded => "loaded",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Finalized => "finalized",
        };
        write!(f, "{}", name)
    }
}

/// Engine name and the library file it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineDescriptor {
    pub name: String,
    pub path: PathBuf,
}

/// A native model library driven through the model interface
pub struct BmiWrapper {
    engine: String,
    configfile: Option<PathBuf>,
    original_dir: PathBuf,
    locator: LibraryLocator,
    descriptor: Option<EngineDescriptor>,
    state: LifecycleState,
    handle: Option<NativeHandle>,
    compounds: CompoundTypeBuilder,
    workdir: Option<WorkingDirGuard>,
    pending_sink: Option<Arc<dyn LogSink>>,
    config_loaded: bool,
    logger_attached: bool,
}

impl BmiWrapper {
    /// Bridge for `engine`: a library name such as `model`, or a path to the
    /// library file. Nothing is loaded yet.
    pub fn new(engine: impl Into<String>) -> BmiResult<Self> {
        let engine = engine.into();
        Ok(Self {
            locator: LibraryLocator::new(engine.clone()),
            engine,
            configfile: None,
            original_dir: std::env::current_dir()?,
            descriptor: None,
            state: LifecycleState::Unloaded,
            handle: None,
            compounds: CompoundTypeBuilder::new(),
            workdir: None,
            pending_sink: None,
            config_loaded: false,
            logger_attached: false,
        })
    }

    /// Model configuration file passed to the native `initialize`
    pub fn with_config(mut self, configfile: impl Into<PathBuf>) -> Self {
        self.configfile = Some(configfile.into());
        self
    }

    /// Resolve the library with a custom locator
    pub fn with_locator(mut self, locator: LibraryLocator) -> Self {
        self.locator = locator;
        self
    }

    /// Bridge over an in-process symbol table, already loaded
    pub fn from_symbols(engine: impl Into<String>, symbols: StaticSymbols) -> BmiResult<Self> {
        let mut wrapper = Self::new(engine)?;
        wrapper.handle = Some(NativeHandle::from_symbols(symbols));
        wrapper.state = LifecycleState::Loaded;
        wrapper.report_missing();
        Ok(wrapper)
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn configfile(&self) -> Option<&Path> {
        self.configfile.as_deref()
    }

    /// Working directory at construction
    pub fn original_dir(&self) -> &Path {
        &self.original_dir
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Resolved library, once loaded from disk
    pub fn descriptor(&self) -> Option<&EngineDescriptor> {
        self.descriptor.as_ref()
    }

    /// Resolve and load the library
    pub fn load(&mut self) -> BmiResult<()> {
        match self.state {
            LifecycleState::Unloaded => {}
            LifecycleState::Loaded | LifecycleState::Initialized => return Ok(()),
            LifecycleState::Finalized => return Err(self.invalid("load", "model is finalized")),
        }

        let mut path = self.locator.resolve()?;
        if path.is_relative() {
            path = self.original_dir.join(path);
        }
        let handle = NativeHandle::load(&path)?;

        self.descriptor = Some(EngineDescriptor {
            name: self.engine.clone(),
            path,
        });
        self.handle = Some(handle);
        self.state = LifecycleState::Loaded;
        self.report_missing();
        Ok(())
    }

    /// Optional entry points the loaded library does not export
    pub fn missing_optional(&self) -> Vec<&'static str> {
        match &self.handle {
            Some(handle) => functions::OPTIONAL
                .iter()
                .copied()
                .filter(|name| !handle.has_symbol(name))
                .collect(),
            None => Vec::new(),
        }
    }

    fn report_missing(&self) {
        for name in self.missing_optional() {
            debug!("{} does not export {}, falling back", self.engine, name);
        }
    }

    /// Release the library. Finalizes first if needed.
    pub fn unload(&mut self) -> BmiResult<()> {
        let finalized = match self.state {
            LifecycleState::Loaded | LifecycleState::Initialized => self.finalize(),
            LifecycleState::Unloaded | LifecycleState::Finalized => Ok(()),
        };
        self.detach_logger();
        if let Some(mut handle) = self.handle.take() {
            handle.unload();
        }
        self.compounds.clear();
        self.descriptor = None;
        self.state = LifecycleState::Unloaded;
        finalized
    }

    fn invalid(&self, operation: &str, reason: &str) -> BmiError {
        BmiError::InvalidState {
            operation: operation.to_string(),
            reason: reason.to_string(),
        }
    }

    /// The handle, for operations valid while loaded or initialized
    fn live(&self, operation: &str) -> BmiResult<&NativeHandle> {
        match (&self.handle, self.state) {
            (Some(handle), LifecycleState::Loaded | LifecycleState::Initialized) => Ok(handle),
            _ => Err(self.invalid(operation, &format!("model is {}", self.state))),
        }
    }

    fn marshal(&self, operation: &str) -> BmiResult<ArrayMarshaler<'_>> {
        let handle = self.live(operation)?;
        Ok(ArrayMarshaler::new(handle, &self.compounds))
    }

    fn introspector(&self, operation: &str) -> BmiResult<VariableIntrospector<'_>> {
        self.live(operation).map(VariableIntrospector::new)
    }

    /// Load if needed, attach the logger, switch to the model directory and
    /// run the native `initialize`.
    ///
    /// When the native call fails the working directory stays switched and
    /// the state stays `Loaded`; [`finalize`](Self::finalize) restores it.
    pub fn initialize(&mut self) -> BmiResult<()> {
        match self.state {
            LifecycleState::Unloaded => self.load()?,
            LifecycleState::Loaded => {}
            LifecycleState::Initialized => {
                return Err(self.invalid("initialize", "model is already initialized"))
            }
            LifecycleState::Finalized => {
                return Err(self.invalid("initialize", "model is finalized"))
            }
        }

        if let Some(sink) = self.pending_sink.clone() {
            self.attach_logger(sink)?;
        }

        if let Some(configfile) = self.configfile.clone() {
            let config = self.original_dir.join(&configfile);
            let dir = match config.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if self.workdir.is_none() {
                self.workdir = Some(WorkingDirGuard::enter(&self.original_dir, &dir)?);
            }
            info!(
                "Loading model {} in directory {}",
                configfile.display(),
                dir.display()
            );

            let status = {
                let bytes = path_bytes(&config);
                self.live("initialize")?
                    .call(&functions::INITIALIZE, &mut [Arg::Str(bytes.as_ref())])?
                    .status()
            };
            if status != 0 {
                return Err(BmiError::Initialization { config, code: status });
            }
            self.config_loaded = true;
        } else {
            debug!("No configuration file, skipping native initialize");
        }

        self.state = LifecycleState::Initialized;
        Ok(())
    }

    /// Advance by `dt`, or by the model's own time step when `None`
    pub fn update(&mut self, dt: Option<f64>) -> BmiResult<()> {
        if self.state != LifecycleState::Initialized {
            return Err(self.invalid("update", &format!("model is {}", self.state)));
        }
        let dt = match dt {
            Some(dt) => dt,
            None => self.get_time_step()?,
        };
        let status = self
            .live("update")?
            .call(&functions::UPDATE, &mut [Arg::Double(dt)])?
            .status();
        if status != 0 {
            return Err(BmiError::Update { dt, code: status });
        }
        Ok(())
    }

    /// Run the native `finalize` (if a configuration was loaded) and restore
    /// the working directory, even when the native call fails. Calling it
    /// again is a no-op.
    pub fn finalize(&mut self) -> BmiResult<()> {
        match self.state {
            LifecycleState::Finalized => return Ok(()),
            LifecycleState::Unloaded => {
                return Err(self.invalid("finalize", "model library is not loaded"))
            }
            LifecycleState::Loaded | LifecycleState::Initialized => {}
        }

        let native = if self.config_loaded {
            info!("Finalizing model");
            self.live("finalize")
                .and_then(|handle| handle.call(&functions::FINALIZE, &mut []))
                .and_then(|value| match value.status() {
                    0 => Ok(()),
                    code => Err(BmiError::Finalize { code }),
                })
        } else {
            Ok(())
        };
        self.config_loaded = false;
        self.state = LifecycleState::Finalized;

        let restored = match self.workdir.take() {
            Some(mut guard) => guard.restore().map(|_| ()),
            None => Ok(()),
        };
        native.and(restored)
    }

    /// Initialize and hand back a session that finalizes when dropped. A
    /// failed initialize is finalized before the error is returned.
    pub fn enter(&mut self) -> BmiResult<ModelSession<'_>> {
        if let Err(e) = self.initialize() {
            if let Err(cleanup) = self.finalize() {
                warn!("Cleanup after failed initialize: {}", cleanup);
            }
            return Err(e);
        }
        Ok(ModelSession {
            wrapper: self,
            finished: false,
        })
    }

    /// Route native log records to `sink`. Registered right away when the
    /// library is loaded, otherwise on `initialize`.
    pub fn set_logger(&mut self, sink: Arc<dyn LogSink>) -> BmiResult<()> {
        self.pending_sink = Some(Arc::clone(&sink));
        if matches!(self.state, LifecycleState::Loaded | LifecycleState::Initialized) {
            self.attach_logger(sink)?;
        }
        Ok(())
    }

    fn attach_logger(&mut self, sink: Arc<dyn LogSink>) -> BmiResult<()> {
        let handle = self.live("attach logger")?;
        self.logger_attached = logger::attach(handle, sink)?;
        Ok(())
    }

    fn detach_logger(&mut self) {
        if self.logger_attached {
            logger::detach();
            self.logger_attached = false;
        }
    }

    fn time(&self, signature: &Signature) -> BmiResult<f64> {
        let mut value = 0.0;
        self.live(signature.name)?
            .call(signature, &mut [Arg::DoubleRef(&mut value)])?;
        Ok(value)
    }

    pub fn get_start_time(&self) -> BmiResult<f64> {
        self.time(&functions::GET_START_TIME)
    }

    pub fn get_end_time(&self) -> BmiResult<f64> {
        self.time(&functions::GET_END_TIME)
    }

    pub fn get_current_time(&self) -> BmiResult<f64> {
        self.time(&functions::GET_CURRENT_TIME)
    }

    pub fn get_time_step(&self) -> BmiResult<f64> {
        self.time(&functions::GET_TIME_STEP)
    }

    /// Libraries without `set_current_time` ignore this with a warning.
    pub fn set_current_time(&mut self, time: f64) -> BmiResult<()> {
        let handle = self.live("set_current_time")?;
        let called =
            handle.call_optional(&functions::SET_CURRENT_TIME, &mut [Arg::Double(time)])?;
        if called.is_none() {
            warn!("{} does not export set_current_time", handle.describe());
        }
        Ok(())
    }

    pub fn get_var_count(&self) -> BmiResult<usize> {
        self.introspector("get_var_count")?.count()
    }

    pub fn get_var_name(&self, index: usize) -> BmiResult<String> {
        self.introspector("get_var_name")?.name_at(index)
    }

    pub fn get_var_type(&self, name: &str) -> BmiResult<VarType> {
        self.introspector("get_var_type")?.type_of(name)
    }

    pub fn get_var_rank(&self, name: &str) -> BmiResult<usize> {
        self.introspector("get_var_rank")?.rank_of(name)
    }

    pub fn get_var_shape(&self, name: &str) -> BmiResult<Vec<usize>> {
        self.introspector("get_var_shape")?.shape_of(name)
    }

    /// Catalogue of every variable
    pub fn variables(&self) -> BmiResult<Vec<VariableInfo>> {
        self.introspector("list variables")?.variables()
    }

    /// Copy of a variable; `None` when the library has no value for it
    pub fn get_var(&self, name: &str) -> BmiResult<Option<VarValue>> {
        self.marshal("get_var")?.get_var(name)
    }

    /// Mutable view into native memory of a scalar-typed variable. The view
    /// borrows the wrapper, so no other bridge call can happen while it is
    /// alive.
    pub fn get_var_view(&mut self, name: &str) -> BmiResult<Option<VarView<'_>>> {
        let marshal = self.marshal("get_var_view")?;
        // Safety: the returned view borrows `self` mutably, which rules out
        // native calls and finalize until it is dropped.
        unsafe { marshal.view(name) }
    }

    pub fn set_var(&mut self, name: &str, value: &VarValue) -> BmiResult<()> {
        self.marshal("set_var")?.set_var(name, value)
    }

    pub fn set_var_slice(
        &mut self,
        name: &str,
        start: &[usize],
        count: &[usize],
        value: &ArrayValue,
    ) -> BmiResult<()> {
        self.marshal("set_var_slice")?
            .set_var_slice(name, start, count, value)
    }

    pub fn set_var_index(&mut self, name: &str, indices: &[usize], value: &ArrayValue) -> BmiResult<()> {
        self.marshal("set_var_index")?
            .set_var_index(name, indices, value)
    }

    /// Number of fields of a compound type
    pub fn inq_compound(&self, type_name: &str) -> BmiResult<usize> {
        let handle = self.live("inq_compound")?;
        self.compounds.field_count(handle, type_name)
    }

    /// Field at 0-based `index` of a compound type
    pub fn inq_compound_field(&self, type_name: &str, index: usize) -> BmiResult<FieldInfo> {
        let handle = self.live("inq_compound_field")?;
        self.compounds.field(handle, type_name, index)
    }

    pub fn compound_layout(&self, type_name: &str) -> BmiResult<Rc<CompoundLayout>> {
        let handle = self.live("compound_layout")?;
        self.compounds.layout(handle, type_name)
    }

    pub fn set_structure_field(
        &mut self,
        name: &str,
        id: &str,
        field: &str,
        value: &FieldValue,
    ) -> BmiResult<()> {
        self.marshal("set_structure_field")?
            .set_structure_field(name, id, field, value)
    }
}

impl fmt::Debug for BmiWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BmiWrapper")
            .field("engine", &self.engine)
            .field("configfile", &self.configfile)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for BmiWrapper {
    fn drop(&mut self) {
        if matches!(self.state, LifecycleState::Loaded | LifecycleState::Initialized) {
            if let Err(e) = self.finalize() {
                warn!("Finalize on drop failed: {}", e);
            }
        }
        self.detach_logger();
    }
}

/// An initialized model that is finalized when the session ends
pub struct ModelSession<'a> {
    wrapper: &'a mut BmiWrapper,
    finished: bool,
}

impl ModelSession<'_> {
    /// Finalize now and report the outcome
    pub fn exit(mut self) -> BmiResult<()> {
        self.finished = true;
        self.wrapper.finalize()
    }
}

impl Deref for ModelSession<'_> {
    type Target = BmiWrapper;

    fn deref(&self) -> &BmiWrapper {
        self.wrapper
    }
}

impl DerefMut for ModelSession<'_> {
    fn deref_mut(&mut self) -> &mut BmiWrapper {
        self.wrapper
    }
}

impl Drop for ModelSession<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.wrapper.finalize() {
                warn!("Finalize at end of session failed: {}", e);
            }
        }
    }
}
