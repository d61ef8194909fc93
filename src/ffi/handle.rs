//! Native Handle
//!
//! Owns the loaded library and performs every call into it. Each call is
//! checked against its declared [`Signature`], lowered to machine words and
//! dispatched through a function pointer of the exact native type.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_double, c_int, c_void};
use std::path::Path;

use log::trace;

use super::loader::{DynamicLibrary, StaticSymbols, SymbolSource};
use super::types::{Arg, NativeValue, ReturnKind, Signature, StrBuf};
use crate::error::{BmiError, BmiResult};

/// A loaded model library and the symbols bound from it so far
pub struct NativeHandle {
    source: Option<Box<dyn SymbolSource>>,
    label: String,
    bound: RefCell<HashMap<&'static str, Option<usize>>>,
}

impl NativeHandle {
    /// Load the shared library at `path`
    pub fn load(path: impl AsRef<Path>) -> BmiResult<Self> {
        let library = DynamicLibrary::load(path)?;
        Ok(Self::from_source(library))
    }

    /// Bind against an in-process symbol table
    pub fn from_symbols(symbols: StaticSymbols) -> Self {
        Self::from_source(symbols)
    }

    pub fn from_source(source: impl SymbolSource + 'static) -> Self {
        let label = source.describe();
        Self {
            source: Some(Box::new(source)),
            label,
            bound: RefCell::new(HashMap::new()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.source.is_some()
    }

    pub fn describe(&self) -> &str {
        &self.label
    }

    /// Release the library. Every later call fails with `InvalidState`.
    pub fn unload(&mut self) {
        self.bound.borrow_mut().clear();
        self.source = None;
    }

    fn lookup(&self, name: &'static str) -> BmiResult<Option<usize>> {
        let source = self.source.as_ref().ok_or_else(|| BmiError::InvalidState {
            operation: format!("call {}", name),
            reason: "native library has been unloaded".to_string(),
        })?;

        if let Some(&addr) = self.bound.borrow().get(name) {
            return Ok(addr);
        }
        let addr = source.address(name).map(|a| a as usize);
        self.bound.borrow_mut().insert(name, addr);
        Ok(addr)
    }

    /// Whether the library exports `name`
    pub fn has_symbol(&self, name: &'static str) -> bool {
        matches!(self.lookup(name), Ok(Some(_)))
    }

    /// Call a required entry point
    pub fn call(&self, signature: &Signature, args: &mut [Arg<'_>]) -> BmiResult<NativeValue> {
        self.call_optional(signature, args)?
            .ok_or_else(|| BmiError::SymbolNotFound {
                symbol: signature.name.to_string(),
                library: self.label.clone(),
            })
    }

    /// Call an entry point the library may legitimately not export.
    /// Returns `None` when the symbol is absent.
    pub fn call_optional(
        &self,
        signature: &Signature,
        args: &mut [Arg<'_>],
    ) -> BmiResult<Option<NativeValue>> {
        if args.len() != signature.params.len() {
            return Err(BmiError::Signature(format!(
                "{} expects {} arguments, got {}",
                signature,
                signature.params.len(),
                args.len()
            )));
        }
        for (i, (arg, &kind)) in args.iter().zip(signature.params).enumerate() {
            if arg.kind() != kind {
                return Err(BmiError::Signature(format!(
                    "argument {} of {} must be {}, got {}",
                    i,
                    signature,
                    kind,
                    arg.kind()
                )));
            }
        }

        let Some(addr) = self.lookup(signature.name)? else {
            return Ok(None);
        };

        // String arguments are copied into fixed-length buffers that live
        // until the call returns.
        let mut buffers = Vec::new();
        for arg in args.iter() {
            if let Arg::Str(bytes) = arg {
                buffers.push(StrBuf::from_bytes(bytes)?);
            }
        }

        let mut strings = buffers.iter_mut();
        let mut words = Vec::with_capacity(args.len());
        for arg in args.iter_mut() {
            let word = match arg {
                Arg::Str(_) => Word::Ptr(
                    strings
                        .next()
                        .map_or(std::ptr::null_mut(), |buf| buf.as_mut_ptr() as *mut c_void),
                ),
                Arg::StrOut(buf) => Word::Ptr(buf.as_mut_ptr() as *mut c_void),
                Arg::Int(v) => Word::Int(*v),
                Arg::IntRef(v) => Word::Ptr(&mut **v as *mut c_int as *mut c_void),
                Arg::Double(v) => Word::Double(*v),
                Arg::DoubleRef(v) => Word::Ptr(&mut **v as *mut c_double as *mut c_void),
                Arg::IntArray(v) => Word::Ptr(v.as_mut_ptr() as *mut c_void),
                Arg::Buffer(p) => Word::Ptr(*p),
                Arg::PtrRef(p) => Word::Ptr(&mut **p as *mut *mut c_void as *mut c_void),
                Arg::Callback(f) => Word::Ptr(*f as *const () as *mut c_void),
            };
            words.push(word);
        }

        trace!("calling {}", signature);
        // Safety: the symbol was exported under this name and the signature
        // table declares its native type. Every pointer in `words` refers to
        // memory borrowed for the duration of this call.
        let value = unsafe { dispatch(addr as *const (), &words, signature.returns) };
        value.map(Some).ok_or_else(|| {
            BmiError::Signature(format!("no call shape for {}", signature))
        })
    }
}

/// One lowered argument, as it travels in a register or stack slot
#[derive(Debug, Clone, Copy)]
enum Word {
    Ptr(*mut c_void),
    Int(c_int),
    Double(c_double),
}

macro_rules! call_as {
    ($addr:expr, $ret:expr; $($ty:ty = $val:expr),*) => {{
        match $ret {
            ReturnKind::Void => {
                let f: unsafe extern "C" fn($($ty),*) = std::mem::transmute($addr);
                f($($val),*);
                NativeValue::Void
            }
            ReturnKind::Int => {
                let f: unsafe extern "C" fn($($ty),*) -> c_int = std::mem::transmute($addr);
                NativeValue::Int(f($($val),*))
            }
            ReturnKind::Double => {
                let f: unsafe extern "C" fn($($ty),*) -> c_double = std::mem::transmute($addr);
                NativeValue::Double(f($($val),*))
            }
        }
    }};
}

/// Call `addr` with the given words. Returns `None` for a parameter shape
/// with no dispatch arm.
///
/// # Safety
///
/// `addr` must be a function whose native type matches `words` and `ret`.
unsafe fn dispatch(addr: *const (), words: &[Word], ret: ReturnKind) -> Option<NativeValue> {
    use Word::{Double, Int, Ptr};

    type P = *mut c_void;

    let value = match *words {
        [] => call_as!(addr, ret;),
        [Ptr(p0)] => call_as!(addr, ret; P = p0),
        [Int(i0)] => call_as!(addr, ret; c_int = i0),
        [Double(d0)] => call_as!(addr, ret; c_double = d0),
        [Ptr(p0), Ptr(p1)] => call_as!(addr, ret; P = p0, P = p1),
        [Int(i0), Ptr(p1)] => call_as!(addr, ret; c_int = i0, P = p1),
        [Ptr(p0), Int(i1)] => call_as!(addr, ret; P = p0, c_int = i1),
        [Double(d0), Ptr(p1)] => call_as!(addr, ret; c_double = d0, P = p1),
        [Ptr(p0), Double(d1)] => call_as!(addr, ret; P = p0, c_double = d1),
        [Ptr(p0), Ptr(p1), Ptr(p2)] => call_as!(addr, ret; P = p0, P = p1, P = p2),
        [Ptr(p0), Ptr(p1), Ptr(p2), Ptr(p3)] => {
            call_as!(addr, ret; P = p0, P = p1, P = p2, P = p3)
        }
        [Ptr(p0), Ptr(p1), Ptr(p2), Ptr(p3), Ptr(p4)] => {
            call_as!(addr, ret; P = p0, P = p1, P = p2, P = p3, P = p4)
        }
        [Ptr(p0), Ptr(p1), Ptr(p2), Ptr(p3), Ptr(p4), Ptr(p5)] => {
            call_as!(addr, ret; P = p0, P = p1, P = p2, P = p3, P = p4, P = p5)
        }
        _ => return None,
    };
    Some(value)
}
