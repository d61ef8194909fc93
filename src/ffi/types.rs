//! FFI Type System
//!
//! Parameter and return kinds for native entry points, the arguments that
//! are checked against them, and the fixed-length string buffers every text
//! exchange with the native side goes through.

use std::borrow::Cow;
use std::ffi::{c_char, c_double, c_int, c_void};
use std::fmt;
use std::path::Path;

use crate::error::{BmiError, BmiResult};

/// Maximum array rank understood by the native interface
pub const MAXDIMS: usize = 6;

/// Size of every native string buffer (names, type tags, messages)
pub const MAXSTRLEN: usize = 1024;

/// Callback the native library invokes for each log record
pub type LogCallback = extern "C" fn(level: c_int, message: *const c_char);

/// Kind of a native parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// NUL-padded input string (const char*)
    Str,
    /// Output string buffer of MAXSTRLEN bytes (char*)
    StrOut,
    /// int passed by value
    Int,
    /// int passed by reference (int*)
    IntRef,
    /// double passed by value
    Double,
    /// double passed by reference (double*)
    DoubleRef,
    /// int array whose length is agreed out of band (int*)
    IntArray,
    /// Raw data buffer (void*)
    Buffer,
    /// Address of a pointer (void**)
    PtrRef,
    /// Function pointer
    Callback,
}

/// Kind of a native return value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    Int,
    Double,
}

/// How a native function hands back its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    /// The result is the return value
    Direct,
    /// No return value; results are written through reference parameters
    Subroutine,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Str => "const char*",
            ParamKind::StrOut => "char*",
            ParamKind::Int => "int",
            ParamKind::IntRef => "int*",
            ParamKind::Double => "double",
            ParamKind::DoubleRef => "double*",
            ParamKind::IntArray => "int[]",
            ParamKind::Buffer => "void*",
            ParamKind::PtrRef => "void**",
            ParamKind::Callback => "callback",
        };
        write!(f, "{}", name)
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnKind::Void => write!(f, "void"),
            ReturnKind::Int => write!(f, "int"),
            ReturnKind::Double => write!(f, "double"),
        }
    }
}

/// Fixed calling signature of one native entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Exported symbol name
    pub name: &'static str,
    /// Parameter kinds, in order
    pub params: &'static [ParamKind],
    /// Return kind
    pub returns: ReturnKind,
}

impl Signature {
    pub const fn new(name: &'static str, params: &'static [ParamKind], returns: ReturnKind) -> Self {
        Self {
            name,
            params,
            returns,
        }
    }

    /// A function without a return value
    pub const fn subroutine(name: &'static str, params: &'static [ParamKind]) -> Self {
        Self::new(name, params, ReturnKind::Void)
    }

    pub fn convention(&self) -> Convention {
        match self.returns {
            ReturnKind::Void => Convention::Subroutine,
            ReturnKind::Int | ReturnKind::Double => Convention::Direct,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.returns, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")")
    }
}

/// An argument for a native call, checked against the declared [`ParamKind`]
pub enum Arg<'a> {
    Str(&'a [u8]),
    StrOut(&'a mut StrBuf),
    Int(c_int),
    IntRef(&'a mut c_int),
    Double(c_double),
    DoubleRef(&'a mut c_double),
    IntArray(&'a mut [c_int]),
    Buffer(*mut c_void),
    PtrRef(&'a mut *mut c_void),
    Callback(LogCallback),
}

impl<'a> Arg<'a> {
    /// String argument from text or raw bytes. Text is passed as UTF-8.
    pub fn str<S: AsRef<[u8]> + ?Sized>(s: &'a S) -> Self {
        Arg::Str(s.as_ref())
    }

    /// The parameter kind this argument satisfies
    pub fn kind(&self) -> ParamKind {
        match self {
            Arg::Str(_) => ParamKind::Str,
            Arg::StrOut(_) => ParamKind::StrOut,
            Arg::Int(_) => ParamKind::Int,
            Arg::IntRef(_) => ParamKind::IntRef,
            Arg::Double(_) => ParamKind::Double,
            Arg::DoubleRef(_) => ParamKind::DoubleRef,
            Arg::IntArray(_) => ParamKind::IntArray,
            Arg::Buffer(_) => ParamKind::Buffer,
            Arg::PtrRef(_) => ParamKind::PtrRef,
            Arg::Callback(_) => ParamKind::Callback,
        }
    }
}

/// Value returned by a native call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeValue {
    Void,
    Int(c_int),
    Double(c_double),
}

impl NativeValue {
    /// Status code of a direct-style call. Void counts as success.
    pub fn status(&self) -> c_int {
        match self {
            NativeValue::Int(code) => *code,
            NativeValue::Double(v) => *v as c_int,
            NativeValue::Void => 0,
        }
    }

    pub fn as_double(&self) -> Option<c_double> {
        match self {
            NativeValue::Double(v) => Some(*v),
            _ => None,
        }
    }
}

/// Fixed-length, NUL-padded native string buffer
#[derive(Clone)]
pub struct StrBuf(Box<[u8; MAXSTRLEN]>);

impl StrBuf {
    /// An all-NUL buffer, ready to receive output
    pub fn new() -> Self {
        Self(Box::new([0u8; MAXSTRLEN]))
    }

    /// Copy `bytes` in, NUL-padded. Input must leave room for the terminator
    /// and must not contain NUL itself.
    pub fn from_bytes(bytes: &[u8]) -> BmiResult<Self> {
        if bytes.len() >= MAXSTRLEN {
            return Err(BmiError::Signature(format!(
                "string of {} bytes does not fit a {} byte native buffer",
                bytes.len(),
                MAXSTRLEN
            )));
        }
        if bytes.contains(&0) {
            return Err(BmiError::Signature(format!(
                "string {:?} contains an interior NUL",
                String::from_utf8_lossy(bytes)
            )));
        }
        let mut buf = Self::new();
        buf.0[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }

    /// Bytes up to the first NUL
    pub fn value(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(MAXSTRLEN);
        &self.0[..end]
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.value()).into_owned()
    }

    pub fn as_mut_ptr(&mut self) -> *mut c_char {
        self.0.as_mut_ptr() as *mut c_char
    }
}

impl Default for StrBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StrBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StrBuf({:?})", String::from_utf8_lossy(self.value()))
    }
}

/// Bytes of a filesystem path as handed to the native side
pub fn path_bytes(path: &Path) -> Cow<'_, [u8]> {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        Cow::Borrowed(path.as_os_str().as_bytes())
    }

    #[cfg(not(unix))]
    {
        match path.to_string_lossy() {
            Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
            Cow::Owned(s) => Cow::Owned(s.into_bytes()),
        }
    }
}
