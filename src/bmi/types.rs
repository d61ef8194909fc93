//! Type registry
//!
//! Maps the native scalar type tags (`bool`, `char`, `double`, `float`,
//! `int`) onto host element types, and defines the host-side values that
//! variables are copied into.

use std::fmt;
use std::mem;

use ndarray::{Array1, ArrayD, ArrayViewMutD, IxDyn};
use serde::Serialize;

use super::compound::Records;
use crate::error::{BmiError, BmiResult};

/// Native scalar element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Bool,
    Char,
    Double,
    Float,
    Int,
}

impl ScalarType {
    pub const ALL: [ScalarType; 5] = [
        ScalarType::Bool,
        ScalarType::Char,
        ScalarType::Double,
        ScalarType::Float,
        ScalarType::Int,
    ];

    /// Parse a native type tag
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"bool" => Some(ScalarType::Bool),
            b"char" => Some(ScalarType::Char),
            b"double" => Some(ScalarType::Double),
            b"float" => Some(ScalarType::Float),
            b"int" => Some(ScalarType::Int),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Char => "char",
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int => "int",
        }
    }

    /// Size of one element in native memory
    pub fn size(self) -> usize {
        match self {
            ScalarType::Bool => mem::size_of::<bool>(),
            ScalarType::Char => mem::size_of::<u8>(),
            ScalarType::Double => mem::size_of::<f64>(),
            ScalarType::Float => mem::size_of::<f32>(),
            ScalarType::Int => mem::size_of::<i32>(),
        }
    }

    pub fn align(self) -> usize {
        match self {
            ScalarType::Bool => mem::align_of::<bool>(),
            ScalarType::Char => mem::align_of::<u8>(),
            ScalarType::Double => mem::align_of::<f64>(),
            ScalarType::Float => mem::align_of::<f32>(),
            ScalarType::Int => mem::align_of::<i32>(),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Type of a variable: a scalar element type or a named compound type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VarType {
    Scalar(ScalarType),
    Compound(String),
}

impl VarType {
    /// Interpret a native type tag. Empty tags yield `None`; anything that is
    /// not a scalar tag names a compound type.
    pub fn parse(tag: &[u8]) -> Option<Self> {
        if tag.is_empty() {
            return None;
        }
        Some(match ScalarType::from_tag(tag) {
            Some(scalar) => VarType::Scalar(scalar),
            None => VarType::Compound(String::from_utf8_lossy(tag).into_owned()),
        })
    }

    pub fn is_compound(&self) -> bool {
        matches!(self, VarType::Compound(_))
    }
}

impl Serialize for VarType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarType::Scalar(s) => write!(f, "{}", s),
            VarType::Compound(name) => write!(f, "{}", name),
        }
    }
}

/// A host element type with a fixed native representation
pub trait NativeElement: Copy + Default + 'static {
    const TYPE: ScalarType;

    /// Decode from exactly `TYPE.size()` native-endian bytes
    fn read(bytes: &[u8]) -> Self;

    /// Encode into exactly `TYPE.size()` bytes
    fn write(self, out: &mut [u8]);
}

impl NativeElement for bool {
    const TYPE: ScalarType = ScalarType::Bool;

    fn read(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn write(self, out: &mut [u8]) {
        out[0] = self as u8;
    }
}

impl NativeElement for u8 {
    const TYPE: ScalarType = ScalarType::Char;

    fn read(bytes: &[u8]) -> Self {
        bytes[0]
    }

    fn write(self, out: &mut [u8]) {
        out[0] = self;
    }
}

macro_rules! numeric_element {
    ($ty:ty, $scalar:expr) => {
        impl NativeElement for $ty {
            const TYPE: ScalarType = $scalar;

            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }

            fn write(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

numeric_element!(f64, ScalarType::Double);
numeric_element!(f32, ScalarType::Float);
numeric_element!(i32, ScalarType::Int);

fn decode<T: NativeElement>(shape: &[usize], bytes: &[u8]) -> BmiResult<ArrayD<T>> {
    let size = T::TYPE.size();
    let data: Vec<T> = bytes.chunks_exact(size).map(T::read).collect();
    ArrayD::from_shape_vec(IxDyn(shape), data)
        .map_err(|e| BmiError::Consistency(format!("shape {:?}: {}", shape, e)))
}

fn encode<T: NativeElement>(array: &ArrayD<T>, out: &mut [u8]) {
    let size = T::TYPE.size();
    for (value, chunk) in array.iter().zip(out.chunks_exact_mut(size)) {
        value.write(chunk);
    }
}

/// Owned copy of a scalar-typed variable. Element order is row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Bool(ArrayD<bool>),
    Char(ArrayD<u8>),
    Double(ArrayD<f64>),
    Float(ArrayD<f32>),
    Int(ArrayD<i32>),
}

macro_rules! each_array {
    ($value:expr, $a:ident => $body:expr) => {
        match $value {
            ArrayValue::Bool($a) => $body,
            ArrayValue::Char($a) => $body,
            ArrayValue::Double($a) => $body,
            ArrayValue::Float($a) => $body,
            ArrayValue::Int($a) => $body,
        }
    };
}

impl ArrayValue {
    /// Decode `bytes` laid out row-major with the given shape
    pub fn from_native_bytes(ty: ScalarType, shape: &[usize], bytes: &[u8]) -> BmiResult<Self> {
        let expected = shape.iter().product::<usize>() * ty.size();
        if bytes.len() != expected {
            return Err(BmiError::Consistency(format!(
                "{} bytes for a {} array of shape {:?}, expected {}",
                bytes.len(),
                ty,
                shape,
                expected
            )));
        }
        Ok(match ty {
            ScalarType::Bool => ArrayValue::Bool(decode(shape, bytes)?),
            ScalarType::Char => ArrayValue::Char(decode(shape, bytes)?),
            ScalarType::Double => ArrayValue::Double(decode(shape, bytes)?),
            ScalarType::Float => ArrayValue::Float(decode(shape, bytes)?),
            ScalarType::Int => ArrayValue::Int(decode(shape, bytes)?),
        })
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            ArrayValue::Bool(_) => ScalarType::Bool,
            ArrayValue::Char(_) => ScalarType::Char,
            ArrayValue::Double(_) => ScalarType::Double,
            ArrayValue::Float(_) => ScalarType::Float,
            ArrayValue::Int(_) => ScalarType::Int,
        }
    }

    pub fn shape(&self) -> &[usize] {
        each_array!(self, a => a.shape())
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        each_array!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major native bytes, in a buffer aligned for any scalar type
    pub fn to_native(&self) -> NativeBuffer {
        let mut buf = NativeBuffer::zeroed(self.len() * self.scalar_type().size());
        each_array!(self, a => encode(a, buf.as_bytes_mut()));
        buf
    }

    pub fn as_double(&self) -> Option<&ArrayD<f64>> {
        match self {
            ArrayValue::Double(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<&ArrayD<i32>> {
        match self {
            ArrayValue::Int(a) => Some(a),
            _ => None,
        }
    }
}

macro_rules! array_from {
    ($ty:ty, $variant:ident) => {
        impl From<ArrayD<$ty>> for ArrayValue {
            fn from(array: ArrayD<$ty>) -> Self {
                ArrayValue::$variant(array)
            }
        }

        impl From<Vec<$ty>> for ArrayValue {
            fn from(values: Vec<$ty>) -> Self {
                ArrayValue::$variant(Array1::from(values).into_dyn())
            }
        }
    };
}

array_from!(bool, Bool);
array_from!(u8, Char);
array_from!(f64, Double);
array_from!(f32, Float);
array_from!(i32, Int);

/// Value of a variable as returned by `get_var`
#[derive(Debug, Clone, PartialEq)]
pub enum VarValue {
    Array(ArrayValue),
    Records(Records),
}

impl VarValue {
    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            VarValue::Array(a) => Some(a),
            VarValue::Records(_) => None,
        }
    }

    pub fn as_records(&self) -> Option<&Records> {
        match self {
            VarValue::Records(r) => Some(r),
            VarValue::Array(_) => None,
        }
    }
}

impl From<ArrayValue> for VarValue {
    fn from(value: ArrayValue) -> Self {
        VarValue::Array(value)
    }
}

impl From<Records> for VarValue {
    fn from(value: Records) -> Self {
        VarValue::Records(value)
    }
}

/// Byte buffer handed to the native side, 8-byte aligned so any scalar or
/// struct element can be read in place
#[derive(Clone)]
pub struct NativeBuffer {
    words: Vec<u64>,
    len: usize,
}

impl NativeBuffer {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::zeroed(bytes.len());
        buf.as_bytes_mut().copy_from_slice(bytes);
        buf
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        // Safety: `words` owns at least `len` initialised bytes.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // Safety: as above, and the borrow is unique.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
    }

    pub fn as_mut_ptr(&mut self) -> *mut std::ffi::c_void {
        self.words.as_mut_ptr() as *mut std::ffi::c_void
    }
}

impl fmt::Debug for NativeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeBuffer({} bytes)", self.len)
    }
}

/// Mutable view into native-owned memory of a scalar-typed variable.
///
/// `bool` variables are exposed as their raw bytes.
#[derive(Debug)]
pub enum VarView<'a> {
    Bool(ArrayViewMutD<'a, u8>),
    Char(ArrayViewMutD<'a, u8>),
    Double(ArrayViewMutD<'a, f64>),
    Float(ArrayViewMutD<'a, f32>),
    Int(ArrayViewMutD<'a, i32>),
}

impl<'a> VarView<'a> {
    /// # Safety
    ///
    /// `ptr` must point to `shape.product()` elements of `ty`, laid out
    /// row-major, valid and unaliased for `'a`.
    pub(crate) unsafe fn from_raw(
        ty: ScalarType,
        shape: &[usize],
        ptr: *mut std::ffi::c_void,
    ) -> BmiResult<Self> {
        if ptr.is_null() || (ptr as usize) % ty.align() != 0 {
            return Err(BmiError::Consistency(format!(
                "native {} buffer at {:p} is not aligned",
                ty, ptr
            )));
        }
        let dim = IxDyn(shape);
        Ok(match ty {
            ScalarType::Bool => VarView::Bool(ArrayViewMutD::from_shape_ptr(dim, ptr as *mut u8)),
            ScalarType::Char => VarView::Char(ArrayViewMutD::from_shape_ptr(dim, ptr as *mut u8)),
            ScalarType::Double => {
                VarView::Double(ArrayViewMutD::from_shape_ptr(dim, ptr as *mut f64))
            }
            ScalarType::Float => VarView::Float(ArrayViewMutD::from_shape_ptr(dim, ptr as *mut f32)),
            ScalarType::Int => VarView::Int(ArrayViewMutD::from_shape_ptr(dim, ptr as *mut i32)),
        })
    }

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            VarView::Bool(_) => ScalarType::Bool,
            VarView::Char(_) => ScalarType::Char,
            VarView::Double(_) => ScalarType::Double,
            VarView::Float(_) => ScalarType::Float,
            VarView::Int(_) => ScalarType::Int,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            VarView::Bool(v) | VarView::Char(v) => v.shape(),
            VarView::Double(v) => v.shape(),
            VarView::Float(v) => v.shape(),
            VarView::Int(v) => v.shape(),
        }
    }
}
