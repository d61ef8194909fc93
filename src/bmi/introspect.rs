//! Variable introspection
//!
//! Everything the bridge knows about a variable is asked of the library at
//! the time it is needed: nothing is declared up front.

use std::ffi::c_int;

use serde::Serialize;

use super::functions;
use super::types::VarType;
use crate::error::{BmiError, BmiResult};
use crate::ffi::{Arg, NativeHandle, StrBuf, MAXDIMS};

/// Metadata of one exposed variable
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableInfo {
    pub name: String,
    pub var_type: VarType,
    pub rank: usize,
    pub shape: Vec<usize>,
}

impl VariableInfo {
    /// Number of elements
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Metadata queries against a loaded library
pub struct VariableIntrospector<'a> {
    handle: &'a NativeHandle,
}

impl<'a> VariableIntrospector<'a> {
    pub fn new(handle: &'a NativeHandle) -> Self {
        Self { handle }
    }

    /// Number of exposed variables
    pub fn count(&self) -> BmiResult<usize> {
        let mut count: c_int = 0;
        self.handle
            .call(&functions::GET_VAR_COUNT, &mut [Arg::IntRef(&mut count)])?;
        usize::try_from(count)
            .map_err(|_| BmiError::Consistency(format!("negative variable count {}", count)))
    }

    /// Name of the variable at 0-based `index`
    pub fn name_at(&self, index: usize) -> BmiResult<String> {
        let count = self.count()?;
        if index >= count {
            return Err(BmiError::IndexOutOfRange(format!(
                "variable index {} with {} variables",
                index, count
            )));
        }
        let native_index = c_int::try_from(index)
            .map_err(|_| BmiError::IndexOutOfRange(format!("variable index {}", index)))?;

        let mut out = StrBuf::new();
        self.handle.call(
            &functions::GET_VAR_NAME,
            &mut [Arg::Int(native_index), Arg::StrOut(&mut out)],
        )?;
        Ok(out.to_string_lossy())
    }

    /// Array rank, 0 for scalars
    pub fn rank_of(&self, name: &str) -> BmiResult<usize> {
        let mut rank: c_int = 0;
        self.handle
            .call(&functions::GET_VAR_RANK, &mut [Arg::str(name), Arg::IntRef(&mut rank)])?;
        match usize::try_from(rank) {
            Ok(r) if r <= MAXDIMS => Ok(r),
            _ => Err(BmiError::Consistency(format!(
                "variable {} reports rank {}, at most {} is supported",
                name, rank, MAXDIMS
            ))),
        }
    }

    /// Shape truncated to the rank. Entries past the rank must be zero.
    pub fn shape_of(&self, name: &str) -> BmiResult<Vec<usize>> {
        let rank = self.rank_of(name)?;
        let mut raw: [c_int; MAXDIMS] = [0; MAXDIMS];
        self.handle
            .call(&functions::GET_VAR_SHAPE, &mut [Arg::str(name), Arg::IntArray(&mut raw)])?;
        checked_shape(&format!("variable {}", name), rank, &raw)
    }

    /// Raw type tag as reported by the library
    pub fn type_tag(&self, name: &str) -> BmiResult<String> {
        let mut out = StrBuf::new();
        self.handle
            .call(&functions::GET_VAR_TYPE, &mut [Arg::str(name), Arg::StrOut(&mut out)])?;
        Ok(out.to_string_lossy())
    }

    /// Scalar type or compound type name
    pub fn type_of(&self, name: &str) -> BmiResult<VarType> {
        let mut out = StrBuf::new();
        self.handle
            .call(&functions::GET_VAR_TYPE, &mut [Arg::str(name), Arg::StrOut(&mut out)])?;
        VarType::parse(out.value())
            .ok_or_else(|| BmiError::TypeMismatch(format!("type not found for variable {}", name)))
    }

    pub fn info(&self, name: &str) -> BmiResult<VariableInfo> {
        let var_type = self.type_of(name)?;
        let shape = self.shape_of(name)?;
        Ok(VariableInfo {
            name: name.to_string(),
            var_type,
            rank: shape.len(),
            shape,
        })
    }

    /// Every variable, in library order
    pub fn variables(&self) -> BmiResult<Vec<VariableInfo>> {
        let count = self.count()?;
        (0..count)
            .map(|i| self.name_at(i).and_then(|name| self.info(&name)))
            .collect()
    }
}

/// Truncate a MAXDIMS shape buffer to `rank`, rejecting negative extents and
/// non-zero entries past the rank.
pub(crate) fn checked_shape(what: &str, rank: usize, raw: &[c_int; MAXDIMS]) -> BmiResult<Vec<usize>> {
    if let Some(extra) = raw[rank.min(MAXDIMS)..].iter().find(|&&d| d != 0) {
        return Err(BmiError::Consistency(format!(
            "{} has rank {} but shape {:?} (entry {} past the rank)",
            what, rank, raw, extra
        )));
    }
    raw[..rank]
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| {
                BmiError::Consistency(format!("{} has negative extent in shape {:?}", what, raw))
            })
        })
        .collect()
}
