//! Array marshaling
//!
//! Moves variable data across the boundary. Reads always copy out of
//! native memory; scalar-typed data lands in an ndarray, compound data is
//! re-laid-out into records. Every write is validated against the
//! variable's current shape and type before the library sees the buffer.
//!
//! Partial writes use the library's `set_var_slice` when it is exported and
//! otherwise read the whole variable, patch it on the host and write it
//! back. Both paths produce the same result.

use std::ffi::{c_int, c_void};
use std::ptr;

use log::debug;

use super::compound::{CompoundTypeBuilder, FieldValue, Records};
use super::functions;
use super::introspect::{VariableInfo, VariableIntrospector};
use super::types::{ArrayValue, NativeBuffer, ScalarType, VarType, VarValue, VarView};
use crate::error::{BmiError, BmiResult};
use crate::ffi::{Arg, NativeHandle};

/// Reads and writes variable data through a loaded library
pub struct ArrayMarshaler<'a> {
    handle: &'a NativeHandle,
    compounds: &'a CompoundTypeBuilder,
}

impl<'a> ArrayMarshaler<'a> {
    pub fn new(handle: &'a NativeHandle, compounds: &'a CompoundTypeBuilder) -> Self {
        Self { handle, compounds }
    }

    fn introspector(&self) -> VariableIntrospector<'a> {
        VariableIntrospector::new(self.handle)
    }

    /// Address of the native data, `None` when the library hands back NULL
    pub fn var_pointer(&self, name: &str) -> BmiResult<Option<*mut c_void>> {
        let mut data: *mut c_void = ptr::null_mut();
        self.handle
            .call(&functions::GET_VAR, &mut [Arg::str(name), Arg::PtrRef(&mut data)])?;
        Ok((!data.is_null()).then_some(data))
    }

    /// Copy of the native bytes of a variable occupying `len` bytes
    fn read_bytes(&self, name: &str, len: usize) -> BmiResult<Option<Vec<u8>>> {
        let Some(data) = self.var_pointer(name)? else {
            return Ok(None);
        };
        // Safety: the library reported this shape and type for the buffer it
        // returned; the bytes are copied before any further native call.
        let bytes = unsafe { std::slice::from_raw_parts(data as *const u8, len) };
        Ok(Some(bytes.to_vec()))
    }

    /// Copy of the current value. `None` means the library has no value
    /// right now, which is distinct from a zero-filled value.
    pub fn get_var(&self, name: &str) -> BmiResult<Option<VarValue>> {
        let info = self.introspector().info(name)?;
        match &info.var_type {
            VarType::Scalar(ty) => {
                let Some(bytes) = self.read_bytes(name, info.len() * ty.size())? else {
                    debug!("NULL pointer returned for {}", name);
                    return Ok(None);
                };
                Ok(Some(ArrayValue::from_native_bytes(*ty, &info.shape, &bytes)?.into()))
            }
            VarType::Compound(type_name) => {
                let instances = compound_instances(&info)?;
                let layout = self.compounds.layout(self.handle, type_name)?;
                let Some(bytes) = self.read_bytes(name, layout.size * instances)? else {
                    debug!("NULL pointer returned for {}", name);
                    return Ok(None);
                };
                Ok(Some(
                    Records {
                        type_name: type_name.clone(),
                        rows: layout.decode_many(&bytes, instances)?,
                    }
                    .into(),
                ))
            }
        }
    }

    /// View into native memory.
    ///
    /// # Safety
    ///
    /// The caller picks `'v` and must not let the view outlive the next
    /// native call that could move the data, nor the library itself.
    pub(crate) unsafe fn view<'v>(&self, name: &str) -> BmiResult<Option<VarView<'v>>> {
        let info = self.introspector().info(name)?;
        let VarType::Scalar(ty) = info.var_type else {
            return Err(BmiError::UnsupportedFeature(format!(
                "compound variable {} can only be copied, not viewed",
                name
            )));
        };
        match self.var_pointer(name)? {
            Some(data) => VarView::from_raw(ty, &info.shape, data).map(Some),
            None => Ok(None),
        }
    }

    /// Replace the whole value. The element count and type must match the
    /// variable exactly.
    pub fn set_var(&self, name: &str, value: &VarValue) -> BmiResult<()> {
        let info = self.introspector().info(name)?;
        let mut buffer = match (value, &info.var_type) {
            (VarValue::Array(array), VarType::Scalar(ty)) => {
                check_array(&info, *ty, array.scalar_type(), array.len())?;
                array.to_native()
            }
            (VarValue::Records(records), VarType::Compound(type_name)) => {
                let instances = compound_instances(&info)?;
                if &records.type_name != type_name {
                    return Err(BmiError::TypeMismatch(format!(
                        "variable {} holds {} records, got {}",
                        name, type_name, records.type_name
                    )));
                }
                if records.len() != instances {
                    return Err(BmiError::TypeMismatch(format!(
                        "variable {} holds {} records, got {}",
                        name,
                        instances,
                        records.len()
                    )));
                }
                self.compounds
                    .layout(self.handle, type_name)?
                    .encode_many(&records.rows)?
            }
            (VarValue::Array(array), VarType::Compound(type_name)) => {
                return Err(BmiError::TypeMismatch(format!(
                    "variable {} holds {} records, got a {} array",
                    name,
                    type_name,
                    array.scalar_type()
                )));
            }
            (VarValue::Records(records), VarType::Scalar(ty)) => {
                return Err(BmiError::TypeMismatch(format!(
                    "variable {} holds {} values, got {} records",
                    name, ty, records.type_name
                )));
            }
        };
        self.write_whole(name, &mut buffer)
    }

    fn write_whole(&self, name: &str, buffer: &mut NativeBuffer) -> BmiResult<()> {
        self.handle.call(
            &functions::SET_VAR,
            &mut [Arg::str(name), Arg::Buffer(buffer.as_mut_ptr())],
        )?;
        Ok(())
    }

    /// Current native bytes of a scalar-typed variable, as a writable copy
    fn fetch_for_update(&self, name: &str, info: &VariableInfo, ty: ScalarType) -> BmiResult<NativeBuffer> {
        let bytes = self
            .read_bytes(name, info.len() * ty.size())?
            .ok_or_else(|| BmiError::Unavailable {
                name: name.to_string(),
            })?;
        Ok(NativeBuffer::from_bytes(&bytes))
    }

    /// Write `value` into the block `[start[i], start[i] + count[i])` of
    /// every dimension. `value` is row-major over `count`.
    pub fn set_var_slice(
        &self,
        name: &str,
        start: &[usize],
        count: &[usize],
        value: &ArrayValue,
    ) -> BmiResult<()> {
        let info = self.introspector().info(name)?;
        let ty = scalar_target(&info, "set_var_slice")?;

        if start.len() != info.rank || count.len() != info.rank {
            return Err(BmiError::IndexOutOfRange(format!(
                "slice with start {:?} and count {:?} for variable {} of rank {}",
                start, count, name, info.rank
            )));
        }
        for (dim, ((&s, &c), &extent)) in start.iter().zip(count).zip(&info.shape).enumerate() {
            if s.checked_add(c).map_or(true, |end| end > extent) {
                return Err(BmiError::IndexOutOfRange(format!(
                    "slice {}..{} of dimension {} of variable {} with extent {}",
                    s,
                    s.saturating_add(c),
                    dim,
                    name,
                    extent
                )));
            }
        }
        check_array(&info_for(&info, count), ty, value.scalar_type(), value.len())?;

        let mut source = value.to_native();
        if self.handle.has_symbol(functions::SET_VAR_SLICE.name) {
            let mut native_start = to_native_ints(start)?;
            let mut native_count = to_native_ints(count)?;
            self.handle.call(
                &functions::SET_VAR_SLICE,
                &mut [
                    Arg::str(name),
                    Arg::IntArray(&mut native_start),
                    Arg::IntArray(&mut native_count),
                    Arg::Buffer(source.as_mut_ptr()),
                ],
            )?;
            return Ok(());
        }

        debug!("No set_var_slice, rewriting all of {}", name);
        let mut whole = self.fetch_for_update(name, &info, ty)?;
        copy_region(
            whole.as_bytes_mut(),
            &info.shape,
            start,
            count,
            source.as_bytes(),
            ty.size(),
        );
        self.write_whole(name, &mut whole)
    }

    /// Write `value[k]` to row-major position `indices[k]`
    pub fn set_var_index(&self, name: &str, indices: &[usize], value: &ArrayValue) -> BmiResult<()> {
        let info = self.introspector().info(name)?;
        let ty = scalar_target(&info, "set_var_index")?;

        if value.scalar_type() != ty {
            return Err(BmiError::TypeMismatch(format!(
                "variable {} holds {} values, got {}",
                name,
                ty,
                value.scalar_type()
            )));
        }
        if indices.len() != value.len() {
            return Err(BmiError::TypeMismatch(format!(
                "{} indices for {} values",
                indices.len(),
                value.len()
            )));
        }
        let total = info.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= total) {
            return Err(BmiError::IndexOutOfRange(format!(
                "flat index {} of variable {} with {} elements",
                bad, name, total
            )));
        }

        let size = ty.size();
        let source = value.to_native();
        let mut whole = self.fetch_for_update(name, &info, ty)?;
        let dst = whole.as_bytes_mut();
        for (k, &index) in indices.iter().enumerate() {
            dst[index * size..(index + 1) * size]
                .copy_from_slice(&source.as_bytes()[k * size..(k + 1) * size]);
        }
        self.write_whole(name, &mut whole)
    }

    /// Write one field of the struct element whose `id` is `id`
    pub fn set_structure_field(
        &self,
        name: &str,
        id: &str,
        field: &str,
        value: &FieldValue,
    ) -> BmiResult<()> {
        let info = self.introspector().info(name)?;
        let VarType::Compound(type_name) = &info.var_type else {
            return Err(BmiError::TypeMismatch(format!(
                "variable {} is not a compound variable",
                name
            )));
        };
        if info.rank != 1 {
            return Err(BmiError::UnsupportedFeature(format!(
                "structure fields can only be set on rank 1 variables, {} has rank {}",
                name, info.rank
            )));
        }

        let layout = self.compounds.layout(self.handle, type_name)?;
        let field_layout = layout.field(field).ok_or_else(|| {
            BmiError::TypeMismatch(format!("compound {} has no field {}", type_name, field))
        })?;
        let mut buffer = NativeBuffer::zeroed(field_layout.size());
        field_layout.encode(value, buffer.as_bytes_mut())?;

        let mut value_ptr = buffer.as_mut_ptr();
        self.handle.call(
            &functions::SET_STRUCTURE_FIELD,
            &mut [
                Arg::str(name),
                Arg::str(id),
                Arg::str(field),
                Arg::PtrRef(&mut value_ptr),
            ],
        )?;
        Ok(())
    }
}

/// Number of struct instances behind a compound variable
fn compound_instances(info: &VariableInfo) -> BmiResult<usize> {
    match info.rank {
        0 => Ok(1),
        1 => Ok(info.shape[0]),
        rank => Err(BmiError::UnsupportedFeature(format!(
            "compound variable {} has rank {}, only rank 0 and 1 are supported",
            info.name, rank
        ))),
    }
}

fn scalar_target(info: &VariableInfo, operation: &str) -> BmiResult<ScalarType> {
    match &info.var_type {
        VarType::Scalar(ty) => Ok(*ty),
        VarType::Compound(type_name) => Err(BmiError::UnsupportedFeature(format!(
            "{} on compound variable {} of type {}",
            operation, info.name, type_name
        ))),
    }
}

fn info_for(info: &VariableInfo, shape: &[usize]) -> VariableInfo {
    VariableInfo {
        name: info.name.clone(),
        var_type: info.var_type.clone(),
        rank: shape.len(),
        shape: shape.to_vec(),
    }
}

fn check_array(info: &VariableInfo, ty: ScalarType, got: ScalarType, len: usize) -> BmiResult<()> {
    if got != ty {
        return Err(BmiError::TypeMismatch(format!(
            "variable {} holds {} values, got {}",
            info.name, ty, got
        )));
    }
    if len != info.len() {
        return Err(BmiError::TypeMismatch(format!(
            "variable {} expects {} elements for shape {:?}, got {}",
            info.name,
            info.len(),
            info.shape,
            len
        )));
    }
    Ok(())
}

fn to_native_ints(values: &[usize]) -> BmiResult<Vec<c_int>> {
    values
        .iter()
        .map(|&v| {
            c_int::try_from(v).map_err(|_| BmiError::IndexOutOfRange(format!("{} exceeds int", v)))
        })
        .collect()
}

/// Copy a row-major block of `count` elements from `src` into the region of
/// `dst` (row-major over `shape`) starting at `start`. Bounds must already
/// be checked.
pub fn copy_region(
    dst: &mut [u8],
    shape: &[usize],
    start: &[usize],
    count: &[usize],
    src: &[u8],
    elem_size: usize,
) {
    let rank = shape.len();
    if rank == 0 {
        dst[..elem_size].copy_from_slice(&src[..elem_size]);
        return;
    }
    if count.iter().any(|&c| c == 0) {
        return;
    }

    let mut strides = vec![1usize; rank];
    for d in (0..rank - 1).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }

    // Innermost rows are contiguous on both sides.
    let run = count[rank - 1] * elem_size;
    let mut outer = vec![0usize; rank - 1];
    let mut src_offset = 0;
    loop {
        let flat = start[rank - 1]
            + outer
                .iter()
                .enumerate()
                .map(|(d, &i)| (start[d] + i) * strides[d])
                .sum::<usize>();
        let dst_offset = flat * elem_size;
        dst[dst_offset..dst_offset + run].copy_from_slice(&src[src_offset..src_offset + run]);
        src_offset += run;

        let mut d = rank - 1;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            outer[d] += 1;
            if outer[d] < count[d] {
                break;
            }
            outer[d] = 0;
        }
    }
}
