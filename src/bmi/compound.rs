//! Compound types
//!
//! A compound type is a C struct whose fields are only known after asking
//! the library. [`CompoundTypeBuilder`] queries the field list and turns it
//! into a [`CompoundLayout`]: field offsets and sizes under the C layout
//! rules, which is then used to decode struct instances into [`Record`]s
//! and to encode them back.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::c_int;
use std::rc::Rc;

use log::debug;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use super::functions;
use super::introspect::checked_shape;
use super::types::{NativeBuffer, NativeElement, ScalarType};
use crate::error::{BmiError, BmiResult};
use crate::ffi::{Arg, NativeHandle, StrBuf, MAXDIMS};

/// Field metadata as reported by the library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub type_tag: String,
    pub rank: usize,
    pub shape: Vec<usize>,
}

/// Placement of one field inside the struct
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldLayout {
    pub name: String,
    pub scalar: ScalarType,
    /// 0 for a single element, 1 for a fixed-length array
    pub rank: usize,
    /// Number of elements (1 for rank 0)
    pub count: usize,
    pub offset: usize,
}

impl FieldLayout {
    pub fn size(&self) -> usize {
        self.scalar.size() * self.count
    }

    fn decode(&self, bytes: &[u8]) -> FieldValue {
        let raw = &bytes[self.offset..self.offset + self.size()];
        let size = self.scalar.size();

        fn elements<T: NativeElement>(raw: &[u8], size: usize) -> Vec<T> {
            raw.chunks_exact(size).map(T::read).collect()
        }

        match (self.scalar, self.rank) {
            (ScalarType::Char, _) => {
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let mut text = String::from_utf8_lossy(&raw[..end]).into_owned();
                if self.name == "id" {
                    text.truncate(text.trim_end().len());
                }
                FieldValue::Text(text)
            }
            (ScalarType::Bool, 0) => FieldValue::Bool(bool::read(raw)),
            (ScalarType::Int, 0) => FieldValue::Int(i32::read(raw)),
            (ScalarType::Float, 0) => FieldValue::Float(f32::read(raw)),
            (ScalarType::Double, 0) => FieldValue::Double(f64::read(raw)),
            (ScalarType::Bool, _) => FieldValue::Bools(elements(raw, size)),
            (ScalarType::Int, _) => FieldValue::Ints(elements(raw, size)),
            (ScalarType::Float, _) => FieldValue::Floats(elements(raw, size)),
            (ScalarType::Double, _) => FieldValue::Doubles(elements(raw, size)),
        }
    }

    /// Encode `value` into `out`, which must be exactly [`size`](Self::size)
    /// bytes long
    pub fn encode(&self, value: &FieldValue, out: &mut [u8]) -> BmiResult<()> {
        let mismatch = || {
            BmiError::TypeMismatch(format!(
                "field {} holds {} {}, got {}",
                self.name,
                self.count,
                self.scalar,
                value.describe()
            ))
        };

        fn put<T: NativeElement>(values: &[T], out: &mut [u8]) {
            for (v, chunk) in values.iter().zip(out.chunks_exact_mut(T::TYPE.size())) {
                v.write(chunk);
            }
        }

        if value.scalar_type() != self.scalar {
            return Err(mismatch());
        }
        match value {
            FieldValue::Text(text) => {
                let bytes = text.as_bytes();
                if bytes.len() > self.count {
                    return Err(mismatch());
                }
                // ids are blank-padded so the library can match them bytewise
                out.fill(if self.name == "id" { b' ' } else { 0 });
                out[..bytes.len()].copy_from_slice(bytes);
                return Ok(());
            }
            _ if value.len() != self.count || (self.rank == 0) != value.is_single() => {
                return Err(mismatch());
            }
            _ => {}
        }
        match value {
            FieldValue::Bool(v) => v.write(out),
            FieldValue::Int(v) => v.write(out),
            FieldValue::Float(v) => v.write(out),
            FieldValue::Double(v) => v.write(out),
            FieldValue::Bools(v) => put(v, out),
            FieldValue::Ints(v) => put(v, out),
            FieldValue::Floats(v) => put(v, out),
            FieldValue::Doubles(v) => put(v, out),
            FieldValue::Text(_) => {}
        }
        Ok(())
    }
}

/// Byte layout of a compound type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompoundLayout {
    pub type_name: String,
    pub fields: Vec<FieldLayout>,
    /// Size of one instance including trailing padding
    pub size: usize,
    pub align: usize,
}

fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

impl CompoundLayout {
    /// Lay the fields out in declaration order, each at the next offset
    /// aligned for its element type
    pub fn from_fields(type_name: &str, fields: &[FieldInfo]) -> BmiResult<Self> {
        let mut laid_out = Vec::with_capacity(fields.len());
        let mut offset = 0;
        let mut align = 1;

        for field in fields {
            if field.rank > 1 {
                return Err(BmiError::UnsupportedFeature(format!(
                    "field {} of compound {} has rank {}, only rank 0 and 1 fields are supported",
                    field.name, type_name, field.rank
                )));
            }
            let scalar = ScalarType::from_tag(field.type_tag.as_bytes()).ok_or_else(|| {
                BmiError::TypeMismatch(format!(
                    "field {} of compound {} has unknown type '{}'",
                    field.name, type_name, field.type_tag
                ))
            })?;
            if field.shape.len() != field.rank {
                return Err(BmiError::Consistency(format!(
                    "field {} of compound {} has rank {} but shape {:?}",
                    field.name, type_name, field.rank, field.shape
                )));
            }
            let count = field.shape.first().copied().unwrap_or(1);

            offset = align_up(offset, scalar.align());
            align = align.max(scalar.align());
            laid_out.push(FieldLayout {
                name: field.name.clone(),
                scalar,
                rank: field.rank,
                count,
                offset,
            });
            offset += scalar.size() * count;
        }

        Ok(Self {
            type_name: type_name.to_string(),
            fields: laid_out,
            size: align_up(offset, align),
            align,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Decode one instance from exactly `size` bytes
    pub fn decode(&self, bytes: &[u8]) -> BmiResult<Record> {
        if bytes.len() != self.size {
            return Err(BmiError::Consistency(format!(
                "{} bytes for compound {} of size {}",
                bytes.len(),
                self.type_name,
                self.size
            )));
        }
        Ok(Record {
            fields: self
                .fields
                .iter()
                .map(|f| (f.name.clone(), f.decode(bytes)))
                .collect(),
        })
    }

    /// Decode `count` contiguous instances
    pub fn decode_many(&self, bytes: &[u8], count: usize) -> BmiResult<Vec<Record>> {
        if bytes.len() != self.size * count {
            return Err(BmiError::Consistency(format!(
                "{} bytes for {} instances of compound {} (size {})",
                bytes.len(),
                count,
                self.type_name,
                self.size
            )));
        }
        if self.size == 0 {
            return Ok(Vec::new());
        }
        bytes.chunks_exact(self.size).map(|chunk| self.decode(chunk)).collect()
    }

    /// Encode one instance. The record must have every field of the layout
    /// and nothing else.
    pub fn encode(&self, record: &Record, out: &mut [u8]) -> BmiResult<()> {
        if record.len() != self.fields.len() {
            return Err(BmiError::TypeMismatch(format!(
                "record with {} fields for compound {} with {}",
                record.len(),
                self.type_name,
                self.fields.len()
            )));
        }
        out.fill(0);
        for field in &self.fields {
            let value = record.get(&field.name).ok_or_else(|| {
                BmiError::TypeMismatch(format!(
                    "record for compound {} lacks field {}",
                    self.type_name, field.name
                ))
            })?;
            field.encode(value, &mut out[field.offset..field.offset + field.size()])?;
        }
        Ok(())
    }

    /// Encode contiguous instances into a buffer the library can read
    pub fn encode_many(&self, records: &[Record]) -> BmiResult<NativeBuffer> {
        let mut buf = NativeBuffer::zeroed(self.size * records.len());
        if self.size > 0 {
            for (record, chunk) in records.iter().zip(buf.as_bytes_mut().chunks_exact_mut(self.size)) {
                self.encode(record, chunk)?;
            }
        }
        Ok(buf)
    }
}

/// Value of one struct field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Double(f64),
    /// `char` fields, up to the first NUL
    Text(String),
    Bools(Vec<bool>),
    Ints(Vec<i32>),
    Floats(Vec<f32>),
    Doubles(Vec<f64>),
}

impl FieldValue {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            FieldValue::Bool(_) | FieldValue::Bools(_) => ScalarType::Bool,
            FieldValue::Int(_) | FieldValue::Ints(_) => ScalarType::Int,
            FieldValue::Float(_) | FieldValue::Floats(_) => ScalarType::Float,
            FieldValue::Double(_) | FieldValue::Doubles(_) => ScalarType::Double,
            FieldValue::Text(_) => ScalarType::Char,
        }
    }

    fn is_single(&self) -> bool {
        matches!(
            self,
            FieldValue::Bool(_) | FieldValue::Int(_) | FieldValue::Float(_) | FieldValue::Double(_)
        )
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            FieldValue::Bool(_) | FieldValue::Int(_) | FieldValue::Float(_) | FieldValue::Double(_) => 1,
            FieldValue::Text(s) => s.len(),
            FieldValue::Bools(v) => v.len(),
            FieldValue::Ints(v) => v.len(),
            FieldValue::Floats(v) => v.len(),
            FieldValue::Doubles(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn describe(&self) -> String {
        if self.is_single() {
            format!("a single {}", self.scalar_type())
        } else {
            format!("{} {}", self.len(), self.scalar_type())
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// One struct instance, fields in declaration order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Set a field, keeping its position if it already exists
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Copied instances of a compound variable, one record per element
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Records {
    pub type_name: String,
    pub rows: Vec<Record>,
}

impl Records {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row whose `id` field equals `id`
    pub fn find(&self, id: &str) -> Option<&Record> {
        self.rows
            .iter()
            .find(|r| matches!(r.get("id"), Some(FieldValue::Text(t)) if t == id))
    }
}

/// Queries compound type definitions and caches their layouts by type name.
///
/// Field indices are 0-based here; the library counts from 1.
#[derive(Default)]
pub struct CompoundTypeBuilder {
    cache: RefCell<HashMap<String, Rc<CompoundLayout>>>,
}

impl CompoundTypeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields of `type_name`
    pub fn field_count(&self, handle: &NativeHandle, type_name: &str) -> BmiResult<usize> {
        let mut count: c_int = 0;
        handle.call(
            &functions::INQ_COMPOUND,
            &mut [Arg::str(type_name), Arg::IntRef(&mut count)],
        )?;
        usize::try_from(count).map_err(|_| {
            BmiError::Consistency(format!("compound {} reports {} fields", type_name, count))
        })
    }

    /// Metadata of the field at 0-based `index`
    pub fn field(&self, handle: &NativeHandle, type_name: &str, index: usize) -> BmiResult<FieldInfo> {
        let count = self.field_count(handle, type_name)?;
        if index >= count {
            return Err(BmiError::IndexOutOfRange(format!(
                "field index {} of compound {} with {} fields",
                index, type_name, count
            )));
        }
        self.query_field(handle, type_name, index)
    }

    fn query_field(&self, handle: &NativeHandle, type_name: &str, index: usize) -> BmiResult<FieldInfo> {
        let mut native_index = c_int::try_from(index + 1)
            .map_err(|_| BmiError::IndexOutOfRange(format!("field index {}", index)))?;
        let mut name = StrBuf::new();
        let mut tag = StrBuf::new();
        let mut rank: c_int = 0;
        let mut shape: [c_int; MAXDIMS] = [0; MAXDIMS];

        handle.call(
            &functions::INQ_COMPOUND_FIELD,
            &mut [
                Arg::str(type_name),
                Arg::IntRef(&mut native_index),
                Arg::StrOut(&mut name),
                Arg::StrOut(&mut tag),
                Arg::IntRef(&mut rank),
                Arg::IntArray(&mut shape),
            ],
        )?;

        let name = name.to_string_lossy();
        let what = format!("field {} of compound {}", name, type_name);
        let rank = match usize::try_from(rank) {
            Ok(r) if r <= MAXDIMS => r,
            _ => {
                return Err(BmiError::Consistency(format!("{} reports rank {}", what, rank)));
            }
        };
        let shape = checked_shape(&what, rank, &shape)?;
        Ok(FieldInfo {
            name,
            type_tag: tag.to_string_lossy(),
            rank,
            shape,
        })
    }

    /// Layout of `type_name`, built on first use
    pub fn layout(&self, handle: &NativeHandle, type_name: &str) -> BmiResult<Rc<CompoundLayout>> {
        if let Some(layout) = self.cache.borrow().get(type_name) {
            return Ok(Rc::clone(layout));
        }

        let count = self.field_count(handle, type_name)?;
        if count == 0 {
            return Err(BmiError::TypeMismatch(format!(
                "compound type {} has no fields",
                type_name
            )));
        }
        let fields = (0..count)
            .map(|i| self.query_field(handle, type_name, i))
            .collect::<BmiResult<Vec<_>>>()?;
        let layout = Rc::new(CompoundLayout::from_fields(type_name, &fields)?);
        debug!(
            "Compound {}: {} fields, {} bytes",
            type_name,
            layout.fields.len(),
            layout.size
        );

        self.cache
            .borrow_mut()
            .insert(type_name.to_string(), Rc::clone(&layout));
        Ok(layout)
    }

    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmi::mock;

    fn info(name: &str, tag: &str, shape: &[usize]) -> FieldInfo {
        FieldInfo {
            name: name.to_string(),
            type_tag: tag.to_string(),
            rank: shape.len(),
            shape: shape.to_vec(),
        }
    }

    fn pump_fields() -> Vec<FieldInfo> {
        vec![
            info("id", "char", &[16]),
            info("capacity", "double", &[]),
            info("levels", "int", &[3]),
            info("active", "bool", &[]),
        ]
    }

    #[test]
    fn test_layout_follows_c_rules() {
        let layout = CompoundLayout::from_fields("pump", &pump_fields()).unwrap();
        let offsets: Vec<usize> = layout.fields.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 16, 24, 36]);
        assert_eq!(layout.size, std::mem::size_of::<mock::Pump>());
        assert_eq!(layout.align, 8);
    }

    #[test]
    fn test_padding_between_fields() {
        let fields = vec![info("flag", "bool", &[]), info("value", "double", &[]), info("n", "int", &[])];
        let layout = CompoundLayout::from_fields("padded", &fields).unwrap();
        assert_eq!(layout.fields[1].offset, 8);
        assert_eq!(layout.fields[2].offset, 16);
        assert_eq!(layout.size, 24);
    }

    #[test]
    fn test_rank_two_field_is_unsupported() {
        let fields = vec![info("corners", "double", &[2, 2])];
        let err = CompoundLayout::from_fields("cell", &fields).unwrap_err();
        assert!(matches!(err, BmiError::UnsupportedFeature(_)));
    }

    #[test]
    fn test_unknown_field_type() {
        let fields = vec![info("x", "long double", &[])];
        assert!(matches!(
            CompoundLayout::from_fields("odd", &fields),
            Err(BmiError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_decode_trims_id_only() {
        let layout = CompoundLayout::from_fields(
            "tagged",
            &[info("id", "char", &[8]), info("label", "char", &[8])],
        )
        .unwrap();
        let mut bytes = [0u8; 16];
        bytes[..6].copy_from_slice(b"p1    ");
        bytes[8..14].copy_from_slice(b"ab    ");
        let record = layout.decode(&bytes).unwrap();
        assert_eq!(record.get("id"), Some(&FieldValue::Text("p1".to_string())));
        assert_eq!(record.get("label"), Some(&FieldValue::Text("ab    ".to_string())));
    }

    #[test]
    fn test_encode_decode_record() {
        let layout = CompoundLayout::from_fields("pump", &pump_fields()).unwrap();
        let record = Record::new()
            .with("id", "north")
            .with("capacity", 2.5)
            .with("levels", FieldValue::Ints(vec![1, 2, 3]))
            .with("active", true);
        let buf = layout.encode_many(std::slice::from_ref(&record)).unwrap();
        assert_eq!(buf.len(), 40);
        assert_eq!(layout.decode_many(buf.as_bytes(), 1).unwrap(), vec![record]);
    }

    #[test]
    fn test_encoded_id_keeps_blank_padding() {
        let layout = CompoundLayout::from_fields(
            "tagged",
            &[info("id", "char", &[8]), info("label", "char", &[8])],
        )
        .unwrap();
        let record = Record::new().with("id", "p1").with("label", "ab");
        let mut out = [0xffu8; 16];
        layout.encode(&record, &mut out).unwrap();
        assert_eq!(&out[..8], b"p1      ");
        assert_eq!(&out[8..], b"ab\0\0\0\0\0\0");

        // Copied records written back leave the native ids unchanged
        let mut native = [0u8; 16];
        native[..8].copy_from_slice(b"p7      ");
        let decoded = layout.decode(&native).unwrap();
        let mut again = [0u8; 16];
        layout.encode(&decoded, &mut again).unwrap();
        assert_eq!(&again[..8], &native[..8]);
    }

    #[test]
    fn test_shape_must_match_rank() {
        let fields = vec![FieldInfo {
            name: "levels".to_string(),
            type_tag: "int".to_string(),
            rank: 1,
            shape: vec![],
        }];
        assert!(matches!(
            CompoundLayout::from_fields("broken", &fields),
            Err(BmiError::Consistency(_))
        ));
    }

    #[test]
    fn test_encode_rejects_wrong_field_types() {
        let layout = CompoundLayout::from_fields("pump", &pump_fields()).unwrap();
        let mut out = [0u8; 40];
        let wrong_type = Record::new()
            .with("id", "a")
            .with("capacity", 1)
            .with("levels", FieldValue::Ints(vec![1, 2, 3]))
            .with("active", true);
        assert!(matches!(layout.encode(&wrong_type, &mut out), Err(BmiError::TypeMismatch(_))));

        let short = wrong_type.clone().with("capacity", 1.0).with("levels", FieldValue::Ints(vec![1]));
        assert!(matches!(layout.encode(&short, &mut out), Err(BmiError::TypeMismatch(_))));

        let long_id = short.with("levels", FieldValue::Ints(vec![1, 2, 3])).with("id", "x".repeat(17));
        assert!(matches!(layout.encode(&long_id, &mut out), Err(BmiError::TypeMismatch(_))));
    }

    #[test]
    fn test_record_serializes_in_field_order() {
        let record = Record::new().with("b", 1).with("a", 2.0);
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"b":1,"a":2.0}"#);
    }

    #[test]
    fn test_builder_enumerates_every_field_once() {
        let handle = mock::handle();
        let builder = CompoundTypeBuilder::new();
        let count = builder.field_count(&handle, "pump").unwrap();
        assert_eq!(count, 4);

        let names: Vec<String> = (0..count)
            .map(|i| builder.field(&handle, "pump", i).unwrap().name)
            .collect();
        assert_eq!(names, vec!["id", "capacity", "levels", "active"]);
        assert!(matches!(
            builder.field(&handle, "pump", count),
            Err(BmiError::IndexOutOfRange(_))
        ));
        mock::with_model(|m| assert!(m.field_queries.iter().all(|&i| i >= 1 && i <= 4)));
    }

    #[test]
    fn test_builder_caches_layouts() {
        let handle = mock::handle();
        let builder = CompoundTypeBuilder::new();
        let first = builder.layout(&handle, "pump").unwrap();
        let queries = mock::with_model(|m| m.field_queries.len());
        let second = builder.layout(&handle, "pump").unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(mock::with_model(|m| m.field_queries.len()), queries);
        assert_eq!(builder.cached(), 1);
    }

    #[test]
    fn test_builder_rejects_rank_two_fields_and_empty_types() {
        let handle = mock::handle();
        let builder = CompoundTypeBuilder::new();
        assert!(matches!(
            builder.layout(&handle, "cell"),
            Err(BmiError::UnsupportedFeature(_))
        ));
        assert!(matches!(
            builder.layout(&handle, "nothing"),
            Err(BmiError::TypeMismatch(_))
        ));
        assert_eq!(builder.cached(), 0);
    }
}
