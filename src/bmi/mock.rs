//! In-process model used by the unit tests.
//!
//! The entry points are plain `extern "C"` functions registered in a
//! [`StaticSymbols`] table, so tests go through the same argument lowering
//! and dispatch as a library loaded from disk. State is per thread; every
//! call to [`symbols`] starts a fresh model.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{c_char, c_double, c_int, c_void, CStr, CString};
use std::path::PathBuf;

use parking_lot::{Mutex, MutexGuard};

use super::compound::{FieldValue, Record};
use crate::ffi::{LogCallback, NativeHandle, StaticSymbols, MAXDIMS};

/// Variables reported by `get_var_count`/`get_var_name`, in order. `mystery`
/// and `corrupt` answer metadata queries but are not listed.
pub const VARIABLES: [&str; 12] = [
    "ints", "grid", "level", "flags", "label", "hyper", "pumps", "single", "plane", "cells", "ghost",
    "missing",
];

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Pump {
    pub id: [u8; 16],
    pub capacity: f64,
    pub levels: [i32; 3],
    pub active: bool,
}

const PUMP_SIZE: usize = std::mem::size_of::<Pump>();

impl Pump {
    fn new(id: &str, capacity: f64, levels: [i32; 3], active: bool) -> Self {
        // Fixed-width, blank padded ids
        let mut padded = [b' '; 16];
        padded[..id.len()].copy_from_slice(id.as_bytes());
        Self {
            id: padded,
            capacity,
            levels,
            active,
        }
    }

    fn bytes(pumps: &[Pump]) -> Vec<u8> {
        let mut out = vec![0u8; PUMP_SIZE * pumps.len()];
        for (pump, chunk) in pumps.iter().zip(out.chunks_exact_mut(PUMP_SIZE)) {
            chunk[..16].copy_from_slice(&pump.id);
            chunk[16..24].copy_from_slice(&pump.capacity.to_ne_bytes());
            for (i, level) in pump.levels.iter().enumerate() {
                chunk[24 + 4 * i..28 + 4 * i].copy_from_slice(&level.to_ne_bytes());
            }
            chunk[36] = pump.active as u8;
        }
        out
    }
}

/// Record with the field order of [`Pump`]
pub fn pump_record(id: &str, capacity: f64) -> Record {
    Record::new()
        .with("id", id)
        .with("capacity", capacity)
        .with("levels", FieldValue::Ints(vec![1, 1, 2]))
        .with("active", true)
}

pub struct MockVar {
    type_tag: &'static str,
    rank: c_int,
    shape: [c_int; MAXDIMS],
    data: Vec<u64>,
    len: usize,
    null: bool,
}

impl MockVar {
    fn new(type_tag: &'static str, shape: &[c_int], bytes: &[u8]) -> Self {
        let mut full = [0; MAXDIMS];
        full[..shape.len()].copy_from_slice(shape);
        let mut var = Self {
            type_tag,
            rank: shape.len() as c_int,
            shape: full,
            data: vec![0u64; bytes.len().div_ceil(8)],
            len: bytes.len(),
            null: false,
        };
        var.bytes_mut().copy_from_slice(bytes);
        var
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.data.as_mut_ptr() as *mut u8, self.len) }
    }

    fn elem_size(&self) -> usize {
        match self.type_tag {
            "double" => 8,
            "float" | "int" => 4,
            "bool" | "char" => 1,
            _ => PUMP_SIZE,
        }
    }

    fn dims(&self) -> Vec<usize> {
        self.shape[..self.rank.max(0) as usize]
            .iter()
            .map(|&d| d as usize)
            .collect()
    }
}

pub struct MockField {
    name: &'static str,
    type_tag: &'static str,
    shape: Vec<c_int>,
}

fn field(name: &'static str, type_tag: &'static str, shape: &[c_int]) -> MockField {
    MockField {
        name,
        type_tag,
        shape: shape.to_vec(),
    }
}

pub struct MockModel {
    pub calls: Vec<String>,
    /// Native (1-based) indices seen by `inq_compound_field`
    pub field_queries: Vec<c_int>,
    pub config: Option<String>,
    pub init_cwd: Option<PathBuf>,
    pub update_status: c_int,
    pub finalize_status: c_int,
    pub start: f64,
    pub end: f64,
    pub step: f64,
    pub current: f64,
    pub logger: Option<LogCallback>,
    vars: HashMap<String, MockVar>,
    compounds: HashMap<&'static str, Vec<MockField>>,
}

impl MockModel {
    fn new() -> Self {
        let mut vars = HashMap::new();
        let mut add = |name: &str, var: MockVar| {
            vars.insert(name.to_string(), var);
        };

        let ints: Vec<u8> = [1i32, 2, 3].iter().flat_map(|v| v.to_ne_bytes()).collect();
        add("ints", MockVar::new("int", &[3], &ints));
        let grid: Vec<u8> = (0..6).flat_map(|v| f64::from(v).to_ne_bytes()).collect();
        add("grid", MockVar::new("double", &[2, 3], &grid));
        add("level", MockVar::new("float", &[], &1.5f32.to_ne_bytes()));
        add("flags", MockVar::new("bool", &[4], &[1, 0, 1, 0]));
        add("label", MockVar::new("char", &[8], b"gauge\0\0\0"));
        add("hyper", MockVar::new("double", &[1, 2, 1, 2, 1, 2], &[0u8; 64]));

        let pumps = [
            Pump::new("p1", 2.5, [1, 2, 3], true),
            Pump::new("p2", 7.5, [4, 5, 6], false),
        ];
        add("pumps", MockVar::new("pump", &[2], &Pump::bytes(&pumps)));
        let solo = [Pump::new("solo", 1.0, [0, 0, 0], true)];
        add("single", MockVar::new("pump", &[], &Pump::bytes(&solo)));
        let plane = [pumps[0], pumps[1], pumps[0], pumps[1]];
        add("plane", MockVar::new("pump", &[2, 2], &Pump::bytes(&plane)));
        add("cells", MockVar::new("cell", &[1], &[0u8; 32]));
        add("ghost", MockVar::new("nothing", &[], &[]));

        let mut missing = MockVar::new("double", &[2], &[0u8; 16]);
        missing.null = true;
        add("missing", missing);

        add("mystery", MockVar::new("", &[], &[0u8; 4]));
        let mut corrupt = MockVar::new("double", &[3], &[0u8; 24]);
        corrupt.shape[1] = 9;
        add("corrupt", corrupt);

        let mut compounds = HashMap::new();
        compounds.insert(
            "pump",
            vec![
                field("id", "char", &[16]),
                field("capacity", "double", &[]),
                field("levels", "int", &[3]),
                field("active", "bool", &[]),
            ],
        );
        compounds.insert("cell", vec![field("corners", "double", &[2, 2])]);

        Self {
            calls: Vec::new(),
            field_queries: Vec::new(),
            config: None,
            init_cwd: None,
            update_status: 0,
            finalize_status: 0,
            start: 0.0,
            end: 10.0,
            step: 1.0,
            current: 0.0,
            logger: None,
            vars,
            compounds,
        }
    }

    /// Add an unlisted, zero-filled variable
    pub fn define(&mut self, name: &str, type_tag: &'static str, shape: &[c_int]) {
        let count: c_int = shape.iter().product();
        let mut var = MockVar::new(type_tag, shape, &[]);
        var.len = count as usize * var.elem_size();
        var.data = vec![0u64; var.len.div_ceil(8)];
        self.vars.insert(name.to_string(), var);
    }

    pub fn write_ints(&mut self, name: &str, values: &[i32]) {
        if let Some(var) = self.vars.get_mut(name) {
            let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
            var.bytes_mut().copy_from_slice(&bytes);
        }
    }
}

thread_local! {
    static MODEL: RefCell<MockModel> = RefCell::new(MockModel::new());
}

pub fn with_model<R>(f: impl FnOnce(&mut MockModel) -> R) -> R {
    MODEL.with(|m| f(&mut m.borrow_mut()))
}

fn record(call: &str) {
    with_model(|m| m.calls.push(call.to_string()));
}

static SERIAL: Mutex<()> = Mutex::new(());

/// Held by tests that touch process-wide state (working directory, logger)
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

/// Send a log record through the registered callback
pub fn emit(level: c_int, message: &str) {
    if let Some(callback) = with_model(|m| m.logger) {
        let text = CString::new(message).unwrap();
        callback(level, text.as_ptr());
    }
}

unsafe fn text(ptr: *const c_char) -> String {
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

unsafe fn write_text(out: *mut c_char, value: &str) {
    std::ptr::copy_nonoverlapping(value.as_ptr(), out as *mut u8, value.len());
    *out.add(value.len()) = 0;
}

extern "C" fn initialize(config: *const c_char) -> c_int {
    record("initialize");
    let config = unsafe { text(config) };
    let failed = config.contains("broken");
    with_model(|m| {
        m.config = Some(config);
        m.init_cwd = std::env::current_dir().ok();
    });
    if failed {
        7
    } else {
        0
    }
}

extern "C" fn update(dt: c_double) -> c_int {
    record("update");
    with_model(|m| {
        if m.update_status == 0 {
            m.current += dt;
        }
        m.update_status
    })
}

extern "C" fn finalize() -> c_int {
    record("finalize");
    with_model(|m| m.finalize_status)
}

extern "C" fn get_var_count(count: *mut c_int) {
    record("get_var_count");
    unsafe { *count = VARIABLES.len() as c_int };
}

extern "C" fn get_var_name(index: c_int, out: *mut c_char) {
    record("get_var_name");
    let name = VARIABLES.get(index as usize).copied().unwrap_or("");
    unsafe { write_text(out, name) };
}

extern "C" fn get_var_type(name: *const c_char, out: *mut c_char) {
    record("get_var_type");
    let name = unsafe { text(name) };
    let tag = with_model(|m| m.vars.get(&name).map_or("", |v| v.type_tag));
    unsafe { write_text(out, tag) };
}

extern "C" fn get_var_rank(name: *const c_char, rank: *mut c_int) {
    record("get_var_rank");
    let name = unsafe { text(name) };
    let value = with_model(|m| m.vars.get(&name).map_or(0, |v| v.rank));
    unsafe { *rank = value };
}

extern "C" fn get_var_shape(name: *const c_char, shape: *mut c_int) {
    record("get_var_shape");
    let name = unsafe { text(name) };
    let value = with_model(|m| m.vars.get(&name).map_or([0; MAXDIMS], |v| v.shape));
    unsafe { std::ptr::copy_nonoverlapping(value.as_ptr(), shape, MAXDIMS) };
}

extern "C" fn get_var(name: *const c_char, data: *mut *mut c_void) {
    record("get_var");
    let name = unsafe { text(name) };
    let ptr = with_model(|m| match m.vars.get_mut(&name) {
        Some(var) if !var.null => var.data.as_mut_ptr() as *mut c_void,
        _ => std::ptr::null_mut(),
    });
    unsafe { *data = ptr };
}

extern "C" fn set_var(name: *const c_char, src: *const c_void) {
    record("set_var");
    let name = unsafe { text(name) };
    with_model(|m| {
        if let Some(var) = m.vars.get_mut(&name) {
            let len = var.len;
            let src = unsafe { std::slice::from_raw_parts(src as *const u8, len) };
            var.bytes_mut().copy_from_slice(src);
        }
    });
}

extern "C" fn set_var_slice(
    name: *const c_char,
    start: *const c_int,
    count: *const c_int,
    src: *const c_void,
) {
    record("set_var_slice");
    let name = unsafe { text(name) };
    with_model(|m| {
        let Some(var) = m.vars.get_mut(&name) else {
            return;
        };
        let dims = var.dims();
        let rank = dims.len();
        let start = unsafe { std::slice::from_raw_parts(start, rank) };
        let count = unsafe { std::slice::from_raw_parts(count, rank) };
        let size = var.elem_size();
        let total: usize = dims.iter().product();
        let block: usize = count.iter().map(|&c| c as usize).product();
        let src = unsafe { std::slice::from_raw_parts(src as *const u8, block * size) };
        let dst = var.bytes_mut();

        // Visit every element and copy the ones inside the block.
        for flat in 0..total {
            let mut rest = flat;
            let mut local = 0;
            let mut inside = true;
            for d in (0..rank).rev() {
                let index = rest % dims[d];
                rest /= dims[d];
                let offset = index as i64 - start[d] as i64;
                if offset < 0 || offset >= count[d] as i64 {
                    inside = false;
                    break;
                }
                let local_stride: usize = count[d + 1..].iter().map(|&c| c as usize).product();
                local += offset as usize * local_stride;
            }
            if inside {
                dst[flat * size..(flat + 1) * size]
                    .copy_from_slice(&src[local * size..(local + 1) * size]);
            }
        }
    });
}

extern "C" fn inq_compound(name: *const c_char, count: *mut c_int) {
    record("inq_compound");
    let name = unsafe { text(name) };
    let n = with_model(|m| m.compounds.get(name.as_str()).map_or(0, |f| f.len()));
    unsafe { *count = n as c_int };
}

extern "C" fn inq_compound_field(
    name: *const c_char,
    index: *mut c_int,
    field_name: *mut c_char,
    field_type: *mut c_char,
    rank: *mut c_int,
    shape: *mut c_int,
) {
    record("inq_compound_field");
    let name = unsafe { text(name) };
    let index = unsafe { *index };
    with_model(|m| {
        m.field_queries.push(index);
        let Some(field) = m
            .compounds
            .get(name.as_str())
            .and_then(|fields| fields.get((index - 1) as usize))
        else {
            return;
        };
        unsafe {
            write_text(field_name, field.name);
            write_text(field_type, field.type_tag);
            *rank = field.shape.len() as c_int;
            std::ptr::copy_nonoverlapping(field.shape.as_ptr(), shape, field.shape.len());
        }
    });
}

extern "C" fn set_structure_field(
    name: *const c_char,
    id: *const c_char,
    field: *const c_char,
    value: *mut *mut c_void,
) {
    record("set_structure_field");
    let (name, id, field) = unsafe { (text(name), text(id), text(field)) };
    let (offset, size) = match field.as_str() {
        "id" => (0, 16),
        "capacity" => (16, 8),
        "levels" => (24, 12),
        "active" => (36, 1),
        _ => return,
    };
    with_model(|m| {
        let Some(var) = m.vars.get_mut(&name) else {
            return;
        };
        let bytes = var.bytes_mut();
        for pump in bytes.chunks_exact_mut(PUMP_SIZE) {
            let pump_id = String::from_utf8_lossy(&pump[..16]);
            if pump_id.trim_end_matches([' ', '\0']) == id {
                let src = unsafe { std::slice::from_raw_parts(*value as *const u8, size) };
                pump[offset..offset + size].copy_from_slice(src);
            }
        }
    });
}

extern "C" fn set_logger(callback: LogCallback) {
    record("set_logger");
    with_model(|m| m.logger = Some(callback));
}

extern "C" fn get_start_time(t: *mut c_double) {
    record("get_start_time");
    unsafe { *t = with_model(|m| m.start) };
}

extern "C" fn get_end_time(t: *mut c_double) {
    record("get_end_time");
    unsafe { *t = with_model(|m| m.end) };
}

extern "C" fn get_current_time(t: *mut c_double) {
    record("get_current_time");
    unsafe { *t = with_model(|m| m.current) };
}

extern "C" fn get_time_step(t: *mut c_double) {
    record("get_time_step");
    unsafe { *t = with_model(|m| m.step) };
}

extern "C" fn set_current_time(t: c_double) {
    record("set_current_time");
    with_model(|m| m.current = t);
}

/// Fresh model and the full symbol table
pub fn symbols() -> StaticSymbols {
    with_model(|m| *m = MockModel::new());
    StaticSymbols::new("mock")
        .with("initialize", initialize as *const ())
        .with("update", update as *const ())
        .with("finalize", finalize as *const ())
        .with("get_var_count", get_var_count as *const ())
        .with("get_var_name", get_var_name as *const ())
        .with("get_var_type", get_var_type as *const ())
        .with("get_var_rank", get_var_rank as *const ())
        .with("get_var_shape", get_var_shape as *const ())
        .with("get_var", get_var as *const ())
        .with("set_var", set_var as *const ())
        .with("set_var_slice", set_var_slice as *const ())
        .with("inq_compound", inq_compound as *const ())
        .with("inq_compound_field", inq_compound_field as *const ())
        .with("set_structure_field", set_structure_field as *const ())
        .with("set_logger", set_logger as *const ())
        .with("get_start_time", get_start_time as *const ())
        .with("get_end_time", get_end_time as *const ())
        .with("get_current_time", get_current_time as *const ())
        .with("get_time_step", get_time_step as *const ())
        .with("set_current_time", set_current_time as *const ())
}

/// Fresh model with some entry points not exported
pub fn symbols_without(names: &[&str]) -> StaticSymbols {
    let mut symbols = symbols();
    for name in names {
        symbols.remove(name);
    }
    symbols
}

pub fn handle() -> NativeHandle {
    NativeHandle::from_symbols(symbols())
}

pub fn handle_without(names: &[&str]) -> NativeHandle {
    NativeHandle::from_symbols(symbols_without(names))
}

#[test]
fn test_symbol_table_covers_every_entry_point() {
    let symbols = symbols();
    assert_eq!(symbols.len(), super::functions::ALL.len());
    let handle = NativeHandle::from_symbols(symbols);
    for signature in super::functions::ALL {
        assert!(handle.has_symbol(signature.name), "{}", signature.name);
    }
}
