//! Native entry points of the model interface and their fixed signatures.
//!
//! Lifecycle functions return a status code directly; the query functions
//! are subroutines that write their result through a reference parameter.

use crate::ffi::ParamKind::{
    Buffer, Callback, Double, DoubleRef, Int, IntArray, IntRef, PtrRef, Str, StrOut,
};
use crate::ffi::{ReturnKind, Signature};

pub const INITIALIZE: Signature = Signature::new("initialize", &[Str], ReturnKind::Int);
pub const UPDATE: Signature = Signature::new("update", &[Double], ReturnKind::Int);
pub const FINALIZE: Signature = Signature::new("finalize", &[], ReturnKind::Int);

pub const GET_VAR_COUNT: Signature = Signature::subroutine("get_var_count", &[IntRef]);
pub const GET_VAR_NAME: Signature = Signature::subroutine("get_var_name", &[Int, StrOut]);
pub const GET_VAR_TYPE: Signature = Signature::subroutine("get_var_type", &[Str, StrOut]);
pub const GET_VAR_RANK: Signature = Signature::subroutine("get_var_rank", &[Str, IntRef]);
pub const GET_VAR_SHAPE: Signature = Signature::subroutine("get_var_shape", &[Str, IntArray]);

pub const GET_VAR: Signature = Signature::subroutine("get_var", &[Str, PtrRef]);
pub const SET_VAR: Signature = Signature::subroutine("set_var", &[Str, Buffer]);
pub const SET_VAR_SLICE: Signature =
    Signature::subroutine("set_var_slice", &[Str, IntArray, IntArray, Buffer]);

pub const INQ_COMPOUND: Signature = Signature::subroutine("inq_compound", &[Str, IntRef]);
/// type name, 1-based field index, field name, field type, field rank, field shape
pub const INQ_COMPOUND_FIELD: Signature = Signature::subroutine(
    "inq_compound_field",
    &[Str, IntRef, StrOut, StrOut, IntRef, IntArray],
);
/// variable name, element id, field name, pointer to the value
pub const SET_STRUCTURE_FIELD: Signature =
    Signature::subroutine("set_structure_field", &[Str, Str, Str, PtrRef]);

pub const SET_LOGGER: Signature = Signature::subroutine("set_logger", &[Callback]);

pub const GET_START_TIME: Signature = Signature::subroutine("get_start_time", &[DoubleRef]);
pub const GET_END_TIME: Signature = Signature::subroutine("get_end_time", &[DoubleRef]);
pub const GET_CURRENT_TIME: Signature = Signature::subroutine("get_current_time", &[DoubleRef]);
pub const GET_TIME_STEP: Signature = Signature::subroutine("get_time_step", &[DoubleRef]);
pub const SET_CURRENT_TIME: Signature = Signature::subroutine("set_current_time", &[Double]);

/// Every entry point the bridge knows about
pub const ALL: &[Signature] = &[
    INITIALIZE,
    UPDATE,
    FINALIZE,
    GET_VAR_COUNT,
    GET_VAR_NAME,
    GET_VAR_TYPE,
    GET_VAR_RANK,
    GET_VAR_SHAPE,
    GET_VAR,
    SET_VAR,
    SET_VAR_SLICE,
    INQ_COMPOUND,
    INQ_COMPOUND_FIELD,
    SET_STRUCTURE_FIELD,
    SET_LOGGER,
    GET_START_TIME,
    GET_END_TIME,
    GET_CURRENT_TIME,
    GET_TIME_STEP,
    SET_CURRENT_TIME,
];

/// Entry points whose absence is tolerated
pub const OPTIONAL: &[&'static str] = &["set_logger", "set_current_time", "set_var_slice"];
