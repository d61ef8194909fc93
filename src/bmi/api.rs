//! The model interface as a trait, so drivers can run any model: a native
//! library behind [`BmiWrapper`] or a model written in Rust.

use std::sync::Arc;

use super::compound::{FieldInfo, FieldValue};
use super::introspect::VariableInfo;
use super::logger::LogSink;
use super::types::{ArrayValue, VarType, VarValue};
use super::wrapper::BmiWrapper;
use crate::error::BmiResult;

pub trait Bmi {
    fn initialize(&mut self) -> BmiResult<()>;

    /// Advance by `dt`, or by the model's own time step when `None`
    fn update(&mut self, dt: Option<f64>) -> BmiResult<()>;

    fn finalize(&mut self) -> BmiResult<()>;

    fn get_var_count(&self) -> BmiResult<usize>;
    fn get_var_name(&self, index: usize) -> BmiResult<String>;
    fn get_var_type(&self, name: &str) -> BmiResult<VarType>;
    fn get_var_rank(&self, name: &str) -> BmiResult<usize>;
    fn get_var_shape(&self, name: &str) -> BmiResult<Vec<usize>>;

    fn get_start_time(&self) -> BmiResult<f64>;
    fn get_end_time(&self) -> BmiResult<f64>;
    fn get_current_time(&self) -> BmiResult<f64>;
    fn get_time_step(&self) -> BmiResult<f64>;
    fn set_current_time(&mut self, time: f64) -> BmiResult<()>;

    fn get_var(&self, name: &str) -> BmiResult<Option<VarValue>>;
    fn set_var(&mut self, name: &str, value: &VarValue) -> BmiResult<()>;
    fn set_var_slice(
        &mut self,
        name: &str,
        start: &[usize],
        count: &[usize],
        value: &ArrayValue,
    ) -> BmiResult<()>;
    fn set_var_index(&mut self, name: &str, indices: &[usize], value: &ArrayValue) -> BmiResult<()>;

    fn inq_compound(&self, type_name: &str) -> BmiResult<usize>;
    fn inq_compound_field(&self, type_name: &str, index: usize) -> BmiResult<FieldInfo>;
    fn set_structure_field(
        &mut self,
        name: &str,
        id: &str,
        field: &str,
        value: &FieldValue,
    ) -> BmiResult<()>;

    fn set_logger(&mut self, sink: Arc<dyn LogSink>) -> BmiResult<()>;

    /// Every variable with its type and shape
    fn variables(&self) -> BmiResult<Vec<VariableInfo>> {
        (0..self.get_var_count()?)
            .map(|i| {
                let name = self.get_var_name(i)?;
                let var_type = self.get_var_type(&name)?;
                let shape = self.get_var_shape(&name)?;
                Ok(VariableInfo {
                    name,
                    var_type,
                    rank: shape.len(),
                    shape,
                })
            })
            .collect()
    }
}

impl Bmi for BmiWrapper {
    fn initialize(&mut self) -> BmiResult<()> {
        BmiWrapper::initialize(self)
    }

    fn update(&mut self, dt: Option<f64>) -> BmiResult<()> {
        BmiWrapper::update(self, dt)
    }

    fn finalize(&mut self) -> BmiResult<()> {
        BmiWrapper::finalize(self)
    }

    fn get_var_count(&self) -> BmiResult<usize> {
        BmiWrapper::get_var_count(self)
    }

    fn get_var_name(&self, index: usize) -> BmiResult<String> {
        BmiWrapper::get_var_name(self, index)
    }

    fn get_var_type(&self, name: &str) -> BmiResult<VarType> {
        BmiWrapper::get_var_type(self, name)
    }

    fn get_var_rank(&self, name: &str) -> BmiResult<usize> {
        BmiWrapper::get_var_rank(self, name)
    }

    fn get_var_shape(&self, name: &str) -> BmiResult<Vec<usize>> {
        BmiWrapper::get_var_shape(self, name)
    }

    fn get_start_time(&self) -> BmiResult<f64> {
        BmiWrapper::get_start_time(self)
    }

    fn get_end_time(&self) -> BmiResult<f64> {
        BmiWrapper::get_end_time(self)
    }

    fn get_current_time(&self) -> BmiResult<f64> {
        BmiWrapper::get_current_time(self)
    }

    fn get_time_step(&self) -> BmiResult<f64> {
        BmiWrapper::get_time_step(self)
    }

    fn set_current_time(&mut self, time: f64) -> BmiResult<()> {
        BmiWrapper::set_current_time(self, time)
    }

    fn get_var(&self, name: &str) -> BmiResult<Option<VarValue>> {
        BmiWrapper::get_var(self, name)
    }

    fn set_var(&mut self, name: &str, value: &VarValue) -> BmiResult<()> {
        BmiWrapper::set_var(self, name, value)
    }

    fn set_var_slice(
        &mut self,
        name: &str,
        start: &[usize],
        count: &[usize],
        value: &ArrayValue,
    ) -> BmiResult<()> {
        BmiWrapper::set_var_slice(self, name, start, count, value)
    }

    fn set_var_index(&mut self, name: &str, indices: &[usize], value: &ArrayValue) -> BmiResult<()> {
        BmiWrapper::set_var_index(self, name, indices, value)
    }

    fn inq_compound(&self, type_name: &str) -> BmiResult<usize> {
        BmiWrapper::inq_compound(self, type_name)
    }

    fn inq_compound_field(&self, type_name: &str, index: usize) -> BmiResult<FieldInfo> {
        BmiWrapper::inq_compound_field(self, type_name, index)
    }

    fn set_structure_field(
        &mut self,
        name: &str,
        id: &str,
        field: &str,
        value: &FieldValue,
    ) -> BmiResult<()> {
        BmiWrapper::set_structure_field(self, name, id, field, value)
    }

    fn set_logger(&mut self, sink: Arc<dyn LogSink>) -> BmiResult<()> {
        BmiWrapper::set_logger(self, sink)
    }

    fn variables(&self) -> BmiResult<Vec<VariableInfo>> {
        BmiWrapper::variables(self)
    }
}
