//! Chain operators - traits, parameter metadata and the built-in set
//!
//! Every signal transform a chain can run implements [`ChainOperator`].
//! Parameter metadata is plain data ([`ParameterDescriptor`]) collected in
//! an [`OperatorInfo`]; concrete operators compose an [`OperatorBase`] that
//! stores the current values and clamps writes into range.
//!
//! Parameter indices are 0-based here. The engine's command interface uses
//! 1-based selection and converts at the chain boundary.

mod amplify;
mod channel;
mod dcfix;
mod pan;
mod registry;

pub use amplify::Amplify;
pub use channel::ChannelCopy;
pub use dcfix::DcFix;
pub use pan::Pan;
pub use registry::{OperatorConstructor, OperatorRegistry};

use std::collections::HashMap;

use crate::buffer::SampleBuffer;

/// Parameter value type (commands carry `f64` as well)
pub type ParamValue = f64;

/// Metadata of one operator parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub name: String,
    /// Position in the operator's parameter list
    pub index: usize,
    pub default: ParamValue,
    /// Inclusive `(lower, upper)` bounds
    pub bounds: (ParamValue, ParamValue),
    /// Values are rounded to whole numbers
    pub is_integer: bool,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, default: ParamValue) -> Self {
        Self {
            name: name.into(),
            index: 0,
            default,
            bounds: (ParamValue::MIN, ParamValue::MAX),
            is_integer: false,
        }
    }

    pub fn with_bounds(mut self, lower: ParamValue, upper: ParamValue) -> Self {
        self.bounds = (lower, upper);
        self
    }

    pub fn integer(mut self) -> Self {
        self.is_integer = true;
        self
    }

    /// Clamp (and round, for integer parameters) a raw value
    pub fn constrain(&self, value: ParamValue) -> ParamValue {
        let value = value.clamp(self.bounds.0, self.bounds.1);
        if self.is_integer {
            value.round()
        } else {
            value
        }
    }
}

/// Static description of an operator type
#[derive(Debug, Clone)]
pub struct OperatorInfo {
    /// Display name
    pub name: String,
    /// Registry key
    pub key: String,
    pub params: Vec<ParameterDescriptor>,
    by_name: HashMap<String, usize>,
}

impl OperatorInfo {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            params: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Append a parameter; its index is its position
    pub fn with_param(mut self, mut param: ParameterDescriptor) -> Self {
        param.index = self.params.len();
        self.by_name.insert(param.name.clone(), param.index);
        self.params.push(param);
        self
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }
}

/// A signal transform applied in place to a chain's buffer
pub trait ChainOperator: Send {
    fn info(&self) -> &OperatorInfo;

    fn name(&self) -> &str {
        &self.info().name
    }

    fn parameters(&self) -> &[ParameterDescriptor] {
        &self.info().params
    }

    /// Prepare for processing buffers shaped like `buffer`
    ///
    /// Called on every chain init, before `output_channels`.
    fn init(&mut self, _buffer: &SampleBuffer) {}

    fn process(&mut self, buffer: &mut SampleBuffer);

    /// Set parameter `index`; out-of-range indices are ignored
    fn set_parameter(&mut self, index: usize, value: ParamValue);

    fn get_parameter(&self, index: usize) -> ParamValue;

    /// Channel count produced for `input` input channels
    fn output_channels(&self, input: usize) -> usize {
        input
    }

    /// Drop any per-run state
    fn release(&mut self) {}
}

/// Parameter storage shared by the built-in operators
#[derive(Debug, Clone)]
pub struct OperatorBase {
    info: OperatorInfo,
    values: Vec<ParamValue>,
}

impl OperatorBase {
    pub fn new(info: OperatorInfo) -> Self {
        let values = info.params.iter().map(|p| p.default).collect();
        Self { info, values }
    }

    pub fn info(&self) -> &OperatorInfo {
        &self.info
    }

    pub fn set(&mut self, index: usize, value: ParamValue) {
        if let Some(desc) = self.info.params.get(index) {
            self.values[index] = desc.constrain(value);
        }
    }

    pub fn get(&self, index: usize) -> ParamValue {
        self.values.get(index).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_constrain() {
        let p = ParameterDescriptor::new("to", 2.0).with_bounds(1.0, 8.0).integer();
        assert_eq!(p.constrain(3.6), 4.0);
        assert_eq!(p.constrain(-5.0), 1.0);
        assert_eq!(p.constrain(100.0), 8.0);
    }

    #[test]
    fn test_info_indices_and_lookup() {
        let info = OperatorInfo::new("Test", "t")
            .with_param(ParameterDescriptor::new("a", 0.0))
            .with_param(ParameterDescriptor::new("b", 1.0));
        assert_eq!(info.param_count(), 2);
        assert_eq!(info.params[1].index, 1);
        assert_eq!(info.param_index("b"), Some(1));
        assert_eq!(info.param_index("c"), None);
    }

    #[test]
    fn test_base_defaults_and_clamping() {
        let info = OperatorInfo::new("Test", "t")
            .with_param(ParameterDescriptor::new("pct", 50.0).with_bounds(0.0, 100.0));
        let mut base = OperatorBase::new(info);
        assert_eq!(base.get(0), 50.0);
        base.set(0, 150.0);
        assert_eq!(base.get(0), 100.0);
        // unknown index is ignored
        base.set(7, 1.0);
        assert_eq!(base.get(7), 0.0);
    }
}
