//! Amplify - gain in percent

use super::{ChainOperator, OperatorBase, OperatorInfo, ParamValue, ParameterDescriptor};
use crate::buffer::SampleBuffer;
use crate::types::Sample;

/// Gain operator
///
/// Parameters:
/// - `amp-%`: gain in percent (100 = unity)
/// - `clip`: when non-zero, clamp the result into the valid sample range
pub struct Amplify {
    base: OperatorBase,
}

impl Amplify {
    pub fn new(gain_percent: ParamValue) -> Self {
        let info = OperatorInfo::new("Amplify", "ea")
            .with_param(ParameterDescriptor::new("amp-%", 100.0).with_bounds(0.0, 100_000.0))
            .with_param(ParameterDescriptor::new("clip", 0.0).with_bounds(0.0, 1.0).integer());
        let mut base = OperatorBase::new(info);
        base.set(0, gain_percent);
        Self { base }
    }
}

impl Default for Amplify {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl ChainOperator for Amplify {
    fn info(&self) -> &OperatorInfo {
        self.base.info()
    }

    fn process(&mut self, buffer: &mut SampleBuffer) {
        let gain = (self.base.get(0) / 100.0) as Sample;
        if gain != 1.0 {
            buffer.scale(gain);
        }
        if self.base.get(1) != 0.0 {
            buffer.limit_values();
        }
    }

    fn set_parameter(&mut self, index: usize, value: ParamValue) {
        self.base.set(index, value);
    }

    fn get_parameter(&self, index: usize) -> ParamValue {
        self.base.get(index)
    }
}
