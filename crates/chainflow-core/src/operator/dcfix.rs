//! DC offset correction

use super::{ChainOperator, OperatorBase, OperatorInfo, ParamValue, ParameterDescriptor};
use crate::buffer::SampleBuffer;
use crate::types::Sample;

/// Adds a constant to the first two channels
pub struct DcFix {
    base: OperatorBase,
}

impl DcFix {
    pub fn new(delta_left: ParamValue, delta_right: ParamValue) -> Self {
        let info = OperatorInfo::new("DC-Fix", "ezx")
            .with_param(ParameterDescriptor::new("delta-value-left", 0.0).with_bounds(-1.0, 1.0))
            .with_param(ParameterDescriptor::new("delta-value-right", 0.0).with_bounds(-1.0, 1.0));
        let mut base = OperatorBase::new(info);
        base.set(0, delta_left);
        base.set(1, delta_right);
        Self { base }
    }
}

impl Default for DcFix {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl ChainOperator for DcFix {
    fn info(&self) -> &OperatorInfo {
        self.base.info()
    }

    fn process(&mut self, buffer: &mut SampleBuffer) {
        let channels = buffer.channel_count().min(2);
        for ch in 0..channels {
            let delta = self.base.get(ch) as Sample;
            if delta != 0.0 {
                buffer.channel_mut(ch).iter_mut().for_each(|s| *s += delta);
            }
        }
    }

    fn set_parameter(&mut self, index: usize, value: ParamValue) {
        self.base.set(index, value);
    }

    fn get_parameter(&self, index: usize) -> ParamValue {
        self.base.get(index)
    }
}
