//! Stereo panning

use super::{ChainOperator, OperatorBase, OperatorInfo, ParamValue, ParameterDescriptor};
use crate::buffer::SampleBuffer;
use crate::types::Sample;

/// Balance between the first two channels
///
/// `right-%` at 50 leaves both channels untouched; towards 0 the right
/// channel is attenuated, towards 100 the left one. Other channels pass
/// through.
pub struct Pan {
    base: OperatorBase,
}

impl Pan {
    pub fn new(right_percent: ParamValue) -> Self {
        let info = OperatorInfo::new("Normal pan", "epp")
            .with_param(ParameterDescriptor::new("right-%", 50.0).with_bounds(0.0, 100.0));
        let mut base = OperatorBase::new(info);
        base.set(0, right_percent);
        Self { base }
    }

    fn gains(&self) -> (Sample, Sample) {
        let right = self.base.get(0);
        if right < 50.0 {
            (1.0, (right / 50.0) as Sample)
        } else {
            (((100.0 - right) / 50.0) as Sample, 1.0)
        }
    }
}

impl Default for Pan {
    fn default() -> Self {
        Self::new(50.0)
    }
}

impl ChainOperator for Pan {
    fn info(&self) -> &OperatorInfo {
        self.base.info()
    }

    fn process(&mut self, buffer: &mut SampleBuffer) {
        if buffer.channel_count() < 2 {
            return;
        }
        let (left, right) = self.gains();
        if left != 1.0 {
            buffer.channel_mut(0).iter_mut().for_each(|s| *s *= left);
        }
        if right != 1.0 {
            buffer.channel_mut(1).iter_mut().for_each(|s| *s *= right);
        }
    }

    fn set_parameter(&mut self, index: usize, value: ParamValue) {
        self.base.set(index, value);
    }

    fn get_parameter(&self, index: usize) -> ParamValue {
        self.base.get(index)
    }
}
