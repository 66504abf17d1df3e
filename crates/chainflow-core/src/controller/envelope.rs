//! Linear envelope

use super::ControllerSource;
use crate::operator::{OperatorBase, OperatorInfo, ParamValue, ParameterDescriptor};

/// Ramps from 0 to 1 over `length-sec` seconds, then holds 1
pub struct LinearEnvelope {
    base: OperatorBase,
    position: f64,
}

impl LinearEnvelope {
    pub fn new(length_seconds: f64) -> Self {
        let info = OperatorInfo::new("Linear envelope", "kl")
            .with_param(ParameterDescriptor::new("length-sec", 1.0).with_bounds(0.0, f64::MAX));
        let mut base = OperatorBase::new(info);
        base.set(0, length_seconds);
        Self {
            base,
            position: 0.0,
        }
    }
}

impl ControllerSource for LinearEnvelope {
    fn info(&self) -> &OperatorInfo {
        self.base.info()
    }

    fn value(&self) -> ParamValue {
        let length = self.base.get(0);
        if length <= 0.0 {
            return 1.0;
        }
        (self.position / length).min(1.0)
    }

    fn advance(&mut self, seconds: f64) {
        self.position += seconds;
    }

    fn reset(&mut self) {
        self.position = 0.0;
    }

    fn set_parameter(&mut self, index: usize, value: ParamValue) {
        self.base.set(index, value);
    }

    fn get_parameter(&self, index: usize) -> ParamValue {
        self.base.get(index)
    }
}
