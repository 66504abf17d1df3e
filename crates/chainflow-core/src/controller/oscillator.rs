//! Sine oscillator

use std::f64::consts::TAU;

use super::ControllerSource;
use crate::operator::{OperatorBase, OperatorInfo, ParamValue, ParameterDescriptor};

/// `(sin(2π(f·t + phase)) + 1) / 2`
///
/// Parameters: `freq-Hz`, `phase` (in cycles, `[0, 1]`).
pub struct SineOscillator {
    base: OperatorBase,
    time: f64,
}

impl SineOscillator {
    pub fn new(frequency: f64, phase: f64) -> Self {
        let info = OperatorInfo::new("Sine oscillator", "kos")
            .with_param(ParameterDescriptor::new("freq-Hz", 1.0).with_bounds(0.0, 20_000.0))
            .with_param(ParameterDescriptor::new("phase", 0.0).with_bounds(0.0, 1.0));
        let mut base = OperatorBase::new(info);
        base.set(0, frequency);
        base.set(1, phase);
        Self { base, time: 0.0 }
    }
}

impl ControllerSource for SineOscillator {
    fn info(&self) -> &OperatorInfo {
        self.base.info()
    }

    fn value(&self) -> ParamValue {
        let cycles = self.base.get(0) * self.time + self.base.get(1);
        ((TAU * cycles).sin() + 1.0) / 2.0
    }

    fn advance(&mut self, seconds: f64) {
        self.time += seconds;
    }

    fn reset(&mut self) {
        self.time = 0.0;
    }

    fn set_parameter(&mut self, index: usize, value: ParamValue) {
        self.base.set(index, value);
    }

    fn get_parameter(&self, index: usize) -> ParamValue {
        self.base.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarter_cycles() {
        let mut osc = SineOscillator::new(1.0, 0.0);
        assert!((osc.value() - 0.5).abs() < 1e-9);
        osc.advance(0.25);
        assert!((osc.value() - 1.0).abs() < 1e-9);
        osc.advance(0.5);
        assert!(osc.value().abs() < 1e-9);
    }

    #[test]
    fn test_phase_offset() {
        let osc = SineOscillator::new(1.0, 0.25);
        assert!((osc.value() - 1.0).abs() < 1e-9);
    }
}
