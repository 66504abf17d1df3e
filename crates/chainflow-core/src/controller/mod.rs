//! Parameter controllers
//!
//! A [`Controller`] drives one parameter of one chain operator from a
//! time-varying [`ControllerSource`]. Sources produce a normalized value in
//! `[0, 1]` which the controller maps onto its `[low, high]` range. Chains
//! call [`Controller::process`] once per buffer, before their operators run.

mod envelope;
mod oscillator;

pub use envelope::LinearEnvelope;
pub use oscillator::SineOscillator;

use crate::operator::{ChainOperator, OperatorInfo, ParamValue};

/// Time-varying normalized value
pub trait ControllerSource: Send {
    fn info(&self) -> &OperatorInfo;

    /// Current value in `[0, 1]`
    fn value(&self) -> ParamValue;

    /// Move the source's clock forward
    fn advance(&mut self, seconds: f64);

    /// Back to time zero
    fn reset(&mut self);

    fn set_parameter(&mut self, index: usize, value: ParamValue);

    fn get_parameter(&self, index: usize) -> ParamValue;
}

/// Binds a source to `operator`'s parameter `param` (both 0-based)
pub struct Controller {
    source: Box<dyn ControllerSource>,
    operator: usize,
    param: usize,
    low: ParamValue,
    high: ParamValue,
}

impl Controller {
    pub fn new(
        source: Box<dyn ControllerSource>,
        operator: usize,
        param: usize,
        low: ParamValue,
        high: ParamValue,
    ) -> Self {
        Self {
            source,
            operator,
            param,
            low,
            high,
        }
    }

    pub fn target(&self) -> (usize, usize) {
        (self.operator, self.param)
    }

    pub fn source(&self) -> &dyn ControllerSource {
        self.source.as_ref()
    }

    pub fn source_mut(&mut self) -> &mut dyn ControllerSource {
        self.source.as_mut()
    }

    /// Mapped value the target currently receives
    pub fn value(&self) -> ParamValue {
        self.low + self.source.value() * (self.high - self.low)
    }

    /// Push the current value into the target and advance by `seconds`
    ///
    /// A target index past the end of `operators` is ignored.
    pub fn process(&mut self, operators: &mut [Box<dyn ChainOperator>], seconds: f64) {
        let value = self.value();
        if let Some(op) = operators.get_mut(self.operator) {
            op.set_parameter(self.param, value);
        }
        self.source.advance(seconds);
    }

    pub fn reset(&mut self) {
        self.source.reset();
    }

    /// Called when operator `removed` left the chain
    ///
    /// Returns false if this controller targeted it and must go as well.
    pub(crate) fn operator_removed(&mut self, removed: usize) -> bool {
        if self.operator == removed {
            return false;
        }
        if self.operator > removed {
            self.operator -= 1;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::Amplify;

    #[test]
    fn test_envelope_drives_gain() {
        let mut ops: Vec<Box<dyn ChainOperator>> = vec![Box::new(Amplify::default())];
        let env = Box::new(LinearEnvelope::new(1.0));
        let mut ctrl = Controller::new(env, 0, 0, 0.0, 200.0);

        ctrl.process(&mut ops, 0.5);
        assert_eq!(ops[0].get_parameter(0), 0.0);
        ctrl.process(&mut ops, 0.5);
        assert!((ops[0].get_parameter(0) - 100.0).abs() < 1e-9);
        ctrl.process(&mut ops, 0.5);
        assert!((ops[0].get_parameter(0) - 200.0).abs() < 1e-9);
        // clamped at the end of the envelope
        ctrl.process(&mut ops, 0.5);
        assert!((ops[0].get_parameter(0) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_target_is_ignored() {
        let mut ops: Vec<Box<dyn ChainOperator>> = Vec::new();
        let mut ctrl = Controller::new(Box::new(LinearEnvelope::new(1.0)), 3, 0, 0.0, 1.0);
        ctrl.process(&mut ops, 0.1);
        assert!((ctrl.source().value() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_operator_removed_reindexes() {
        let mut ctrl = Controller::new(Box::new(LinearEnvelope::new(1.0)), 2, 0, 0.0, 1.0);
        assert!(ctrl.operator_removed(0));
        assert_eq!(ctrl.target(), (1, 0));
        assert!(!ctrl.operator_removed(1));
    }
}
