//! Operator registry - keys to constructors

use std::collections::HashMap;

use super::{Amplify, ChainOperator, ChannelCopy, DcFix, Pan, ParamValue};

/// Builds a boxed operator with default parameters
pub type OperatorConstructor = fn() -> Box<dyn ChainOperator>;

pub struct OperatorRegistry {
    constructors: HashMap<String, OperatorConstructor>,
}

impl OperatorRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with `ea`, `epp`, `chcopy` and `ezx`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("ea", || Box::new(Amplify::default()));
        registry.register("epp", || Box::new(Pan::default()));
        registry.register("chcopy", || Box::new(ChannelCopy::default()));
        registry.register("ezx", || Box::new(DcFix::default()));
        registry
    }

    pub fn register(&mut self, key: impl Into<String>, constructor: OperatorConstructor) {
        self.constructors.insert(key.into(), constructor);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Create operator `key` and apply `values` to its parameters in order
    ///
    /// Missing values keep the operator's defaults.
    pub fn create(&self, key: &str, values: &[ParamValue]) -> Option<Box<dyn ChainOperator>> {
        let constructor = self.constructors.get(key)?;
        let mut op = constructor();
        for (index, value) in values.iter().enumerate() {
            op.set_parameter(index, *value);
        }
        Some(op)
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
