//! Built-in modules selectable by key

use monisens_module::{Module, SimThermometer};
use thiserror::Error;

/// Keys accepted in `[device] module`
pub const MODULES: &[&str] = &["sim"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown module '{name}' (available: {})", MODULES.join(", "))]
pub struct UnknownModule {
    pub name: String,
}

pub fn instantiate(name: &str) -> Result<Box<dyn Module>, UnknownModule> {
    match name {
        "sim" => Ok(Box::new(SimThermometer::new())),
        other => Err(UnknownModule {
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instantiate() {
        for name in MODULES {
            assert!(instantiate(name).is_ok());
        }
        let err = instantiate("modbus").err().unwrap();
        assert_eq!(err.to_string(), "unknown module 'modbus' (available: sim)");
    }
}
