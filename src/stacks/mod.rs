//! Stack compositions: typed inputs mapped onto stack templates.
//!
//! Each composition produces:
//! 1. A `StackTemplate` with its resources, grants and outputs
//! 2. Handles (references) that later compositions wire into their own inputs

pub mod compute;
pub mod gateway;
pub mod identity;
pub mod schedule;
pub mod storage;

use crate::core::graph::PropValue;
use indexmap::IndexMap;

/// Wrap resolved environment variables the way function and container
/// definitions carry them.
pub fn environment_block(variables: &IndexMap<String, PropValue>) -> PropValue {
    PropValue::Map(IndexMap::from([(
        "Variables".to_string(),
        PropValue::Map(variables.clone()),
    )]))
}

/// Variables of an environment block, if the value is one.
pub fn environment_variables(block: &PropValue) -> Option<&IndexMap<String, PropValue>> {
    match block {
        PropValue::Map(map) => match map.get("Variables") {
            Some(PropValue::Map(vars)) => Some(vars),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stacks_environment_block() {
        let vars = IndexMap::from([("MASTER_DB".to_string(), PropValue::str("t"))]);
        let block = environment_block(&vars);
        assert_eq!(environment_variables(&block), Some(&vars));
        assert!(environment_variables(&PropValue::str("x")).is_none());
    }
}
