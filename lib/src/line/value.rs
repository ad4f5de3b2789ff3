// SPDX-FileCopyrightText: 2021 Kent Gibson <warthog618@gmail.com>
//
// SPDX-License-Identifier: Apache-2.0 OR MIT

#[cfg(feature = "serde")]
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// The logical value of a line.
///
/// For an active-low line a physical low reads as active.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Value {
    #[default]
    Inactive,
    Active,
}

impl Value {
    /// The other value.
    pub fn not(&self) -> Value {
        (*self == Value::Inactive).into()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Value::Active => "active",
            Value::Inactive => "inactive",
        })
    }
}

impl From<Value> for bool {
    fn from(v: Value) -> bool {
        v == Value::Active
    }
}

impl From<Value> for u8 {
    fn from(v: Value) -> u8 {
        bool::from(v) as u8
    }
}

impl From<bool> for Value {
    fn from(active: bool) -> Value {
        [Value::Inactive, Value::Active][active as usize]
    }
}

// Any non-zero value is active, as for the v1 uAPI.
impl From<u8> for Value {
    fn from(i: u8) -> Value {
        (i != 0).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not() {
        assert_eq!(Value::Active.not(), Value::Inactive);
        assert_eq!(Value::Inactive.not(), Value::Active);
    }

    #[test]
    fn conversions() {
        assert_eq!(Value::from(true), Value::Active);
        assert_eq!(Value::from(0u8), Value::Inactive);
        assert_eq!(Value::from(42u8), Value::Active);
        assert_eq!(u8::from(Value::Active), 1);
        assert!(!bool::from(Value::Inactive));
        assert_eq!(Value::default(), Value::Inactive);
        assert_eq!(Value::Active.to_string(), "active");
    }
}
