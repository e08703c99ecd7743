use std::collections::BTreeMap;
use std::fmt;

use glam::DVec2;
use rhai::{Dynamic, Map};
use serde::{Deserialize, Serialize};

use super::error::MarshalError;

/// Plain data that may cross the host/script boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptValue {
    Bool(bool),
    Number(f64),
    Str(String),
    Vec2(DVec2),
}

pub type PropertyMap = BTreeMap<String, ScriptValue>;

impl ScriptValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ScriptValue::Bool(_) => "bool",
            ScriptValue::Number(_) => "number",
            ScriptValue::Str(_) => "string",
            ScriptValue::Vec2(_) => "vec2",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<DVec2> {
        match self {
            ScriptValue::Vec2(value) => Some(*value),
            _ => None,
        }
    }

    pub fn to_dynamic(&self) -> Dynamic {
        match self {
            ScriptValue::Bool(value) => Dynamic::from_bool(*value),
            ScriptValue::Number(value) => Dynamic::from_float(*value),
            ScriptValue::Str(value) => Dynamic::from(value.clone()),
            ScriptValue::Vec2(value) => Dynamic::from(*value),
        }
    }

    /// Converts a script value into plain data. Integers widen to `f64`; anything that is not a
    /// number, bool, string or `Vec2` is rejected instead of being coerced.
    pub fn from_dynamic(value: &Dynamic) -> Result<Self, MarshalError> {
        if let Ok(int) = value.as_int() {
            return Ok(ScriptValue::Number(int as f64));
        }
        if let Ok(float) = value.as_float() {
            return finite(float).map(ScriptValue::Number);
        }
        if let Ok(flag) = value.as_bool() {
            return Ok(ScriptValue::Bool(flag));
        }
        if value.is_string() {
            return value
                .clone()
                .into_string()
                .map(ScriptValue::Str)
                .map_err(|type_name| MarshalError::Unsupported { type_name: type_name.to_string() });
        }
        if let Some(vec) = value.clone().try_cast::<DVec2>() {
            finite(vec.x)?;
            finite(vec.y)?;
            return Ok(ScriptValue::Vec2(vec));
        }
        Err(MarshalError::Unsupported { type_name: value.type_name().to_string() })
    }
}

fn finite(value: f64) -> Result<f64, MarshalError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MarshalError::NonFinite(value))
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Bool(value) => write!(f, "{value}"),
            ScriptValue::Number(value) => write!(f, "{value}"),
            ScriptValue::Str(value) => write!(f, "{value:?}"),
            ScriptValue::Vec2(value) => write!(f, "({}, {})", value.x, value.y),
        }
    }
}

impl From<f64> for ScriptValue {
    fn from(value: f64) -> Self {
        ScriptValue::Number(value)
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        ScriptValue::Bool(value)
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        ScriptValue::Str(value.to_string())
    }
}

impl From<DVec2> for ScriptValue {
    fn from(value: DVec2) -> Self {
        ScriptValue::Vec2(value)
    }
}

/// Reads a numeric API argument. Integers and floats are accepted; nothing else is.
pub(crate) fn number_arg(value: &Dynamic) -> Option<f64> {
    if let Ok(int) = value.as_int() {
        return Some(int as f64);
    }
    value.as_float().ok().filter(|float| float.is_finite())
}

/// Validates a per-context state map. Unit entries are dropped; every other entry must be plain
/// data so nothing script-native (closures, arrays, host handles) survives between invocations.
pub(crate) fn sanitize_state(state: &Dynamic) -> Result<Dynamic, MarshalError> {
    if state.is_unit() {
        return Ok(Dynamic::from_map(Map::new()));
    }
    let Some(map) = state.clone().try_cast::<Map>() else {
        return Err(MarshalError::StateNotMap { type_name: state.type_name().to_string() });
    };
    let mut clean = Map::new();
    for (key, value) in map {
        if value.is_unit() {
            continue;
        }
        let plain = ScriptValue::from_dynamic(&value)
            .map_err(|err| MarshalError::State { key: key.to_string(), source: Box::new(err) })?;
        clean.insert(key, plain.to_dynamic());
    }
    Ok(Dynamic::from_map(clean))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_widen_to_numbers() {
        let value = ScriptValue::from_dynamic(&Dynamic::from_int(7)).expect("int marshals");
        assert_eq!(value, ScriptValue::Number(7.0));
    }

    #[test]
    fn vectors_keep_both_fields() {
        let value = ScriptValue::from_dynamic(&Dynamic::from(DVec2::new(1.5, -2.0))).expect("vec marshals");
        assert_eq!(value.as_vec2(), Some(DVec2::new(1.5, -2.0)));
    }

    #[test]
    fn arrays_and_maps_are_rejected() {
        let array = Dynamic::from_array(vec![Dynamic::from_int(1)]);
        assert!(matches!(ScriptValue::from_dynamic(&array), Err(MarshalError::Unsupported { .. })));
        let map = Dynamic::from_map(Map::new());
        assert!(matches!(ScriptValue::from_dynamic(&map), Err(MarshalError::Unsupported { .. })));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let nan = Dynamic::from_float(f64::NAN);
        assert!(matches!(ScriptValue::from_dynamic(&nan), Err(MarshalError::NonFinite(_))));
    }

    #[test]
    fn state_maps_drop_unit_and_reject_nested_values() {
        let mut map = Map::new();
        map.insert("count".into(), Dynamic::from_int(2));
        map.insert("gone".into(), Dynamic::UNIT);
        let clean = sanitize_state(&Dynamic::from_map(map)).expect("plain state");
        let clean = clean.try_cast::<Map>().expect("map");
        assert_eq!(clean.len(), 1);

        let mut nested = Map::new();
        nested.insert("inner".into(), Dynamic::from_map(Map::new()));
        let err = sanitize_state(&Dynamic::from_map(nested)).unwrap_err();
        assert!(matches!(err, MarshalError::State { .. }));
    }

    #[test]
    fn json_shape_is_plain() {
        let json = serde_json::to_string(&ScriptValue::Vec2(DVec2::new(1.0, 2.0))).expect("serialize");
        assert_eq!(json, "[1.0,2.0]");
        let back: ScriptValue = serde_json::from_str("3").expect("deserialize");
        assert_eq!(back, ScriptValue::Number(3.0));
    }
}
