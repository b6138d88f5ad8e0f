//! Typed parameter model.
//!
//! An algo type declares its parameters as [`ParamDef`]s; callers fill in a
//! [`ParamMap`]. [`validate`] is a pure function from (defs, map) to either
//! the validated map (defaults filled in) or a [`ParamError`].
//!
//! Raw parameters arrive as a JSON object. [`from_json`] coerces each value
//! into the kind of the matching definition's default, so `{"qty": 5}` becomes
//! an `Int32` or a `Double` depending on what the algo declared.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

use crate::error::ParamError;
use crate::ids::{DataSrc, SecurityId, SubAccountId};
use crate::side::Side;

/// (source, security, sub-account, side, quantity). Used both as a parameter
/// kind and to express an order intent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityTuple {
    #[serde(default)]
    pub src: DataSrc,
    pub sec: SecurityId,
    #[serde(default)]
    pub acc: Option<SubAccountId>,
    #[serde(default)]
    pub side: Side,
    #[serde(default)]
    pub qty: f64,
}

/// A parameter value. `Vector` holds scalars only.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Bool(bool),
    Int64(i64),
    Int32(i32),
    Double(f64),
    Security(SecurityTuple),
    Vector(Vec<ParamValue>),
}

impl ParamValue {
    /// Numeric view used for range checks. Security tuples are checked on
    /// their quantity.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int64(v) => Some(*v as f64),
            ParamValue::Int32(v) => Some(*v as f64),
            ParamValue::Double(v) => Some(*v),
            ParamValue::Security(t) => Some(t.qty),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_security(&self) -> Option<&SecurityTuple> {
        match self {
            ParamValue::Security(t) => Some(t),
            _ => None,
        }
    }

    /// Plain JSON form, the inverse of [`from_json`] for a matching def.
    pub fn to_json(&self) -> Json {
        match self {
            ParamValue::Str(s) => Json::String(s.clone()),
            ParamValue::Bool(b) => Json::Bool(*b),
            ParamValue::Int64(v) => Json::from(*v),
            ParamValue::Int32(v) => Json::from(*v),
            ParamValue::Double(v) => Number::from_f64(*v).map(Json::Number).unwrap_or(Json::Null),
            ParamValue::Security(t) => serde_json::to_value(t).unwrap_or(Json::Null),
            ParamValue::Vector(items) => Json::Array(items.iter().map(ParamValue::to_json).collect()),
        }
    }
}

/// Declaration of one named parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub default_value: ParamValue,
    pub required: bool,
    /// Bounds are only enforced when `min_value != max_value`.
    pub min_value: f64,
    pub max_value: f64,
    pub precision: i32,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, default_value: ParamValue) -> Self {
        ParamDef {
            name: name.into(),
            default_value,
            required: false,
            min_value: 0.0,
            max_value: 0.0,
            precision: 0,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn range(mut self, min_value: f64, max_value: f64) -> Self {
        self.min_value = min_value;
        self.max_value = max_value;
        self
    }

    pub fn precision(mut self, precision: i32) -> Self {
        self.precision = precision;
        self
    }

    fn has_bounds(&self) -> bool {
        self.min_value != self.max_value
    }

    fn check_range(&self, value: &ParamValue) -> Result<(), ParamError> {
        if !self.has_bounds() {
            return Ok(());
        }
        let values: Vec<f64> = match value {
            ParamValue::Vector(items) => items.iter().filter_map(ParamValue::as_f64).collect(),
            other => other.as_f64().into_iter().collect(),
        };
        for v in values {
            if v < self.min_value || v > self.max_value {
                return Err(ParamError::OutOfRange {
                    name: self.name.clone(),
                    value: v,
                    min: self.min_value,
                    max: self.max_value,
                });
            }
        }
        Ok(())
    }
}

pub type ParamDefs = Vec<ParamDef>;

/// Parameter name to value, as supplied at spawn / modify time.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Validate `params` against `defs`.
///
/// - a required def without a key fails with `MissingRequired`,
/// - absent optional keys get the declared default,
/// - bounded numeric values outside the bounds fail with `OutOfRange`.
///
/// Keys without a definition are passed through untouched.
pub fn validate(defs: &[ParamDef], params: &ParamMap) -> Result<ParamMap, ParamError> {
    let mut validated = params.clone();
    for def in defs {
        match params.get(&def.name) {
            Some(value) => def.check_range(value)?,
            None if def.required => return Err(ParamError::MissingRequired(def.name.clone())),
            None => {
                validated.insert(def.name.clone(), def.default_value.clone());
            }
        }
    }
    Ok(validated)
}

/// Range-check only the keys present in `params`. Used for modify, where a
/// partial map is normal.
pub fn check_ranges(defs: &[ParamDef], params: &ParamMap) -> Result<(), ParamError> {
    for def in defs {
        if let Some(value) = params.get(&def.name) {
            def.check_range(value)?;
        }
    }
    Ok(())
}

/// Parse a raw JSON object into a `ParamMap`, coercing each value to the
/// kind of its definition. Does not validate; see [`validate`].
pub fn from_json(defs: &[ParamDef], raw: &str) -> Result<ParamMap, ParamError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(ParamMap::new());
    }
    let parsed: Json = serde_json::from_str(raw).map_err(|e| ParamError::Malformed(e.to_string()))?;
    let Json::Object(object) = parsed else {
        return Err(ParamError::Malformed("expected a JSON object".to_string()));
    };

    let mut params = ParamMap::new();
    for (name, value) in object {
        let hint = defs
            .iter()
            .find(|d| d.name == name)
            .map(|d| &d.default_value);
        let coerced = coerce(&name, &value, hint)?;
        params.insert(name, coerced);
    }
    Ok(params)
}

/// JSON text of a map, suitable for [`from_json`].
pub fn to_json(params: &ParamMap) -> String {
    let object: Map<String, Json> = params
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    Json::Object(object).to_string()
}

fn coerce(name: &str, value: &Json, hint: Option<&ParamValue>) -> Result<ParamValue, ParamError> {
    let invalid = |reason: &str| ParamError::InvalidValue {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let Some(hint) = hint else {
        return infer(name, value);
    };

    match hint {
        ParamValue::Str(_) => value
            .as_str()
            .map(|s| ParamValue::Str(s.to_string()))
            .ok_or_else(|| invalid("expected string")),
        ParamValue::Bool(_) => value
            .as_bool()
            .map(ParamValue::Bool)
            .ok_or_else(|| invalid("expected bool")),
        ParamValue::Int64(_) => value
            .as_i64()
            .map(ParamValue::Int64)
            .ok_or_else(|| invalid("expected integer")),
        ParamValue::Int32(_) => {
            let wide = value.as_i64().ok_or_else(|| invalid("expected integer"))?;
            i32::try_from(wide)
                .map(ParamValue::Int32)
                .map_err(|_| invalid("does not fit in 32 bits"))
        }
        ParamValue::Double(_) => value
            .as_f64()
            .map(ParamValue::Double)
            .ok_or_else(|| invalid("expected number")),
        ParamValue::Security(_) => serde_json::from_value::<SecurityTuple>(value.clone())
            .map(ParamValue::Security)
            .map_err(|e| invalid(&e.to_string())),
        ParamValue::Vector(items) => {
            let Json::Array(array) = value else {
                return Err(invalid("expected array"));
            };
            let element_hint = items.first();
            let mut out = Vec::with_capacity(array.len());
            for item in array {
                if item.is_array() {
                    return Err(invalid("nested arrays are not supported"));
                }
                out.push(coerce(name, item, element_hint)?);
            }
            Ok(ParamValue::Vector(out))
        }
    }
}

fn infer(name: &str, value: &Json) -> Result<ParamValue, ParamError> {
    let invalid = |reason: &str| ParamError::InvalidValue {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    match value {
        Json::String(s) => Ok(ParamValue::Str(s.clone())),
        Json::Bool(b) => Ok(ParamValue::Bool(*b)),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Ok(ParamValue::Int64(i)),
            None => n
                .as_f64()
                .map(ParamValue::Double)
                .ok_or_else(|| invalid("unrepresentable number")),
        },
        Json::Object(_) => serde_json::from_value::<SecurityTuple>(value.clone())
            .map(ParamValue::Security)
            .map_err(|e| invalid(&e.to_string())),
        Json::Array(array) => {
            let mut out = Vec::with_capacity(array.len());
            for item in array {
                if item.is_array() {
                    return Err(invalid("nested arrays are not supported"));
                }
                out.push(infer(name, item)?);
            }
            Ok(ParamValue::Vector(out))
        }
        Json::Null => Err(invalid("null is not a parameter value")),
    }
}
