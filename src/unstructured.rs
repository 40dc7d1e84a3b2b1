//! Typed accessors over the unstructured resource tree.
//!
//! Migrated objects are manipulated through a generic `serde_json::Value`
//! view. These helpers read and mutate well-known paths (`spec.clusterIP`,
//! `spec.claimRef.name`, `status.phase`, ...) without ad-hoc matching at
//! every call site. Paths are dot-separated object keys.

use serde_json::{Map, Value};

/// Walk a dot-separated path of object keys.
pub fn get_value<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |v, key| v.get(key))
}

/// Read a string at `path`.
pub fn get_string<'a>(root: &'a Value, path: &str) -> Option<&'a str> {
    get_value(root, path)?.as_str()
}

/// Mutable access to the object map at `path`.
pub fn get_map_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Map<String, Value>> {
    let mut current = root;
    for key in path.split('.') {
        current = current.get_mut(key)?;
    }
    current.as_object_mut()
}

/// Interpret a numeric value as an integer.
///
/// Wire encodings disagree on the width of integer fields (`spec.replicas`
/// may arrive as i64, u64 or a float), so any integer-valued number is
/// accepted; non-integral floats and non-numbers are rejected.
pub fn as_integer(value: &Value) -> Option<i64> {
    let number = value.as_number()?;
    if let Some(i) = number.as_i64() {
        return Some(i);
    }
    if let Some(u) = number.as_u64() {
        return i64::try_from(u).ok();
    }
    let f = number.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
