use serde_json::Value;

use crate::error::RpcError;
use crate::registry::OpSpec;

/// Resolve one mapped argument: look up the JSON pointer registered for
/// `key` and evaluate it against the incoming arguments object.
pub(crate) fn lookup<'a>(args: &'a Value, op: &OpSpec, key: &str) -> Option<&'a Value> {
    op.map.get(key).and_then(|pointer| args.pointer(pointer))
}

fn missing(key: &str) -> RpcError {
    RpcError::InvalidArguments(format!("missing required argument '{key}'"))
}

fn wrong_type(key: &str, expected: &str) -> RpcError {
    RpcError::InvalidArguments(format!("argument '{key}' must be {expected}"))
}

pub(crate) fn req_str(args: &Value, op: &OpSpec, key: &str) -> Result<String, RpcError> {
    let v = lookup(args, op, key).ok_or_else(|| missing(key))?;
    v.as_str()
        .map(str::to_string)
        .ok_or_else(|| wrong_type(key, "a string"))
}

pub(crate) fn opt_str(args: &Value, op: &OpSpec, key: &str) -> Result<Option<String>, RpcError> {
    match lookup(args, op, key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| wrong_type(key, "a string")),
    }
}

pub(crate) fn opt_i64(args: &Value, op: &OpSpec, key: &str) -> Result<Option<i64>, RpcError> {
    match lookup(args, op, key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| wrong_type(key, "an integer")),
    }
}

pub(crate) fn req_i64(args: &Value, op: &OpSpec, key: &str) -> Result<i64, RpcError> {
    opt_i64(args, op, key)?.ok_or_else(|| missing(key))
}

pub(crate) fn opt_bool(args: &Value, op: &OpSpec, key: &str) -> Result<Option<bool>, RpcError> {
    match lookup(args, op, key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| wrong_type(key, "a boolean")),
    }
}

pub(crate) fn opt_value(args: &Value, op: &OpSpec, key: &str) -> Option<Value> {
    lookup(args, op, key).cloned().filter(|v| !v.is_null())
}

pub(crate) fn req_value(args: &Value, op: &OpSpec, key: &str) -> Result<Value, RpcError> {
    lookup(args, op, key).cloned().ok_or_else(|| missing(key))
}

pub(crate) fn opt_str_vec(
    args: &Value,
    op: &OpSpec,
    key: &str,
) -> Result<Option<Vec<String>>, RpcError> {
    let Some(v) = lookup(args, op, key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let arr = v.as_array().ok_or_else(|| wrong_type(key, "an array"))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        out.push(
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| wrong_type(key, "an array of strings"))?,
        );
    }
    Ok(Some(out))
}

pub(crate) fn opt_i64_vec(
    args: &Value,
    op: &OpSpec,
    key: &str,
) -> Result<Option<Vec<i64>>, RpcError> {
    let Some(v) = lookup(args, op, key) else {
        return Ok(None);
    };
    if v.is_null() {
        return Ok(None);
    }
    let arr = v.as_array().ok_or_else(|| wrong_type(key, "an array"))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        out.push(item.as_i64().ok_or_else(|| wrong_type(key, "an array of integers"))?);
    }
    Ok(Some(out))
}

pub(crate) fn req_i64_vec(args: &Value, op: &OpSpec, key: &str) -> Result<Vec<i64>, RpcError> {
    opt_i64_vec(args, op, key)?.ok_or_else(|| missing(key))
}
