use serde_json::Value;

/// Schema features downstream assistant clients cannot consume. A tool
/// carrying any of them is rejected at load time with a precise error.
const FORBIDDEN_KEYS: &[&str] = &["anyOf", "oneOf", "allOf", "$ref", "definitions"];

/// Validate the declared input schema against the supported JSON-Schema
/// subset: no combinators, no references, no union-typed `type`.
pub fn validate_input_schema(schema: &Value) -> Result<(), String> {
    walk(schema)
}

fn walk(v: &Value) -> Result<(), String> {
    match v {
        Value::Object(map) => {
            for (k, vv) in map {
                if FORBIDDEN_KEYS.contains(&k.as_str()) {
                    return Err(format!("schema contains unsupported key '{k}'"));
                }
                if k == "type" && vv.is_array() {
                    return Err("schema contains an array-typed 'type'".to_string());
                }
                walk(vv)?;
            }
            Ok(())
        }
        Value::Array(arr) => {
            for vv in arr {
                walk(vv)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// RFC-6901 syntax check: a pointer is empty, or starts with '/' and every
/// '~' escape is '~0' or '~1'.
pub fn validate_json_pointer(pointer: &str) -> Result<(), String> {
    if pointer.is_empty() {
        return Ok(());
    }
    if !pointer.starts_with('/') {
        return Err(format!("JSON pointer '{pointer}' must start with '/'"));
    }
    let bytes = pointer.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'~' {
            match bytes.get(i + 1) {
                Some(b'0') | Some(b'1') => i += 2,
                _ => return Err(format!("JSON pointer '{pointer}' has a bad '~' escape")),
            }
        } else {
            i += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_object_schema_passes() {
        let schema = json!({
            "type": "object",
            "properties": {
                "instance": {"type": "string"},
                "ids": {"type": "array", "items": {"type": "integer"}}
            },
            "required": ["instance"]
        });
        assert!(validate_input_schema(&schema).is_ok());
    }

    #[test]
    fn any_of_rejected_at_any_depth() {
        let schema = json!({
            "type": "object",
            "properties": {
                "domain": {"anyOf": [{"type": "array"}, {"type": "string"}]}
            }
        });
        let err = validate_input_schema(&schema).unwrap_err();
        assert!(err.contains("anyOf"));
    }

    #[test]
    fn all_combinators_and_refs_rejected() {
        for key in ["oneOf", "allOf", "$ref", "definitions"] {
            let schema = json!({ key: [] });
            assert!(validate_input_schema(&schema).is_err(), "{key} accepted");
        }
    }

    #[test]
    fn union_type_rejected() {
        let schema = json!({"type": ["string", "null"]});
        let err = validate_input_schema(&schema).unwrap_err();
        assert!(err.contains("array-typed"));
    }

    #[test]
    fn nested_forbidden_key_inside_array_rejected() {
        let schema = json!({
            "type": "object",
            "properties": {"x": {"items": [{"$ref": "#/definitions/y"}]}}
        });
        assert!(validate_input_schema(&schema).is_err());
    }

    #[test]
    fn pointer_syntax() {
        assert!(validate_json_pointer("").is_ok());
        assert!(validate_json_pointer("/instance").is_ok());
        assert!(validate_json_pointer("/a/0/b").is_ok());
        assert!(validate_json_pointer("/a~0b/c~1d").is_ok());
        assert!(validate_json_pointer("instance").is_err());
        assert!(validate_json_pointer("/a~2").is_err());
        assert!(validate_json_pointer("/a~").is_err());
    }
}
