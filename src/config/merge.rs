//! Configuration merge logic
//!
//! - Objects: deep-merge by key
//! - Arrays: REPLACE (last wins)
//! - Scalars: override (last wins)

use serde_json::Value;

/// Deep merge two JSON values.
///
/// Null in the overlay overrides any base value, which is how a layer
/// unsets a default.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }

        (_, overlay) => overlay,
    }
}

/// Merge layers in order (first is base, last has highest precedence)
pub fn merge_layers(layers: Vec<Value>) -> Value {
    layers.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_keys_merge_without_clobbering_siblings() {
        let base = json!({
            "stages": {
                "wdb": { "device": "u50", "ssh_username": "builder" }
            }
        });
        let overlay = json!({
            "stages": {
                "wdb": { "ssh_host": "fpga01" }
            }
        });
        let result = deep_merge(base, overlay);

        assert_eq!(result["stages"]["wdb"]["device"], "u50");
        assert_eq!(result["stages"]["wdb"]["ssh_username"], "builder");
        assert_eq!(result["stages"]["wdb"]["ssh_host"], "fpga01");
    }

    #[test]
    fn test_array_replace() {
        let base = json!({"flags": ["-O2", "-g"]});
        let overlay = json!({"flags": ["-O0"]});
        let result = deep_merge(base, overlay);

        assert_eq!(result["flags"], json!(["-O0"]));
    }

    #[test]
    fn test_null_unsets() {
        let result = deep_merge(json!({"host": "h"}), json!({"host": null}));
        assert!(result["host"].is_null());
    }

    #[test]
    fn test_merge_layers_last_wins() {
        let builtin = json!({"global": {"root_dir": "."}, "stages": {"wdb": {"device": "a"}}});
        let file = json!({"global": {"root_dir": "/opt/tool"}});
        let cli = json!({"stages": {"wdb": {"device": "b"}}});

        let result = merge_layers(vec![builtin, file, cli]);

        assert_eq!(result["global"]["root_dir"], "/opt/tool");
        assert_eq!(result["stages"]["wdb"]["device"], "b");
    }
}
