//! JSON merge helpers for layered configuration.

use serde_json::Value;

/// Merge an overlay layer into the accumulated config.
///
/// Objects merge key by key and other values replace. An explicit `null`
/// removes the key, so a later layer can unset an optional field such as
/// `storage.root` that an earlier layer set.
pub(super) fn merge_json_values(base: &mut Value, overlay: &Value) {
    let (Value::Object(base_map), Value::Object(overlay_map)) = (&mut *base, overlay) else {
        *base = overlay.clone();
        return;
    };
    for (key, value) in overlay_map {
        if value.is_null() {
            base_map.remove(key);
            continue;
        }
        match base_map.get_mut(key) {
            Some(existing) => merge_json_values(existing, value),
            None => {
                base_map.insert(key.clone(), value.clone());
            }
        }
    }
}
