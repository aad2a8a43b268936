// Cache Fingerprint
// sha256 over "kind:target:<canonical params json>"

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::ProbeParams;

/// Namespace owned by the result cache
pub const KEY_NAMESPACE: &str = "probeweave:scan:";

/// Fingerprint of one probe invocation (hex sha256)
pub fn fingerprint(probe_kind: &str, target: &str, params: &ProbeParams) -> String {
    let mut canonical = String::new();
    write_canonical_map(params.iter(), &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(probe_kind.as_bytes());
    hasher.update(b":");
    hasher.update(target.as_bytes());
    hasher.update(b":");
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Full cache key: namespace, kind, fingerprint
pub fn cache_key(probe_kind: &str, target: &str, params: &ProbeParams) -> String {
    format!(
        "{}{}:{}",
        KEY_NAMESPACE,
        probe_kind,
        fingerprint(probe_kind, target, params)
    )
}

/// Probe kind segment of a namespaced key
pub fn kind_of_key(key: &str) -> Option<&str> {
    key.strip_prefix(KEY_NAMESPACE)?.rsplit_once(':').map(|(kind, _)| kind)
}

// Nested objects are sorted too; serde_json::Map ordering depends on crate features
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            write_canonical_map(entries.into_iter(), out);
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn write_canonical_map<'a>(entries: impl Iterator<Item = (&'a String, &'a Value)>, out: &mut String) {
    out.push('{');
    for (i, (key, value)) in entries.enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}
