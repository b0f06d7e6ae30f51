use serde_json::Value;

const ROLE_KINDS: &[&str] = &["Role", "ClusterRole"];
const BINDING_KINDS: &[&str] = &["RoleBinding", "ClusterRoleBinding"];

pub fn is_rbac_kind(kind: &str) -> bool {
    ROLE_KINDS.contains(&kind) || BINDING_KINDS.contains(&kind)
}

/// Merge `desired` into `existing` additively.
///
/// Roles keep every existing rule and gain the desired ones they lack.
/// Bindings keep every existing subject and gain the desired ones; the role
/// reference is immutable and always taken from `existing`. Any other field
/// of `desired` wins.
pub fn merge(kind: &str, existing: &Value, desired: &Value) -> Value {
    let mut merged = desired.clone();
    if ROLE_KINDS.contains(&kind) {
        merged["rules"] = union(existing.get("rules"), desired.get("rules"));
    } else if BINDING_KINDS.contains(&kind) {
        merged["subjects"] = union(existing.get("subjects"), desired.get("subjects"));
        if let Some(role_ref) = existing.get("roleRef") {
            merged["roleRef"] = role_ref.clone();
        }
    }
    merged
}

fn union(existing: Option<&Value>, desired: Option<&Value>) -> Value {
    let mut out: Vec<Value> = existing
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for item in desired.and_then(Value::as_array).into_iter().flatten() {
        if !out.iter().any(|e| covers(e, item)) {
            out.push(item.clone());
        }
    }
    Value::Array(out)
}

/// Whether `have` already grants everything `want` does, ignoring empty
/// optional fields the server drops on read.
fn covers(have: &Value, want: &Value) -> bool {
    match (have.as_object(), want.as_object()) {
        (Some(h), Some(w)) => w.iter().all(|(k, wv)| {
            if is_empty(wv) {
                return h.get(k).map_or(true, is_empty);
            }
            match (h.get(k), wv) {
                (Some(Value::Array(ha)), Value::Array(wa)) => {
                    wa.iter().all(|x| ha.contains(x)) || ha.iter().any(|x| x == "*")
                }
                (Some(hv), wv) => hv == wv,
                (None, _) => false,
            }
        }),
        _ => have == want,
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_rules_are_unioned() {
        let existing = json!({
            "kind": "ClusterRole",
            "rules": [{"apiGroups": [""], "resources": ["pods"], "verbs": ["get", "list"]}]
        });
        let desired = json!({
            "kind": "ClusterRole",
            "rules": [
                {"apiGroups": [""], "resources": ["pods"], "verbs": ["get"]},
                {"apiGroups": ["route.openshift.io"], "resources": ["routes"], "verbs": ["*"]}
            ]
        });
        let merged = merge("ClusterRole", &existing, &desired);
        let rules = merged["rules"].as_array().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0]["verbs"], json!(["get", "list"]));
        assert_eq!(rules[1]["resources"], json!(["routes"]));
    }

    #[test]
    fn binding_keeps_subjects_and_role_ref() {
        let existing = json!({
            "kind": "ClusterRoleBinding",
            "roleRef": {"kind": "ClusterRole", "name": "system:router"},
            "subjects": [{"kind": "ServiceAccount", "name": "router", "namespace": "default"}]
        });
        let desired = json!({
            "kind": "ClusterRoleBinding",
            "roleRef": {"kind": "ClusterRole", "name": "other"},
            "subjects": [{"kind": "ServiceAccount", "name": "ingress", "namespace": "default"}]
        });
        let merged = merge("ClusterRoleBinding", &existing, &desired);
        assert_eq!(merged["subjects"].as_array().unwrap().len(), 2);
        assert_eq!(merged["roleRef"]["name"], "system:router");
    }

    #[test]
    fn empty_fields_do_not_block_match() {
        let have = json!({"apiGroups": [""], "resources": ["secrets"], "verbs": ["get"]});
        let want = json!({"apiGroups": [""], "resources": ["secrets"], "verbs": ["get"], "resourceNames": []});
        assert!(covers(&have, &want));
    }

    #[test]
    fn only_rbac_kinds_are_reconciled() {
        assert!(is_rbac_kind("RoleBinding"));
        assert!(!is_rbac_kind("ServiceAccount"));
    }
}
