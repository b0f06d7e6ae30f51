//! Shell rendering of install plans for container apply mode.
//!
//! The script runs inside the client image with `/bin/sh /apply.sh`. Every
//! input it reads is injected next to it at a fixed path.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::plan::{InstallPlan, InstallStep};

pub const SCRIPT_PATH: &str = "/apply.sh";
pub const KUBECONFIG_PATH: &str = "/kubeconfig.kubeconfig";
pub const LIST_PATH: &str = "/list.yaml";
pub const NAMESPACE_FILE_PATH: &str = "/namespace-file";
pub const NAMESPACE_OBJECT_PATH: &str = "/namespace.yaml";
pub const RBAC_PATH: &str = "/rbac.yaml";
pub const INSTALL_PATH: &str = "/install.yaml";
pub const PARAM_FILE_PATH: &str = "/param-file.txt";
pub const PRIVILEGED_SA_PATH: &str = "/privileged-sa-list.txt";

/// Script plus every file it expects, keyed by in-container path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBundle {
    pub files: BTreeMap<String, Bytes>,
}

impl ScriptBundle {
    pub fn script(&self) -> &str {
        self.files
            .get(SCRIPT_PATH)
            .and_then(|b| std::str::from_utf8(b).ok())
            .unwrap_or_default()
    }
}

/// `KEY="value"` lines in key order, one per parameter.
pub fn param_file(params: &BTreeMap<String, String>) -> String {
    let mut out = String::new();
    for (k, v) in params {
        let escaped = v
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace('\n', "\\n");
        let _ = writeln!(out, "{k}=\"{escaped}\"");
    }
    out
}

/// Service account user names, one per line.
pub fn privileged_sa_list(users: &[String]) -> String {
    users.iter().map(|u| format!("{u}\n")).collect()
}

pub fn render(plan: &InstallPlan, kubeconfig: &Bytes, log_level: u8) -> ScriptBundle {
    let mut files = BTreeMap::new();
    files.insert(KUBECONFIG_PATH.to_string(), kubeconfig.clone());

    let oc = format!("oc --config={KUBECONFIG_PATH} --loglevel={log_level}");
    let mut script = String::from("#!/bin/sh\nset -e\n\n");

    let ns_from_file = plan.steps.iter().any(|s| {
        matches!(
            s,
            InstallStep::EnsureNamespace { .. } | InstallStep::ApplyManifest { .. }
        )
    });
    if ns_from_file {
        files.insert(
            NAMESPACE_FILE_PATH.to_string(),
            Bytes::from(plan.namespace.clone()),
        );
        let _ = writeln!(script, "NS=\"$(cat {NAMESPACE_FILE_PATH})\"");
    } else {
        let _ = writeln!(script, "NS={}", shell_words::quote(&plan.namespace));
    }
    script.push_str("if [ -n \"$NS\" ]; then NS_FLAG=\"--namespace=$NS\"; else NS_FLAG=\"\"; fi\n");

    let process = format!(
        "{oc} process --local -o yaml --ignore-unknown-parameters --param-file={PARAM_FILE_PATH}"
    );

    for step in &plan.steps {
        let _ = writeln!(script, "\n# {}", step.label());
        match step {
            InstallStep::GrantPrivileged { users } => {
                files.insert(
                    PRIVILEGED_SA_PATH.to_string(),
                    Bytes::from(privileged_sa_list(users)),
                );
                let _ = writeln!(
                    script,
                    "while read -r user; do\n  [ -n \"$user\" ] && {oc} adm policy add-scc-to-user privileged \"$user\"\ndone < {PRIVILEGED_SA_PATH}"
                );
            }
            InstallStep::ApplyNamespace { manifest } => {
                files.insert(NAMESPACE_OBJECT_PATH.to_string(), manifest.clone());
                let _ = writeln!(script, "{oc} apply -f {NAMESPACE_OBJECT_PATH}");
            }
            InstallStep::EnsureNamespace { .. } => {
                let _ = writeln!(
                    script,
                    "if [ -n \"$NS\" ]; then {oc} create namespace \"$NS\" || true; fi"
                );
            }
            InstallStep::ReconcileRbac { template } => {
                files.insert(RBAC_PATH.to_string(), template.clone());
                files.insert(
                    PARAM_FILE_PATH.to_string(),
                    Bytes::from(param_file(&plan.params)),
                );
                let _ = writeln!(
                    script,
                    "{process} -f {RBAC_PATH} | {oc} auth reconcile -f -"
                );
            }
            InstallStep::ApplyTemplate { template } => {
                files.insert(INSTALL_PATH.to_string(), template.clone());
                files.insert(
                    PARAM_FILE_PATH.to_string(),
                    Bytes::from(param_file(&plan.params)),
                );
                let _ = writeln!(
                    script,
                    "{process} -f {INSTALL_PATH} | {oc} apply $NS_FLAG -f -"
                );
            }
            InstallStep::ApplyManifest { manifest } => {
                files.insert(LIST_PATH.to_string(), manifest.clone());
                let _ = writeln!(script, "{oc} apply $NS_FLAG -f {LIST_PATH}");
            }
        }
    }

    files.insert(SCRIPT_PATH.to_string(), Bytes::from(script));
    ScriptBundle { files }
}
