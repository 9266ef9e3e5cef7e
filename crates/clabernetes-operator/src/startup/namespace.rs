//! Namespace the operator runs in

/// Namespace file mounted into every pod with a service account
pub const SERVICE_ACCOUNT_NAMESPACE_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Resolve the operator namespace
///
/// `pod_namespace` (the downward API `POD_NAMESPACE`) wins, then the service
/// account namespace file, then the client's default namespace.
pub fn detect_namespace(pod_namespace: Option<&str>, client_default: &str) -> String {
    resolve_namespace(
        pod_namespace.map(str::to_string),
        std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_PATH).ok(),
        client_default,
    )
}

fn resolve_namespace(env: Option<String>, file: Option<String>, fallback: &str) -> String {
    [env, file]
        .into_iter()
        .flatten()
        .map(|ns| ns.trim().to_string())
        .find(|ns| !ns.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
