use serde_json::Value;

use crate::flow::SessionStorageSnapshot;

/// Storage key prefix the OIDC client library uses for the signed-in user
/// record (`oidc.user:<authority>:<client_id>`).
const OIDC_USER_PREFIX: &str = "oidc.user:";
const ID_TOKEN_FIELD: &str = "id_token";

/// Best-effort extraction of the identity token from a session-storage
/// snapshot: first key with the OIDC user prefix, value parsed as JSON,
/// non-blank `id_token` string field.
///
/// The snapshot is externally produced data whose shape is not
/// contractually guaranteed, so every failure mode (no matching key, bad
/// JSON, absent or blank field) collapses to `None`.
pub fn extract_id_token(snapshot: &SessionStorageSnapshot) -> Option<String> {
    let raw = snapshot
        .iter()
        .find(|(key, _)| key.starts_with(OIDC_USER_PREFIX))
        .map(|(_, value)| value)?;
    let record: Value = serde_json::from_str(raw).ok()?;
    let token = record.get(ID_TOKEN_FIELD)?.as_str()?;
    if token.trim().is_empty() {
        return None;
    }
    Some(token.to_string())
}
