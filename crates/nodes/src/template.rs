//! `${...}` placeholder rendering for notification text.
//!
//! `${key}` reads a global entry (for example `${$workflow.error.message}`);
//! `${nodeId.key}` reads `key` from that node's scope.  Unknown placeholders
//! render as empty text.

use crate::state::{Scope, StateStore};

pub fn render(template: &str, state: &StateStore) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        out.push_str(&resolve(after[..end].trim(), state));
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

fn resolve(path: &str, state: &StateStore) -> String {
    if let Some(global) = state.get(&Scope::Global, path) {
        return global.value;
    }
    path.split_once('.')
        .and_then(|(node_id, key)| state.get_node(node_id, key))
        .map(|v| v.value)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::keys;

    #[test]
    fn renders_node_and_global_placeholders() {
        let state = StateStore::new();
        state.set(Scope::node("monitor"), keys::CERTIFICATE_DAYS_LEFT, 9i64);
        state.record_error("apply", "Apply certificate", "order rejected");

        let text = render(
            "${monitor.certificate.daysLeft} days left; ${$workflow.error.nodeName} failed: ${ $workflow.error.message }",
            &state,
        );
        assert_eq!(text, "9 days left; Apply certificate failed: order rejected");
    }

    #[test]
    fn unknown_and_unterminated_placeholders() {
        let state = StateStore::new();
        assert_eq!(render("a ${missing.key} b", &state), "a  b");
        assert_eq!(render("tail ${open", &state), "tail ${open");
    }
}
