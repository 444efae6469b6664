//! Shared User-Agent string for platform API and media requests.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/blu-pen/blupen";

/// Default User-Agent for every outgoing request.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("blupen/{version} (content-collector; +{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_carries_version_and_url() {
        let ua = default_user_agent();
        assert!(ua.contains(PROJECT_UA_URL));
        assert_eq!(
            Some(env!("CARGO_PKG_VERSION")),
            ua.strip_prefix("blupen/").and_then(|s| s.split(' ').next())
        );
    }
}
