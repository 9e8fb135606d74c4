use regex::Regex;

/// Whether `pattern` matches anywhere in `namespace`
///
/// An invalid pattern never matches; policies are validated when loaded, so this
/// only happens for ad-hoc patterns.
pub fn applies(namespace: &str, pattern: &str) -> bool {
    Regex::new(pattern)
        .map(|re| re.is_match(namespace))
        .unwrap_or(false)
}

/// Namespace pattern compiled once at policy load
#[derive(Debug, Clone)]
pub struct NamespaceMatcher {
    regex: Regex,
}

impl NamespaceMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn matches(&self, namespace: &str) -> bool {
        self.regex.is_match(namespace)
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_pattern() {
        assert!(applies("dev-team1", "^dev-.*"));
        assert!(!applies("prod-team1", "^dev-.*"));
    }

    #[test]
    fn test_pattern_is_not_anchored() {
        assert!(applies("team-dev-1", "dev"));
        assert!(!applies("team-dev-1", "^dev"));
    }

    #[test]
    fn test_empty_pattern_matches_everything() {
        assert!(applies("anything", ""));
        assert!(applies("", ""));
    }

    #[test]
    fn test_invalid_pattern_never_matches() {
        assert!(!applies("dev-1", "(dev"));
        assert!(NamespaceMatcher::new("(dev").is_err());
    }

    #[test]
    fn test_compiled_matcher_agrees_with_applies() {
        let matcher = NamespaceMatcher::new("^dev-.*").unwrap();
        for ns in ["dev-1", "prod-1", "", "dev-"] {
            assert_eq!(matcher.matches(ns), applies(ns, "^dev-.*"), "namespace {ns}");
        }
        assert_eq!(matcher.pattern(), "^dev-.*");
    }
}
