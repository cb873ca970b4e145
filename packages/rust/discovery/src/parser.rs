//! robots.txt parser.
//!
//! Only the wildcard group's `Disallow:` prefixes are collected:
//! - `User-agent: *` opens a relevant group; any other agent closes it
//! - `Disallow: /path` inside a relevant group adds `/path`
//! - empty `Disallow:` values, `Allow:`, and pattern syntax are ignored

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Ordered disallowed path prefixes for the wildcard agent group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    pub disallowed: Vec<String>,
}

impl RobotsRules {
    /// A rule set with no restrictions.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Whether `path` starts with any disallowed prefix.
    pub fn is_disallowed(&self, path: &str) -> bool {
        self.disallowed.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.disallowed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

const USER_AGENT_DIRECTIVE: &str = "user-agent:";
const DISALLOW_DIRECTIVE: &str = "disallow:";

/// Parse robots.txt content into the wildcard group's disallow prefixes.
///
/// Directive names are matched case-insensitively; path values keep their
/// original case.
pub fn parse_robots_txt(content: &str) -> RobotsRules {
    let mut disallowed = Vec::new();
    let mut in_wildcard_group = false;

    for line in content.lines() {
        let lowered = line.trim().to_lowercase();

        if let Some(agent) = lowered.strip_prefix(USER_AGENT_DIRECTIVE) {
            let agent = agent.split(':').next().unwrap_or_default().trim();
            in_wildcard_group = agent == "*";
        }

        if in_wildcard_group && lowered.starts_with(DISALLOW_DIRECTIVE) {
            let value = line.split_once(':').map(|(_, rest)| rest.trim()).unwrap_or_default();
            if !value.is_empty() {
                disallowed.push(value.to_string());
            }
        }
    }

    RobotsRules { disallowed }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_wildcard_group_only() {
        let content = "\
User-agent: Googlebot
Disallow: /google-only

User-agent: *
Disallow: /private
Disallow: /tmp/

User-agent: Bingbot
Disallow: /bing-only
";
        let rules = parse_robots_txt(content);
        assert_eq!(rules.disallowed, vec!["/private", "/tmp/"]);
    }

    #[test]
    fn directive_names_are_case_insensitive_values_are_not() {
        let rules = parse_robots_txt("USER-AGENT: *\nDISALLOW: /Admin\n");
        assert_eq!(rules.disallowed, vec!["/Admin"]);
    }

    #[test]
    fn empty_disallow_is_ignored() {
        let rules = parse_robots_txt("User-agent: *\nDisallow:\nDisallow:   \n");
        assert!(rules.is_empty());
    }

    #[test]
    fn value_keeps_colons_after_the_first() {
        let rules = parse_robots_txt("User-agent: *\nDisallow: /a:b\n");
        assert_eq!(rules.disallowed, vec!["/a:b"]);
    }

    #[test]
    fn allow_and_patterns_are_not_interpreted() {
        let rules = parse_robots_txt("User-agent: *\nAllow: /private/ok\nDisallow: /*.pdf\n");
        assert_eq!(rules.disallowed, vec!["/*.pdf"]);
        // Prefix containment only: the pattern is a literal prefix.
        assert!(!rules.is_disallowed("/files/report.pdf"));
        assert!(rules.is_disallowed("/*.pdf"));
    }

    #[test]
    fn prefix_containment() {
        let rules = parse_robots_txt("User-agent: *\nDisallow: /private\n");
        assert!(rules.is_disallowed("/private"));
        assert!(rules.is_disallowed("/private/area"));
        assert!(rules.is_disallowed("/privateer"));
        assert!(!rules.is_disallowed("/public"));
    }

    #[test]
    fn no_wildcard_group_means_no_rules() {
        let rules = parse_robots_txt("User-agent: SomeBot\nDisallow: /\n");
        assert_eq!(rules, RobotsRules::allow_all());
    }
}
