//! Request classification.
//!
//! Rules are kept in one ordered list and evaluated top-down; the first
//! match decides. Never-cache rules are always placed first.

use regex::Regex;

use crate::ConfigError;

/// How a request path should be treated by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// Matches a never-cache pattern.
    Never,
    /// Part of the application shell.
    Critical,
    /// Matches a cache-on-request pattern.
    PatternMatch,
    /// Nothing matched.
    Unclassified,
}

impl Verdict {
    /// Whether the cache-first strategy applies.
    pub fn is_cacheable(self) -> bool {
        matches!(self, Verdict::Critical | Verdict::PatternMatch)
    }
}

/// Path matcher.
#[derive(Debug, Clone)]
enum Matcher {
    /// Exact path match.
    Exact(String),
    /// Regular expression searched anywhere in the path.
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::Exact(p) => p == path,
            Matcher::Pattern(re) => re.is_match(path),
        }
    }

    fn source(&self) -> &str {
        match self {
            Matcher::Exact(p) => p,
            Matcher::Pattern(re) => re.as_str(),
        }
    }
}

/// Rule mapping a matcher to a verdict.
#[derive(Debug, Clone)]
struct Rule {
    matcher: Matcher,
    verdict: Verdict,
}

/// Ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Classifier {
    /// Build a classifier: never-cache patterns, then critical paths, then
    /// cache-on-request patterns.
    pub fn new<S: AsRef<str>>(
        never: &[S],
        critical: &[S],
        cache_on_request: &[S],
    ) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(never.len() + critical.len() + cache_on_request.len());

        for pattern in never {
            rules.push(Rule {
                matcher: compile(pattern.as_ref())?,
                verdict: Verdict::Never,
            });
        }
        for path in critical {
            rules.push(Rule {
                matcher: Matcher::Exact(path.as_ref().to_string()),
                verdict: Verdict::Critical,
            });
        }
        for pattern in cache_on_request {
            rules.push(Rule {
                matcher: compile(pattern.as_ref())?,
                verdict: Verdict::PatternMatch,
            });
        }

        Ok(Self { rules })
    }

    /// Classify a request path.
    pub fn classify(&self, path: &str) -> Verdict {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(path))
            .map(|rule| rule.verdict)
            .unwrap_or(Verdict::Unclassified)
    }

    /// The rule that decided `path`, for diagnostics.
    pub fn explain(&self, path: &str) -> Option<(&str, Verdict)> {
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(path))
            .map(|rule| (rule.matcher.source(), rule.verdict))
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile(pattern: &str) -> Result<Matcher, ConfigError> {
    Regex::new(pattern)
        .map(Matcher::Pattern)
        .map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn classifier() -> Classifier {
        CacheConfig::default().classifier().unwrap()
    }

    #[test]
    fn test_never_cache_paths() {
        let c = classifier();
        for path in [
            "/api/users",
            "/admin/",
            "/admin/settings",
            "/login",
            "/login/callback",
            "/register",
            "/contact.php",
            "/legacy/page.aspx",
            "/view.jsp",
        ] {
            assert_eq!(c.classify(path), Verdict::Never, "{path}");
        }
    }

    #[test]
    fn test_never_cache_beats_other_rules() {
        let c = classifier();
        // Also match the image and script patterns.
        assert_eq!(c.classify("/api/avatar.png"), Verdict::Never);
        assert_eq!(c.classify("/admin/app.js"), Verdict::Never);

        // Also a critical path.
        let c = Classifier::new(&["/assets/"], &["/assets/logo.png"], &[r"\.png$"]).unwrap();
        assert_eq!(c.classify("/assets/logo.png"), Verdict::Never);
    }

    #[test]
    fn test_critical_paths() {
        let c = classifier();
        for path in &CacheConfig::default().critical_resources {
            assert_eq!(c.classify(path), Verdict::Critical, "{path}");
        }
    }

    #[test]
    fn test_critical_is_exact() {
        let c = classifier();
        assert_eq!(c.classify("/index.html"), Verdict::Critical);
        assert_eq!(c.classify("/about/index.html"), Verdict::Unclassified);
    }

    #[test]
    fn test_pattern_match() {
        let c = classifier();
        for path in [
            "/assets/team.webp",
            "/media/intro.mp4",
            "/css/print.css",
            "/js/vendor.js",
            "/fonts/inter.woff2",
        ] {
            assert_eq!(c.classify(path), Verdict::PatternMatch, "{path}");
        }
    }

    #[test]
    fn test_unclassified() {
        let c = classifier();
        assert_eq!(c.classify("/about"), Verdict::Unclassified);
        assert_eq!(c.classify("/data.json"), Verdict::Unclassified);
        assert_eq!(c.classify("/style.css.map"), Verdict::Unclassified);
    }

    #[test]
    fn test_explain_reports_winning_rule() {
        let c = classifier();
        assert_eq!(c.explain("/api/logo.png"), Some(("/api/", Verdict::Never)));
        assert_eq!(c.explain("/about"), None);
    }

    #[test]
    fn test_is_cacheable() {
        assert!(Verdict::Critical.is_cacheable());
        assert!(Verdict::PatternMatch.is_cacheable());
        assert!(!Verdict::Never.is_cacheable());
        assert!(!Verdict::Unclassified.is_cacheable());
    }
}
