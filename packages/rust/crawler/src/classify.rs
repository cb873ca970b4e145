//! Heuristic page-type classification from path and title.

use sitecast_shared::PageType;

/// Keyword rules checked in order against the lowercase path.
/// The first match wins; `about` additionally matches the title.
const PATH_RULES: &[(PageType, &[&str])] = &[
    (PageType::Blog, &["blog", "article", "news"]),
    (PageType::Category, &["category", "topics"]),
    (PageType::Pricing, &["pricing", "plans"]),
    (PageType::About, &["about"]),
    (PageType::Signup, &["signup", "register", "subscribe"]),
    (PageType::Contact, &["contact"]),
    (PageType::Product, &["product", "shop", "store"]),
];

/// Classify a page by its URL path and `<title>`.
pub fn classify(pathname: &str, title: &str) -> PageType {
    let path = pathname.to_lowercase();
    let title = title.to_lowercase();

    if path.is_empty() || path == "/" {
        return PageType::Home;
    }

    for (page_type, keywords) in PATH_RULES {
        let path_hit = keywords.iter().any(|k| path.contains(k));
        let title_hit = *page_type == PageType::About && title.contains("about");
        if path_hit || title_hit {
            return *page_type;
        }
    }

    PageType::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_home() {
        assert_eq!(classify("/", "Blog about everything"), PageType::Home);
        assert_eq!(classify("", ""), PageType::Home);
    }

    #[test]
    fn keyword_rules() {
        assert_eq!(classify("/blog/launch", ""), PageType::Blog);
        assert_eq!(classify("/news", ""), PageType::Blog);
        assert_eq!(classify("/topics/rust", ""), PageType::Category);
        assert_eq!(classify("/Plans", ""), PageType::Pricing);
        assert_eq!(classify("/company/about-us", ""), PageType::About);
        assert_eq!(classify("/register", ""), PageType::Signup);
        assert_eq!(classify("/contact", ""), PageType::Contact);
        assert_eq!(classify("/store/item-1", ""), PageType::Product);
        assert_eq!(classify("/terms", "Terms of Service"), PageType::Other);
    }

    #[test]
    fn about_matches_title() {
        assert_eq!(classify("/team", "About Our Team"), PageType::About);
    }

    #[test]
    fn first_rule_wins() {
        // blog outranks pricing
        assert_eq!(classify("/blog/pricing-update", ""), PageType::Blog);
        // pricing outranks the about-title rule
        assert_eq!(classify("/pricing", "About our pricing"), PageType::Pricing);
        // category outranks product
        assert_eq!(classify("/category/shop", ""), PageType::Category);
    }
}
