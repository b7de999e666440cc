//! Cheap exact-duplicate removal ahead of embedding comparison.

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::types::article::Article;

/// Loose URL key: lower-cased, query, fragment and trailing slashes removed.
pub fn loose_url_key(url: &str) -> String {
    let url = url.trim().to_lowercase();
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].trim_end_matches('/').to_string()
}

/// Title key: lower-cased with whitespace runs collapsed.
pub fn title_key(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Drop articles that repeat an earlier URL (loosely) or title.
///
/// A repeated URL is dropped outright. A repeated title replaces the
/// earlier article only when its body is longer. Returns the kept articles
/// in order and how many were removed.
pub fn pre_filter(articles: Vec<Article>) -> (Vec<Article>, usize) {
    let total = articles.len();
    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut seen_titles: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Article> = Vec::with_capacity(total);

    for article in articles {
        let url = loose_url_key(&article.url);
        let title = title_key(&article.title);

        if !url.is_empty() && seen_urls.contains(&url) {
            continue;
        }

        if !title.is_empty() {
            if let Some(&idx) = seen_titles.get(&title) {
                if article.body_len() > kept[idx].body_len() {
                    seen_urls.insert(url);
                    kept[idx] = article;
                }
                continue;
            }
            seen_titles.insert(title, kept.len());
        }

        seen_urls.insert(url);
        kept.push(article);
    }

    let removed = total - kept.len();
    info!(removed, remaining = kept.len(), "pre-filter removed exact duplicates");

    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::article;

    #[test]
    fn test_loose_url_key() {
        assert_eq!(
            loose_url_key("HTTPS://a.com/news/1/?utm=x#top"),
            "https://a.com/news/1"
        );
        assert_eq!(loose_url_key("https://a.com/"), "https://a.com");
    }

    #[test]
    fn test_url_duplicates_dropped() {
        let (kept, removed) = pre_filter(vec![
            article("https://a.com/1", "One", "body"),
            article("https://a.com/1?ref=home", "One (copy)", "longer body here"),
        ]);
        assert_eq!(removed, 1);
        assert_eq!(kept[0].title, "One");
    }

    #[test]
    fn test_title_duplicates_keep_longer_body() {
        let (kept, removed) = pre_filter(vec![
            article("https://a.com/1", "Derby Ends Level", "short"),
            article("https://b.com/9", "Other story", "x"),
            article("https://c.com/2", "  derby   ends level ", "the much longer report"),
        ]);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].url, "https://c.com/2");
        assert_eq!(kept[1].url, "https://b.com/9");
    }

    #[test]
    fn test_empty_titles_not_compared() {
        let (kept, removed) = pre_filter(vec![
            article("https://a.com/1", "", "a"),
            article("https://a.com/2", "", "b"),
        ]);
        assert_eq!(removed, 0);
        assert_eq!(kept.len(), 2);
    }
}
