//! URL helpers shared by the resolver, crawler, deep scanner and verifier.

use url::Url;

/// Query keys kept by [`normalize_url`] because they select a listing page.
pub const PAGINATION_KEYS: &[&str] = &["page", "pg", "p", "start", "offset", "pagenumber"];

/// Words that mark a URL or link text as procurement-related.
pub const PROCUREMENT_KEYWORDS: &[&str] = &[
    "bid",
    "rfp",
    "rfq",
    "procurement",
    "purchasing",
    "solicitation",
    "opportunit",
    "contract",
];

/// Extensions of documents that are never crawled as pages.
const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "zip", "png", "jpg", "jpeg",
];

fn parse_web_url(url: &str) -> Option<Url> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }
    Some(parsed)
}

fn base_form(parsed: &Url) -> String {
    let host = parsed.host_str().unwrap_or_default();
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
    let path = parsed.path();
    let path = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        ""
    };
    format!("{}://{}{}{}", parsed.scheme(), host, port, path)
}

/// Identity form of a URL: lowercase host, no fragment, no trailing slash,
/// full query kept.
pub fn canonical_url(url: &str) -> Option<String> {
    let parsed = parse_web_url(url)?;
    let mut out = base_form(&parsed);
    if let Some(query) = parsed.query().filter(|q| !q.is_empty()) {
        out.push('?');
        out.push_str(query);
    }
    Some(out)
}

/// Visited-set key: scheme + host + path, query stripped except pagination
/// keys.
pub fn normalize_url(url: &str) -> Option<String> {
    let parsed = parse_web_url(url)?;
    let mut out = base_form(&parsed);
    let kept: Vec<String> = parsed
        .query_pairs()
        .filter(|(k, _)| PAGINATION_KEYS.contains(&k.to_lowercase().as_str()))
        .map(|(k, v)| format!("{}={}", k.to_lowercase(), v))
        .collect();
    if !kept.is_empty() {
        out.push('?');
        out.push_str(&kept.join("&"));
    }
    Some(out)
}

/// Scheme + host (+ port) of a URL.
pub fn root_url(url: &str) -> Option<String> {
    let parsed = parse_web_url(url)?;
    let port = parsed.port().map(|p| format!(":{}", p)).unwrap_or_default();
    Some(format!(
        "{}://{}{}",
        parsed.scheme(),
        parsed.host_str().unwrap_or_default(),
        port
    ))
}

/// Host without a leading `www.`.
pub fn site_host(url: &str) -> Option<String> {
    let parsed = parse_web_url(url)?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
}

/// Whether two URLs are on the same site, ignoring a leading `www.`.
pub fn same_site(a: &str, b: &str) -> bool {
    match (site_host(a), site_host(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Resolve an `href` against the page it was found on.
///
/// Returns `None` for fragments, `javascript:`, `mailto:`, `tel:` and
/// anything that does not resolve to http(s).
pub fn resolve_link(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    let lowered = href.to_lowercase();
    if href.is_empty()
        || href.starts_with('#')
        || lowered.starts_with("javascript:")
        || lowered.starts_with("mailto:")
        || lowered.starts_with("tel:")
    {
        return None;
    }
    let base = Url::parse(base).ok()?;
    let mut joined = base.join(href).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    joined.set_fragment(None);
    Some(joined.to_string())
}

/// Whether a URL points at a document rather than a page.
pub fn is_document_link(url: &str) -> bool {
    let Some(parsed) = parse_web_url(url) else {
        return false;
    };
    let path = parsed.path().to_lowercase();
    path.rsplit_once('.')
        .map(|(_, ext)| DOCUMENT_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Whether text carries a procurement keyword (case-insensitive).
pub fn has_procurement_keyword(text: &str) -> bool {
    let lowered = text.to_lowercase();
    PROCUREMENT_KEYWORDS.iter().any(|k| lowered.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_non_pagination_query() {
        assert_eq!(
            normalize_url("https://WWW.Ct.gov/bids/?sort=asc&page=2#top").as_deref(),
            Some("https://www.ct.gov/bids?page=2")
        );
        assert_eq!(
            normalize_url("https://ct.gov/").as_deref(),
            Some("https://ct.gov")
        );
        assert_eq!(normalize_url("mailto:a@ct.gov"), None);
    }

    #[test]
    fn test_canonical_keeps_query() {
        assert_eq!(
            canonical_url("https://ct.gov/bids.aspx?dept=PW#x").as_deref(),
            Some("https://ct.gov/bids.aspx?dept=PW")
        );
    }

    #[test]
    fn test_same_site_ignores_www() {
        assert!(same_site("https://www.hartford.gov/a", "http://hartford.gov/b"));
        assert!(!same_site("https://hartford.gov/", "https://ct.gov/"));
        assert!(!same_site("https://hartford.gov/", "nonsense"));
    }

    #[test]
    fn test_resolve_link() {
        let base = "https://ct.gov/bids/index.html";
        assert_eq!(
            resolve_link(base, "detail?id=7#top").as_deref(),
            Some("https://ct.gov/bids/detail?id=7")
        );
        assert_eq!(resolve_link(base, "#section"), None);
        assert_eq!(resolve_link(base, "javascript:void(0)"), None);
        assert_eq!(resolve_link(base, "mailto:x@ct.gov"), None);
    }

    #[test]
    fn test_document_links() {
        assert!(is_document_link("https://ct.gov/files/RFP-12.PDF"));
        assert!(is_document_link("https://ct.gov/a/b.docx"));
        assert!(!is_document_link("https://ct.gov/bids.aspx"));
        assert!(!is_document_link("https://ct.gov/bids"));
    }

    #[test]
    fn test_keywords() {
        assert!(has_procurement_keyword("Current Opportunities"));
        assert!(has_procurement_keyword("/Purchasing/Open-Bids"));
        assert!(!has_procurement_keyword("Parks and Recreation"));
    }
}
