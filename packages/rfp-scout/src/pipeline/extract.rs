//! Structural candidate extraction from listing HTML.
//!
//! One extractor per [`SiteShape`]:
//! - `Table` - rows of a bid table
//! - `Cards` - headings followed by a "Close"/"Due" label
//! - `Links` - list items with an anchor
//! - `Auto` - Table, else Cards, else keyword/date-filtered Links

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

use super::deadline::{contains_date, find_dates};
use super::urls::{has_procurement_keyword, resolve_link};
use crate::types::{candidate::Candidate, site::SiteShape};

/// Rows whose text is shorter than this are layout noise.
const MIN_ROW_CHARS: usize = 10;

lazy_static! {
    static ref TABLE_ROW: Selector = Selector::parse("table tr").unwrap();
    static ref DIV_ROW: Selector = Selector::parse("div[role='row']").unwrap();
    static ref DATA_CELL: Selector =
        Selector::parse("td, div[role='cell'], div[role='gridcell']").unwrap();
    static ref HEADER_CELL: Selector = Selector::parse("th, div[role='columnheader']").unwrap();
    static ref CARD_HEADING: Selector = Selector::parse("h2, h3, h4").unwrap();
    static ref LIST_ITEM: Selector = Selector::parse("li").unwrap();
    static ref ANCHOR: Selector = Selector::parse("a[href]").unwrap();
    static ref TITLE: Selector = Selector::parse("title").unwrap();
    static ref DEADLINE_LABEL: Regex = Regex::new(
        r"(?i)\b(?:closing date|close date|closing|closes|close|due date|due|deadline)\b\s*(?:date)?\s*[:\-]?\s*(.{0,80})"
    )
    .unwrap();
}

const SKIPPED_TEXT_PARENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Candidates extracted from one page, and the shape that produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub shape: SiteShape,
    pub candidates: Vec<Candidate>,
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: &ElementRef<'_>) -> String {
    collapse(&el.text().collect::<String>())
}

fn first_link(el: &ElementRef<'_>, page_url: &str) -> String {
    el.select(&ANCHOR)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| resolve_link(page_url, href))
        .unwrap_or_default()
}

/// Extract candidates from a listing page using the given shape.
pub fn extract_candidates(html: &str, page_url: &str, site_id: &str, shape: SiteShape) -> Extracted {
    let document = Html::parse_document(html);

    let candidates = match shape {
        SiteShape::Table => extract_table(&document, page_url, site_id),
        SiteShape::Cards => extract_cards(&document, page_url, site_id),
        SiteShape::Links => extract_links(&document, page_url, site_id, false),
        SiteShape::Auto => {
            for (shape, found) in [
                (SiteShape::Table, extract_table(&document, page_url, site_id)),
                (SiteShape::Cards, extract_cards(&document, page_url, site_id)),
                (SiteShape::Links, extract_links(&document, page_url, site_id, true)),
            ] {
                if !found.is_empty() {
                    return Extracted {
                        shape,
                        candidates: found,
                    };
                }
            }
            Vec::new()
        }
    };

    Extracted { shape, candidates }
}

fn extract_table(document: &Html, page_url: &str, site_id: &str) -> Vec<Candidate> {
    let mut rows: Vec<ElementRef<'_>> = document.select(&TABLE_ROW).collect();
    if rows.len() < 2 {
        rows = document.select(&DIV_ROW).collect();
    }

    rows.into_iter()
        .filter_map(|row| table_row_candidate(&row, page_url, site_id))
        .collect()
}

fn table_row_candidate(row: &ElementRef<'_>, page_url: &str, site_id: &str) -> Option<Candidate> {
    let cells: Vec<String> = row.select(&DATA_CELL).map(|c| element_text(&c)).collect();
    if cells.is_empty() {
        // Header-only row
        if row.select(&HEADER_CELL).next().is_some() {
            return None;
        }
    }

    let row_text = element_text(row);
    if row_text.chars().count() < MIN_ROW_CHARS {
        return None;
    }
    let cells = if cells.is_empty() { vec![row_text.clone()] } else { cells };

    let mut title = String::new();
    let mut deadline_text = String::new();
    let mut latest = None;
    for cell in &cells {
        match find_dates(cell).into_iter().max() {
            Some(date) => {
                if latest.map_or(true, |l| date > l) {
                    latest = Some(date);
                    deadline_text = cell.clone();
                }
            }
            None => {
                if cell.chars().count() > title.chars().count() {
                    title = cell.clone();
                }
            }
        }
    }
    if title.is_empty() {
        return None;
    }

    let mut candidate = Candidate::new(site_id, title)
        .with_link(first_link(row, page_url))
        .with_deadline_text(deadline_text)
        .with_metadata("row_text", row_text)
        .with_metadata("shape", SiteShape::Table.as_str());
    for (i, cell) in cells.iter().enumerate() {
        candidate = candidate.with_metadata(format!("cell_{}", i), cell.clone());
    }
    Some(candidate)
}

fn extract_cards(document: &Html, page_url: &str, site_id: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    for heading in document.select(&CARD_HEADING) {
        let title = element_text(&heading);
        if title.is_empty() {
            continue;
        }
        let Some(block) = heading.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        let block_text = element_text(&block);
        let Some(caps) = DEADLINE_LABEL.captures(&block_text) else {
            continue;
        };
        let deadline_text = caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        let link = {
            let own = first_link(&heading, page_url);
            if own.is_empty() {
                first_link(&block, page_url)
            } else {
                own
            }
        };

        out.push(
            Candidate::new(site_id, title)
                .with_link(link)
                .with_deadline_text(deadline_text)
                .with_metadata("block_text", block_text)
                .with_metadata("shape", SiteShape::Cards.as_str()),
        );
    }
    out
}

fn extract_links(document: &Html, page_url: &str, site_id: &str, filtered: bool) -> Vec<Candidate> {
    let mut out = Vec::new();
    for item in document.select(&LIST_ITEM) {
        let Some(anchor) = item.select(&ANCHOR).next() else {
            continue;
        };
        let item_text = element_text(&item);
        let has_date = contains_date(&item_text);
        if filtered && !has_date && !has_procurement_keyword(&item_text) {
            continue;
        }

        let anchor_text = element_text(&anchor);
        let title = if anchor_text.is_empty() {
            item_text.clone()
        } else {
            anchor_text
        };
        if title.is_empty() {
            continue;
        }

        let link = anchor
            .value()
            .attr("href")
            .and_then(|href| resolve_link(page_url, href))
            .unwrap_or_default();
        let deadline_text = if has_date { item_text.clone() } else { String::new() };

        out.push(
            Candidate::new(site_id, title)
                .with_link(link)
                .with_deadline_text(deadline_text)
                .with_metadata("item_text", item_text)
                .with_metadata("shape", SiteShape::Links.as_str()),
        );
    }
    out
}

/// URL of the next listing page, if the page offers one.
pub fn next_page_url(html: &str, page_url: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document.select(&ANCHOR).find_map(|a| {
        let rel_next = a
            .value()
            .attr("rel")
            .map(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("next")))
            .unwrap_or(false);
        let text = element_text(&a).to_lowercase();
        let text_next = matches!(text.as_str(), "next" | "next >" | "›" | "»");
        if rel_next || text_next {
            a.value().attr("href").and_then(|h| resolve_link(page_url, h))
        } else {
            None
        }
    })
}

/// Every resolvable link on a page with its anchor text.
pub fn page_links(html: &str, page_url: &str) -> Vec<(String, String)> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let url = resolve_link(page_url, href)?;
            Some((url, element_text(&a)))
        })
        .collect()
}

/// Contents of `<title>`, collapsed.
pub fn page_title(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .select(&TITLE)
        .next()
        .map(|t| element_text(&t))
        .unwrap_or_default()
}

/// Visible text of a page: scripts and styles dropped, whitespace collapsed,
/// capped at `max_chars`.
pub fn visible_text(html: &str, max_chars: usize) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| match a.value() {
            Node::Element(e) => SKIPPED_TEXT_PARENTS.contains(&e.name()),
            _ => false,
        });
        if !hidden {
            raw.push_str(text);
            raw.push(' ');
        }
    }
    collapse(&raw).chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://ct.gov/bids/index.html";

    #[test]
    fn test_table_rows() {
        let html = r#"
            <table>
              <tr><th>Title</th><th>Posted</th><th>Closes</th></tr>
              <tr>
                <td><a href="detail?id=1">Roof Replacement - City Hall</a></td>
                <td>04/01/2025</td>
                <td>05/01/2025 2:00 PM</td>
              </tr>
              <tr><td>Paving</td><td>TBD</td></tr>
              <tr><td>x</td></tr>
            </table>"#;
        let out = extract_candidates(html, PAGE, "site-1", SiteShape::Auto);
        assert_eq!(out.shape, SiteShape::Table);
        assert_eq!(out.candidates.len(), 2);

        let roof = &out.candidates[0];
        assert_eq!(roof.title, "Roof Replacement - City Hall");
        assert_eq!(roof.raw_link, "https://ct.gov/bids/detail?id=1");
        assert_eq!(roof.raw_deadline_text, "05/01/2025 2:00 PM");
        assert_eq!(roof.source_site_id, "site-1");

        let paving = &out.candidates[1];
        assert_eq!(paving.title, "Paving");
        assert_eq!(paving.raw_link, "");
        assert_eq!(paving.raw_deadline_text, "");
    }

    #[test]
    fn test_div_rows_fallback() {
        let html = r#"
            <div role="row"><div role="cell"><a href="/b/7">HVAC Upgrade at Library</a></div>
            <div role="cell">Due 6/3/2025</div></div>"#;
        let out = extract_candidates(html, PAGE, "s", SiteShape::Table);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].raw_link, "https://ct.gov/b/7");
    }

    #[test]
    fn test_cards() {
        let html = r#"
            <div class="bid"><h3><a href="/rfp/22">Bridge Inspection Services</a></h3>
              <p>Close 05/12/2025</p></div>
            <div><h3>Welcome</h3><p>Nothing here</p></div>"#;
        let out = extract_candidates(html, PAGE, "s", SiteShape::Auto);
        assert_eq!(out.shape, SiteShape::Cards);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].title, "Bridge Inspection Services");
        assert!(out.candidates[0].raw_deadline_text.starts_with("05/12/2025"));
        assert_eq!(out.candidates[0].raw_link, "https://ct.gov/rfp/22");
    }

    #[test]
    fn test_auto_links_are_filtered() {
        let html = r#"
            <ul>
              <li><a href="/about">About Us</a></li>
              <li><a href="/bid/5">RFP 25-05 Gym Floor</a></li>
              <li><a href="/x">Window replacement</a> due May 9, 2025</li>
            </ul>"#;
        let out = extract_candidates(html, PAGE, "s", SiteShape::Auto);
        assert_eq!(out.shape, SiteShape::Links);
        let titles: Vec<_> = out.candidates.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["RFP 25-05 Gym Floor", "Window replacement"]);
        assert_eq!(out.candidates[1].raw_deadline_text, "Window replacement due May 9, 2025");
    }

    #[test]
    fn test_empty_page_yields_nothing() {
        let out = extract_candidates("<html><body><p>No open bids.</p></body></html>", PAGE, "s", SiteShape::Auto);
        assert!(out.candidates.is_empty());
        assert_eq!(out.shape, SiteShape::Auto);
    }

    #[test]
    fn test_next_page() {
        let html = r#"<a href="?page=1">1</a> <a href="?page=2">Next &gt;</a>"#;
        assert_eq!(
            next_page_url(html, "https://ct.gov/bids").as_deref(),
            Some("https://ct.gov/bids?page=2")
        );
        let rel = r#"<a rel="next" href="/bids/p3">3</a>"#;
        assert_eq!(
            next_page_url(rel, "https://ct.gov/bids").as_deref(),
            Some("https://ct.gov/bids/p3")
        );
        assert_eq!(next_page_url("<a href='/x'>Previous</a>", PAGE), None);
    }

    #[test]
    fn test_visible_text() {
        let html = "<html><head><title>T</title><style>p{}</style><script>var x=1;</script></head>\
                    <body><p>Scope   of\nwork</p></body></html>";
        assert_eq!(visible_text(html, 100), "T Scope of work");
        assert_eq!(visible_text(html, 7), "T Scope");
        assert_eq!(page_title(html), "T");
    }
}
