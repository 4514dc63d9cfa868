//! Bid export for the report layer.
//!
//! Output only: nothing in the crate reads these formats back.

use serde::Serialize;
use std::io::Write;

use crate::error::{Result, ScoutError};
use crate::types::bid::Bid;

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    slug: &'a str,
    client_name: &'a str,
    title: &'a str,
    deadline: String,
    scraped_at: String,
    source_url: &'a str,
    state: &'a str,
}

#[derive(Debug, Serialize)]
struct JsonRow<'a> {
    slug: &'a str,
    client_name: &'a str,
    title: &'a str,
    deadline: String,
    scraped_at: String,
    source_url: &'a str,
    state: &'a str,
    rfp_description: &'a str,
}

fn deadline(bid: &Bid) -> String {
    bid.deadline.format("%Y-%m-%d").to_string()
}

fn scraped_at(bid: &Bid) -> String {
    bid.scraped_at.to_rfc3339()
}

/// Write bids as CSV with a header row.
pub fn write_csv<W: Write>(writer: W, bids: &[Bid]) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    if bids.is_empty() {
        out.write_record([
            "slug",
            "client_name",
            "title",
            "deadline",
            "scraped_at",
            "source_url",
            "state",
        ])
        .map_err(export_error)?;
    }
    for bid in bids {
        out.serialize(CsvRow {
            slug: &bid.slug,
            client_name: &bid.client_name,
            title: &bid.title,
            deadline: deadline(bid),
            scraped_at: scraped_at(bid),
            source_url: &bid.source_url,
            state: &bid.state,
        })
        .map_err(export_error)?;
    }
    out.flush().map_err(|e| ScoutError::Config(format!("export failed: {}", e)))?;
    Ok(())
}

/// Write bids as a pretty-printed JSON array, descriptions included.
pub fn write_json<W: Write>(writer: W, bids: &[Bid]) -> Result<()> {
    let rows: Vec<JsonRow<'_>> = bids
        .iter()
        .map(|bid| JsonRow {
            slug: &bid.slug,
            client_name: &bid.client_name,
            title: &bid.title,
            deadline: deadline(bid),
            scraped_at: scraped_at(bid),
            source_url: &bid.source_url,
            state: &bid.state,
            rfp_description: bid.description.as_deref().unwrap_or(""),
        })
        .collect();
    serde_json::to_writer_pretty(writer, &rows)
        .map_err(|e| ScoutError::Config(format!("export failed: {}", e)))
}

fn export_error(e: csv::Error) -> ScoutError {
    ScoutError::Config(format!("export failed: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::entity::EntityKind;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn bid() -> Bid {
        Bid::new(
            "City of Hartford",
            EntityKind::City,
            "Roof Replacement, City Hall",
            "https://hartford.gov/bids/roof",
            NaiveDate::from_ymd_opt(2025, 5, 20).unwrap(),
        )
        .with_state("Connecticut")
        .with_description("Remove and replace roofing membrane.")
        .with_scraped_at(Utc.with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_csv_header_and_quoting() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &[bid()]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next().unwrap(),
            "slug,client_name,title,deadline,scraped_at,source_url,state"
        );
        let row = lines.next().unwrap();
        assert!(row.contains("\"Roof Replacement, City Hall\""));
        assert!(row.contains(",2025-05-20,2025-04-01T12:00:00+00:00,"));
        assert!(row.ends_with(",https://hartford.gov/bids/roof,Connecticut"));
        assert!(!text.contains("roofing membrane"));
    }

    #[test]
    fn test_csv_empty_still_has_header() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &[]).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap().trim_end(),
            "slug,client_name,title,deadline,scraped_at,source_url,state"
        );
    }

    #[test]
    fn test_json_carries_description() {
        let mut buf = Vec::new();
        write_json(&mut buf, &[bid()]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();

        let first = &value[0];
        assert_eq!(first["deadline"], "2025-05-20");
        assert_eq!(first["state"], "Connecticut");
        assert_eq!(first["rfp_description"], "Remove and replace roofing membrane.");
        assert_eq!(first["slug"], bid().slug.as_str());
    }
}
