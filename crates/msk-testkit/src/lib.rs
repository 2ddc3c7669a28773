//! Shared fixtures for cross-crate scenarios.
//!
//! Movement fixtures are CSV files with one draft per row:
//!
//! ```text
//! occurred_at,kind,product_id,source_warehouse_id,destination_warehouse_id,quantity,ship_id,direction,document_reference
//! 2024-03-01T06:00:00Z,entry,CLINKER,,W1,1200,,,BL-001
//! ```
//!
//! Empty cells are absent values.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use msk_engine::{Actor, MovementStore, StockService, Submission, SubmissionPolicy};
use msk_ledger::{AdjustmentDirection, MovementDraft, MovementKind, Qty};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Path of a fixture shipped with this crate.
pub fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
}

/// Midnight-based UTC timestamp in March 2024, the month every fixture uses.
pub fn march(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture time: day {day} hour {hour}"))
}

#[derive(Debug, Deserialize)]
struct DraftRow {
    occurred_at: String,
    kind: String,
    product_id: String,
    source_warehouse_id: Option<String>,
    destination_warehouse_id: Option<String>,
    quantity: String,
    ship_id: Option<String>,
    direction: Option<String>,
    document_reference: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl DraftRow {
    fn into_draft(self) -> Result<MovementDraft> {
        let occurred_at: DateTime<Utc> = self.occurred_at.trim().parse().context("parse occurred_at")?;
        let kind: MovementKind = self.kind.parse().map_err(|e: String| anyhow!(e))?;
        let quantity: Qty = self.quantity.parse().context("parse quantity")?;

        let mut d = MovementDraft::new(kind, self.product_id.trim(), quantity, occurred_at, "fixture");
        d.source_warehouse_id = non_empty(self.source_warehouse_id);
        d.destination_warehouse_id = non_empty(self.destination_warehouse_id);
        d.ship_id = non_empty(self.ship_id);
        if let Some(dir) = non_empty(self.direction) {
            d.direction = dir
                .parse::<AdjustmentDirection>()
                .map_err(|e| anyhow!(e))?;
        }
        d.document_reference = non_empty(self.document_reference).unwrap_or_default();
        Ok(d)
    }
}

pub fn parse_drafts_csv(content: &str) -> Result<Vec<MovementDraft>> {
    read_drafts(csv::Reader::from_reader(content.as_bytes()))
}

pub fn load_drafts_csv(path: impl AsRef<Path>) -> Result<Vec<MovementDraft>> {
    let path = path.as_ref();
    let rdr = csv::Reader::from_path(path).with_context(|| format!("open drafts csv: {}", path.display()))?;
    read_drafts(rdr)
}

fn read_drafts<R: std::io::Read>(mut rdr: csv::Reader<R>) -> Result<Vec<MovementDraft>> {
    let mut out = Vec::new();
    for (i, row) in rdr.deserialize::<DraftRow>().enumerate() {
        let row = row.with_context(|| format!("drafts csv row {}", i + 1))?;
        out.push(row.into_draft().with_context(|| format!("drafts csv row {}", i + 1))?);
    }

    for w in out.windows(2) {
        if w[1].occurred_at < w[0].occurred_at {
            bail!("drafts not in time order");
        }
    }
    Ok(out)
}

/// Submit `drafts` in order as `actor`, stopping at the first refusal.
pub async fn submit_all<S, P>(
    svc: &StockService<S, P>,
    actor: &Actor,
    drafts: Vec<MovementDraft>,
) -> Result<Vec<Submission>>
where
    S: MovementStore,
    P: SubmissionPolicy,
{
    let mut out = Vec::with_capacity(drafts.len());
    for (i, d) in drafts.into_iter().enumerate() {
        let sub = svc
            .submit(actor, d)
            .await
            .with_context(|| format!("submit draft {}", i + 1))?;
        out.push(sub);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cells_are_absent() {
        let csv = "occurred_at,kind,product_id,source_warehouse_id,destination_warehouse_id,quantity,ship_id,direction,document_reference\n\
                   2024-03-01T06:00:00Z,adjustment,P1,W1,,2.5,,decrease,\n";
        let drafts = parse_drafts_csv(csv).unwrap();
        assert_eq!(drafts.len(), 1);
        let d = &drafts[0];
        assert_eq!(d.destination_warehouse_id, None);
        assert_eq!(d.ship_id, None);
        assert_eq!(d.direction, AdjustmentDirection::Decrease);
        assert_eq!(d.quantity, Qty::new(2_500_000));
        assert_eq!(d.document_reference, "");
    }

    #[test]
    fn out_of_order_rows_are_refused() {
        let csv = "occurred_at,kind,product_id,source_warehouse_id,destination_warehouse_id,quantity,ship_id,direction,document_reference\n\
                   2024-03-02T06:00:00Z,entry,P1,,W1,1,,,\n\
                   2024-03-01T06:00:00Z,entry,P1,,W1,1,,,\n";
        assert!(parse_drafts_csv(csv).is_err());
    }

    #[test]
    fn bundled_fixture_parses() {
        let drafts = load_drafts_csv(fixture_path("harbor_week.csv")).unwrap();
        assert!(!drafts.is_empty());
        assert_eq!(drafts[0].occurred_at, march(1, 6));
    }
}
