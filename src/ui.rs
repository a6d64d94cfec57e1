use prettytable::{Cell, Row, Table};

use crate::commands::migrate::{Candidate, Target};

pub fn log_plan(candidates: &[Candidate], target: &Target) {
    tracing::info!(
        "[plan] target class {} (driver {}, {}={})",
        target.class,
        target.driver,
        target.sku_key,
        target.sku
    );
    log_candidates(candidates, &target.suffix);
}

pub fn log_candidates(candidates: &[Candidate], suffix: &str) {
    if candidates.is_empty() {
        tracing::info!("<no eligible volumes>");
        return;
    }
    tracing::info!("[plan] {} eligible volume(s)", candidates.len());

    let mut table = Table::new();
    table.set_titles(Row::new(vec![
        Cell::new("Volume"),
        Cell::new("Claim"),
        Cell::new("Capacity"),
        Cell::new("Class"),
        Cell::new("New Volume"),
    ]));

    for c in candidates {
        table.add_row(Row::new(vec![
            Cell::new(&c.name),
            Cell::new(&format!("{}/{}", c.claim_ns, c.claim_name)),
            Cell::new(&c.capacity),
            Cell::new(&c.storage_class),
            Cell::new(&format!("{}{suffix}", c.name)),
        ]));
    }

    table.printstd();
}
