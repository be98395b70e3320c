//! Rebuilding and verifying the balance and asset projections from the ledger.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

use stockledger_inventory::{AssetProjection, BalanceKey, BalanceProjection, Movement};

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::MovementLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub movements_replayed: u64,
    pub balance_rows: usize,
    pub assets: usize,
}

/// Rows whose materialized value disagrees with a fresh fold of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectionDrift {
    pub balances: Vec<BalanceKey>,
    pub serials: Vec<String>,
}

impl ProjectionDrift {
    pub fn is_clean(&self) -> bool {
        self.balances.is_empty() && self.serials.is_empty()
    }
}

impl MovementLedger {
    fn fold_ledger(&self) -> LedgerResult<(u64, BalanceProjection, AssetProjection)> {
        let movements = self.movements.load_all()?;
        check_sequences(&movements)?;

        let kinds = self.catalog.location_kinds()?;
        let balances = BalanceProjection::replay(&movements)?;
        let mut assets = AssetProjection::new();
        for movement in &movements {
            assets.apply(movement, |id| kinds.get(id).copied())?;
        }
        Ok((movements.len() as u64, balances, assets))
    }

    /// Discard the materialized rows and rebuild them from the ledger.
    /// Writers are held off for the duration.
    pub fn rebuild_projections(&self) -> LedgerResult<ReplayReport> {
        let _exclusive = self
            .rebuild_gate
            .write()
            .map_err(|_| LedgerError::poisoned("rebuild gate"))?;

        let (replayed, balances, assets) = self.fold_ledger()?;
        let rows = balances.into_rows();
        let assets = assets.into_assets();
        let report = ReplayReport {
            movements_replayed: replayed,
            balance_rows: rows.len(),
            assets: assets.len(),
        };

        self.movements.sync_balances(&rows)?;
        self.balances.replace_all(rows)?;
        self.assets.replace_all(assets)?;

        info!(
            movements = report.movements_replayed,
            balance_rows = report.balance_rows,
            assets = report.assets,
            "projections rebuilt from ledger"
        );
        Ok(report)
    }

    /// Compare the materialized rows with a fresh fold without touching them.
    pub fn verify_projections(&self) -> LedgerResult<ProjectionDrift> {
        let _exclusive = self
            .rebuild_gate
            .write()
            .map_err(|_| LedgerError::poisoned("rebuild gate"))?;

        let (_, balances, assets) = self.fold_ledger()?;

        let expected: BTreeMap<BalanceKey, (i64, i64)> = balances
            .rows()
            .map(|b| (b.key, (b.quantity_total, b.quantity_reserved)))
            .collect();
        let actual: BTreeMap<BalanceKey, (i64, i64)> = self
            .balances
            .list()?
            .into_iter()
            .map(|b| (b.key, (b.quantity_total, b.quantity_reserved)))
            .collect();
        let keys: BTreeSet<BalanceKey> = expected.keys().chain(actual.keys()).copied().collect();
        let drifted_balances: Vec<BalanceKey> = keys
            .into_iter()
            .filter(|k| expected.get(k).unwrap_or(&(0, 0)) != actual.get(k).unwrap_or(&(0, 0)))
            .collect();

        let materialized = self.assets.list()?;
        let mut serials: BTreeSet<String> = assets.assets().map(|a| a.serial.clone()).collect();
        serials.extend(materialized.iter().map(|a| a.serial.clone()));
        let drifted_serials: Vec<String> = serials
            .into_iter()
            .filter(|s| {
                let live = materialized.iter().find(|a| &a.serial == s);
                live != assets.get(s)
            })
            .collect();

        let drift = ProjectionDrift {
            balances: drifted_balances,
            serials: drifted_serials,
        };
        if !drift.is_clean() {
            warn!(
                balances = drift.balances.len(),
                serials = drift.serials.len(),
                "projection drift detected"
            );
        }
        Ok(drift)
    }
}

fn check_sequences(movements: &[Movement]) -> LedgerResult<()> {
    for (idx, movement) in movements.iter().enumerate() {
        let expected = idx as u64 + 1;
        if movement.sequence != expected {
            return Err(LedgerError::Store(format!(
                "ledger sequence gap: expected {expected}, found {} ({})",
                movement.sequence, movement.id
            )));
        }
    }
    Ok(())
}
