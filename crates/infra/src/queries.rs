//! Read side: balances, serial whereabouts, and stock-level reports.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use stockledger_core::{LocationId, MovementId, PartNumberId, ProjectId};
use stockledger_inventory::{
    Asset, AssetStatus, Balance, BalanceSnapshot, Location, Movement, MovementFilter, PartNumber,
};

use crate::catalog::CatalogRegistry;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::MovementLedger;

/// Which balance rows to aggregate. Absent fields match everything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceQuery {
    pub part_number_id: PartNumberId,
    #[serde(default)]
    pub location_id: Option<LocationId>,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    /// Also aggregate every location below `location_id`.
    #[serde(default)]
    pub include_children: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub snapshot: BalanceSnapshot,
    pub rows: Vec<Balance>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub movement: Movement,
    /// Status the serial was left in by this movement.
    pub status: AssetStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialWhereabouts {
    pub asset: Asset,
    pub location: Option<Location>,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockEntry {
    pub part_number: PartNumber,
    pub total: i64,
    pub available: i64,
}

#[derive(Clone)]
pub struct InventoryQueries {
    ledger: Arc<MovementLedger>,
    catalog: Arc<CatalogRegistry>,
}

impl InventoryQueries {
    pub fn new(ledger: Arc<MovementLedger>, catalog: Arc<CatalogRegistry>) -> Self {
        Self { ledger, catalog }
    }

    pub fn get_balance(&self, query: &BalanceQuery) -> LedgerResult<BalanceReport> {
        self.catalog.part_number(&query.part_number_id)?;
        let locations = match query.location_id {
            Some(root) if query.include_children => Some(self.catalog.subtree(&root)?),
            Some(root) => {
                self.catalog.location(&root)?;
                Some(vec![root])
            }
            None => None,
        };

        let rows = self.ledger.balances().select(|b| {
            b.key.part_number_id == query.part_number_id
                && locations.as_ref().is_none_or(|ls| ls.contains(&b.key.location_id))
                && query.project_id.is_none_or(|p| b.key.project_id == Some(p))
        })?;
        let snapshot = rows
            .iter()
            .fold(BalanceSnapshot::default(), |acc, b| acc.combine(b.snapshot()));
        Ok(BalanceReport { snapshot, rows })
    }

    /// Current state of a serial and every movement that touched it.
    pub fn where_is_serial(&self, serial: &str) -> LedgerResult<SerialWhereabouts> {
        let serial = serial.trim();
        let asset = self
            .ledger
            .assets()
            .get(serial)?
            .ok_or_else(|| LedgerError::NotFound(format!("serial '{serial}'")))?;

        let history = self.ledger.movements().list(&MovementFilter {
            serial: Some(serial.to_string()),
            ..MovementFilter::default()
        })?;

        let mut state: Option<Asset> = None;
        let mut timeline = Vec::with_capacity(history.len());
        for movement in history {
            let dest_kind = movement
                .destination_location_id
                .and_then(|d| self.catalog.location_kind(&d));
            let next = Asset::apply_movement(state.as_ref(), serial, &movement, dest_kind)?;
            timeline.push(TimelineEntry {
                status: next.status,
                movement,
            });
            state = Some(next);
        }

        let location = asset
            .location_id
            .map(|id| self.catalog.location(&id))
            .transpose()?;
        Ok(SerialWhereabouts {
            asset,
            location,
            timeline,
        })
    }

    /// Active part numbers whose available stock, summed over every balance
    /// row, is below their minimum.
    pub fn list_below_minimum(&self) -> LedgerResult<Vec<LowStockEntry>> {
        let rows = self.ledger.balances().list()?;
        let mut out = Vec::new();
        for part in self.catalog.list_part_numbers()? {
            if !part.active || part.min_stock <= 0 {
                continue;
            }
            let snapshot = rows
                .iter()
                .filter(|b| b.key.part_number_id == part.id)
                .fold(BalanceSnapshot::default(), |acc, b| acc.combine(b.snapshot()));
            if snapshot.available < part.min_stock {
                out.push(LowStockEntry {
                    total: snapshot.total,
                    available: snapshot.available,
                    part_number: part,
                });
            }
        }
        Ok(out)
    }

    pub fn get_movement(&self, id: &MovementId) -> LedgerResult<Movement> {
        self.ledger
            .movements()
            .get(id)?
            .ok_or_else(|| LedgerError::NotFound(format!("movement {id}")))
    }

    pub fn list_movements(&self, filter: &MovementFilter) -> LedgerResult<Vec<Movement>> {
        self.ledger.movements().list(filter)
    }
}
