//! Balance projection: derived total/reserved/available per
//! `(part_number, location, project)` key.
//!
//! The projector is a pure dispatch on `MovementType`. The live ledger applies
//! it inside a locked unit of work; replay applies it to an empty
//! `BalanceProjection`. Both paths share `deltas_for` and `Balance::apply`, so
//! they cannot drift.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, LocationId, PartNumberId, ProjectId, ValueObject,
};

use crate::movement::{Movement, MovementRequest, MovementType};

/// Composite key of a balance row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceKey {
    pub part_number_id: PartNumberId,
    pub location_id: LocationId,
    pub project_id: Option<ProjectId>,
}

impl BalanceKey {
    pub fn new(
        part_number_id: PartNumberId,
        location_id: LocationId,
        project_id: Option<ProjectId>,
    ) -> Self {
        Self {
            part_number_id,
            location_id,
            project_id,
        }
    }
}

impl ValueObject for BalanceKey {}

impl core::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.project_id {
            Some(p) => write!(f, "({}, {}, {})", self.part_number_id, self.location_id, p),
            None => write!(f, "({}, {}, -)", self.part_number_id, self.location_id),
        }
    }
}

/// Point-in-time quantities of a balance (what collaborators see).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub total: i64,
    pub reserved: i64,
    pub available: i64,
}

impl BalanceSnapshot {
    pub fn combine(self, other: BalanceSnapshot) -> BalanceSnapshot {
        BalanceSnapshot {
            total: self.total + other.total,
            reserved: self.reserved + other.reserved,
            available: self.available + other.available,
        }
    }
}

impl ValueObject for BalanceSnapshot {}

/// Materialized balance row.
///
/// `quantity_available` is never stored; it is always `total - reserved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub key: BalanceKey,
    pub quantity_total: i64,
    pub quantity_reserved: i64,
    /// Incremented on every applied effect (optimistic concurrency token).
    pub version: u64,
    pub last_movement_at: Option<DateTime<Utc>>,
}

impl Balance {
    pub fn empty(key: BalanceKey) -> Self {
        Self {
            key,
            quantity_total: 0,
            quantity_reserved: 0,
            version: 0,
            last_movement_at: None,
        }
    }

    pub fn quantity_available(&self) -> i64 {
        self.quantity_total - self.quantity_reserved
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            total: self.quantity_total,
            reserved: self.quantity_reserved,
            available: self.quantity_available(),
        }
    }

    /// `available = total - reserved >= 0`, with neither side negative.
    pub fn check_invariant(&self) -> DomainResult<()> {
        if self.quantity_total < 0 || self.quantity_reserved < 0 || self.quantity_available() < 0 {
            return Err(DomainError::invariant(format!(
                "balance {} would become total={}, reserved={}",
                self.key, self.quantity_total, self.quantity_reserved
            )));
        }
        Ok(())
    }

    /// Apply one effect, returning the new row. The receiver is untouched.
    pub fn apply(&self, effect: BalanceEffect, at: DateTime<Utc>) -> DomainResult<Balance> {
        let mut next = self.clone();
        match effect {
            BalanceEffect::AddTotal(q) => next.quantity_total += q,
            BalanceEffect::SubtractTotal(q) => next.quantity_total -= q,
            BalanceEffect::Reserve(q) => next.quantity_reserved += q,
            BalanceEffect::Release(q) => {
                next.quantity_reserved = (next.quantity_reserved - q).max(0);
            }
        }
        next.check_invariant()?;
        next.version += 1;
        next.last_movement_at = Some(at);
        Ok(next)
    }
}

/// What a movement does to one balance row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceEffect {
    AddTotal(i64),
    SubtractTotal(i64),
    Reserve(i64),
    /// Saturating: reserved never drops below zero.
    Release(i64),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BalanceDelta {
    pub key: BalanceKey,
    pub effect: BalanceEffect,
}

/// The projector dispatch table.
///
/// Returns the balance effects of a movement, in application order. A
/// `TRANSFERENCIA` yields two deltas that must be committed as one unit.
pub fn deltas_for(
    movement_type: MovementType,
    part_number_id: PartNumberId,
    quantity: i64,
    source: Option<LocationId>,
    destination: Option<LocationId>,
    project_id: Option<ProjectId>,
) -> DomainResult<Vec<BalanceDelta>> {
    let at = |loc: Option<LocationId>, side: &str| {
        loc.map(|l| BalanceKey::new(part_number_id, l, project_id))
            .ok_or_else(|| DomainError::validation(format!("{movement_type} requires a {side} location")))
    };

    let deltas = match movement_type {
        MovementType::Entrada | MovementType::AjustePositivo | MovementType::Reversa => {
            vec![BalanceDelta {
                key: at(destination, "destination")?,
                effect: BalanceEffect::AddTotal(quantity),
            }]
        }
        MovementType::Saida | MovementType::AjusteNegativo | MovementType::Expedicao => {
            vec![BalanceDelta {
                key: at(source, "source")?,
                effect: BalanceEffect::SubtractTotal(quantity),
            }]
        }
        MovementType::Transferencia => vec![
            BalanceDelta {
                key: at(source, "source")?,
                effect: BalanceEffect::SubtractTotal(quantity),
            },
            BalanceDelta {
                key: at(destination, "destination")?,
                effect: BalanceEffect::AddTotal(quantity),
            },
        ],
        MovementType::Reserva => vec![BalanceDelta {
            key: at(source, "source")?,
            effect: BalanceEffect::Reserve(quantity),
        }],
        MovementType::Liberacao => vec![BalanceDelta {
            key: at(source, "source")?,
            effect: BalanceEffect::Release(quantity),
        }],
    };
    Ok(deltas)
}

pub fn deltas_for_request(req: &MovementRequest) -> DomainResult<Vec<BalanceDelta>> {
    deltas_for(
        req.movement_type,
        req.part_number_id,
        req.quantity,
        req.source_location_id,
        req.destination_location_id,
        req.project_id,
    )
}

pub fn deltas_for_movement(m: &Movement) -> DomainResult<Vec<BalanceDelta>> {
    deltas_for(
        m.movement_type,
        m.part_number_id,
        m.quantity,
        m.source_location_id,
        m.destination_location_id,
        m.project_id,
    )
}

/// Apply a set of deltas against current rows, all-or-nothing.
///
/// `current` resolves the row a key starts from (missing rows are created
/// lazily as empty). Returns the new rows in delta order.
pub fn apply_deltas(
    deltas: &[BalanceDelta],
    at: DateTime<Utc>,
    mut current: impl FnMut(&BalanceKey) -> Option<Balance>,
) -> DomainResult<Vec<Balance>> {
    let mut staged: Vec<Balance> = Vec::with_capacity(deltas.len());
    for delta in deltas {
        let base = match staged.iter().position(|b| b.key == delta.key) {
            Some(idx) => staged.remove(idx),
            None => current(&delta.key).unwrap_or_else(|| Balance::empty(delta.key)),
        };
        staged.push(base.apply(delta.effect, at)?);
    }
    Ok(staged)
}

/// In-memory balance projection built purely from movements.
///
/// Used for replay/verification and as the reference model in property tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceProjection {
    rows: HashMap<BalanceKey, Balance>,
}

impl BalanceProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &BalanceKey) -> Option<&Balance> {
        self.rows.get(key)
    }

    pub fn rows(&self) -> impl Iterator<Item = &Balance> {
        self.rows.values()
    }

    pub fn into_rows(self) -> Vec<Balance> {
        let mut rows: Vec<_> = self.rows.into_values().collect();
        rows.sort_by_key(|b| b.key);
        rows
    }

    pub fn apply(&mut self, movement: &Movement) -> DomainResult<()> {
        let deltas = deltas_for_movement(movement)?;
        let updated = apply_deltas(&deltas, movement.occurred_at, |k| self.rows.get(k).cloned())?;
        for row in updated {
            self.rows.insert(row.key, row);
        }
        Ok(())
    }

    pub fn replay<'a>(movements: impl IntoIterator<Item = &'a Movement>) -> DomainResult<Self> {
        let mut ordered: Vec<&Movement> = movements.into_iter().collect();
        ordered.sort_by_key(|m| m.sequence);

        let mut projection = Self::new();
        for m in ordered {
            projection.apply(m)?;
        }
        Ok(projection)
    }
}
