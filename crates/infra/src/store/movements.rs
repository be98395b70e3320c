use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use stockledger_core::MovementId;
use stockledger_inventory::{Balance, Movement, MovementFilter, MovementRequest};

use crate::error::{LedgerError, LedgerResult};

/// One append to the ledger.
#[derive(Debug, Clone, Copy)]
pub struct LedgerAppend<'a> {
    pub id: MovementId,
    pub request: &'a MovementRequest,
    pub occurred_at: DateTime<Utc>,
    /// Balance rows as they stand after this movement. Stores that mirror
    /// balances persist them in the same transaction as the movement.
    pub balances: &'a [Balance],
}

/// Append-only movement ledger.
///
/// There is no update or delete: implementations must not offer one, and
/// persistent ones reject it at the storage layer as well.
pub trait MovementStore: Send + Sync {
    /// Append one movement, assigning the next ledger sequence (1-based, no gaps).
    fn append(&self, entry: LedgerAppend<'_>) -> LedgerResult<Movement>;

    fn get(&self, id: &MovementId) -> LedgerResult<Option<Movement>>;

    /// Matching movements in ledger order.
    fn list(&self, filter: &MovementFilter) -> LedgerResult<Vec<Movement>>;

    fn load_all(&self) -> LedgerResult<Vec<Movement>> {
        self.list(&MovementFilter::default())
    }

    fn last_sequence(&self) -> LedgerResult<u64>;

    /// Overwrite any mirrored balance rows after a rebuild.
    fn sync_balances(&self, _rows: &[Balance]) -> LedgerResult<()> {
        Ok(())
    }
}

impl<S> MovementStore for Arc<S>
where
    S: MovementStore + ?Sized,
{
    fn append(&self, entry: LedgerAppend<'_>) -> LedgerResult<Movement> {
        (**self).append(entry)
    }

    fn get(&self, id: &MovementId) -> LedgerResult<Option<Movement>> {
        (**self).get(id)
    }

    fn list(&self, filter: &MovementFilter) -> LedgerResult<Vec<Movement>> {
        (**self).list(filter)
    }

    fn load_all(&self) -> LedgerResult<Vec<Movement>> {
        (**self).load_all()
    }

    fn last_sequence(&self) -> LedgerResult<u64> {
        (**self).last_sequence()
    }

    fn sync_balances(&self, rows: &[Balance]) -> LedgerResult<()> {
        (**self).sync_balances(rows)
    }
}

#[derive(Debug, Default)]
struct Log {
    entries: Vec<Movement>,
    by_id: HashMap<MovementId, usize>,
}

/// In-memory ledger for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMovementStore {
    log: RwLock<Log>,
}

impl InMemoryMovementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MovementStore for InMemoryMovementStore {
    fn append(&self, entry: LedgerAppend<'_>) -> LedgerResult<Movement> {
        let mut log = self.log.write().map_err(|_| LedgerError::poisoned("ledger"))?;
        if log.by_id.contains_key(&entry.id) {
            return Err(LedgerError::ImmutableMovementViolation(entry.id));
        }

        let sequence = log.entries.len() as u64 + 1;
        let movement = Movement::recorded(entry.id, sequence, entry.request, entry.occurred_at);
        let idx = log.entries.len();
        log.entries.push(movement.clone());
        log.by_id.insert(movement.id, idx);
        Ok(movement)
    }

    fn get(&self, id: &MovementId) -> LedgerResult<Option<Movement>> {
        let log = self.log.read().map_err(|_| LedgerError::poisoned("ledger"))?;
        Ok(log.by_id.get(id).map(|&idx| log.entries[idx].clone()))
    }

    fn list(&self, filter: &MovementFilter) -> LedgerResult<Vec<Movement>> {
        let log = self.log.read().map_err(|_| LedgerError::poisoned("ledger"))?;
        Ok(log.entries.iter().filter(|m| filter.matches(m)).cloned().collect())
    }

    fn last_sequence(&self) -> LedgerResult<u64> {
        let log = self.log.read().map_err(|_| LedgerError::poisoned("ledger"))?;
        Ok(log.entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{ActorId, LocationId, PartNumberId};
    use stockledger_inventory::MovementType;

    fn entrada(pn: PartNumberId, to: LocationId) -> MovementRequest {
        MovementRequest::new(MovementType::Entrada, pn, 1, ActorId::new()).to_location(to)
    }

    #[test]
    fn sequences_are_gap_free_and_filters_apply() {
        let store = InMemoryMovementStore::new();
        let (a, b) = (PartNumberId::new(), PartNumberId::new());
        let loc = LocationId::new();

        for pn in [a, b, a] {
            let req = entrada(pn, loc);
            store
                .append(LedgerAppend {
                    id: MovementId::new(),
                    request: &req,
                    occurred_at: Utc::now(),
                    balances: &[],
                })
                .unwrap();
        }

        let all = store.load_all().unwrap();
        assert_eq!(all.iter().map(|m| m.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(store.last_sequence().unwrap(), 3);

        let only_a = store
            .list(&MovementFilter {
                part_number_id: Some(a),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(only_a.iter().map(|m| m.sequence).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(store.get(&all[1].id).unwrap().as_ref(), Some(&all[1]));
    }

    #[test]
    fn reusing_an_id_cannot_overwrite_history() {
        let store = InMemoryMovementStore::new();
        let req = entrada(PartNumberId::new(), LocationId::new());
        let id = MovementId::new();
        let entry = LedgerAppend {
            id,
            request: &req,
            occurred_at: Utc::now(),
            balances: &[],
        };
        let first = store.append(entry).unwrap();

        assert_eq!(
            store.append(entry).unwrap_err(),
            LedgerError::ImmutableMovementViolation(id)
        );
        assert_eq!(store.get(&id).unwrap(), Some(first));
    }
}
