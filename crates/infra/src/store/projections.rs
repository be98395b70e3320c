//! Materialized balance and asset rows.
//!
//! Both are projections of the ledger: they are written only by the
//! `MovementLedger` unit of work and by replay.

use std::collections::HashMap;
use std::sync::RwLock;

use stockledger_core::ExpectedVersion;
use stockledger_inventory::{Asset, Balance, BalanceKey, BalanceSnapshot};

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Default)]
pub struct BalanceStore {
    rows: RwLock<HashMap<BalanceKey, Balance>>,
}

impl BalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &BalanceKey) -> LedgerResult<Option<Balance>> {
        let rows = self.rows.read().map_err(|_| LedgerError::poisoned("balance"))?;
        Ok(rows.get(key).cloned())
    }

    /// Zero snapshot for keys never touched.
    pub fn snapshot(&self, key: &BalanceKey) -> LedgerResult<BalanceSnapshot> {
        Ok(self.get(key)?.map(|b| b.snapshot()).unwrap_or_default())
    }

    /// Rows matching `pred`, sorted by key.
    pub fn select(&self, pred: impl Fn(&Balance) -> bool) -> LedgerResult<Vec<Balance>> {
        let rows = self.rows.read().map_err(|_| LedgerError::poisoned("balance"))?;
        let mut out: Vec<Balance> = rows.values().filter(|b| pred(b)).cloned().collect();
        out.sort_by_key(|b| b.key);
        Ok(out)
    }

    pub fn list(&self) -> LedgerResult<Vec<Balance>> {
        self.select(|_| true)
    }

    /// Write a staged set of rows in one step.
    ///
    /// Every row carries the version it was staged from; if any row moved in
    /// the meantime nothing is written. Readers never observe a partial set.
    pub fn commit(&self, staged: &[(ExpectedVersion, Balance)]) -> LedgerResult<()> {
        let mut rows = self.rows.write().map_err(|_| LedgerError::poisoned("balance"))?;
        for (expected, row) in staged {
            let current = rows.get(&row.key).map_or(0, |b| b.version);
            if !expected.matches(current) {
                return Err(LedgerError::ConcurrentBalanceConflict(format!(
                    "balance {} moved from version {expected:?} to {current}",
                    row.key
                )));
            }
        }
        for (_, row) in staged {
            rows.insert(row.key, row.clone());
        }
        Ok(())
    }

    pub fn replace_all(&self, fresh: Vec<Balance>) -> LedgerResult<()> {
        let mut rows = self.rows.write().map_err(|_| LedgerError::poisoned("balance"))?;
        *rows = fresh.into_iter().map(|b| (b.key, b)).collect();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct AssetStore {
    by_serial: RwLock<HashMap<String, Asset>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, serial: &str) -> LedgerResult<Option<Asset>> {
        let assets = self.by_serial.read().map_err(|_| LedgerError::poisoned("asset"))?;
        Ok(assets.get(serial).cloned())
    }

    pub fn list(&self) -> LedgerResult<Vec<Asset>> {
        let assets = self.by_serial.read().map_err(|_| LedgerError::poisoned("asset"))?;
        let mut out: Vec<Asset> = assets.values().cloned().collect();
        out.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(out)
    }

    pub fn commit(&self, staged: Vec<Asset>) -> LedgerResult<()> {
        let mut assets = self.by_serial.write().map_err(|_| LedgerError::poisoned("asset"))?;
        for asset in staged {
            assets.insert(asset.serial.clone(), asset);
        }
        Ok(())
    }

    pub fn replace_all(&self, fresh: Vec<Asset>) -> LedgerResult<()> {
        let mut assets = self.by_serial.write().map_err(|_| LedgerError::poisoned("asset"))?;
        *assets = fresh.into_iter().map(|a| (a.serial.clone(), a)).collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{LocationId, PartNumberId};
    use stockledger_inventory::BalanceEffect;

    #[test]
    fn stale_version_rejects_the_whole_set() {
        let store = BalanceStore::new();
        let pn = PartNumberId::new();
        let a = BalanceKey::new(pn, LocationId::new(), None);
        let b = BalanceKey::new(pn, LocationId::new(), None);
        let at = Utc::now();

        let a1 = Balance::empty(a).apply(BalanceEffect::AddTotal(5), at).unwrap();
        store.commit(&[(ExpectedVersion::Exact(0), a1.clone())]).unwrap();

        let a2 = a1.apply(BalanceEffect::SubtractTotal(1), at).unwrap();
        let b1 = Balance::empty(b).apply(BalanceEffect::AddTotal(1), at).unwrap();
        let err = store
            .commit(&[(ExpectedVersion::Exact(0), a2), (ExpectedVersion::Exact(0), b1)])
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(store.get(&a).unwrap(), Some(a1));
        assert_eq!(store.get(&b).unwrap(), None);
        assert_eq!(store.snapshot(&b).unwrap(), BalanceSnapshot::default());
    }
}
