//! Count campaigns: plan lines from current balances, take counts, and hand
//! every nonzero variance to the divergence detector.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::info;

use stockledger_core::{ActorId, CampaignId, Clock, LocationId, PartNumberId, ProjectId};
use stockledger_inventory::{
    compute_stats, CampaignScope, CampaignStatus, CountLineKey, CountResult, Divergence,
    InventoryCampaign,
};

use crate::catalog::CatalogRegistry;
use crate::divergences::DivergenceDetector;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::MovementLedger;
use crate::store::{KeyValueStore, Stores};

/// Outcome of one count submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountSubmission {
    pub line: CountResult,
    pub campaign: InventoryCampaign,
    pub divergence: Option<Divergence>,
}

pub struct CountManager {
    ledger: Arc<MovementLedger>,
    catalog: Arc<CatalogRegistry>,
    detector: Arc<DivergenceDetector>,
    campaigns: Arc<dyn KeyValueStore<CampaignId, InventoryCampaign>>,
    lines: Arc<dyn KeyValueStore<CountLineKey, CountResult>>,
    clock: Arc<dyn Clock>,
    writes: Mutex<()>,
}

impl CountManager {
    pub fn new(
        ledger: Arc<MovementLedger>,
        catalog: Arc<CatalogRegistry>,
        detector: Arc<DivergenceDetector>,
        stores: &Stores,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            catalog,
            detector,
            campaigns: stores.campaigns.clone(),
            lines: stores.count_results.clone(),
            clock,
            writes: Mutex::new(()),
        }
    }

    fn serialize(&self) -> LedgerResult<MutexGuard<'_, ()>> {
        self.writes.lock().map_err(|_| LedgerError::poisoned("count writes"))
    }

    /// Open a campaign and plan one line per `(part number, location)` that
    /// currently has a balance row inside the scope.
    pub fn start_campaign(
        &self,
        name: &str,
        scope: CampaignScope,
        started_by: ActorId,
    ) -> LedgerResult<InventoryCampaign> {
        let locations = self.scope_locations(&scope)?;
        if let Some(project) = scope.project_id {
            self.catalog.project(&project)?;
        }

        let campaign = InventoryCampaign::start(CampaignId::new(), name, scope, started_by, self.clock.now())?;

        let planned: BTreeSet<(PartNumberId, LocationId)> = self
            .ledger
            .balances()
            .select(|b| {
                locations.as_ref().is_none_or(|ls| ls.contains(&b.key.location_id))
                    && campaign.scope.project_id.is_none_or(|p| b.key.project_id == Some(p))
            })?
            .into_iter()
            .map(|b| (b.key.part_number_id, b.key.location_id))
            .collect();

        let _writes = self.serialize()?;
        let mut lines = Vec::with_capacity(planned.len());
        for (part, location) in planned {
            let line = CountResult::planned(campaign.id, part, location);
            self.lines.upsert(line.line_key(), line.clone())?;
            lines.push(line);
        }
        let campaign = campaign.with_stats(compute_stats(&lines));
        self.campaigns.save(&campaign)?;

        info!(
            campaign_id = %campaign.id,
            name = %campaign.name,
            planned_lines = campaign.stats.total_items,
            "count campaign started"
        );
        Ok(campaign)
    }

    /// Record a physical count. The expected quantity is the ledger balance
    /// at the first submission for the line; recounts only replace the
    /// counted side.
    pub fn submit_count(
        &self,
        campaign_id: CampaignId,
        part_number_id: PartNumberId,
        location_id: LocationId,
        counted: i64,
        counted_by: ActorId,
    ) -> LedgerResult<CountSubmission> {
        self.catalog.part_number(&part_number_id)?;
        self.catalog.location(&location_id)?;

        let _writes = self.serialize()?;
        let campaign = self.get_campaign(campaign_id)?;
        campaign.ensure_open()?;
        if let Some(ls) = self.scope_locations(&campaign.scope)? {
            if !ls.contains(&location_id) {
                return Err(LedgerError::Validation(format!(
                    "location {location_id} is outside campaign {campaign_id}"
                )));
            }
        }

        let key = CountLineKey {
            campaign_id,
            part_number_id,
            location_id,
        };
        let expected = self.expected_quantity(part_number_id, location_id, campaign.scope.project_id)?;
        let line = self
            .lines
            .get(&key)?
            .unwrap_or_else(|| CountResult::planned(campaign_id, part_number_id, location_id))
            .record_count(expected, counted, counted_by, self.clock.now())?;
        self.lines.upsert(key, line.clone())?;

        let divergence = self.detector.observe_count(&line, campaign.scope.project_id)?;

        let campaign = campaign.with_stats(compute_stats(&self.campaign_lines(campaign_id)?));
        self.campaigns.save(&campaign)?;

        info!(
            campaign_id = %campaign_id,
            line = %key,
            counted,
            variance = ?line.variance(),
            "count submitted"
        );
        Ok(CountSubmission {
            line,
            campaign,
            divergence,
        })
    }

    pub fn complete_campaign(&self, id: CampaignId) -> LedgerResult<InventoryCampaign> {
        self.close(id, CampaignStatus::Completed)
    }

    pub fn cancel_campaign(&self, id: CampaignId) -> LedgerResult<InventoryCampaign> {
        self.close(id, CampaignStatus::Cancelled)
    }

    pub fn get_campaign(&self, id: CampaignId) -> LedgerResult<InventoryCampaign> {
        self.campaigns
            .get(&id)?
            .ok_or_else(|| LedgerError::NotFound(format!("campaign {id}")))
    }

    pub fn list_campaigns(&self) -> LedgerResult<Vec<InventoryCampaign>> {
        let mut all = self.campaigns.list()?;
        all.sort_by_key(|c| c.started_at);
        Ok(all)
    }

    /// Lines of a campaign in key order.
    pub fn campaign_lines(&self, id: CampaignId) -> LedgerResult<Vec<CountResult>> {
        Ok(self
            .lines
            .list()?
            .into_iter()
            .filter(|l| l.campaign_id == id)
            .collect())
    }

    fn close(&self, id: CampaignId, status: CampaignStatus) -> LedgerResult<InventoryCampaign> {
        let _writes = self.serialize()?;
        let current = self.get_campaign(id)?;
        let stats = compute_stats(&self.campaign_lines(id)?);
        let closed = current.with_stats(stats).close(status, self.clock.now())?;
        self.campaigns.save(&closed)?;
        info!(campaign_id = %id, status = ?status, "count campaign closed");
        Ok(closed)
    }

    /// `None` means every location.
    fn scope_locations(&self, scope: &CampaignScope) -> LedgerResult<Option<Vec<LocationId>>> {
        scope
            .location_id
            .map(|root| self.catalog.subtree(&root))
            .transpose()
    }

    /// Physical stock at a location: one project's row when the campaign is
    /// project-scoped, every project's rows otherwise.
    fn expected_quantity(
        &self,
        part_number_id: PartNumberId,
        location_id: LocationId,
        project_id: Option<ProjectId>,
    ) -> LedgerResult<i64> {
        Ok(self
            .ledger
            .balances()
            .select(|b| {
                b.key.part_number_id == part_number_id
                    && b.key.location_id == location_id
                    && project_id.is_none_or(|p| b.key.project_id == Some(p))
            })?
            .iter()
            .map(|b| b.quantity_total)
            .sum())
    }
}
