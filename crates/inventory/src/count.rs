//! Count campaigns and their counted lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{
    ActorId, CampaignId, DomainError, DomainResult, Entity, LocationId, PartNumberId, ProjectId,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    InProgress,
    Completed,
    Cancelled,
}

/// Which stock a campaign counts. `location_id` includes its descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignScope {
    pub location_id: Option<LocationId>,
    pub project_id: Option<ProjectId>,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_items: u64,
    pub counted_items: u64,
    pub divergence_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCampaign {
    pub id: CampaignId,
    pub name: String,
    pub scope: CampaignScope,
    pub status: CampaignStatus,
    pub stats: CampaignStats,
    pub started_by: ActorId,
    pub started_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Entity for InventoryCampaign {
    type Id = CampaignId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl InventoryCampaign {
    pub fn start(
        id: CampaignId,
        name: &str,
        scope: CampaignScope,
        started_by: ActorId,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("campaign name cannot be empty"));
        }
        Ok(Self {
            id,
            name: name.to_string(),
            scope,
            status: CampaignStatus::InProgress,
            stats: CampaignStats::default(),
            started_by,
            started_at: now,
            closed_at: None,
        })
    }

    pub fn ensure_open(&self) -> DomainResult<()> {
        match self.status {
            CampaignStatus::InProgress => Ok(()),
            other => Err(DomainError::conflict(format!(
                "campaign {} is {:?}",
                self.id, other
            ))),
        }
    }

    pub fn close(&self, status: CampaignStatus, at: DateTime<Utc>) -> DomainResult<Self> {
        self.ensure_open()?;
        if status == CampaignStatus::InProgress {
            return Err(DomainError::validation("a campaign can only close as COMPLETED or CANCELLED"));
        }
        Ok(Self {
            status,
            closed_at: Some(at),
            ..self.clone()
        })
    }

    pub fn with_stats(&self, stats: CampaignStats) -> Self {
        Self {
            stats,
            ..self.clone()
        }
    }
}

/// Identity of a counted line.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CountLineKey {
    pub campaign_id: CampaignId,
    pub part_number_id: PartNumberId,
    pub location_id: LocationId,
}

impl core::fmt::Display for CountLineKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}:{}", self.campaign_id, self.part_number_id, self.location_id)
    }
}

/// One counted line of a campaign, keyed by `(campaign, part_number, location)`.
///
/// Lines may be planned first and counted later. `expected_quantity` is
/// snapshotted on the first count and never re-read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountResult {
    pub campaign_id: CampaignId,
    pub part_number_id: PartNumberId,
    pub location_id: LocationId,
    pub expected_quantity: Option<i64>,
    pub counted_quantity: Option<i64>,
    pub counted_by: Option<ActorId>,
    pub counted_at: Option<DateTime<Utc>>,
}

impl CountResult {
    pub fn planned(campaign_id: CampaignId, part_number_id: PartNumberId, location_id: LocationId) -> Self {
        Self {
            campaign_id,
            part_number_id,
            location_id,
            expected_quantity: None,
            counted_quantity: None,
            counted_by: None,
            counted_at: None,
        }
    }

    pub fn line_key(&self) -> CountLineKey {
        CountLineKey {
            campaign_id: self.campaign_id,
            part_number_id: self.part_number_id,
            location_id: self.location_id,
        }
    }

    /// `counted - expected`, once both sides are known.
    pub fn variance(&self) -> Option<i64> {
        Some(self.counted_quantity? - self.expected_quantity?)
    }

    pub fn is_counted(&self) -> bool {
        self.counted_quantity.is_some()
    }

    pub fn record_count(
        &self,
        expected_snapshot: i64,
        counted: i64,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if counted < 0 {
            return Err(DomainError::validation("counted quantity cannot be negative"));
        }
        Ok(Self {
            expected_quantity: Some(self.expected_quantity.unwrap_or(expected_snapshot)),
            counted_quantity: Some(counted),
            counted_by: Some(actor),
            counted_at: Some(at),
            ..self.clone()
        })
    }
}

/// Recompute campaign counters from the full set of its lines.
pub fn compute_stats<'a>(lines: impl IntoIterator<Item = &'a CountResult>) -> CampaignStats {
    lines.into_iter().fold(CampaignStats::default(), |mut acc, line| {
        acc.total_items += 1;
        if line.is_counted() {
            acc.counted_items += 1;
        }
        if line.variance().is_some_and(|v| v != 0) {
            acc.divergence_count += 1;
        }
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_snapshot_is_kept_across_recounts() {
        let line = CountResult::planned(CampaignId::new(), PartNumberId::new(), LocationId::new());
        assert_eq!(line.variance(), None);

        let now = Utc::now();
        let first = line.record_count(10, 9, ActorId::new(), now).unwrap();
        assert_eq!(first.variance(), Some(-1));

        // Balance moved in between; the snapshot must not.
        let second = first.record_count(25, 10, ActorId::new(), now).unwrap();
        assert_eq!(second.expected_quantity, Some(10));
        assert_eq!(second.variance(), Some(0));
    }

    #[test]
    fn stats_are_a_pure_function_of_lines() {
        let campaign = CampaignId::new();
        let now = Utc::now();
        let actor = ActorId::new();
        let lines = vec![
            CountResult::planned(campaign, PartNumberId::new(), LocationId::new()),
            CountResult::planned(campaign, PartNumberId::new(), LocationId::new())
                .record_count(5, 5, actor, now)
                .unwrap(),
            CountResult::planned(campaign, PartNumberId::new(), LocationId::new())
                .record_count(5, 3, actor, now)
                .unwrap(),
        ];

        let stats = compute_stats(&lines);
        assert_eq!(
            stats,
            CampaignStats {
                total_items: 3,
                counted_items: 2,
                divergence_count: 1
            }
        );
        assert_eq!(compute_stats(&lines), stats);
    }

    #[test]
    fn closed_campaigns_reject_further_closing() {
        let c = InventoryCampaign::start(
            CampaignId::new(),
            "Q3 cycle count",
            CampaignScope::default(),
            ActorId::new(),
            Utc::now(),
        )
        .unwrap();
        let done = c.close(CampaignStatus::Completed, Utc::now()).unwrap();
        assert!(done.ensure_open().is_err());
        assert!(done.close(CampaignStatus::Cancelled, Utc::now()).is_err());
        assert!(c.close(CampaignStatus::InProgress, Utc::now()).is_err());
    }
}
