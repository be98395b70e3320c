//! Asset registry rows and the serialized-unit status machine.
//!
//! An asset's status is a function of the last movement that referenced its
//! serial. Nothing else moves an asset.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{
    AssetId, DomainError, DomainResult, Entity, LocationId, MovementId, PartNumberId, ProjectId,
};

use crate::catalog::LocationKind;
use crate::movement::{Movement, MovementType};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetStatus {
    InStock,
    Reserved,
    /// Shipped (EXPEDIÇÃO) and not yet received anywhere.
    #[serde(alias = "EXPEDICAO")]
    InTransit,
    InUse,
    AwaitingReverse,
    InReverse,
    Bad,
    Disposed,
}

impl AssetStatus {
    pub fn is_terminal(self) -> bool {
        self == AssetStatus::Disposed
    }
}

/// Compute the status a movement drives a serial to.
///
/// `current` is `None` for a serial the registry has never seen.
/// `destination_kind` is the kind of the movement's destination, if any.
pub fn next_status(
    movement_type: MovementType,
    current: Option<AssetStatus>,
    destination_kind: Option<LocationKind>,
) -> DomainResult<AssetStatus> {
    use AssetStatus::*;

    let reject = || -> DomainResult<AssetStatus> {
        let from = current.map_or_else(|| "unregistered".to_string(), |s| format!("{s:?}"));
        Err(DomainError::conflict(format!(
            "{movement_type} is not allowed for a serial in status {from}"
        )))
    };

    match movement_type {
        MovementType::Entrada | MovementType::AjustePositivo => match current {
            None | Some(InTransit) => Ok(InStock),
            _ => reject(),
        },
        MovementType::Reserva => match current {
            Some(InStock) => Ok(Reserved),
            _ => reject(),
        },
        MovementType::Liberacao => match current {
            Some(Reserved) => Ok(InStock),
            _ => reject(),
        },
        MovementType::Expedicao => match current {
            Some(InStock) | Some(Reserved) => Ok(InTransit),
            _ => reject(),
        },
        MovementType::Saida => match current {
            Some(InStock) | Some(Reserved) => Ok(InUse),
            _ => reject(),
        },
        MovementType::Reversa => match current {
            Some(InUse) | Some(InTransit) => {
                if destination_kind == Some(LocationKind::Carrier) {
                    Ok(AwaitingReverse)
                } else {
                    Ok(InReverse)
                }
            }
            _ => reject(),
        },
        MovementType::Transferencia => match current {
            Some(InStock) | Some(AwaitingReverse) | Some(InReverse) | Some(Bad) => {
                if destination_kind == Some(LocationKind::Quarantine) {
                    Ok(Bad)
                } else if current == Some(AwaitingReverse) {
                    Ok(InReverse)
                } else {
                    Ok(InStock)
                }
            }
            _ => reject(),
        },
        MovementType::AjusteNegativo => match current {
            Some(InStock) | Some(InReverse) | Some(Bad) | Some(AwaitingReverse) => Ok(Disposed),
            _ => reject(),
        },
    }
}

/// One serialized unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub serial: String,
    pub part_number_id: PartNumberId,
    pub location_id: Option<LocationId>,
    pub project_id: Option<ProjectId>,
    pub status: AssetStatus,
    /// Disposed assets are deactivated, never deleted.
    pub active: bool,
    pub last_movement_id: MovementId,
    pub last_movement_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Asset {
    type Id = AssetId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Asset {
    /// Asset ids derive from the movement that first registered the serial, so
    /// replaying the ledger reproduces them exactly.
    pub fn derive_id(first_movement: MovementId, serial: &str) -> AssetId {
        AssetId::from_uuid(Uuid::new_v5(first_movement.as_uuid(), serial.as_bytes()))
    }

    /// Transition `current` (or register a new unit) for one serial of `movement`.
    pub fn apply_movement(
        current: Option<&Asset>,
        serial: &str,
        movement: &Movement,
        destination_kind: Option<LocationKind>,
    ) -> DomainResult<Asset> {
        if let Some(asset) = current {
            if asset.part_number_id != movement.part_number_id {
                return Err(DomainError::conflict(format!(
                    "serial '{serial}' belongs to another part number"
                )));
            }
            if let Some(source) = movement.source_location_id {
                if asset.location_id != Some(source) {
                    return Err(DomainError::conflict(format!(
                        "serial '{serial}' is not at source location {source}"
                    )));
                }
                // The unit leaves the balance row it was counted in.
                if asset.project_id != movement.project_id {
                    return Err(DomainError::conflict(format!(
                        "serial '{serial}' is held under project {:?}, not {:?}",
                        asset.project_id, movement.project_id
                    )));
                }
            }
        }

        let status = next_status(movement.movement_type, current.map(|a| a.status), destination_kind)?;

        let location_id = match movement.movement_type {
            MovementType::Entrada
            | MovementType::AjustePositivo
            | MovementType::Reversa
            | MovementType::Transferencia
            | MovementType::Saida
            | MovementType::Expedicao => movement.destination_location_id,
            MovementType::Reserva | MovementType::Liberacao | MovementType::AjusteNegativo => {
                movement.source_location_id
            }
        };

        let next = match current {
            Some(asset) => Asset {
                location_id,
                project_id: movement.project_id,
                status,
                active: !status.is_terminal(),
                last_movement_id: movement.id,
                last_movement_at: movement.occurred_at,
                ..asset.clone()
            },
            None => Asset {
                id: Self::derive_id(movement.id, serial),
                serial: serial.to_string(),
                part_number_id: movement.part_number_id,
                location_id,
                project_id: movement.project_id,
                status,
                active: !status.is_terminal(),
                last_movement_id: movement.id,
                last_movement_at: movement.occurred_at,
                created_at: movement.occurred_at,
            },
        };
        Ok(next)
    }
}

/// Asset registry rebuilt purely from movements (replay/verification).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetProjection {
    by_serial: HashMap<String, Asset>,
}

impl AssetProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, serial: &str) -> Option<&Asset> {
        self.by_serial.get(serial)
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.by_serial.values()
    }

    pub fn into_assets(self) -> Vec<Asset> {
        let mut assets: Vec<_> = self.by_serial.into_values().collect();
        assets.sort_by(|a, b| a.serial.cmp(&b.serial));
        assets
    }

    /// Apply all serials of a movement, all-or-nothing.
    pub fn apply(
        &mut self,
        movement: &Movement,
        kind_of: impl Fn(&LocationId) -> Option<LocationKind>,
    ) -> DomainResult<()> {
        let dest_kind = movement.destination_location_id.as_ref().and_then(&kind_of);
        let mut staged = Vec::with_capacity(movement.serials.len());
        for serial in &movement.serials {
            staged.push(Asset::apply_movement(
                self.by_serial.get(serial),
                serial,
                movement,
                dest_kind,
            )?);
        }
        for asset in staged {
            self.by_serial.insert(asset.serial.clone(), asset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::ActorId;

    fn movement(ty: MovementType, src: Option<LocationId>, dst: Option<LocationId>) -> Movement {
        Movement {
            id: MovementId::new(),
            sequence: 1,
            movement_type: ty,
            part_number_id: PartNumberId::from_uuid(Uuid::nil()),
            quantity: 1,
            source_location_id: src,
            destination_location_id: dst,
            project_id: None,
            serials: vec!["SN-1".to_string()],
            actor_id: ActorId::new(),
            reason: None,
            evidence_ref: None,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn full_lifecycle_through_reverse_logistics() {
        let cd = LocationId::new();
        let carrier = LocationId::new();
        let hub = LocationId::new();
        let kinds: HashMap<LocationId, LocationKind> = [
            (cd, LocationKind::Warehouse),
            (carrier, LocationKind::Carrier),
            (hub, LocationKind::ReverseHub),
        ]
        .into();
        let kind_of = |id: &LocationId| kinds.get(id).copied();

        let mut p = AssetProjection::new();
        let steps = [
            (movement(MovementType::Entrada, None, Some(cd)), AssetStatus::InStock),
            (movement(MovementType::Reserva, Some(cd), None), AssetStatus::Reserved),
            (movement(MovementType::Liberacao, Some(cd), None), AssetStatus::InStock),
            (movement(MovementType::Saida, Some(cd), None), AssetStatus::InUse),
            (movement(MovementType::Reversa, None, Some(carrier)), AssetStatus::AwaitingReverse),
            (movement(MovementType::Transferencia, Some(carrier), Some(hub)), AssetStatus::InReverse),
            (movement(MovementType::Transferencia, Some(hub), Some(cd)), AssetStatus::InStock),
            (movement(MovementType::AjusteNegativo, Some(cd), None), AssetStatus::Disposed),
        ];

        let mut first_id = None;
        for (m, expected) in &steps {
            p.apply(m, kind_of).unwrap();
            let asset = p.get("SN-1").unwrap();
            assert_eq!(asset.status, *expected, "after {}", m.movement_type);
            assert_eq!(asset.last_movement_id, m.id);
            first_id.get_or_insert(asset.id);
            assert_eq!(Some(asset.id), first_id);
        }
        assert!(!p.get("SN-1").unwrap().active);
    }

    #[test]
    fn quarantine_transfer_marks_unit_bad() {
        assert_eq!(
            next_status(
                MovementType::Transferencia,
                Some(AssetStatus::InReverse),
                Some(LocationKind::Quarantine)
            )
            .unwrap(),
            AssetStatus::Bad
        );
    }

    #[test]
    fn conflicting_serials_are_rejected() {
        assert!(next_status(MovementType::Entrada, Some(AssetStatus::InStock), None).is_err());
        assert!(next_status(MovementType::Entrada, Some(AssetStatus::InUse), None).is_err());
        assert!(next_status(MovementType::Saida, None, None).is_err());
        assert!(next_status(MovementType::Transferencia, Some(AssetStatus::Disposed), None).is_err());
    }

    #[test]
    fn outbound_requires_unit_at_source() {
        let cd = LocationId::new();
        let elsewhere = LocationId::new();
        let mut p = AssetProjection::new();
        p.apply(&movement(MovementType::Entrada, None, Some(cd)), |_| None).unwrap();

        let before = p.clone();
        let err = p
            .apply(&movement(MovementType::Saida, Some(elsewhere), None), |_| None)
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(p, before);
    }

    #[test]
    fn outbound_must_draw_from_the_serials_project() {
        let cd = LocationId::new();
        let project = ProjectId::new();
        let mut p = AssetProjection::new();
        let received = Movement {
            project_id: Some(project),
            ..movement(MovementType::Entrada, None, Some(cd))
        };
        p.apply(&received, |_| None).unwrap();
        assert_eq!(p.get("SN-1").unwrap().project_id, Some(project));

        let before = p.clone();
        let err = p
            .apply(&movement(MovementType::Saida, Some(cd), None), |_| None)
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert_eq!(p, before);

        let shipped = Movement {
            project_id: Some(project),
            ..movement(MovementType::Saida, Some(cd), None)
        };
        p.apply(&shipped, |_| None).unwrap();
        assert_eq!(p.get("SN-1").unwrap().status, AssetStatus::InUse);
    }
}
