//! Catalog registry: part numbers, locations and projects.
//!
//! Reads are served from memory; every write goes to the backing store
//! before it becomes visible.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use stockledger_core::{Clock, DomainError, LocationId, PartNumberId, ProjectId};
use stockledger_inventory::{
    normalize_code, Location, LocationArena, LocationKind, NewLocation, NewPartNumber, NewProject,
    PartNumber, Project,
};

use crate::error::{LedgerError, LedgerResult};
use crate::store::Stores;

#[derive(Debug, Default, Clone)]
struct CatalogState {
    part_numbers: HashMap<PartNumberId, PartNumber>,
    locations: LocationArena,
    projects: HashMap<ProjectId, Project>,
}

pub struct CatalogRegistry {
    state: RwLock<CatalogState>,
    stores: Stores,
    clock: Arc<dyn Clock>,
}

impl CatalogRegistry {
    /// Load whatever the stores already hold.
    pub fn load(stores: Stores, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        let mut state = CatalogState::default();
        for pn in stores.part_numbers.list()? {
            state.part_numbers.insert(pn.id, pn);
        }
        for loc in stores.locations.list()? {
            state.locations.restore(loc);
        }
        for project in stores.projects.list()? {
            state.projects.insert(project.id, project);
        }
        Ok(Self {
            state: RwLock::new(state),
            stores,
            clock,
        })
    }

    fn read(&self) -> LedgerResult<std::sync::RwLockReadGuard<'_, CatalogState>> {
        self.state.read().map_err(|_| LedgerError::poisoned("catalog"))
    }

    fn write(&self) -> LedgerResult<std::sync::RwLockWriteGuard<'_, CatalogState>> {
        self.state.write().map_err(|_| LedgerError::poisoned("catalog"))
    }

    pub fn register_part_number(&self, req: &NewPartNumber) -> LedgerResult<PartNumber> {
        let mut state = self.write()?;
        let code = normalize_code(&req.code)?;
        if state.part_numbers.values().any(|p| p.code == code) {
            return Err(DomainError::conflict(format!("part number code '{code}' already exists")).into());
        }
        let pn = PartNumber::register(PartNumberId::new(), req, self.clock.now())?;
        self.stores.part_numbers.save(&pn)?;
        state.part_numbers.insert(pn.id, pn.clone());
        info!(part_number_id = %pn.id, code = %pn.code, serialized = pn.serialized, "part number registered");
        Ok(pn)
    }

    pub fn deactivate_part_number(&self, id: PartNumberId) -> LedgerResult<PartNumber> {
        self.update_part_number(id, |pn| Ok(pn.deactivated()))
    }

    pub fn set_stock_levels(
        &self,
        id: PartNumberId,
        min_stock: i64,
        max_stock: Option<i64>,
    ) -> LedgerResult<PartNumber> {
        self.update_part_number(id, |pn| pn.with_stock_levels(min_stock, max_stock))
    }

    fn update_part_number(
        &self,
        id: PartNumberId,
        change: impl FnOnce(&PartNumber) -> Result<PartNumber, DomainError>,
    ) -> LedgerResult<PartNumber> {
        let mut state = self.write()?;
        let current = state
            .part_numbers
            .get(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("part number {id}")))?;
        let next = change(current)?;
        self.stores.part_numbers.save(&next)?;
        state.part_numbers.insert(id, next.clone());
        Ok(next)
    }

    pub fn register_location(&self, req: &NewLocation) -> LedgerResult<Location> {
        let mut state = self.write()?;
        let mut arena = state.locations.clone();
        let location = arena.insert(LocationId::new(), req)?.clone();
        self.stores.locations.save(&location)?;
        state.locations = arena;
        info!(location_id = %location.id, code = %location.code, kind = ?location.kind, "location registered");
        Ok(location)
    }

    /// Re-parent a location; cycles are rejected.
    pub fn set_location_parent(&self, id: LocationId, parent: Option<LocationId>) -> LedgerResult<Location> {
        let mut state = self.write()?;
        let mut arena = state.locations.clone();
        arena.set_parent(id, parent)?;
        let location = arena
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("location {id}")))?;
        self.stores.locations.save(&location)?;
        state.locations = arena;
        Ok(location)
    }

    pub fn register_project(&self, req: &NewProject) -> LedgerResult<Project> {
        let mut state = self.write()?;
        let project = Project::register(ProjectId::new(), req)?;
        if state.projects.values().any(|p| p.code == project.code) {
            return Err(DomainError::conflict(format!("project code '{}' already exists", project.code)).into());
        }
        self.stores.projects.save(&project)?;
        state.projects.insert(project.id, project.clone());
        Ok(project)
    }

    pub fn part_number(&self, id: &PartNumberId) -> LedgerResult<PartNumber> {
        self.read()?
            .part_numbers
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("part number {id}")))
    }

    pub fn location(&self, id: &LocationId) -> LedgerResult<Location> {
        self.read()?
            .locations
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("location {id}")))
    }

    pub fn project(&self, id: &ProjectId) -> LedgerResult<Project> {
        self.read()?
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("project {id}")))
    }

    pub fn location_kind(&self, id: &LocationId) -> Option<LocationKind> {
        self.read().ok()?.locations.get(id).map(|l| l.kind)
    }

    /// Kind lookup over a snapshot of the arena, for replay loops.
    pub fn location_kinds(&self) -> LedgerResult<HashMap<LocationId, LocationKind>> {
        Ok(self.read()?.locations.iter().map(|l| (l.id, l.kind)).collect())
    }

    pub fn ancestors(&self, id: &LocationId) -> LedgerResult<Vec<Location>> {
        let state = self.read()?;
        state.locations.get(id).ok_or_else(|| LedgerError::NotFound(format!("location {id}")))?;
        Ok(state
            .locations
            .ancestors(id)
            .iter()
            .filter_map(|a| state.locations.get(a).cloned())
            .collect())
    }

    pub fn descendants(&self, id: &LocationId) -> LedgerResult<Vec<Location>> {
        let state = self.read()?;
        state.locations.get(id).ok_or_else(|| LedgerError::NotFound(format!("location {id}")))?;
        Ok(state
            .locations
            .descendants(id)
            .iter()
            .filter_map(|d| state.locations.get(d).cloned())
            .collect())
    }

    /// `id` followed by everything below it.
    pub fn subtree(&self, id: &LocationId) -> LedgerResult<Vec<LocationId>> {
        let state = self.read()?;
        state.locations.get(id).ok_or_else(|| LedgerError::NotFound(format!("location {id}")))?;
        let mut ids = vec![*id];
        ids.extend(state.locations.descendants(id));
        Ok(ids)
    }

    pub fn list_part_numbers(&self) -> LedgerResult<Vec<PartNumber>> {
        let mut out: Vec<PartNumber> = self.read()?.part_numbers.values().cloned().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    pub fn list_locations(&self) -> LedgerResult<Vec<Location>> {
        let mut out: Vec<Location> = self.read()?.locations.iter().cloned().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }

    pub fn list_projects(&self) -> LedgerResult<Vec<Project>> {
        let mut out: Vec<Project> = self.read()?.projects.values().cloned().collect();
        out.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(out)
    }
}
