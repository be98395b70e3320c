//! Catalog reference data: part numbers, locations and projects.
//!
//! Identity is immutable; attributes such as stock levels or the active flag
//! may change. Nothing in the catalog is ever hard-deleted.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, Entity, LocationId, PartNumberId, ProjectId};

/// Normalize a catalog code: trimmed, upper-cased, never empty.
pub fn normalize_code(code: &str) -> DomainResult<String> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("code cannot be empty"));
    }
    Ok(trimmed.to_uppercase())
}

/// A catalog SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartNumber {
    pub id: PartNumberId,
    pub code: String,
    pub description: String,
    /// Serialized part numbers are tracked unit by unit through the asset registry.
    pub serialized: bool,
    pub min_stock: i64,
    pub max_stock: Option<i64>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Request to register a new part number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPartNumber {
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub serialized: bool,
    #[serde(default)]
    pub min_stock: i64,
    #[serde(default)]
    pub max_stock: Option<i64>,
}

impl PartNumber {
    pub fn register(id: PartNumberId, req: &NewPartNumber, now: DateTime<Utc>) -> DomainResult<Self> {
        let code = normalize_code(&req.code)?;
        validate_stock_levels(req.min_stock, req.max_stock)?;
        Ok(Self {
            id,
            code,
            description: req.description.trim().to_string(),
            serialized: req.serialized,
            min_stock: req.min_stock,
            max_stock: req.max_stock,
            active: true,
            created_at: now,
        })
    }

    pub fn with_stock_levels(&self, min_stock: i64, max_stock: Option<i64>) -> DomainResult<Self> {
        validate_stock_levels(min_stock, max_stock)?;
        Ok(Self {
            min_stock,
            max_stock,
            ..self.clone()
        })
    }

    pub fn deactivated(&self) -> Self {
        Self {
            active: false,
            ..self.clone()
        }
    }
}

impl Entity for PartNumber {
    type Id = PartNumberId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

fn validate_stock_levels(min_stock: i64, max_stock: Option<i64>) -> DomainResult<()> {
    if min_stock < 0 {
        return Err(DomainError::validation("min_stock cannot be negative"));
    }
    if let Some(max) = max_stock {
        if max < min_stock {
            return Err(DomainError::validation("max_stock must be >= min_stock"));
        }
    }
    Ok(())
}

/// What kind of place a location is.
///
/// Some kinds drive asset status: stock sent to a `Carrier` location is in
/// transit back, stock moved into `Quarantine` is flagged bad.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationKind {
    Warehouse,
    Technician,
    Staging,
    Carrier,
    ReverseHub,
    Quarantine,
}

/// A place stock can exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub code: String,
    pub name: String,
    pub kind: LocationKind,
    pub parent_id: Option<LocationId>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLocation {
    pub code: String,
    #[serde(default)]
    pub name: String,
    pub kind: LocationKind,
    #[serde(default)]
    pub parent_id: Option<LocationId>,
}

impl Entity for Location {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A client/contract grouping referenced by movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub code: String,
    pub client_name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProject {
    pub code: String,
    pub client_name: String,
}

impl Project {
    pub fn register(id: ProjectId, req: &NewProject) -> DomainResult<Self> {
        let client_name = req.client_name.trim();
        if client_name.is_empty() {
            return Err(DomainError::validation("client_name cannot be empty"));
        }
        Ok(Self {
            id,
            code: normalize_code(&req.code)?,
            client_name: client_name.to_string(),
            active: true,
        })
    }
}

impl Entity for Project {
    type Id = ProjectId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Arena of locations indexed by id, with parent pointers.
///
/// Writes that would close a cycle in the hierarchy are rejected.
#[derive(Debug, Clone, Default)]
pub struct LocationArena {
    nodes: HashMap<LocationId, Location>,
}

impl LocationArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &LocationId) -> Option<&Location> {
        self.nodes.get(id)
    }

    pub fn find_by_code(&self, code: &str) -> Option<&Location> {
        let code = code.trim().to_uppercase();
        self.nodes.values().find(|l| l.code == code)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.nodes.values()
    }

    pub fn insert(&mut self, id: LocationId, req: &NewLocation) -> DomainResult<&Location> {
        let code = normalize_code(&req.code)?;
        if self.find_by_code(&code).is_some() {
            return Err(DomainError::conflict(format!("location code '{code}' already exists")));
        }
        if let Some(parent) = req.parent_id {
            if !self.nodes.contains_key(&parent) {
                return Err(DomainError::not_found(format!("parent location {parent}")));
            }
        }
        let name = if req.name.trim().is_empty() {
            code.clone()
        } else {
            req.name.trim().to_string()
        };
        self.nodes.insert(
            id,
            Location {
                id,
                code,
                name,
                kind: req.kind,
                parent_id: req.parent_id,
                active: true,
            },
        );
        self.nodes
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("location {id}")))
    }

    /// Put back a previously persisted location as-is.
    pub fn restore(&mut self, location: Location) {
        self.nodes.insert(location.id, location);
    }

    /// Re-parent a location. Rejects self-parenting and cycles.
    pub fn set_parent(&mut self, id: LocationId, parent: Option<LocationId>) -> DomainResult<()> {
        if !self.nodes.contains_key(&id) {
            return Err(DomainError::not_found(format!("location {id}")));
        }
        if let Some(p) = parent {
            if !self.nodes.contains_key(&p) {
                return Err(DomainError::not_found(format!("parent location {p}")));
            }
            if p == id || self.ancestors(&p).contains(&id) {
                return Err(DomainError::invariant(format!(
                    "setting parent {p} on {id} would create a cycle"
                )));
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent_id = parent;
        }
        Ok(())
    }

    /// Parent chain from the direct parent up to the root.
    pub fn ancestors(&self, id: &LocationId) -> Vec<LocationId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = self.nodes.get(id).and_then(|l| l.parent_id);
        while let Some(p) = cursor {
            if !seen.insert(p) {
                break;
            }
            out.push(p);
            cursor = self.nodes.get(&p).and_then(|l| l.parent_id);
        }
        out
    }

    /// All locations below `id` (not including `id`).
    pub fn descendants(&self, id: &LocationId) -> Vec<LocationId> {
        let mut children: HashMap<LocationId, Vec<LocationId>> = HashMap::new();
        for node in self.nodes.values() {
            if let Some(p) = node.parent_id {
                children.entry(p).or_default().push(node.id);
            }
        }

        let mut out = Vec::new();
        let mut stack = vec![*id];
        let mut seen = HashSet::from([*id]);
        while let Some(next) = stack.pop() {
            for child in children.get(&next).into_iter().flatten() {
                if seen.insert(*child) {
                    out.push(*child);
                    stack.push(*child);
                }
            }
        }
        out.sort();
        out
    }

    /// True when `id` is `root` or sits anywhere below it.
    pub fn is_within(&self, id: &LocationId, root: &LocationId) -> bool {
        id == root || self.ancestors(id).contains(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(code: &str, parent: Option<LocationId>) -> NewLocation {
        NewLocation {
            code: code.to_string(),
            name: String::new(),
            kind: LocationKind::Warehouse,
            parent_id: parent,
        }
    }

    #[test]
    fn codes_are_normalized_and_unique() {
        let mut arena = LocationArena::new();
        let id = LocationId::new();
        let created = arena.insert(id, &loc("  cd-barueri ", None)).unwrap();
        assert_eq!(created.code, "CD-BARUERI");
        assert_eq!(created.name, "CD-BARUERI");

        let err = arena.insert(LocationId::new(), &loc("CD-Barueri", None)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn hierarchy_queries_follow_parent_pointers() {
        let mut arena = LocationArena::new();
        let root = LocationId::new();
        let aisle = LocationId::new();
        let shelf = LocationId::new();
        arena.insert(root, &loc("CD", None)).unwrap();
        arena.insert(aisle, &loc("CD-A1", Some(root))).unwrap();
        arena.insert(shelf, &loc("CD-A1-S3", Some(aisle))).unwrap();

        assert_eq!(arena.ancestors(&shelf), vec![aisle, root]);
        let mut expected = vec![aisle, shelf];
        expected.sort();
        assert_eq!(arena.descendants(&root), expected);
        assert!(arena.is_within(&shelf, &root));
        assert!(!arena.is_within(&root, &shelf));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut arena = LocationArena::new();
        let a = LocationId::new();
        let b = LocationId::new();
        arena.insert(a, &loc("A", None)).unwrap();
        arena.insert(b, &loc("B", Some(a))).unwrap();

        assert!(matches!(
            arena.set_parent(a, Some(b)),
            Err(DomainError::InvariantViolation(_))
        ));
        assert!(matches!(
            arena.set_parent(a, Some(a)),
            Err(DomainError::InvariantViolation(_))
        ));
        assert_eq!(arena.get(&a).unwrap().parent_id, None);
    }

    #[test]
    fn stock_levels_are_validated() {
        let req = NewPartNumber {
            code: "SW-9200".to_string(),
            description: "switch".to_string(),
            serialized: true,
            min_stock: 5,
            max_stock: Some(2),
        };
        assert!(PartNumber::register(PartNumberId::new(), &req, Utc::now()).is_err());

        let ok = NewPartNumber {
            max_stock: Some(50),
            ..req
        };
        let pn = PartNumber::register(PartNumberId::new(), &ok, Utc::now()).unwrap();
        assert!(pn.active);
        assert!(!pn.deactivated().active);
        assert!(pn.with_stock_levels(-1, None).is_err());
    }
}
