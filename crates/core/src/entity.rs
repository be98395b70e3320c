//! Records that keep their identity while their attributes change.

/// A record addressed by a stable id.
///
/// Part numbers, locations, reservations, campaigns and divergences are
/// stored under their id and replaced whole on every state change.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
