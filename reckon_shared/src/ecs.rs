//! Entity/component system (minimal ECS).
//!
//! A deliberately small ECS suitable for deterministic simulation and net
//! replication. It is not archetype-based; it uses typed component storages
//! keyed by entity id.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use serde::{Deserialize, Serialize};

use crate::{
    dr::KinematicState,
    math::{Quat, Vec3},
};

/// Opaque entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

/// Simple world that can store typed components.
#[derive(Default)]
pub struct World {
    next_id: u64,
    storages: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl World {
    /// Creates a new entity.
    pub fn spawn(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Inserts/replaces a component for an entity.
    pub fn insert<T: 'static + Send + Sync>(&mut self, entity: EntityId, component: T) {
        let storage = self
            .storages
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(HashMap::<EntityId, T>::new()));

        let storage = storage
            .downcast_mut::<HashMap<EntityId, T>>()
            .expect("storage type mismatch");

        storage.insert(entity, component);
    }

    /// Removes a component from an entity, returning it if present.
    pub fn remove<T: 'static + Send + Sync>(&mut self, entity: EntityId) -> Option<T> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut::<HashMap<EntityId, T>>())
            .and_then(|storage| storage.remove(&entity))
    }

    /// Gets a component reference.
    pub fn get<T: 'static + Send + Sync>(&self, entity: EntityId) -> Option<&T> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<HashMap<EntityId, T>>())
            .and_then(|storage| storage.get(&entity))
    }

    /// Gets a mutable component reference.
    pub fn get_mut<T: 'static + Send + Sync>(&mut self, entity: EntityId) -> Option<&mut T> {
        self.storages
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut::<HashMap<EntityId, T>>())
            .and_then(|storage| storage.get_mut(&entity))
    }

    /// Iterates entities with a given component.
    pub fn iter<T: 'static + Send + Sync>(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.storages
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<HashMap<EntityId, T>>())
            .into_iter()
            .flat_map(|storage| storage.iter().map(|(k, v)| (*k, v)))
    }

    /// Entity ids with a given component, in stable ascending order.
    pub fn ids<T: 'static + Send + Sync>(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.iter::<T>().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }
}

/// Full kinematics of a simulated entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Kinematics {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub acceleration: Vec3,
    pub angular_velocity: Vec3,
}

impl Kinematics {
    pub fn state(&self) -> KinematicState {
        KinematicState {
            position: self.position,
            rotation: self.rotation,
            velocity: self.velocity,
            acceleration: self.acceleration,
            angular_velocity: self.angular_velocity,
        }
    }
}

impl From<KinematicState> for Kinematics {
    fn from(s: KinematicState) -> Self {
        Self {
            position: s.position,
            rotation: s.rotation,
            velocity: s.velocity,
            acceleration: s.acceleration,
            angular_velocity: s.angular_velocity,
        }
    }
}

/// Human-readable entity label (DIS-style marking text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Marking(pub String);
