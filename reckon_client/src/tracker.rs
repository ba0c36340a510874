//! Remote entity table.
//!
//! Routes spawns, deletes, and state updates to per-entity dead reckoners
//! and surfaces what happened through the shared event bus so the viewer
//! loop can report it.

use std::collections::BTreeMap;

use reckon_shared::{
    dr::Pose,
    ecs::EntityId,
    event::EventBus,
    net::{EntitySpawn, StateUpdate},
    smoothing::SmoothingConfig,
};
use tracing::debug;

use crate::reckoner::{DeadReckoner, UpdateOutcome};

/// Tracker notification, drained from the event bus by the frontend.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Appeared { id: EntityId, marking: String },
    Removed { id: EntityId },
    /// An update was accepted; `window` is the smoothing window used.
    Updated { id: EntityId, window: f32 },
    /// An update arrived with a stale sequence and was dropped.
    StaleDropped { id: EntityId, sequence: u32 },
    /// Ground truth was far enough away that the pose snapped.
    Teleported { id: EntityId },
}

/// One tracked remote entity.
pub struct TrackedEntity {
    pub marking: String,
    pub reckoner: DeadReckoner,
}

/// All remote entities known to this client.
pub struct EntityTracker {
    entities: BTreeMap<EntityId, TrackedEntity>,
    smoothing: SmoothingConfig,
    pub events: EventBus,
}

impl EntityTracker {
    pub fn new(smoothing: SmoothingConfig) -> Self {
        Self {
            entities: BTreeMap::new(),
            smoothing,
            events: EventBus::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: EntityId) -> Option<&TrackedEntity> {
        self.entities.get(&id)
    }

    /// Applies a new smoothing config to current and future reckoners.
    pub fn set_smoothing(&mut self, cfg: SmoothingConfig) {
        self.smoothing = cfg;
        for tracked in self.entities.values_mut() {
            tracked.reckoner.set_smoothing(cfg);
        }
    }

    /// Registers an entity announced by the server.
    pub fn spawn(&mut self, spawn: &EntitySpawn, now: f64) {
        debug!(id = ?spawn.id, marking = %spawn.marking, algorithm = ?spawn.algorithm, "Tracking entity");
        self.entities.insert(
            spawn.id,
            TrackedEntity {
                marking: spawn.marking.clone(),
                reckoner: DeadReckoner::new(spawn.algorithm, self.smoothing, spawn.initial, now),
            },
        );
        self.events.push(TrackerEvent::Appeared {
            id: spawn.id,
            marking: spawn.marking.clone(),
        });
    }

    /// Drops an entity removed by the server.
    pub fn delete(&mut self, id: EntityId) {
        if self.entities.remove(&id).is_some() {
            self.events.push(TrackerEvent::Removed { id });
        }
    }

    /// Routes a state update to its reckoner.
    pub fn apply_update(&mut self, update: &StateUpdate, now: f64) {
        let Some(tracked) = self.entities.get_mut(&update.id) else {
            debug!(id = ?update.id, "Update for unknown entity");
            return;
        };

        match tracked.reckoner.apply_update(update, now) {
            UpdateOutcome::Rejected => {
                self.events.push(TrackerEvent::StaleDropped {
                    id: update.id,
                    sequence: update.sequence,
                });
            }
            UpdateOutcome::Applied { window, teleported } => {
                self.events.push(TrackerEvent::Updated {
                    id: update.id,
                    window,
                });
                if teleported {
                    self.events.push(TrackerEvent::Teleported { id: update.id });
                }
            }
        }
    }

    /// Current display poses, in stable id order.
    pub fn poses(&self, now: f64) -> Vec<(EntityId, Pose)> {
        self.entities
            .iter()
            .map(|(id, tracked)| (*id, tracked.reckoner.pose_at(now)))
            .collect()
    }
}
