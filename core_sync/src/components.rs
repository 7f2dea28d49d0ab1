use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bevy::prelude::*;
use sync_proto::{
    CompartmentSnapshot, DecalState, EntityKind, EntityShape, EnvironmentState, FireSource,
    ReplicaId, ScalarSnapshot, SectorColor, ToggleFlags, ToggleSnapshot,
};

use crate::predicted::Predicted;

/// Wire identity of a replicated entity.
#[derive(Component, Debug, Clone, Copy)]
pub struct Replica {
    pub id: ReplicaId,
    pub kind: EntityKind,
}

/// Door- or light-class entity. `open` is the one predicted property; the
/// remaining fields move only on server authority.
#[derive(Component, Debug, Clone)]
pub struct Toggle {
    pub open: Predicted<bool>,
    pub broken: bool,
    pub forced_open: bool,
    pub stuck: bool,
    pub jammed: bool,
    pub stuck_percent: f32,
    pub last_user: u16,
    /// Correction window override in seconds, honored where the kind policy
    /// allows per-entity windows.
    pub window_override: Option<f32>,
}

impl Default for Toggle {
    fn default() -> Self {
        Self {
            open: Predicted::new(false),
            broken: false,
            forced_open: false,
            stuck: false,
            jammed: false,
            stuck_percent: 0.0,
            last_user: 0,
            window_override: None,
        }
    }
}

impl Toggle {
    /// Open state as presentation should display it.
    pub fn displayed_open(&self) -> bool {
        *self.open.value()
    }

    /// Server-confirmed state with any pending overlay ignored.
    pub fn confirmed_snapshot(&self) -> ToggleSnapshot {
        let mut flags = ToggleFlags::empty();
        flags.set(ToggleFlags::OPEN, *self.open.confirmed());
        flags.set(ToggleFlags::BROKEN, self.broken);
        flags.set(ToggleFlags::FORCED_OPEN, self.forced_open);
        flags.set(ToggleFlags::STUCK, self.stuck);
        flags.set(ToggleFlags::JAMMED, self.jammed);
        ToggleSnapshot {
            flags,
            stuck_percent: self.stuck_percent,
            last_user: self.last_user,
        }
    }
}

/// Repair- or scanner-class entity. Progress is never predicted; the server
/// value lands as received.
#[derive(Component, Debug, Clone, Default)]
pub struct WorkProgress {
    pub progress: f32,
    pub active: bool,
    pub last_user: u16,
}

impl WorkProgress {
    pub fn snapshot(&self) -> ScalarSnapshot {
        ScalarSnapshot {
            progress: self.progress,
            active: self.active,
            last_user: self.last_user,
        }
    }
}

/// Shared fire roster of one compartment. The decode path and the growth
/// system both mutate it and presentation holds a clone of the `Arc`; this is
/// the sole lock in the simulation loop.
pub type FireRoster = Arc<Mutex<Vec<FireSource>>>;

/// Compartment aggregate: paint sectors, decal slots, and the environment
/// readings of one room.
#[derive(Component, Debug, Clone)]
pub struct Compartment {
    pub sectors: Vec<SectorColor>,
    pub decals: Vec<DecalState>,
    pub water_fraction: f32,
    pub oxygen_percent: f32,
    pub fires: FireRoster,
    pub stage: PatchStage,
}

impl Default for Compartment {
    fn default() -> Self {
        Self {
            sectors: Vec::new(),
            decals: Vec::new(),
            water_fraction: 0.0,
            oxygen_percent: 100.0,
            fires: Arc::new(Mutex::new(Vec::new())),
            stage: PatchStage::default(),
        }
    }
}

impl Compartment {
    pub fn with_sector_count(sector_count: u32) -> Self {
        Self {
            sectors: vec![SectorColor::default(); sector_count as usize],
            ..Default::default()
        }
    }

    pub fn shape(&self) -> EntityShape {
        EntityShape::compartment(self.sectors.len() as u32)
    }

    pub fn snapshot(&self) -> CompartmentSnapshot {
        CompartmentSnapshot {
            sectors: self.sectors.clone(),
            decals: self.decals.clone(),
            environment: EnvironmentState {
                water_fraction: self.water_fraction,
                oxygen_percent: self.oxygen_percent,
                fires: self.fires.lock().expect("fire roster mutex poisoned").clone(),
            },
        }
    }

    /// Replaces the whole aggregate with a full server snapshot. Any staged
    /// patches are dropped.
    pub fn apply_snapshot(&mut self, snapshot: &CompartmentSnapshot) {
        self.sectors = snapshot.sectors.clone();
        self.decals = snapshot.decals.clone();
        self.apply_environment(&snapshot.environment);
        self.stage.clear();
    }

    /// Overwrites a sector run in place. Entries beyond the live sector list
    /// are skipped; the count of skips is returned.
    pub fn apply_sector_run(&mut self, start: u32, colors: &[SectorColor]) -> usize {
        let mut skipped = 0;
        for (offset, color) in colors.iter().enumerate() {
            match self.sectors.get_mut(start as usize + offset) {
                Some(slot) => *slot = *color,
                None => skipped += 1,
            }
        }
        skipped
    }

    /// Overwrites one decal slot. Returns `false` when the slot is not live.
    pub fn apply_decal(&mut self, index: u8, alpha: f32) -> bool {
        match self.decals.get_mut(index as usize) {
            Some(decal) => {
                decal.alpha = alpha;
                true
            }
            None => false,
        }
    }

    pub fn apply_environment(&mut self, environment: &EnvironmentState) {
        self.water_fraction = environment.water_fraction;
        self.oxygen_percent = environment.oxygen_percent;
        let mut fires = self.fires.lock().expect("fire roster mutex poisoned");
        *fires = environment.fires.clone();
    }

    /// Applies everything staged during an echo hold: sectors in index order,
    /// then decals, then the environment. Returns `(applied, skipped)`.
    pub fn commit_stage(&mut self) -> (usize, usize) {
        let stage = std::mem::take(&mut self.stage);
        let mut applied = 0;
        let mut skipped = 0;
        for (index, color) in stage.sectors {
            match self.sectors.get_mut(index as usize) {
                Some(slot) => {
                    *slot = color;
                    applied += 1;
                }
                None => skipped += 1,
            }
        }
        for (index, alpha) in stage.decals {
            if self.apply_decal(index, alpha) {
                applied += 1;
            } else {
                skipped += 1;
            }
        }
        if let Some(environment) = stage.environment {
            self.apply_environment(&environment);
            applied += 1;
        }
        (applied, skipped)
    }
}

/// Last-write-wins staging buffer for server patches withheld while a local
/// edit hold is live. Keys are sector indices and decal slots; a later patch
/// for the same key replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct PatchStage {
    sectors: BTreeMap<u32, SectorColor>,
    decals: BTreeMap<u8, f32>,
    environment: Option<EnvironmentState>,
}

impl PatchStage {
    pub fn stage_sector_run(&mut self, start: u32, colors: &[SectorColor]) {
        for (offset, color) in colors.iter().enumerate() {
            self.sectors.insert(start + offset as u32, *color);
        }
    }

    pub fn stage_decal(&mut self, index: u8, alpha: f32) {
        self.decals.insert(index, alpha);
    }

    pub fn stage_environment(&mut self, environment: EnvironmentState) {
        self.environment = Some(environment);
    }

    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty() && self.decals.is_empty() && self.environment.is_none()
    }

    pub fn staged_len(&self) -> usize {
        self.sectors.len() + self.decals.len() + usize::from(self.environment.is_some())
    }

    pub fn clear(&mut self) {
        self.sectors.clear();
        self.decals.clear();
        self.environment = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_keys_are_last_write_wins() {
        let mut stage = PatchStage::default();
        stage.stage_sector_run(0, &[SectorColor { strength: 0.2, color: 1 }]);
        stage.stage_sector_run(
            0,
            &[
                SectorColor { strength: 0.9, color: 2 },
                SectorColor { strength: 0.9, color: 3 },
            ],
        );
        stage.stage_decal(1, 0.3);
        stage.stage_decal(1, 0.8);
        assert_eq!(stage.staged_len(), 3);

        let mut compartment = Compartment::with_sector_count(4);
        compartment.decals.push(DecalState { decal_id: 7, alpha: 0.0 });
        compartment.decals.push(DecalState { decal_id: 8, alpha: 0.0 });
        compartment.stage = stage;
        let (applied, skipped) = compartment.commit_stage();

        assert_eq!((applied, skipped), (3, 0));
        assert_eq!(compartment.sectors[0].color, 2);
        assert_eq!(compartment.sectors[1].color, 3);
        assert_eq!(compartment.decals[1].alpha, 0.8);
        assert!(compartment.stage.is_empty());
    }

    #[test]
    fn commit_skips_slots_that_no_longer_exist() {
        let mut compartment = Compartment::with_sector_count(2);
        compartment.stage.stage_sector_run(1, &[SectorColor::default(); 2]);
        compartment.stage.stage_decal(5, 1.0);
        let (applied, skipped) = compartment.commit_stage();
        assert_eq!(applied, 1);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn full_snapshot_drops_staged_patches() {
        let mut compartment = Compartment::with_sector_count(1);
        compartment.stage.stage_decal(0, 1.0);
        compartment.apply_snapshot(&CompartmentSnapshot {
            sectors: vec![SectorColor { strength: 1.0, color: 9 }],
            decals: Vec::new(),
            environment: EnvironmentState::default(),
        });
        assert!(compartment.stage.is_empty());
        assert_eq!(compartment.sectors[0].color, 9);
        assert!(compartment.decals.is_empty());
    }

    #[test]
    fn snapshot_reads_the_shared_roster() {
        let compartment = Compartment::with_sector_count(1);
        let roster = Arc::clone(&compartment.fires);
        roster
            .lock()
            .unwrap()
            .push(FireSource { x: 0.5, y: 0.5, size: 0.1 });
        assert_eq!(compartment.snapshot().environment.fires.len(), 1);
    }
}
