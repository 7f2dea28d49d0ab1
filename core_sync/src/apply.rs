//! Reconciliation of decoded server updates against local components.
//!
//! Each helper applies one payload class. Conflicts with pending predictions
//! are not errors: the server value wins and the discarded prediction is
//! reported to the caller. Missing references (a decal slot or sector index
//! that is no longer live) are skipped and counted, never fatal.

use sync_proto::{
    CompartmentPatch, CompartmentSnapshot, ScalarSnapshot, ToggleFlags, ToggleSnapshot,
};

use crate::components::{Compartment, Toggle, WorkProgress};
use crate::predicted::ConfirmOutcome;
use crate::scheduler::{CorrectionKey, CorrectionScheduler};

/// Applies a full toggle snapshot. Every non-predicted field lands as
/// received; the open flag reconciles through the overlay and any pending
/// correction deadline for the key is cancelled, confirmed or not.
pub fn apply_toggle(
    toggle: &mut Toggle,
    snapshot: &ToggleSnapshot,
    key: CorrectionKey,
    scheduler: &mut CorrectionScheduler,
) -> ConfirmOutcome<bool> {
    toggle.broken = snapshot.flags.contains(ToggleFlags::BROKEN);
    toggle.forced_open = snapshot.flags.contains(ToggleFlags::FORCED_OPEN);
    toggle.stuck = snapshot.flags.contains(ToggleFlags::STUCK);
    toggle.jammed = snapshot.flags.contains(ToggleFlags::JAMMED);
    toggle.stuck_percent = snapshot.stuck_percent;
    toggle.last_user = snapshot.last_user;
    let outcome = toggle.open.confirm(snapshot.flags.contains(ToggleFlags::OPEN));
    scheduler.cancel(key);
    outcome
}

/// Scalar state is never predicted; the server value lands unconditionally.
pub fn apply_scalar(work: &mut WorkProgress, snapshot: &ScalarSnapshot) {
    work.progress = snapshot.progress;
    work.active = snapshot.active;
    work.last_user = snapshot.last_user;
}

/// A full aggregate snapshot applies immediately even during an echo hold:
/// it supersedes everything staged and the hold itself.
pub fn apply_compartment_snapshot(
    compartment: &mut Compartment,
    snapshot: &CompartmentSnapshot,
    key: CorrectionKey,
    scheduler: &mut CorrectionScheduler,
) {
    compartment.apply_snapshot(snapshot);
    scheduler.cancel(key);
}

/// What became of one aggregate patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchReport {
    pub staged: bool,
    pub skipped: usize,
}

/// Applies or stages one aggregate patch. While an echo hold is live the
/// patch lands in the staging buffer (last write per key wins); otherwise it
/// applies in place.
pub fn apply_compartment_patch(
    compartment: &mut Compartment,
    patch: &CompartmentPatch,
    hold_live: bool,
) -> PatchReport {
    if hold_live {
        match patch {
            CompartmentPatch::Sectors { start, colors } => {
                compartment.stage.stage_sector_run(*start, colors);
            }
            CompartmentPatch::Decal { index, alpha } => {
                compartment.stage.stage_decal(*index, *alpha);
            }
            CompartmentPatch::Environment(environment) => {
                compartment.stage.stage_environment(environment.clone());
            }
        }
        return PatchReport {
            staged: true,
            skipped: 0,
        };
    }
    let skipped = match patch {
        CompartmentPatch::Sectors { start, colors } => {
            compartment.apply_sector_run(*start, colors)
        }
        CompartmentPatch::Decal { index, alpha } => {
            usize::from(!compartment.apply_decal(*index, *alpha))
        }
        CompartmentPatch::Environment(environment) => {
            compartment.apply_environment(environment);
            0
        }
    };
    PatchReport {
        staged: false,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_proto::{DecalState, EnvironmentState, ReplicaId, SectorColor};

    use crate::scalar::scalar_from_f32;
    use crate::scheduler::PropertyKey;

    fn key() -> CorrectionKey {
        (ReplicaId(1), PropertyKey::ToggleOpen)
    }

    fn open_snapshot(open: bool) -> ToggleSnapshot {
        let mut flags = ToggleFlags::empty();
        flags.set(ToggleFlags::OPEN, open);
        ToggleSnapshot {
            flags,
            stuck_percent: 0.0,
            last_user: 2,
        }
    }

    #[test]
    fn matching_confirmation_cancels_the_deadline() {
        let mut toggle = Toggle::default();
        let mut scheduler = CorrectionScheduler::default();
        assert!(toggle.open.predict(true));
        scheduler.schedule(key(), scalar_from_f32(1.0));

        let outcome = apply_toggle(&mut toggle, &open_snapshot(true), key(), &mut scheduler);
        assert_eq!(outcome, ConfirmOutcome::Confirmed);
        assert!(toggle.displayed_open());
        assert!(!scheduler.has_pending(key()));
    }

    #[test]
    fn conflicting_update_overwrites_the_prediction() {
        let mut toggle = Toggle::default();
        let mut scheduler = CorrectionScheduler::default();
        assert!(toggle.open.predict(true));
        scheduler.schedule(key(), scalar_from_f32(1.0));

        let outcome = apply_toggle(&mut toggle, &open_snapshot(false), key(), &mut scheduler);
        assert_eq!(outcome, ConfirmOutcome::Corrected { discarded: true });
        assert!(!toggle.displayed_open());
        assert!(!scheduler.has_pending(key()));
    }

    #[test]
    fn non_predicted_toggle_fields_land_as_received() {
        let mut toggle = Toggle::default();
        let mut scheduler = CorrectionScheduler::default();
        let snapshot = ToggleSnapshot {
            flags: ToggleFlags::BROKEN | ToggleFlags::JAMMED,
            stuck_percent: 62.0,
            last_user: 11,
        };
        apply_toggle(&mut toggle, &snapshot, key(), &mut scheduler);
        assert!(toggle.broken);
        assert!(toggle.jammed);
        assert!(!toggle.stuck);
        assert_eq!(toggle.stuck_percent, 62.0);
        assert_eq!(toggle.last_user, 11);
    }

    #[test]
    fn scalar_updates_land_unconditionally() {
        let mut work = WorkProgress::default();
        apply_scalar(
            &mut work,
            &ScalarSnapshot {
                progress: 55.0,
                active: true,
                last_user: 4,
            },
        );
        assert_eq!(work.progress, 55.0);
        assert!(work.active);
    }

    #[test]
    fn patch_applies_in_place_without_a_hold() {
        let mut compartment = Compartment::with_sector_count(4);
        let report = apply_compartment_patch(
            &mut compartment,
            &CompartmentPatch::Sectors {
                start: 2,
                colors: vec![
                    SectorColor { strength: 1.0, color: 5 },
                    SectorColor { strength: 1.0, color: 6 },
                ],
            },
            false,
        );
        assert_eq!(report, PatchReport { staged: false, skipped: 0 });
        assert_eq!(compartment.sectors[2].color, 5);
        assert_eq!(compartment.sectors[3].color, 6);
    }

    #[test]
    fn patch_stages_during_a_hold() {
        let mut compartment = Compartment::with_sector_count(4);
        let report = apply_compartment_patch(
            &mut compartment,
            &CompartmentPatch::Environment(EnvironmentState {
                water_fraction: 1.0,
                oxygen_percent: 20.0,
                fires: Vec::new(),
            }),
            true,
        );
        assert!(report.staged);
        // Visible state is untouched while the hold is live.
        assert_eq!(compartment.water_fraction, 0.0);
        assert_eq!(compartment.stage.staged_len(), 1);
    }

    #[test]
    fn missing_decal_slot_is_skipped_not_fatal() {
        let mut compartment = Compartment::with_sector_count(1);
        compartment.decals.push(DecalState { decal_id: 1, alpha: 0.0 });
        let report = apply_compartment_patch(
            &mut compartment,
            &CompartmentPatch::Decal { index: 3, alpha: 0.9 },
            false,
        );
        assert_eq!(report.skipped, 1);
        assert_eq!(compartment.decals[0].alpha, 0.0);
    }

    #[test]
    fn snapshot_during_hold_clears_stage_and_hold() {
        let mut compartment = Compartment::with_sector_count(2);
        let mut scheduler = CorrectionScheduler::default();
        let hold = (ReplicaId(8), PropertyKey::CompartmentEdit);
        scheduler.schedule(hold, scalar_from_f32(1.0));
        compartment.stage.stage_decal(0, 0.5);

        apply_compartment_snapshot(
            &mut compartment,
            &CompartmentSnapshot {
                sectors: vec![SectorColor::default(); 2],
                decals: Vec::new(),
                environment: EnvironmentState::default(),
            },
            hold,
            &mut scheduler,
        );
        assert!(compartment.stage.is_empty());
        assert!(!scheduler.has_pending(hold));
    }
}
