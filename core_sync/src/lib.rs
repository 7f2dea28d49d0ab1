//! Client reconciliation core for the Undertow netcode prototype.
//!
//! Mirrors server-owned entities (doors, lights, repair tasks, compartment
//! aggregates) on a client, reacts to local input instantly through
//! prediction overlays, and converges back to authoritative state as updates
//! arrive or correction deadlines elapse. One call to [`run_frame`] steps the
//! whole pipeline by an explicit delta time.

mod actions;
mod apply;
mod components;
mod dump;
mod policy;
mod predicted;
mod resources;
mod scalar;
mod scheduler;
mod spawn;
mod systems;

use bevy::prelude::*;

pub use actions::{
    begin_compartment_edit, paint_sector, predict_toggle_open, set_decal_alpha, PredictError,
};
pub use apply::{
    apply_compartment_patch, apply_compartment_snapshot, apply_scalar, apply_toggle, PatchReport,
};
pub use components::{Compartment, FireRoster, PatchStage, Replica, Toggle, WorkProgress};
pub use dump::{capture_dump, state_digest};
pub use policy::{
    load_reconcile_config_from_env, FireGrowthConfig, KindPolicy, ReconcileConfig,
    ReconcileConfigError, ReconcileConfigHandle, ReconcileConfigMetadata,
    BUILTIN_RECONCILE_CONFIG,
};
pub use predicted::{ConfirmOutcome, Predicted};
pub use resources::{
    FrameDt, InboundBuffer, InboundQueue, ReplicaDirectory, SimulationTick, SyncTelemetry,
};
pub use scalar::{scalar_from_f32, scalar_zero, Scalar};
pub use scheduler::{CorrectionKey, CorrectionScheduler, PropertyKey};
pub use spawn::{spawn_compartment, spawn_door, spawn_light, spawn_repair, spawn_scanner};
pub use systems::CorrectionEvent;

/// Construct a Bevy [`App`] configured with the Undertow reconciliation
/// pipeline.
pub fn build_replica_app() -> App {
    let mut app = App::new();

    let (config, metadata) = policy::load_reconcile_config_from_env();

    app.insert_resource(ReconcileConfigHandle::new(config))
        .insert_resource(metadata)
        .insert_resource(SimulationTick::default())
        .insert_resource(FrameDt::default())
        .insert_resource(InboundQueue::default())
        .insert_resource(InboundBuffer::default())
        .insert_resource(ReplicaDirectory::default())
        .insert_resource(CorrectionScheduler::default())
        .insert_resource(SyncTelemetry::default())
        .add_plugins(MinimalPlugins)
        .add_event::<CorrectionEvent>()
        .add_systems(
            Update,
            (
                systems::pump_inbound,
                systems::apply_inbound,
                systems::tick_corrections,
                systems::grow_fires,
                systems::advance_tick,
            )
                .chain(),
        );

    app
}

/// Execute a single reconciliation frame.
///
/// Inbound messages are applied before deadlines advance, so a confirmation
/// delivered the same frame its deadline would expire still wins.
pub fn run_frame(app: &mut App, dt: Scalar) {
    app.world.resource_mut::<FrameDt>().0 = dt;
    app.update();
}
