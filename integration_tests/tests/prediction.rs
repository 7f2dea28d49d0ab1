mod common;

use bevy::app::App;
use bevy::ecs::entity::Entity;
use core_sync::{
    build_replica_app, paint_sector, predict_toggle_open, run_frame, scalar_from_f32,
    spawn_compartment, spawn_door, spawn_repair, Compartment, CorrectionScheduler, InboundQueue,
    PredictError, PropertyKey, SyncTelemetry, Toggle,
};
use sync_proto::{
    encode_batch, encode_update, CompartmentPatch, CompartmentSnapshot, EntityKind, EntityShape,
    EntityUpdate, EnvironmentState, ReplicaId, SectorColor, ToggleFlags, ToggleSnapshot,
    UpdatePayload,
};

const DT: f32 = 0.05;

fn frame(app: &mut App) {
    run_frame(app, scalar_from_f32(DT));
}

fn deliver(app: &App, messages: &[Vec<u8>]) {
    let batch = encode_batch(messages).expect("encode batch");
    app.world
        .resource::<InboundQueue>()
        .sender()
        .send(batch)
        .expect("queue closed");
}

fn toggle_update(replica: ReplicaId, kind: EntityKind, tick: u32, open: bool) -> Vec<u8> {
    let mut flags = ToggleFlags::empty();
    flags.set(ToggleFlags::OPEN, open);
    let update = EntityUpdate {
        replica,
        tick,
        payload: UpdatePayload::Toggle(ToggleSnapshot {
            flags,
            stuck_percent: 0.0,
            last_user: 1,
        }),
    };
    encode_update(&update, EntityShape::simple(kind)).expect("encode toggle")
}

fn door_open(app: &App, entity: Entity) -> bool {
    app.world
        .get::<Toggle>(entity)
        .expect("door component")
        .displayed_open()
}

/// Prediction with no server response reverts exactly when the one-second
/// window elapses.
#[test]
fn silent_window_reverts_the_prediction() {
    common::ensure_test_config();
    let mut app = build_replica_app();
    let door = spawn_door(&mut app.world, ReplicaId(1), None);

    predict_toggle_open(&mut app.world, ReplicaId(1), true).unwrap();
    assert!(door_open(&app, door));

    for _ in 0..19 {
        frame(&mut app);
        assert!(door_open(&app, door), "prediction must stand inside the window");
    }
    frame(&mut app);

    assert!(!door_open(&app, door), "prediction must revert at the deadline");
    let telemetry = app.world.resource::<SyncTelemetry>();
    assert_eq!(telemetry.predictions_started, 1);
    assert_eq!(telemetry.timeouts_fired, 1);
    assert_eq!(telemetry.corrections_applied, 0);
    assert_eq!(app.world.resource::<CorrectionScheduler>().pending_count(), 0);
}

/// A confirming snapshot inside the window settles the prediction in place;
/// nothing reverts afterwards.
#[test]
fn confirmation_before_the_deadline_settles() {
    common::ensure_test_config();
    let mut app = build_replica_app();
    let door = spawn_door(&mut app.world, ReplicaId(1), None);

    predict_toggle_open(&mut app.world, ReplicaId(1), true).unwrap();
    for _ in 0..6 {
        frame(&mut app);
    }

    deliver(&app, &[toggle_update(ReplicaId(1), EntityKind::Door, 10, true)]);
    frame(&mut app);

    {
        let toggle = app.world.get::<Toggle>(door).expect("door component");
        assert!(toggle.displayed_open());
        assert!(!toggle.open.is_predicted(), "overlay should settle on confirmation");
    }

    // Run well past the original deadline; the value must stand.
    for _ in 0..30 {
        frame(&mut app);
    }
    assert!(door_open(&app, door));

    let telemetry = app.world.resource::<SyncTelemetry>();
    assert_eq!(telemetry.predictions_confirmed, 1);
    assert_eq!(telemetry.timeouts_fired, 0);
    assert_eq!(telemetry.corrections_applied, 0);
}

/// Conflicting authority lands immediately and cancels the pending deadline.
#[test]
fn conflicting_snapshot_overwrites_the_prediction() {
    common::ensure_test_config();
    let mut app = build_replica_app();
    let door = spawn_door(&mut app.world, ReplicaId(1), None);

    predict_toggle_open(&mut app.world, ReplicaId(1), true).unwrap();
    for _ in 0..3 {
        frame(&mut app);
    }

    deliver(&app, &[toggle_update(ReplicaId(1), EntityKind::Door, 10, false)]);
    frame(&mut app);
    assert!(!door_open(&app, door), "authority must win over the overlay");

    for _ in 0..30 {
        frame(&mut app);
    }
    let telemetry = app.world.resource::<SyncTelemetry>();
    assert_eq!(telemetry.corrections_applied, 1);
    assert_eq!(telemetry.timeouts_fired, 0);
}

/// Spamming the same input does not re-arm the deadline.
#[test]
fn repeated_input_does_not_extend_the_window() {
    common::ensure_test_config();
    let mut app = build_replica_app();
    let door = spawn_door(&mut app.world, ReplicaId(1), None);

    predict_toggle_open(&mut app.world, ReplicaId(1), true).unwrap();
    for _ in 0..10 {
        frame(&mut app);
    }
    predict_toggle_open(&mut app.world, ReplicaId(1), true).unwrap();

    for _ in 0..9 {
        frame(&mut app);
        assert!(door_open(&app, door));
    }
    frame(&mut app);
    assert!(!door_open(&app, door), "window must still end at the original deadline");
    assert_eq!(app.world.resource::<SyncTelemetry>().predictions_started, 1);
}

/// Doors honor their per-entity window override.
#[test]
fn window_override_stretches_the_deadline() {
    common::ensure_test_config();
    let mut app = build_replica_app();
    let door = spawn_door(&mut app.world, ReplicaId(1), Some(2.0));

    predict_toggle_open(&mut app.world, ReplicaId(1), true).unwrap();
    for _ in 0..39 {
        frame(&mut app);
        assert!(door_open(&app, door));
    }
    frame(&mut app);
    assert!(!door_open(&app, door));
}

#[test]
fn scalar_kinds_never_predict() {
    common::ensure_test_config();
    let mut app = build_replica_app();
    spawn_repair(&mut app.world, ReplicaId(4));
    assert_eq!(
        predict_toggle_open(&mut app.world, ReplicaId(4), true),
        Err(PredictError::PredictionDisabled {
            kind: EntityKind::Repair,
        })
    );
}

/// Server patches arriving during a local compartment edit stage invisibly
/// and land when the hold expires.
#[test]
fn echo_hold_stages_server_patches() {
    common::ensure_test_config();
    let mut app = build_replica_app();
    let room = spawn_compartment(&mut app.world, ReplicaId(9), 4);

    let local = SectorColor {
        strength: 1.0,
        color: 0xff0000,
    };
    paint_sector(&mut app.world, ReplicaId(9), 2, local).unwrap();
    for _ in 0..5 {
        frame(&mut app);
    }

    // The server echoes the edit region with its own (stale) colors.
    let echo = EntityUpdate {
        replica: ReplicaId(9),
        tick: 30,
        payload: UpdatePayload::Patch(CompartmentPatch::Sectors {
            start: 0,
            colors: vec![
                SectorColor { strength: 0.5, color: 0xa0 },
                SectorColor { strength: 0.5, color: 0xa1 },
                SectorColor { strength: 0.5, color: 0xa2 },
                SectorColor { strength: 0.5, color: 0xa3 },
            ],
        }),
    };
    let bytes = encode_update(&echo, EntityShape::compartment(4)).expect("encode patch");
    deliver(&app, &[bytes]);
    frame(&mut app);

    {
        let compartment = app.world.get::<Compartment>(room).expect("compartment");
        assert_eq!(
            compartment.sectors[2], local,
            "the local edit must stay visible while the hold runs"
        );
        assert_eq!(compartment.stage.staged_len(), 4);
    }
    assert_eq!(app.world.resource::<SyncTelemetry>().patches_staged, 1);

    // Hold armed at the paint expires twenty frames later.
    for _ in 0..14 {
        frame(&mut app);
    }

    let compartment = app.world.get::<Compartment>(room).expect("compartment");
    assert_eq!(compartment.sectors[2].color, 0xa2, "staged echo lands at expiry");
    assert!(compartment.stage.is_empty());
    assert!(!app
        .world
        .resource::<CorrectionScheduler>()
        .has_pending((ReplicaId(9), PropertyKey::CompartmentEdit)));
    assert_eq!(app.world.resource::<SyncTelemetry>().patches_committed, 4);
}

/// A full snapshot is newer than anything staged: it lands immediately and
/// tears the hold down.
#[test]
fn full_snapshot_overrides_the_echo_hold() {
    common::ensure_test_config();
    let mut app = build_replica_app();
    let room = spawn_compartment(&mut app.world, ReplicaId(9), 2);

    paint_sector(
        &mut app.world,
        ReplicaId(9),
        0,
        SectorColor { strength: 1.0, color: 0xff0000 },
    )
    .unwrap();
    for _ in 0..3 {
        frame(&mut app);
    }

    let snapshot = EntityUpdate {
        replica: ReplicaId(9),
        tick: 40,
        payload: UpdatePayload::Compartment(CompartmentSnapshot {
            sectors: vec![
                SectorColor { strength: 0.2, color: 0xb0 },
                SectorColor { strength: 0.2, color: 0xb1 },
            ],
            decals: Vec::new(),
            environment: EnvironmentState::default(),
        }),
    };
    let bytes = encode_update(&snapshot, EntityShape::compartment(2)).expect("encode snapshot");
    deliver(&app, &[bytes]);
    frame(&mut app);

    let compartment = app.world.get::<Compartment>(room).expect("compartment");
    assert_eq!(compartment.sectors[0].color, 0xb0);
    assert!(compartment.stage.is_empty());
    assert!(!app
        .world
        .resource::<CorrectionScheduler>()
        .has_pending((ReplicaId(9), PropertyKey::CompartmentEdit)));
}
