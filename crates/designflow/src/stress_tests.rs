//! Randomized interleavings of session events.
//!
//! Seeds are fixed so failures reproduce.

use serde_json::json;

use crate::dispatch::{Collaborators, Dispatcher, TimerDirective};
use crate::equality::{is_design_the_same, is_design_the_same_for_serialization};
use crate::protocol::{
    Command, Event, FileStoreEvent, SettingsReply, SettingsRequest, UiEvent, WorkerRequest,
    WorkerResponse,
};
use crate::scheduler::RequestId;
use crate::state::{DesignState, FileNode, ValueMap};
use crate::EngineConfig;

const SEEDS: [u64; 8] = [1, 7, 42, 99, 1234, 8086, 65_535, 424_242];
const STEPS: usize = 200;

fn values(rng: &mut fastrand::Rng) -> ValueMap {
    let mut map = ValueMap::new();
    map.insert("teeth".to_string(), json!(rng.u8(4..40)));
    if rng.bool() {
        map.insert("radius".to_string(), json!(rng.f64() * 10.0));
    }
    map
}

fn random_event(rng: &mut fastrand::Rng, armed: Option<RequestId>) -> Event {
    match rng.u8(0..10) {
        0 => Event::Files(FileStoreEvent::Added {
            data: vec![FileNode::file(
                format!("/designs/d{}.js", rng.u8(0..3)),
                "function main() {}",
            )],
        }),
        1 => Event::Ui(UiEvent::ParametersSubmitted {
            values: values(rng),
        }),
        2 => Event::Ui(UiEvent::ParametersEdited {
            values: Ok(values(rng)),
        }),
        3 => Event::Ui(UiEvent::ToggleAutoReload(rng.bool())),
        4 => Event::Ui(UiEvent::ToggleVtreeMode(rng.bool())),
        5 => Event::Ui(UiEvent::SetSolidsTimeout(rng.u64(100..100_000))),
        6 => Event::Worker(WorkerResponse::Solids {
            solids: vec![json!({"class": if rng.bool() { "CSG" } else { "CAG" }})],
            lookup: None,
            lookup_counts: None,
        }),
        7 => Event::Worker(WorkerResponse::Error {
            error: "failed".to_string(),
        }),
        8 => Event::RecomputeTimerElapsed {
            request_id: armed
                .filter(|_| rng.bool())
                .unwrap_or_default(),
        },
        _ => Event::Ui(UiEvent::ToggleInstantUpdate(rng.bool())),
    }
}

#[test]
fn no_settings_write_precedes_the_read_reply() {
    for seed in SEEDS {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut dispatcher = Dispatcher::new(EngineConfig::default(), Collaborators::default());
        let reply_at = rng.usize(0..STEPS);
        let mut armed = None;

        for step in 0..STEPS {
            let event = if step == reply_at {
                Event::Settings(SettingsReply::Read {
                    key: "design".to_string(),
                    data: Some(json!({"vtreeMode": false, "autoReload": rng.bool()})),
                })
            } else {
                random_event(&mut rng, armed)
            };
            let out = dispatcher.handle(event);
            if let TimerDirective::Arm { request_id, .. } = out.timer {
                armed = Some(request_id);
            }

            let wrote = out
                .commands
                .iter()
                .any(|command| matches!(command, Command::Settings(SettingsRequest::Write { .. })));
            assert!(
                !wrote || step >= reply_at,
                "seed {seed}: write emitted at step {step} before the read reply at {reply_at}"
            );
        }
    }
}

#[test]
fn every_cancel_follows_a_timeout() {
    for seed in SEEDS {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut dispatcher = Dispatcher::new(EngineConfig::default(), Collaborators::default());
        let mut armed = None;

        for _ in 0..STEPS {
            let out = dispatcher.handle(random_event(&mut rng, armed));
            if let TimerDirective::Arm { request_id, .. } = out.timer {
                armed = Some(request_id);
            }
            let cancelled = out
                .commands
                .contains(&Command::Worker(WorkerRequest::Cancel));
            if cancelled {
                let state = dispatcher.snapshot();
                assert!(!state.is_busy(), "seed {seed}: busy after a timeout");
                assert!(
                    state.error().is_some_and(|err| err.is_timeout()),
                    "seed {seed}: cancel without a timeout error"
                );
            }
        }
    }
}

#[test]
fn equality_gates_ignore_untracked_fields() {
    for seed in SEEDS {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut design = DesignState {
            name: format!("d{seed}"),
            path: "/designs".to_string(),
            main_path: format!("/designs/d{seed}.js"),
            parameter_values: values(&mut rng),
            ..DesignState::default()
        };
        assert!(is_design_the_same(Some(&design), &design));
        assert!(is_design_the_same_for_serialization(Some(&design), &design));

        let before = design.clone();
        design.lookup.insert("k".to_string(), json!(rng.u32(..)));
        design.debug.total_time = rng.i64(0..10_000);
        design.convert_supported_types = rng.bool();
        assert!(is_design_the_same(Some(&before), &design));
        assert!(is_design_the_same_for_serialization(Some(&before), &design));

        design.solids_time_out = before.solids_time_out + 1;
        assert!(is_design_the_same(Some(&before), &design));
        assert!(!is_design_the_same_for_serialization(Some(&before), &design));
    }
}
