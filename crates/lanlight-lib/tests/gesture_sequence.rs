//! Integration tests: raw key records through repeat scheduling and routing
//! to mock lights, using only the public API.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use lanlight_lib::action::{Keymap, route};
use lanlight_lib::control::{ControlMsg, run_session};
use lanlight_lib::device::mock::{Call, MockLight, handle};
use lanlight_lib::device::Power;
use lanlight_lib::input::{
    Activate, EV_KEY, KeyEdge, RecordFormat, RepeatScheduler, RepeatTiming, read_edges,
    spawn_stream,
};
use lanlight_lib::session::{Session, SessionConfig};

const ESC: u16 = 1;
const DIMMER: u16 = 114;
const WARMER: u16 = 62;

/// 24-byte `input_event` with a zero timestamp.
fn event64(typ: u16, code: u16, value: i32) -> Vec<u8> {
    let mut rec = vec![0u8; 16];
    rec.extend_from_slice(&typ.to_le_bytes());
    rec.extend_from_slice(&code.to_le_bytes());
    rec.extend_from_slice(&value.to_le_bytes());
    rec
}

fn group(n: u8) -> Vec<Session<MockLight>> {
    (1..=n)
        .map(|i| Session::new(MockLight::new(handle(i)), SessionConfig::default()))
        .collect()
}

/// Feed `edges` at the given offsets and collect every activation up to
/// `until`, firing timers as they fall due.
fn schedule(edges: &[(u64, KeyEdge)], until: u64) -> Vec<Activate> {
    let t0 = Instant::now();
    let at = |ms: u64| t0 + Duration::from_millis(ms);
    let mut scheduler = RepeatScheduler::new(RepeatTiming::default());
    let mut out = Vec::new();
    let mut pending = edges.iter().peekable();
    loop {
        let next_edge = pending.peek().map(|(ms, _)| at(*ms));
        let next_timer = scheduler.next_due();
        match (next_edge, next_timer) {
            (Some(e), Some(t)) if t < e => out.extend(scheduler.on_timer(t)),
            (Some(e), _) if e <= at(until) => {
                let (_, edge) = pending.next().copied().unwrap();
                out.extend(scheduler.on_edge(edge, e));
            }
            (_, Some(t)) if t <= at(until) => out.extend(scheduler.on_timer(t)),
            _ => return out,
        }
    }
}

#[test]
fn held_dimmer_steps_down_from_cache() {
    let activations = schedule(&[(0, KeyEdge::Down(DIMMER)), (750, KeyEdge::Up)], 2000);
    assert_eq!(activations.len(), 4);

    let mut lights = group(1);
    let keymap = Keymap::default();
    for a in activations {
        route(&keymap, &mut lights, a).unwrap();
    }
    let light = lights[0].connection();
    assert_eq!(light.color.brightness, 32768 - 4 * 2185);
    assert_eq!(light.count(|c| *c == Call::GetColor), 1);
    assert_eq!(light.count(|c| matches!(c, Call::SetColor(..))), 4);
}

#[test]
fn held_toggle_fires_once() {
    let activations = schedule(&[(0, KeyEdge::Down(ESC)), (1200, KeyEdge::Up)], 2000);
    assert!(activations.len() > 1);

    let mut lights = group(1);
    let keymap = Keymap::default();
    for a in activations {
        route(&keymap, &mut lights, a).unwrap();
    }
    assert_eq!(lights[0].connection().power, Power::Off);
    assert_eq!(
        lights[0]
            .connection()
            .count(|c| matches!(c, Call::SetPower(_))),
        1
    );
}

#[test]
fn toggle_keeps_group_in_step() {
    let mut lights = group(2);
    lights[1].connection_mut().power = Power::Off;
    let keymap = Keymap::default();
    let press = Activate {
        code: ESC,
        is_repeat: false,
    };

    route(&keymap, &mut lights, press).unwrap();
    assert!(lights.iter().all(|l| l.connection().power == Power::Off));
    route(&keymap, &mut lights, press).unwrap();
    assert!(lights.iter().all(|l| l.connection().power == Power::On));
}

#[test]
fn warmer_stops_at_range_floor() {
    let mut lights = group(1);
    let keymap = Keymap::default();
    // code 2 is the warmest preset
    for code in [2, WARMER, WARMER] {
        route(
            &keymap,
            &mut lights,
            Activate {
                code,
                is_repeat: false,
            },
        )
        .unwrap();
    }
    let light = lights[0].connection();
    assert_eq!(light.color.kelvin, 1500);
    assert_eq!(light.power, Power::On);
}

#[test]
fn raw_records_become_edges() {
    let mut bytes = event64(EV_KEY, DIMMER, 1);
    bytes.extend(event64(0, 0, 0));
    bytes.extend(event64(EV_KEY, DIMMER, 2));
    bytes.extend(event64(EV_KEY, DIMMER, 0));
    let (tx, rx) = mpsc::channel();
    read_edges(bytes.as_slice(), RecordFormat::Evdev64, &tx).unwrap();
    drop(tx);
    assert_eq!(
        rx.iter().collect::<Vec<_>>(),
        vec![KeyEdge::Down(DIMMER), KeyEdge::Up]
    );
}

#[test]
fn input_file_drives_control_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("event0");
    // code 4 selects the 2700K preset at half brightness
    let mut bytes = event64(EV_KEY, 4, 1);
    bytes.extend(event64(EV_KEY, 4, 0));
    std::fs::write(&path, bytes).unwrap();

    let (tx, rx) = mpsc::channel::<ControlMsg>();
    let stream = spawn_stream(
        path.to_str().unwrap(),
        RecordFormat::Evdev64,
        RepeatTiming::default(),
        tx,
    )
    .unwrap();

    let running = AtomicBool::new(true);
    let mut lights = group(1);
    // returns once the stream closes its sender
    run_session(&mut lights, &Keymap::default(), &rx, &running).unwrap();
    stream.join().unwrap();

    let light = lights[0].connection();
    assert_eq!(light.color.kelvin, 2700);
    assert_eq!(light.color.brightness, 32768);
    assert_eq!(light.power, Power::On);
}
