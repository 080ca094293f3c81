// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use psyflow::prelude::*;
use psyflow::visual::frame::DrawCommand;
use psyflow::visual::screen::{ScreenEvent, ScreenRecorder};

fn frames(n: u64) -> PresentationOptions {
    PresentationOptions {
        go_duration: GoDuration::Frames(n),
        ..Default::default()
    }
}

fn single_screen(clock: &SimulatedClock, options: PresentationOptions) -> Presentation {
    let screen = HeadlessScreen::new("main", VsyncMode::Simulated(clock.clone())).unwrap();
    let context = PresentationContext::new(Arc::new(clock.clone())).with_screen(screen);
    Presentation::new(context, options)
}

fn real_params(names: &[&str]) -> SharedParameters {
    Parameters::new(names.iter().map(|name| ParameterDefinition::new(name, 0.0, TypeTag::Real)))
        .unwrap()
        .into()
}

fn real(params: &SharedParameters, name: &str) -> f64 {
    params.get(name).unwrap().as_f64().unwrap()
}

#[test]
fn once_fires_exactly_once_per_phase_entry() {
    let clock = SimulatedClock::new(0.0);
    let mut presentation = single_screen(&clock, frames(5));
    let params = real_params(&["x"]);

    let during = Arc::new(AtomicU64::new(0));
    let between = Arc::new(AtomicU64::new(0));
    let (d, b) = (during.clone(), between.clone());
    let controller = FunctionController::new(TypeTag::Real, move |_| {
        Ok(ParameterValue::Real(d.fetch_add(1, Ordering::Relaxed) as f64))
    })
    .with_between_go(move |_| Ok(ParameterValue::Real(-(b.fetch_add(1, Ordering::Relaxed) as f64))))
    .with_eval_frequency(EvalFrequency::once());
    presentation
        .add_controller(Some((params.clone(), "x")), Box::new(controller))
        .unwrap();

    presentation.go().unwrap();
    for _ in 0..3 {
        presentation.between_presentations().unwrap();
    }
    presentation.go().unwrap();

    assert_eq!(during.load(Ordering::Relaxed), 2);
    // idle -> between, and after each of the two go loops
    assert_eq!(between.load(Ordering::Relaxed), 3);
}

#[test]
fn not_during_go_keeps_the_between_go_value() {
    let clock = SimulatedClock::new(0.0);
    let mut presentation = single_screen(&clock, frames(4));
    let params = real_params(&["x"]);

    let controller = ConstantController::with_values(1.0, 7.0)
        .unwrap()
        .with_eval_frequency(EvalFrequency::every_frame().not_during_go());
    presentation
        .add_controller(Some((params.clone(), "x")), Box::new(controller))
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (record, observed) = (seen.clone(), params.clone());
    let observer = FunctionController::new(TypeTag::None, move |_| {
        record.lock().unwrap().push(real(&observed, "x"));
        Ok(ParameterValue::None)
    });
    presentation.add_controller(None, Box::new(observer)).unwrap();

    presentation.between_presentations().unwrap();
    assert_eq!(real(&params, "x"), 7.0);
    presentation.go().unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![7.0; 4]);
    presentation.between_presentations().unwrap();
    assert_eq!(real(&params, "x"), 7.0);
}

#[test]
fn transitions_fire_on_entry_only() {
    let clock = SimulatedClock::new(0.0);
    let mut presentation = single_screen(&clock, frames(3));
    let params = real_params(&["x"]);
    let calls = Arc::new(AtomicU64::new(0));
    let counter = calls.clone();
    let controller = FunctionController::new(TypeTag::Real, move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(ParameterValue::Real(1.0))
    })
    .with_eval_frequency(EvalFrequency::transitions().not_between_go());
    presentation
        .add_controller(Some((params.clone(), "x")), Box::new(controller))
        .unwrap();
    presentation.go().unwrap();
    presentation.go().unwrap();
    assert_eq!(calls.load(Ordering::Relaxed), 2);
}

// `b` reads what `a` holds at the time `b` runs
fn run_chain(a_first: bool) -> (f64, f64) {
    let clock = SimulatedClock::new(0.0);
    let mut presentation = single_screen(&clock, frames(3));
    let params = real_params(&["a", "b"]);

    let a = FunctionController::new(TypeTag::Real, |basis| {
        Ok(ParameterValue::Real(basis.frames_since_go.unwrap_or(0) as f64))
    })
    .with_temporal_variables(TemporalVariables::only(TemporalVariable::FramesSinceGo));
    let source = params.clone();
    let b = FunctionController::new(TypeTag::Real, move |_| Ok(ParameterValue::Real(real(&source, "a") * 2.0)));

    if a_first {
        presentation.add_controller(Some((params.clone(), "a")), Box::new(a)).unwrap();
        presentation.add_controller(Some((params.clone(), "b")), Box::new(b)).unwrap();
    } else {
        presentation.add_controller(Some((params.clone(), "b")), Box::new(b)).unwrap();
        presentation.add_controller(Some((params.clone(), "a")), Box::new(a)).unwrap();
    }
    presentation.go().unwrap();
    (real(&params, "a"), real(&params, "b"))
}

#[test]
fn registration_order_decides_what_controllers_see() {
    assert_eq!(run_chain(true), (2.0, 4.0));
    assert_eq!(run_chain(false), (2.0, 2.0));
    assert_eq!(run_chain(true), run_chain(true));
}

#[test]
fn all_screens_swap_before_the_next_frame_is_drawn() {
    let clock = SimulatedClock::new(0.0);
    let recorder = ScreenRecorder::new();
    let left = HeadlessScreen::new("left", VsyncMode::Simulated(clock.clone()))
        .unwrap()
        .with_recorder(recorder.clone());
    let right = HeadlessScreen::new("right", VsyncMode::Simulated(clock.clone()))
        .unwrap()
        .with_recorder(recorder.clone());
    let context = PresentationContext::new(Arc::new(clock.clone()))
        .with_screen(left)
        .with_screen(right);
    let mut presentation = Presentation::new(context, frames(3));
    for screen in 0..2 {
        let spot = FixationSpot::new().unwrap();
        presentation
            .add_viewport(screen, Viewport::new([640.0, 480.0], vec![Box::new(spot)]).unwrap())
            .unwrap();
    }

    let summary = presentation.go().unwrap();
    assert_eq!(summary.frames, 3);

    let name = |s: &str| s.to_string();
    let one_frame = vec![
        ScreenEvent::Clear { screen: name("left") },
        ScreenEvent::Submit {
            screen: name("left"),
            commands: 1,
        },
        ScreenEvent::Clear { screen: name("right") },
        ScreenEvent::Submit {
            screen: name("right"),
            commands: 1,
        },
        ScreenEvent::Swap { screen: name("left") },
        ScreenEvent::Swap { screen: name("right") },
    ];
    let events = recorder.events();
    assert_eq!(events.len(), 18);
    for chunk in events.chunks(6) {
        assert_eq!(chunk, one_frame.as_slice());
    }
    // both screens flip on the same refresh
    assert!((clock.now_sec() - 3.0 / 60.0).abs() < 1e-12);
}

#[test]
fn a_failed_swap_halts_the_presentation() {
    let clock = SimulatedClock::new(0.0);
    let mut presentation = single_screen(&clock, frames(10));
    presentation
        .context_mut()
        .screen_as_mut::<HeadlessScreen>(0)
        .unwrap()
        .fail_next_swap();

    assert!(matches!(presentation.go(), Err(PsyflowError::IOError(_))));
    assert_eq!(presentation.phase(), Phase::Idle);
    assert!(!presentation.context().screen(0).unwrap().is_closed());

    // still usable afterwards
    assert_eq!(presentation.go().unwrap().frames, 10);
    presentation.context_mut().close_all();
    assert!(presentation.context().screen(0).unwrap().is_closed());
}

#[test]
fn rejected_delegates_leave_the_old_one_running() {
    let clock = SimulatedClock::new(0.0);
    let mut presentation = single_screen(&clock, frames(1));
    let params = real_params(&["x"]);
    let controller = EncapsulatedController::new(ConstantController::new(3.0));
    let handle = controller.handle();
    presentation
        .add_controller(Some((params.clone(), "x")), Box::new(controller))
        .unwrap();

    let rejected = handle.set_new_controller(Box::new(ConstantController::new("three")));
    assert!(matches!(rejected, Err(PsyflowError::TypeMismatchError { .. })));
    assert!(!handle.has_pending());
    presentation.between_presentations().unwrap();
    assert_eq!(real(&params, "x"), 3.0);
}

#[test]
fn formulas_move_a_stimulus() {
    let clock = SimulatedClock::new(0.0);
    let mut presentation = single_screen(&clock, frames(31));
    let spot = FixationSpot::with_values([("anchor", ParameterValue::from("lowerleft"))]).unwrap();
    let spot_params = spot.parameters();
    presentation
        .add_viewport(0, Viewport::new([640.0, 480.0], vec![Box::new(spot)]).unwrap())
        .unwrap();

    let position = StringController::formula("[100.0 + 60.0*t, 240.0]")
        .between_go("[0.0, 0.0]")
        .build()
        .unwrap();
    presentation
        .add_controller(Some((spot_params.clone(), "position")), Box::new(position))
        .unwrap();

    presentation.go().unwrap();
    let x = spot_params.get("position").unwrap().as_sequence().unwrap()[0];
    assert!((x - 130.0).abs() < 1e-6, "{}", x);

    let screen = presentation.context().screen_as::<HeadlessScreen>(0).unwrap();
    match &screen.last_presented().unwrap().commands()[0] {
        DrawCommand::Rect { lower_left, .. } => assert!((lower_left[0] - 130.0).abs() < 1e-6),
        other => panic!("unexpected command {:?}", other),
    }

    presentation.between_presentations().unwrap();
    assert_eq!(spot_params.get("position").unwrap(), ParameterValue::from([0.0, 0.0]));
}

#[test]
fn frame_timer_of_the_last_go_loop_is_kept() {
    let clock = SimulatedClock::new(0.0);
    let mut presentation = single_screen(&clock, frames(61));
    let summary = presentation.go().unwrap();
    let timer = presentation.last_frame_timer().unwrap();
    assert_eq!(timer.total_frames(), 61);
    assert!((timer.average_ifi_sec().unwrap() - 1.0 / 60.0).abs() < 1e-9);
    // 16.7 msec lands in [16, 18)
    assert_eq!(timer.histogram()[8], 60);
    assert_eq!(summary.mean_ifi_sec, timer.average_ifi_sec().ok());
    assert!(!presentation.were_frames_dropped_in_last_go_loop());
}
