// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Headless presentation of a fixation spot whose color, position and size
// are controlled over TCP. Try it with `telnet localhost 7834`.

use psyflow::prelude::*;
use psyflow::remote::DEFAULT_PORT;

fn main() -> Result<(), PsyflowError> {
    env_logger::init();

    let port = match std::env::var("PSYFLOW_TCP_PORT") {
        Ok(value) => value
            .trim()
            .parse::<u16>()
            .map_err(|_| PsyflowError::ConfigError(format!("cannot parse PSYFLOW_TCP_PORT=\"{}\"", value)))?,
        Err(_) => DEFAULT_PORT,
    };
    let options = PresentationOptions::from_env()?;

    let screen = HeadlessScreen::new("main", VsyncMode::Sleep)?;
    let screen_size = screen.size();
    let context = PresentationContext::system().with_screen(screen);
    let mut presentation = Presentation::new(context, options);

    let spot = FixationSpot::with_values([("anchor", ParameterValue::from("center"))])?;
    let spot_parameters = spot.parameters();
    let viewport = Viewport::new(screen_size, vec![Box::new(spot)])?;
    presentation.add_viewport(0, viewport)?;

    let server = TcpServer::bind(("0.0.0.0", port))?.single_socket_but_reconnect_ok(true);
    let mut listener = server.accept_listener(presentation.signals())?;

    let on = listener.create_remote_controller("on", Some(Box::new(ConstantController::new(true))), None)?;
    let color = listener.create_remote_controller(
        "color",
        Some(Box::new(ConstantController::new([1.0, 1.0, 1.0]))),
        Some(Rgba::type_tag()),
    )?;
    let position = listener.create_remote_controller(
        "position",
        Some(Box::new(ConstantController::new([320.0, 240.0]))),
        None,
    )?;
    let size = listener.create_remote_controller(
        "size",
        Some(Box::new(ConstantController::new([4.0, 4.0]))),
        None,
    )?;
    let go = listener.create_remote_controller("go", Some(Box::new(ConstantController::new(false))), None)?;

    // a go loop starts whenever the remote "go" value turns true
    let trigger: SharedParameters = Parameters::new([ParameterDefinition::new("go", false, TypeTag::Boolean)])?.into();
    let watched = trigger.clone();
    let signals = presentation.signals();
    let mut was_set = false;
    let watcher = FunctionController::new(TypeTag::None, |_| Ok(ParameterValue::None))
        .with_between_go(move |_| {
            let is_set = watched.lock().get_bool("go")?;
            if is_set && !was_set {
                signals.request_go();
            }
            was_set = is_set;
            Ok(ParameterValue::None)
        })
        .with_eval_frequency(EvalFrequency::every_frame().not_during_go())
        .with_temporal_variables(TemporalVariables::TIME_INDEPENDENT);

    presentation.add_controller(None, Box::new(listener))?;
    presentation.add_controller(Some((spot_parameters.clone(), "on")), Box::new(on))?;
    presentation.add_controller(Some((spot_parameters.clone(), "color")), Box::new(color))?;
    presentation.add_controller(Some((spot_parameters.clone(), "position")), Box::new(position))?;
    presentation.add_controller(Some((spot_parameters, "size")), Box::new(size))?;
    presentation.add_controller(Some((trigger, "go")), Box::new(go))?;
    presentation.add_controller(None, Box::new(watcher))?;

    log::info!("serving on port {}, send \"quit\" to stop", port);
    presentation.run_forever()?;
    presentation.context_mut().close_all();
    Ok(())
}
