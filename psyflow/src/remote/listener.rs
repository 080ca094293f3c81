// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};

use derive_debug::Dbg;

use super::protocol::{controllable_line, greeting, line_too_long, CommandSession, Outcome, MAX_LINE_LEN};
use crate::controller::{
    ConstantController, Controller, EncapsulatedController, EvalFrequency, TemporalVariables, TimeBasis,
};
use crate::errors::PsyflowError;
use crate::parameters::{ParameterValue, TypeTag};
use crate::presentation::PresentationSignals;

const READ_CHUNK: usize = 1024;
// bytes read per poll, the rest waits for the next frame
const MAX_READ_PER_POLL: usize = 16 * READ_CHUNK;
// replies queued for a client that does not read them
const MAX_OUTBOX: usize = 256 * 1024;

/// Serves one remote client from inside the presentation loop.
///
/// Add it to a presentation without a target. Each evaluation reads what
/// the client sent without blocking and handles every complete line.
/// Assignments stage a new delegate on the named [`EncapsulatedController`],
/// which takes over at the next tick.
///
/// Socket failures never reach the presentation: a client that errors,
/// sends lines longer than [`MAX_LINE_LEN`] without end or stops reading its
/// replies is answered with an error or dropped.
#[derive(Dbg)]
pub struct SocketListenController {
    stream: Option<TcpStream>,
    // accepts a new client after a disconnect
    server: Option<TcpListener>,
    session: CommandSession,
    #[dbg(placeholder = "...")]
    buffer: Vec<u8>,
    // inside a rejected line, skipping to its end
    discarding: bool,
    #[dbg(placeholder = "...")]
    outbox: Vec<u8>,
    signals: PresentationSignals,
    eval_frequency: EvalFrequency,
}

impl SocketListenController {
    /// Takes over a connected client and greets it.
    pub fn new(stream: TcpStream, signals: PresentationSignals) -> Result<Self, PsyflowError> {
        let mut listener = Self {
            stream: None,
            server: None,
            session: CommandSession::new(),
            buffer: Vec::new(),
            discarding: false,
            outbox: Vec::new(),
            signals,
            eval_frequency: EvalFrequency::every_frame(),
        };
        listener.attach(stream)?;
        Ok(listener)
    }

    /// After a disconnect, wait for the next client on `server` instead of
    /// going silent.
    pub fn reconnect_via(mut self, server: TcpListener) -> Result<Self, PsyflowError> {
        server.set_nonblocking(true)?;
        self.server = Some(server);
        Ok(self)
    }

    pub fn with_eval_frequency(mut self, eval_frequency: EvalFrequency) -> Self {
        self.eval_frequency = eval_frequency;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Creates a controller the client can replace as `name`.
    ///
    /// `initial` defaults to `const(1.0, 0.0)`. Every replacement must return
    /// `require_type`, which defaults to the return type of `initial`.
    pub fn create_remote_controller(
        &mut self,
        name: &str,
        initial: Option<Box<dyn Controller>>,
        require_type: Option<TypeTag>,
    ) -> Result<EncapsulatedController, PsyflowError> {
        let initial = match initial {
            Some(initial) => initial,
            None => Box::new(ConstantController::with_values(1.0, 0.0)?),
        };
        let require_type = require_type.unwrap_or_else(|| initial.returns_type());
        let controller = EncapsulatedController::with_require_type(initial, require_type)?;
        self.session.register(name, controller.handle())?;
        self.send(&controllable_line(name));
        Ok(controller)
    }

    /// Sends raw text to the client, if one is connected.
    pub fn send_raw_text(&mut self, text: &str) {
        self.send(text);
    }

    fn attach(&mut self, stream: TcpStream) -> Result<(), PsyflowError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        match stream.peer_addr() {
            Ok(addr) => log::info!("handling connection from {}", addr),
            Err(_) => log::info!("handling connection"),
        }
        self.stream = Some(stream);
        self.buffer.clear();
        self.outbox.clear();
        self.discarding = false;
        self.send(&greeting());
        let announcements: Vec<String> = self.session.names().map(controllable_line).collect();
        for line in announcements {
            self.send(&line);
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            self.buffer.clear();
            self.outbox.clear();
            self.discarding = false;
            if self.server.is_some() {
                log::info!("client disconnected, waiting for a new connection");
            } else {
                log::warn!("client disconnected, remote control is no longer available");
            }
        }
    }

    fn send(&mut self, text: &str) {
        if self.stream.is_none() {
            return;
        }
        if self.outbox.len() + text.len() > MAX_OUTBOX {
            log::warn!("remote client does not read its replies");
            self.disconnect();
            return;
        }
        self.outbox.extend_from_slice(text.as_bytes());
        self.flush();
    }

    // writes as much of the outbox as the socket takes without blocking
    fn flush(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut failure = None;
        while !self.outbox.is_empty() {
            match stream.write(&self.outbox) {
                Ok(0) => {
                    failure = Some(io::Error::from(ErrorKind::WriteZero));
                    break;
                }
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        if let Some(e) = failure {
            log::warn!("failed to send to remote client: {}", e);
            self.disconnect();
        }
    }

    fn try_accept(&mut self) {
        let Some(server) = &self.server else {
            return;
        };
        let stream = match server.accept() {
            Ok((stream, _)) => stream,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => return,
            Err(e) => {
                log::warn!("failed to accept remote client: {}", e);
                return;
            }
        };
        if let Err(e) = self.attach(stream) {
            log::warn!("failed to set up remote client: {}", e);
            self.disconnect();
        }
    }

    // reads what is available, up to a per poll limit; false once the
    // client is gone
    fn read_available(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        while total < MAX_READ_PER_POLL {
            match stream.read(&mut chunk) {
                Ok(0) => return false,
                Ok(n) => {
                    total += n;
                    self.buffer.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return true,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("failed to read from remote client: {}", e);
                    return false;
                }
            }
        }
        true
    }

    /// Handles what the client sent since the last call.
    pub fn poll(&mut self) {
        if self.stream.is_none() {
            self.try_accept();
        }
        if self.stream.is_none() {
            return;
        }
        self.flush();
        let connected = self.read_available();

        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            if self.discarding {
                // tail of a line that was already answered
                self.discarding = false;
                continue;
            }
            let line = String::from_utf8_lossy(&raw).replace('\r', "");
            match self.session.handle_line(line.trim_end_matches('\n')) {
                Outcome::Silent => {}
                Outcome::Reply(text) => self.send(&text),
                Outcome::Close => {
                    log::info!("remote client closed the connection");
                    self.disconnect();
                    return;
                }
                Outcome::Quit => {
                    log::info!("quit requested by remote client");
                    self.signals.request_quit();
                }
            }
        }

        if self.buffer.len() > MAX_LINE_LEN {
            self.buffer.clear();
            if !self.discarding {
                self.discarding = true;
                log::info!("discarding an overlong command line");
                self.send(&line_too_long());
            }
        }

        if !connected {
            self.disconnect();
        }
    }
}

impl Controller for SocketListenController {
    fn eval_frequency(&self) -> EvalFrequency {
        self.eval_frequency
    }

    fn temporal_variables(&self) -> TemporalVariables {
        TemporalVariables::TIME_INDEPENDENT
    }

    fn returns_type(&self) -> TypeTag {
        TypeTag::None
    }

    fn during_go_eval(&mut self, _basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        self.poll();
        Ok(ParameterValue::None)
    }

    fn between_go_eval(&mut self, _basis: &TimeBasis) -> Result<ParameterValue, PsyflowError> {
        self.poll();
        Ok(ParameterValue::None)
    }

    fn describe(&self) -> String {
        format!(
            "socket_listener({}, {})",
            self.eval_frequency,
            if self.is_connected() { "connected" } else { "disconnected" }
        )
    }
}
