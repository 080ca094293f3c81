// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::net::{SocketAddr, TcpListener, ToSocketAddrs};

use super::listener::SocketListenController;
use crate::errors::PsyflowError;
use crate::presentation::PresentationSignals;

/// Port the server binary listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 7834;

/// Accepts the remote client.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    single_socket_but_reconnect_ok: bool,
}

impl TcpServer {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, PsyflowError> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            single_socket_but_reconnect_ok: false,
        })
    }

    /// Serve one client at a time, but accept a new one after a disconnect.
    pub fn single_socket_but_reconnect_ok(mut self, ok: bool) -> Self {
        self.single_socket_but_reconnect_ok = ok;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, PsyflowError> {
        Ok(self.listener.local_addr()?)
    }

    /// Blocks until a client connects and returns the controller serving it.
    pub fn accept_listener(&self, signals: PresentationSignals) -> Result<SocketListenController, PsyflowError> {
        log::info!("awaiting connection to TCP server at {}", self.local_addr()?);
        let (stream, _) = self.listener.accept()?;
        let listener = SocketListenController::new(stream, signals)?;
        if self.single_socket_but_reconnect_ok {
            listener.reconnect_via(self.listener.try_clone()?)
        } else {
            Ok(listener)
        }
    }
}
