// Copyright (c) 2024 Marc Pabst
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Remote control of controllers over a line-based TCP protocol.

mod listener;
pub mod protocol;
mod server;

pub use listener::SocketListenController;
pub use protocol::{CommandSession, Outcome};
pub use server::{TcpServer, DEFAULT_PORT};
