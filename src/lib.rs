// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A pure-Rust NSQ client core: a framed TCP connection engine, consumer and
//! producer facades built on top of it, and `nsqlookupd`-driven discovery.

pub mod cfg;
pub mod codec;
pub mod command;
pub mod connection;
pub mod error;
pub mod frame;
pub mod lookup;
pub mod message;
pub mod reader;
pub mod reconnect;
pub mod utils;
pub mod writer;

pub use connection::Connection;
pub use error::{Error, Result};
pub use message::Message;
pub use reader::{Discovery, Reader};
pub use writer::Writer;
