//! chatsync core library: follows one WhatsApp conversation through a REST API and a live
//! event socket, merging history and live messages into one ordered view.

pub mod config;
pub mod conversation;
pub mod init;
pub mod message;
pub mod session;
pub mod transport;
