//! Application-level orchestration.
//!
//! The controller owns the server process and the companion window and
//! answers operations from the front ends. UI and CLI layers only talk to it
//! through [`LauncherClient`] and the notification channel.

mod client;
mod controller;

pub(crate) use client::LauncherClient;
pub(crate) use controller::Launcher;
