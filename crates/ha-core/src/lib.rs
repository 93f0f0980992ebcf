//! Core types for ha-multi-click
//!
//! This crate provides the two opaque descriptors that flow between the
//! configuration and the Home Assistant WebSocket API: the [`Trigger`] a
//! button subscribes to, and the [`Action`] (a service call) it dispatches.
//!
//! Both types are passed through to the wire unmodified. Fields this crate
//! does not know about are preserved so new Home Assistant trigger and
//! service options work without a release.

mod action;
mod trigger;

pub use action::Action;
pub use trigger::{DeviceTrigger, EventTrigger, Trigger};

/// Message type used for service call commands
pub const CALL_SERVICE: &str = "call_service";

/// Message type used for trigger subscriptions
pub const SUBSCRIBE_TRIGGER: &str = "subscribe_trigger";
