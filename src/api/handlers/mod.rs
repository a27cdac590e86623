//! API handlers for Donara.
//!
//! The auth subsystem lives in `auth`; `health` and `root` are the
//! unauthenticated service endpoints.

pub mod auth;
pub mod health;
pub mod root;
