//! Threat modeling domain logic and HTTP surface. `tmi-app` wires this
//! crate's `http::router` to a listener; everything else — store layer,
//! cache, rate limiting, authorization, validation — lives here so it can
//! be exercised without a process boundary.

pub mod authz;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod http;
pub mod kv;
pub mod model;
pub mod ratelimit;
pub mod store;
pub mod validation;
pub mod warming;
