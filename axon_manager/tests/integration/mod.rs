pub mod common;

mod chaining;
mod fallback;
mod lifecycle_services;
mod rate_gating;
mod switching;
