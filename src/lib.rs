//! Pooldash is the presentation tier of a mining-pool operations dashboard.
//!
//! It compiles page templates at startup, renders them against live pool
//! statistics, and keeps the rendered set current through two invalidation
//! paths: template file changes (single-page rebuild) and a periodic
//! statistics refresh (full rebuild plus a push to every live subscriber).
//! A cache-aside resolver derives per-coin address version bytes from the
//! configured daemons and persists them so the key-derivation page only ever
//! pays the RPC cost once per coin.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
