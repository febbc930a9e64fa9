//! Campus Sync - Realtime cache synchronization core
//!
//! This crate keeps the Campus school-management portals' query caches
//! consistent with the backing database in near real time: push
//! subscriptions per watched table, throttled invalidation for high-volume
//! tables, and automatic fallback to interval polling when push delivery
//! is unhealthy.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
