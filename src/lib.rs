//! Client-side service layer for the CalTrack food tracking app.
//!
//! Caches per-day nutrition statistics and today's product list locally,
//! reconciles stale or missing days against the backend, and reattaches
//! locally captured photos to their server-confirmed products. Storage,
//! photos and the backend are injected through the [`store`], [`images`]
//! and [`remote`] traits.

pub mod images;
pub mod models;
pub mod products;
pub mod remote;
pub mod stats;
pub mod stats_cache;
pub mod store;
