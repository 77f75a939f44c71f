//! strikebot library
//!
//! Real-time decision engine for short-horizon binary prediction
//! markets: candle aggregation, technical indicators, a time-stratified
//! strategy tree and a paper trader with risk controls.

pub mod candles;
pub mod config;
pub mod engine;
pub mod feeds;
pub mod indicators;
pub mod market;
pub mod notifier;
pub mod paper;
pub mod persistence;
pub mod snapshot;
pub mod strategy;
pub mod types;

#[cfg(feature = "dashboard")]
pub mod dashboard;
