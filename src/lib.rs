//! Coin change dispensing for a self-service kiosk.
//!
//! Two motorized hoppers (1-unit and 5-unit coins) with optical passage
//! sensors are driven through a shared GPIO daemon connection. The crate
//! covers per-coin actuation with debounced sensor feedback and bounded
//! retries, multi-hopper orchestration of a change amount, and the
//! feasibility/suggestion logic that decides whether a change amount can be
//! produced before any hardware moves.

pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
