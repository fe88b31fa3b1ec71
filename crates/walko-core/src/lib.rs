//! Hardware-independent core library for the walko rotation odometer
//!
//! This crate contains the persistence and accounting core of the device:
//! the interrupt-side edge counter, the versioned on-flash session record,
//! the wear-leveled sector ring, the counter/session engine that decides
//! when and what to commit, and the reporting adapter used by the companion
//! application.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both the
//! microcontroller and desktop hosts (for the simulator and tests).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod events;
pub mod odometer;
pub mod platform;
pub mod reporting;
pub mod sensors;
pub mod storage;
pub mod units;
