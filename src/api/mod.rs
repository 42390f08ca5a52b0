//! Public API for redzone.
//!
//! This module contains all user-facing types and functions.
//! Most users only need [`HeapManager`](manager::HeapManager) and
//! [`HeapProxy`](proxy::HeapProxy).

pub mod config;
pub mod error;
pub mod flags;
pub mod manager;
pub mod proxy;
pub mod stats;
