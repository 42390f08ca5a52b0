//! Heap backends and the pieces the proxy builds blocks from.
//!
//! Raw block memory is touched here, in `debug::poison` and in
//! `api::proxy`; every other module goes through these types.

pub(crate) mod block;
pub(crate) mod deferred;
pub(crate) mod heap;
pub(crate) mod quarantine;
