//! Small arithmetic helpers shared by the block codec and configuration.

pub(crate) mod layout;
pub(crate) mod size;
