//! Coordination primitives shared by the apply loop and the change handler.

pub mod shutdown;
