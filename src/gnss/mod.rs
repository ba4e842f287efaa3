
/// Acquisition, tracking and the handoff between them, common to all signals
pub mod common;

/// Channel state machine that ties one acquisition engine to one tracking loop
pub mod channel;

pub mod gps_l1_ca;
