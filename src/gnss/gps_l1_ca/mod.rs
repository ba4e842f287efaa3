
pub mod signal_modulation;

pub const CARRIER_FREQ_HZ:f64 = 1575.42e6;
pub const CODE_RATE_CPS:f64 = 1.023e6;
pub const CODE_LENGTH_CHIPS:usize = 1023;
pub const NUM_PRNS:u32 = 32;
