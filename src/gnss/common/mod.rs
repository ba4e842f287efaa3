
pub mod acquisition;
pub mod code_table;
pub mod synchro;
pub mod tracking;
