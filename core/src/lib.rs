pub mod bus;
pub mod cpu_m68k;
pub mod debuggable;
pub mod tickable;
pub mod types;
pub mod util;
