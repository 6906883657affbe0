use anyhow::Result;

/// Representation of X amount of ticks (CPU clock cycles)
/// as seen by the system scheduler.
pub type Ticks = u64;

/// Anything that needs to be advanced in lockstep with the CPU clock.
pub trait Tickable {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks>;
}
