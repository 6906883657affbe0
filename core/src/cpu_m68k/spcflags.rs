use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

bitfield! {
    /// Conditions checked between instructions. The execution loop only
    /// takes the slow path when any of these is set.
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct SpecialFlags(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        /// An interrupt above the mask is being presented
        pub int: bool @ 3,
        /// Debugger requested a break
        pub brk: bool @ 4,
        /// Trace exception is due after the current instruction
        pub dotrace: bool @ 7,
        /// Single-step requested by the debugger
        pub single_step: bool @ 9,
        /// Access fault waiting for delivery
        pub fault: bool @ 10,
        /// Reset requested
        pub reset: bool @ 12,
        /// Exception queued by the debugger
        pub forced: bool @ 14,
    }
}

impl SpecialFlags {
    /// Slow path needed
    pub fn any(&self) -> bool {
        self.0 != 0
    }
}
