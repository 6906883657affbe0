use proc_bitfield::bitfield;
use serde::{Deserialize, Serialize};

use crate::bus::Address;
use crate::types::Long;

bitfield! {
    /// 68030 root pointer (CRP/SRP)
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct RootPointerReg(pub u64): Debug, FromStorage, IntoStorage, DerefStorage {
        /// If 1, 'limit' is the LOWER limit
        /// If 0, 'limit' is the UPPER limit
        pub lu: bool @ 63,

        /// Minimum/maximum (see 'lu') index of the first table lookup
        pub limit: u16 @ 48..=62,

        /// Descriptor type of the first table
        pub dt: u8 @ 32..=33,

        /// Table base address (physical), in units of 16 bytes
        pub table_addr: u32 @ 4..=31,
    }
}

impl RootPointerReg {
    pub fn table_base(&self) -> Address {
        self.table_addr() << 4
    }

    /// Index violates the limit field
    pub fn exceeds_limit(&self, idx: Address) -> bool {
        limit_violation(self.lu(), self.limit(), idx)
    }
}

/// Limit check of root pointers and long format table descriptors
pub fn limit_violation(lower: bool, limit: u16, idx: Address) -> bool {
    let limit = Address::from(limit & 0x7FFF);
    if lower { idx < limit } else { idx > limit }
}

bitfield! {
    /// 68030 translation control
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TcReg(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        pub enable: bool @ 31,

        /// Supervisor Root Pointer Enable
        pub sre: bool @ 25,

        /// Function Code Lookup
        pub fcl: bool @ 24,

        /// Page Size (log2)
        pub ps: u8 @ 20..=23,

        /// Initial Shift
        pub is: u8 @ 16..=19,

        pub tia: u8 @ 12..=15,
        pub tib: u8 @ 8..=11,
        pub tic: u8 @ 4..=7,
        pub tid: u8 @ 0..=3,
    }
}

impl TcReg {
    /// Table index widths, up to the first zero field
    pub fn levels(&self) -> impl Iterator<Item = u8> {
        [self.tia(), self.tib(), self.tic(), self.tid()]
            .into_iter()
            .take_while(|&ti| ti != 0)
    }

    /// Page size is at least 256 bytes and the fields cover all 32
    /// address bits.
    pub fn is_valid(&self) -> bool {
        let sum = u32::from(self.is()) + u32::from(self.ps()) + self.levels().map(u32::from).sum::<u32>();
        self.ps() >= 8 && self.tia() != 0 && sum == 32
    }

    pub fn page_mask(&self) -> Address {
        (1 << self.ps()) - 1
    }
}

bitfield! {
    /// 68030 transparent translation register (TT0/TT1)
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct TtReg(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Logical address base (A31-A24)
        pub base: u8 @ 24..=31,
        /// Logical address mask, set bits are ignored
        pub mask: u8 @ 16..=23,
        pub enable: bool @ 15,
        /// Cache inhibit
        pub ci: bool @ 10,
        /// 1 = read accesses, 0 = writes
        pub rw: bool @ 9,
        /// Ignore the access direction
        pub rwm: bool @ 8,
        pub fc_base: u8 @ 4..=6,
        pub fc_mask: u8 @ 0..=2,
    }
}

impl TtReg {
    pub fn matches(&self, addr: Address, fc: u8, write: bool) -> bool {
        let ignore = !self.mask();
        self.enable()
            && ((addr >> 24) as u8 ^ self.base()) & ignore == 0
            && (fc ^ self.fc_base()) & !self.fc_mask() & 7 == 0
            && (self.rwm() || self.rw() != write)
    }
}

bitfield! {
    /// 68030 MMU status register
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Mmusr030(pub u16): Debug, FromStorage, IntoStorage, DerefStorage {
        pub bus_error: bool @ 15,
        pub limit_violation: bool @ 14,
        pub supervisor_violation: bool @ 13,
        pub write_protected: bool @ 11,
        pub invalid: bool @ 10,
        pub modified: bool @ 9,
        pub transparent: bool @ 6,
        /// Number of levels walked
        pub level: u8 @ 0..=2,
    }
}

bitfield! {
    /// 68040/68060 translation control
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Tcr040(pub u16): Debug, FromStorage, IntoStorage, DerefStorage {
        pub enable: bool @ 15,
        /// 8K pages instead of 4K
        pub page_8k: bool @ 14,
    }
}

impl Tcr040 {
    pub fn page_mask(&self) -> Address {
        if self.page_8k() { 0x1FFF } else { 0x0FFF }
    }
}

bitfield! {
    /// 68040/68060 transparent translation register (ITTx/DTTx)
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Ttr040(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        pub base: u8 @ 24..=31,
        pub mask: u8 @ 16..=23,
        pub enable: bool @ 15,
        /// 00 = user only, 01 = supervisor only, 1x = both
        pub s_field: u8 @ 13..=14,
        pub u: u8 @ 8..=9,
        /// Cache mode
        pub cm: u8 @ 5..=6,
        pub write_protect: bool @ 2,
    }
}

impl Ttr040 {
    pub fn matches(&self, addr: Address, supervisor: bool) -> bool {
        let s_ok = match self.s_field() {
            0 => !supervisor,
            1 => supervisor,
            _ => true,
        };
        self.enable() && s_ok && ((addr >> 24) as u8 ^ self.base()) & !self.mask() == 0
    }
}

bitfield! {
    /// 68040 MMU status register, result of PTEST
    #[derive(Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct Mmusr040(pub u32): Debug, FromStorage, IntoStorage, DerefStorage {
        /// Physical address (A31-A12)
        pub phys: u32 @ 12..=31,
        pub bus_error: bool @ 11,
        pub global: bool @ 10,
        pub u: u8 @ 8..=9,
        pub supervisor: bool @ 7,
        pub cm: u8 @ 5..=6,
        pub modified: bool @ 4,
        pub write_protected: bool @ 2,
        pub transparent: bool @ 1,
        pub resident: bool @ 0,
    }
}

/// MMU register file. The 68030 and 68040/68060 register sets are
/// disjoint, only the one matching the model is used.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq, Default)]
pub struct MmuRegisterFile {
    pub tc: TcReg,
    pub crp: RootPointerReg,
    pub srp: RootPointerReg,
    pub tt0: TtReg,
    pub tt1: TtReg,
    pub mmusr: Mmusr030,

    pub tcr: Tcr040,
    /// User/supervisor root pointers, 512-byte aligned
    pub urp: Long,
    pub srp_040: Long,
    pub itt0: Ttr040,
    pub itt1: Ttr040,
    pub dtt0: Ttr040,
    pub dtt1: Ttr040,
    pub mmusr_040: Mmusr040,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tc_layout() {
        // E, PS=4K, IS=0, TIA=10, TIB=10
        let tc = TcReg(0x80C0_AA00);
        assert!(tc.enable());
        assert_eq!(tc.ps(), 12);
        assert_eq!(tc.levels().collect::<Vec<_>>(), vec![10, 10]);
        assert!(tc.is_valid());
        assert_eq!(tc.page_mask(), 0xFFF);

        // Sum of 31 bits
        assert!(!TcReg(0x80C0_A900).is_valid());
    }

    #[test]
    fn root_pointer() {
        let rp = RootPointerReg(0x7FFF_0002_0000_1230);
        assert_eq!(rp.dt(), 2);
        assert_eq!(rp.table_base(), 0x1230);
        assert!(!rp.exceeds_limit(0x7FFF));

        let mut rp = rp;
        rp.set_limit(3);
        assert!(rp.exceeds_limit(4));
        rp.set_lu(true);
        assert!(rp.exceeds_limit(2));
        assert!(!rp.exceeds_limit(3));
    }

    #[test]
    fn tt_030() {
        // $40xxxxxx, both directions, any FC
        let tt = TtReg(0x4000_8107);
        assert!(tt.matches(0x4012_3456, 5, false));
        assert!(tt.matches(0x4012_3456, 1, true));
        assert!(!tt.matches(0x4112_3456, 5, false));

        // Reads only
        let tt = TtReg(0x4000_8207);
        assert!(tt.matches(0x4000_0000, 1, false));
        assert!(!tt.matches(0x4000_0000, 1, true));
    }

    #[test]
    fn tt_040() {
        // $80-$8F, supervisor only
        let tt = Ttr040(0x800F_A000);
        assert!(tt.matches(0x8F00_0000, true));
        assert!(!tt.matches(0x8F00_0000, false));
        assert!(!tt.matches(0x9000_0000, true));
    }
}
