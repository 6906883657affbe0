use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::bus::Address;
use crate::cpu_m68k::{
    ADDRESS_MASK_24, ADDRESS_MASK_32, M68000_SR_MASK, M68020_CACR_MASK, M68020_SR_MASK,
    M68030_CACR_MASK, M68040_CACR_MASK, M68040_SR_MASK, M68060_CACR_MASK, M68060_SR_MASK,
};
use crate::types::{Long, Word};

/// CPU model in the 680x0 family
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
pub enum CpuModel {
    #[default]
    #[strum(to_string = "68000", serialize = "M68000")]
    M68000,
    #[strum(to_string = "68010", serialize = "M68010")]
    M68010,
    #[strum(to_string = "68020", serialize = "M68020")]
    M68020,
    #[strum(to_string = "68030", serialize = "M68030")]
    M68030,
    #[strum(to_string = "68040", serialize = "M68040")]
    M68040,
    #[strum(to_string = "68060", serialize = "M68060")]
    M68060,
}

impl CpuModel {
    pub const fn sr_mask(self) -> Word {
        match self {
            Self::M68000 | Self::M68010 => M68000_SR_MASK,
            Self::M68020 | Self::M68030 => M68020_SR_MASK,
            Self::M68040 => M68040_SR_MASK,
            Self::M68060 => M68060_SR_MASK,
        }
    }

    pub const fn cacr_mask(self) -> Long {
        match self {
            Self::M68000 | Self::M68010 => 0,
            Self::M68020 => M68020_CACR_MASK,
            Self::M68030 => M68030_CACR_MASK,
            Self::M68040 => M68040_CACR_MASK,
            Self::M68060 => M68060_CACR_MASK,
        }
    }

    /// 68010 and up: VBR, SFC/DFC, MOVEC, format word in frames
    pub const fn is_010_or_later(self) -> bool {
        !matches!(self, Self::M68000)
    }

    /// 68020 and up: 32-bit ALU extensions, scaled index, caches
    pub const fn is_020_or_later(self) -> bool {
        !matches!(self, Self::M68000 | Self::M68010)
    }

    /// Word and long accesses on odd addresses raise an address error
    pub const fn checks_alignment(self) -> bool {
        matches!(self, Self::M68000 | Self::M68010)
    }

    /// Has a separate master stack pointer, selected by SR.M
    pub const fn has_msp(self) -> bool {
        matches!(self, Self::M68020 | Self::M68030 | Self::M68040)
    }

    /// Has an on-chip MMU (68030, 68040, 68060)
    pub const fn has_mmu(self) -> bool {
        matches!(self, Self::M68030 | Self::M68040 | Self::M68060)
    }

    /// 24-bit addressing is only available up to the 68020
    pub const fn supports_24bit(self) -> bool {
        matches!(self, Self::M68000 | Self::M68010 | Self::M68020)
    }

    /// 32-bit addressing needs an external bus of at least 68020 width
    pub const fn supports_32bit(self) -> bool {
        self.is_020_or_later()
    }
}

/// Emulation fidelity of the execution loop
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum FidelityMode {
    /// Instruction-granular, bus cycles charged once per instruction
    #[default]
    Fast,
    /// Every bus access advances the system clock as it happens
    CycleExact,
    /// Direct program counter with straight-line block caching
    Jit,
}

/// Floating point unit, either external co-processor or on-chip
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
pub enum FpuModel {
    #[strum(to_string = "68881", serialize = "M68881")]
    M68881,
    #[strum(to_string = "68882", serialize = "M68882")]
    M68882,
    #[strum(to_string = "68040", serialize = "M68040")]
    M68040,
    #[strum(to_string = "68060", serialize = "M68060")]
    M68060,
}

impl FpuModel {
    /// On-chip FPUs lack the transcendental and packed decimal microcode
    pub const fn is_onchip(self) -> bool {
        matches!(self, Self::M68040 | Self::M68060)
    }
}

/// Rejected configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} has no 24-bit addressing mode")]
    No24BitAddressing(CpuModel),
    #[error("{0} has no 32-bit addressing mode")]
    No32BitAddressing(CpuModel),
    #[error("FPU {fpu} cannot be combined with CPU {model}")]
    FpuMismatch { model: CpuModel, fpu: FpuModel },
    #[error("{0} has no MMU")]
    NoMmu(CpuModel),
    #[error("MMU emulation is not available in {0} mode")]
    MmuMode(FidelityMode),
    #[error("{mode} mode is not available for {model}")]
    ModeUnavailable { model: CpuModel, mode: FidelityMode },
}

/// Full CPU configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuConfig {
    pub model: CpuModel,
    pub mode: FidelityMode,
    pub address_space_24: bool,
    pub fpu: Option<FpuModel>,
    pub mmu: bool,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            model: CpuModel::M68000,
            mode: FidelityMode::Fast,
            address_space_24: true,
            fpu: None,
            mmu: false,
        }
    }
}

impl CpuConfig {
    /// Creates the default configuration for the given model: 24-bit
    /// addressing for the 68000/68010, 32-bit for everything else.
    pub fn for_model(model: CpuModel) -> Self {
        Self {
            model,
            address_space_24: !model.supports_32bit(),
            ..Default::default()
        }
    }

    pub fn with_mode(self, mode: FidelityMode) -> Self {
        Self { mode, ..self }
    }

    pub fn with_fpu(self, fpu: Option<FpuModel>) -> Self {
        Self { fpu, ..self }
    }

    pub fn with_mmu(self, mmu: bool) -> Self {
        Self { mmu, ..self }
    }

    pub fn with_address_space_24(self, address_space_24: bool) -> Self {
        Self {
            address_space_24,
            ..self
        }
    }

    pub fn address_mask(&self) -> Address {
        if self.address_space_24 {
            ADDRESS_MASK_24
        } else {
            ADDRESS_MASK_32
        }
    }

    /// Checks whether this combination of options can be emulated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let model = self.model;

        if self.address_space_24 && !model.supports_24bit() {
            return Err(ConfigError::No24BitAddressing(model));
        }
        if !self.address_space_24 && !model.supports_32bit() {
            return Err(ConfigError::No32BitAddressing(model));
        }

        if let Some(fpu) = self.fpu {
            let ok = match model {
                CpuModel::M68000 | CpuModel::M68010 => false,
                CpuModel::M68020 | CpuModel::M68030 => !fpu.is_onchip(),
                CpuModel::M68040 => fpu == FpuModel::M68040,
                CpuModel::M68060 => fpu == FpuModel::M68060,
            };
            if !ok {
                return Err(ConfigError::FpuMismatch { model, fpu });
            }
        }

        match self.mode {
            FidelityMode::CycleExact
                if matches!(model, CpuModel::M68040 | CpuModel::M68060) =>
            {
                return Err(ConfigError::ModeUnavailable {
                    model,
                    mode: self.mode,
                });
            }
            FidelityMode::Jit if !model.is_020_or_later() => {
                return Err(ConfigError::ModeUnavailable {
                    model,
                    mode: self.mode,
                });
            }
            _ => (),
        }

        if self.mmu {
            if !model.has_mmu() {
                return Err(ConfigError::NoMmu(model));
            }
            if self.mode != FidelityMode::Fast {
                return Err(ConfigError::MmuMode(self.mode));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn default_config() {
        let c = CpuConfig::default();
        assert_eq!(c.model, CpuModel::M68000);
        assert_eq!(c.mode, FidelityMode::Fast);
        assert!(c.address_space_24);
        assert_eq!(c.fpu, None);
        assert!(!c.mmu);
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn model_defaults_valid() {
        for model in CpuModel::iter() {
            assert_eq!(CpuConfig::for_model(model).validate(), Ok(()), "{}", model);
        }
    }

    #[test]
    fn reject_24bit_030() {
        let c = CpuConfig::for_model(CpuModel::M68030).with_address_space_24(true);
        assert_eq!(
            c.validate(),
            Err(ConfigError::No24BitAddressing(CpuModel::M68030))
        );
    }

    #[test]
    fn reject_32bit_68000() {
        let c = CpuConfig::for_model(CpuModel::M68000).with_address_space_24(false);
        assert_eq!(
            c.validate(),
            Err(ConfigError::No32BitAddressing(CpuModel::M68000))
        );
    }

    #[test]
    fn reject_fpu_68000() {
        let c = CpuConfig::for_model(CpuModel::M68000).with_fpu(Some(FpuModel::M68881));
        assert!(matches!(c.validate(), Err(ConfigError::FpuMismatch { .. })));
    }

    #[test]
    fn fpu_pairing() {
        let c = CpuConfig::for_model(CpuModel::M68030).with_fpu(Some(FpuModel::M68882));
        assert_eq!(c.validate(), Ok(()));
        let c = CpuConfig::for_model(CpuModel::M68040).with_fpu(Some(FpuModel::M68882));
        assert!(c.validate().is_err());
        let c = CpuConfig::for_model(CpuModel::M68040).with_fpu(Some(FpuModel::M68040));
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn reject_ce_040() {
        let c = CpuConfig::for_model(CpuModel::M68040).with_mode(FidelityMode::CycleExact);
        assert!(matches!(
            c.validate(),
            Err(ConfigError::ModeUnavailable { .. })
        ));
    }

    #[test]
    fn reject_jit_68000() {
        let c = CpuConfig::for_model(CpuModel::M68000).with_mode(FidelityMode::Jit);
        assert!(matches!(
            c.validate(),
            Err(ConfigError::ModeUnavailable { .. })
        ));
    }

    #[test]
    fn reject_mmu() {
        let c = CpuConfig::for_model(CpuModel::M68020).with_mmu(true);
        assert_eq!(c.validate(), Err(ConfigError::NoMmu(CpuModel::M68020)));
        let c = CpuConfig::for_model(CpuModel::M68030)
            .with_mmu(true)
            .with_mode(FidelityMode::Jit);
        assert_eq!(c.validate(), Err(ConfigError::MmuMode(FidelityMode::Jit)));
        let c = CpuConfig::for_model(CpuModel::M68040).with_mmu(true);
        assert_eq!(c.validate(), Ok(()));
    }

    #[test]
    fn parse_names() {
        assert_eq!(CpuModel::from_str("68030").unwrap(), CpuModel::M68030);
        assert_eq!(CpuModel::from_str("M68060").unwrap(), CpuModel::M68060);
        assert_eq!(CpuModel::M68020.to_string(), "68020");
        assert_eq!(
            FidelityMode::from_str("cycle-exact").unwrap(),
            FidelityMode::CycleExact
        );
        assert_eq!(FpuModel::from_str("68882").unwrap(), FpuModel::M68882);
    }

    #[test]
    fn json_config() {
        let c: CpuConfig =
            serde_json::from_str(r#"{"model": "M68030", "address_space_24": false, "mode": "jit"}"#)
                .unwrap();
        assert_eq!(c.model, CpuModel::M68030);
        assert_eq!(c.mode, FidelityMode::Jit);
        assert!(!c.mmu);
        assert_eq!(c.validate(), Ok(()));
    }
}
