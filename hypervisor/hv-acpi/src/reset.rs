use crate::{GenericAddress, SpaceId};

/// The PCI reset control register.
pub const CF9_PORT: u16 = 0xCF9;

/// FADT `RESET_REG` and `RESET_VALUE`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ResetRegister {
    pub reg: GenericAddress,
    pub value: u8,
}

/// How the host is going to be reset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResetMethod {
    /// Write `value` to the ACPI reset port.
    AcpiPort { port: u16, value: u8 },
    /// `0x2` then `0xE` to port 0xCF9.
    Cf9,
}

impl ResetRegister {
    /// The ACPI register is used only if it is an 8-bit, offset-0 I/O port
    /// other than 0xCF9. Firmware commonly programs 0x6 for 0xCF9, which
    /// resets devices without cycling the sleep rails.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_lossless)]
    pub const fn method(&self) -> ResetMethod {
        let reg = &self.reg;
        if reg.space_id == SpaceId::SystemIo as u8
            && reg.bit_width == 8
            && reg.bit_offset == 0
            && reg.address != 0
            && reg.address != CF9_PORT as u64
        {
            ResetMethod::AcpiPort {
                port: reg.address as u16,
                value: self.value,
            }
        } else {
            ResetMethod::Cf9
        }
    }
}
