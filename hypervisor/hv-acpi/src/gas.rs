/// ACPI address space identifiers (ACPI 6.5, Table 5.25).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum SpaceId {
    SystemMemory = 0x00,
    SystemIo = 0x01,
    PciConfig = 0x02,
    EmbeddedController = 0x03,
    SmBus = 0x04,
    FunctionalFixedHw = 0x7F,
}

impl SpaceId {
    #[must_use]
    pub const fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0x00 => Self::SystemMemory,
            0x01 => Self::SystemIo,
            0x02 => Self::PciConfig,
            0x03 => Self::EmbeddedController,
            0x04 => Self::SmBus,
            0x7F => Self::FunctionalFixedHw,
            _ => return None,
        })
    }
}

/// ACPI Generic Address Structure.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct GenericAddress {
    pub space_id: u8,
    pub bit_width: u8,
    pub bit_offset: u8,
    pub access_size: u8,
    pub address: u64,
}

impl GenericAddress {
    /// A descriptor that names no register.
    pub const NONE: Self = Self::new(SpaceId::SystemMemory, 0, 0);

    #[must_use]
    pub const fn new(space: SpaceId, bit_width: u8, address: u64) -> Self {
        Self {
            space_id: space as u8,
            bit_width,
            bit_offset: 0,
            access_size: 0,
            address,
        }
    }

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn system_io(port: u16, bit_width: u8) -> Self {
        Self::new(SpaceId::SystemIo, bit_width, port as u64)
    }

    #[must_use]
    pub const fn system_memory(paddr: u64, bit_width: u8) -> Self {
        Self::new(SpaceId::SystemMemory, bit_width, paddr)
    }

    #[must_use]
    pub const fn space(&self) -> Option<SpaceId> {
        SpaceId::from_raw(self.space_id)
    }

    #[must_use]
    pub const fn is_present(&self) -> bool {
        self.address != 0
    }

    #[must_use]
    pub const fn is_memory_mapped(&self) -> bool {
        self.space_id == SpaceId::SystemMemory as u8
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn port(&self) -> u16 {
        self.address as u16
    }

    /// 16-bit read routed by the address space.
    pub fn read16(&self, io: &(impl RegisterIo + ?Sized)) -> u16 {
        if self.is_memory_mapped() {
            io.mmio_read16(self.address)
        } else {
            io.pio_read16(self.port())
        }
    }

    /// 16-bit write routed by the address space.
    pub fn write16(&self, io: &(impl RegisterIo + ?Sized), value: u16) {
        if self.is_memory_mapped() {
            io.mmio_write16(self.address, value);
        } else {
            io.pio_write16(self.port(), value);
        }
    }

    /// 8-bit port write; the caller has checked the register lives in I/O space.
    pub fn write8_port(&self, io: &(impl RegisterIo + ?Sized), value: u8) {
        io.pio_write8(self.port(), value);
    }
}

/// Raw register access used by the ACPI sequences.
///
/// Memory addresses are host-physical; the implementation maps them.
pub trait RegisterIo {
    fn mmio_read16(&self, paddr: u64) -> u16;
    fn mmio_write16(&self, paddr: u64, value: u16);
    fn pio_read16(&self, port: u16) -> u16;
    fn pio_write16(&self, port: u16, value: u16);
    fn pio_write8(&self, port: u16, value: u8);
}
