//! Command register codec.
//!
//! Every device operation travels as a single 64-bit register.
//!
//! Layout (most- to least-significant):
//! - Bits 63-56: Opcode (KY1)
//! - Bits 55-48: Secondary key (KY2)
//! - Bit 47: Return/status flag (RT1)
//! - Bits 46-31: Cartridge index (CT1)
//! - Bits 30-15: Frame index (FM1)
//! - Bits 14-0: Reserved (zero on encode, ignored on decode)

const KY1_SHIFT: u32 = 56;
const KY2_SHIFT: u32 = 48;
const RT1_SHIFT: u32 = 47;
const CT1_SHIFT: u32 = 31;
const FM1_SHIFT: u32 = 15;

const KY_MASK: u64 = 0xFF;
const RT_MASK: u64 = 0x1;
const INDEX_MASK: u64 = 0xFFFF;

/// Device operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// 0: Initialize the memory system
    InitMedia = 0,
    /// 1: Zero the currently loaded cartridge
    ZeroCartridge = 1,
    /// 2: Load a cartridge
    LoadCartridge = 2,
    /// 3: Read a frame from the loaded cartridge
    ReadFrame = 3,
    /// 4: Write a frame to the loaded cartridge
    WriteFrame = 4,
    /// 5: Power the device off
    PowerOff = 5,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::InitMedia),
            1 => Ok(Self::ZeroCartridge),
            2 => Ok(Self::LoadCartridge),
            3 => Ok(Self::ReadFrame),
            4 => Ok(Self::WriteFrame),
            5 => Ok(Self::PowerOff),
            _ => Err(value),
        }
    }
}

impl Opcode {
    /// Whether this operation carries a frame payload on the wire.
    pub fn has_payload(self) -> bool {
        matches!(self, Self::ReadFrame | Self::WriteFrame)
    }
}

/// Decoded command register.
///
/// This is a wire format, not a validated object: any `u64` decodes, and
/// the opcode is kept raw so unknown values survive a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CartRegister {
    pub opcode: u8,
    pub key2: u8,
    /// Single bit; only the low bit is encoded.
    pub status: u8,
    pub cartridge: u16,
    pub frame: u16,
}

impl CartRegister {
    /// Build a request register for `op`.
    pub fn command(op: Opcode, cartridge: u16, frame: u16) -> Self {
        Self {
            opcode: op as u8,
            key2: 0,
            status: 0,
            cartridge,
            frame,
        }
    }

    /// Decoded opcode, or the raw byte if it is not a known operation.
    pub fn op(&self) -> Result<Opcode, u8> {
        Opcode::try_from(self.opcode)
    }

    /// True when the status bit reports failure.
    pub fn failed(&self) -> bool {
        self.status & 1 != 0
    }

    /// Pack into a 64-bit register.
    pub fn encode(&self) -> u64 {
        encode(self.opcode, self.key2, self.status, self.cartridge, self.frame)
    }

    /// Unpack a 64-bit register.
    pub fn decode(reg: u64) -> Self {
        decode(reg)
    }
}

impl From<CartRegister> for u64 {
    fn from(reg: CartRegister) -> u64 {
        reg.encode()
    }
}

impl From<u64> for CartRegister {
    fn from(reg: u64) -> Self {
        decode(reg)
    }
}

/// Pack the five register fields. Each value is masked to its field width.
pub fn encode(opcode: u8, key2: u8, status: u8, cartridge: u16, frame: u16) -> u64 {
    ((opcode as u64 & KY_MASK) << KY1_SHIFT)
        | ((key2 as u64 & KY_MASK) << KY2_SHIFT)
        | ((status as u64 & RT_MASK) << RT1_SHIFT)
        | ((cartridge as u64 & INDEX_MASK) << CT1_SHIFT)
        | ((frame as u64 & INDEX_MASK) << FM1_SHIFT)
}

/// Unpack a register into its fields.
pub fn decode(reg: u64) -> CartRegister {
    CartRegister {
        opcode: ((reg >> KY1_SHIFT) & KY_MASK) as u8,
        key2: ((reg >> KY2_SHIFT) & KY_MASK) as u8,
        status: ((reg >> RT1_SHIFT) & RT_MASK) as u8,
        cartridge: ((reg >> CT1_SHIFT) & INDEX_MASK) as u16,
        frame: ((reg >> FM1_SHIFT) & INDEX_MASK) as u16,
    }
}
