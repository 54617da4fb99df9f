//! Encoding and decoding of the PIO instruction subset executed by lanes.
//!
//! Every instruction is one 16-bit word: opcode in bits 15:13, delay in bits 12:8 (side-set is
//! not modelled, so all five bits are delay), operands in bits 7:0.

use crate::error::PioError;

pub const MAX_DELAY: u8 = 31;

const OP_JMP: u16 = 0b000;
const OP_OUT: u16 = 0b011;
const OP_PUSH_PULL: u16 = 0b100;
const OP_MOV: u16 = 0b101;
const OP_IRQ: u16 = 0b110;
const OP_SET: u16 = 0b111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JmpCondition {
    Always,
    /// `!x`: taken when X is zero.
    XZero,
    /// `x--`: taken when X is non-zero; X is decremented either way.
    XPostDecrement,
    YZero,
    YPostDecrement,
    XNotEqualY,
    /// `!osre`: taken while the output shift register still holds unread bits.
    OsrNotEmpty,
}

impl JmpCondition {
    fn encode(self) -> u16 {
        match self {
            Self::Always => 0b000,
            Self::XZero => 0b001,
            Self::XPostDecrement => 0b010,
            Self::YZero => 0b011,
            Self::YPostDecrement => 0b100,
            Self::XNotEqualY => 0b101,
            Self::OsrNotEmpty => 0b111,
        }
    }

    fn decode(bits: u16) -> Option<Self> {
        Some(match bits {
            0b000 => Self::Always,
            0b001 => Self::XZero,
            0b010 => Self::XPostDecrement,
            0b011 => Self::YZero,
            0b100 => Self::YPostDecrement,
            0b101 => Self::XNotEqualY,
            0b111 => Self::OsrNotEmpty,
            // `pin` conditions need GPIO, which lanes do not model.
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutDest {
    X,
    Y,
    Null,
    Pc,
}

impl OutDest {
    fn encode(self) -> u16 {
        match self {
            Self::X => 0b001,
            Self::Y => 0b010,
            Self::Null => 0b011,
            Self::Pc => 0b101,
        }
    }

    fn decode(bits: u16) -> Option<Self> {
        Some(match bits {
            0b001 => Self::X,
            0b010 => Self::Y,
            0b011 => Self::Null,
            0b101 => Self::Pc,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovDest {
    X,
    Y,
    Pc,
    Osr,
}

impl MovDest {
    fn encode(self) -> u16 {
        match self {
            Self::X => 0b001,
            Self::Y => 0b010,
            Self::Pc => 0b101,
            Self::Osr => 0b111,
        }
    }

    fn decode(bits: u16) -> Option<Self> {
        Some(match bits {
            0b001 => Self::X,
            0b010 => Self::Y,
            0b101 => Self::Pc,
            0b111 => Self::Osr,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovSrc {
    X,
    Y,
    Null,
    Osr,
}

impl MovSrc {
    fn encode(self) -> u16 {
        match self {
            Self::X => 0b001,
            Self::Y => 0b010,
            Self::Null => 0b011,
            Self::Osr => 0b111,
        }
    }

    fn decode(bits: u16) -> Option<Self> {
        Some(match bits {
            0b001 => Self::X,
            0b010 => Self::Y,
            0b011 => Self::Null,
            0b111 => Self::Osr,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovOp {
    None,
    Invert,
    Reverse,
}

impl MovOp {
    fn encode(self) -> u16 {
        match self {
            Self::None => 0b00,
            Self::Invert => 0b01,
            Self::Reverse => 0b10,
        }
    }

    fn decode(bits: u16) -> Option<Self> {
        Some(match bits {
            0b00 => Self::None,
            0b01 => Self::Invert,
            0b10 => Self::Reverse,
            _ => return None,
        })
    }

    pub fn apply(self, value: u32) -> u32 {
        match self {
            Self::None => value,
            Self::Invert => !value,
            Self::Reverse => value.reverse_bits(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetDest {
    X,
    Y,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Jmp {
        cond: JmpCondition,
        addr: u8,
    },
    /// Shift `bit_count` (1..=32) bits out of the OSR.
    Out {
        dest: OutDest,
        bit_count: u8,
    },
    Pull {
        if_empty: bool,
        block: bool,
    },
    Mov {
        dest: MovDest,
        op: MovOp,
        src: MovSrc,
    },
    /// Raise (or clear) IRQ flag `index`. With `rel`, the lane index is added to `index`.
    /// With `wait`, the lane stalls until the flag is cleared by someone else.
    Irq {
        clear: bool,
        wait: bool,
        index: u8,
        rel: bool,
    },
    Set {
        dest: SetDest,
        data: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub delay: u8,
}

impl Instruction {
    pub const fn new(op: Op) -> Self {
        Self { op, delay: 0 }
    }

    pub const fn with_delay(self, delay: u8) -> Self {
        Self { op: self.op, delay }
    }

    /// `mov y, y`, the canonical PIO no-op.
    pub const fn nop() -> Self {
        Self::new(Op::Mov {
            dest: MovDest::Y,
            op: MovOp::None,
            src: MovSrc::Y,
        })
    }

    pub fn encode(&self) -> Result<u16, PioError> {
        if self.delay > MAX_DELAY {
            return Err(PioError::InvalidInstruction("delay exceeds 31 cycles"));
        }

        let (opcode, operands) = match self.op {
            Op::Jmp { cond, addr } => {
                if addr > 0x1F {
                    return Err(PioError::InvalidInstruction("jmp target exceeds 5 bits"));
                }
                (OP_JMP, cond.encode() << 5 | addr as u16)
            }
            Op::Out { dest, bit_count } => {
                if bit_count == 0 || bit_count > 32 {
                    return Err(PioError::InvalidInstruction("out bit count must be 1..=32"));
                }
                (OP_OUT, dest.encode() << 5 | (bit_count as u16 & 0x1F))
            }
            Op::Pull { if_empty, block } => (
                OP_PUSH_PULL,
                1u16 << 7 | (if_empty as u16) << 6 | (block as u16) << 5,
            ),
            Op::Mov { dest, op, src } => {
                (OP_MOV, dest.encode() << 5 | op.encode() << 3 | src.encode())
            }
            Op::Irq {
                clear,
                wait,
                index,
                rel,
            } => {
                if index > 7 {
                    return Err(PioError::InvalidInstruction("irq index exceeds 3 bits"));
                }
                (
                    OP_IRQ,
                    (clear as u16) << 6 | (wait as u16) << 5 | (rel as u16) << 4 | index as u16,
                )
            }
            Op::Set { dest, data } => {
                if data > 0x1F {
                    return Err(PioError::InvalidInstruction("set data exceeds 5 bits"));
                }
                let dest: u16 = match dest {
                    SetDest::X => 0b001,
                    SetDest::Y => 0b010,
                };
                (OP_SET, dest << 5 | data as u16)
            }
        };

        Ok(opcode << 13 | (self.delay as u16) << 8 | operands)
    }

    pub fn decode(word: u16) -> Result<Self, PioError> {
        let unsupported = PioError::UnsupportedInstruction { word };
        let opcode = word >> 13;
        let delay = ((word >> 8) & 0x1F) as u8;
        let hi3 = (word >> 5) & 0b111;
        let lo5 = word & 0x1F;

        let op = match opcode {
            OP_JMP => Op::Jmp {
                cond: JmpCondition::decode(hi3).ok_or(unsupported)?,
                addr: lo5 as u8,
            },
            OP_OUT => Op::Out {
                dest: OutDest::decode(hi3).ok_or(unsupported)?,
                bit_count: if lo5 == 0 { 32 } else { lo5 as u8 },
            },
            OP_PUSH_PULL => {
                // Bit 7 selects PULL; PUSH needs an RX FIFO, which lanes do not model.
                if word & (1 << 7) == 0 || lo5 != 0 {
                    return Err(unsupported);
                }
                Op::Pull {
                    if_empty: word & (1 << 6) != 0,
                    block: word & (1 << 5) != 0,
                }
            }
            OP_MOV => Op::Mov {
                dest: MovDest::decode(hi3).ok_or(unsupported.clone())?,
                op: MovOp::decode((word >> 3) & 0b11).ok_or(unsupported.clone())?,
                src: MovSrc::decode(word & 0b111).ok_or(unsupported)?,
            },
            OP_IRQ => {
                if word & (1 << 7) != 0 || word & 0b1000 != 0 {
                    return Err(unsupported);
                }
                Op::Irq {
                    clear: word & (1 << 6) != 0,
                    wait: word & (1 << 5) != 0,
                    rel: word & (1 << 4) != 0,
                    index: (word & 0b111) as u8,
                }
            }
            OP_SET => Op::Set {
                dest: match hi3 {
                    0b001 => SetDest::X,
                    0b010 => SetDest::Y,
                    _ => return Err(unsupported),
                },
                data: lo5 as u8,
            },
            _ => return Err(unsupported),
        };

        Ok(Self { op, delay })
    }
}
