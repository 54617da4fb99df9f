use crate::error::PioError;

use super::instr::{Instruction, MovDest, MovOp, MovSrc, Op, OutDest};

pub const INSTRUCTION_MEMORY_WORDS: usize = 32;

/// A relocatable lane program.
///
/// `jmp` targets and wrap bounds are relative to the first instruction; they are rebased when
/// the program is loaded into [`InstructionMemory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    instructions: Vec<Instruction>,
    origin: Option<u8>,
    wrap_target: u8,
    wrap: u8,
}

impl Program {
    /// Builds a program that wraps from its last instruction back to its first.
    pub fn new(instructions: Vec<Instruction>) -> Result<Self, PioError> {
        let wrap = instructions.len().saturating_sub(1) as u8;
        Self::with_wrap(instructions, 0, wrap)
    }

    pub fn with_wrap(
        instructions: Vec<Instruction>,
        wrap_target: u8,
        wrap: u8,
    ) -> Result<Self, PioError> {
        let len = instructions.len();
        if len == 0 {
            return Err(PioError::InvalidInstruction("program is empty"));
        }
        if len > INSTRUCTION_MEMORY_WORDS {
            return Err(PioError::ProgramTooLong {
                len,
                capacity: INSTRUCTION_MEMORY_WORDS,
            });
        }
        if wrap_target > wrap || wrap as usize >= len {
            return Err(PioError::InvalidWrap {
                wrap_target,
                wrap,
                len,
            });
        }
        for instr in &instructions {
            instr.encode()?;
        }

        Ok(Self {
            instructions,
            origin: None,
            wrap_target,
            wrap,
        })
    }

    /// Pins the program to a fixed load offset.
    pub fn at_origin(mut self, origin: u8) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn origin(&self) -> Option<u8> {
        self.origin
    }

    pub fn wrap_target(&self) -> u8 {
        self.wrap_target
    }

    pub fn wrap(&self) -> u8 {
        self.wrap
    }
}

/// The event loop every lane runs:
///
/// ```text
/// .wrap_target
///     pull block          ; wait for the signal word
///     out x, 1            ; take the one-bit signal value
///     mov y, ~x           ; placeholder work
///     irq wait 0 rel      ; raise this lane's flag, hold until acknowledged
/// .wrap
/// ```
///
/// `irq wait` both raises the flag and stalls until it is cleared, so a lane can never raise a
/// second event before the first has been acknowledged.
pub fn lane_event_program() -> Program {
    let instructions = vec![
        Instruction::new(Op::Pull {
            if_empty: false,
            block: true,
        }),
        Instruction::new(Op::Out {
            dest: OutDest::X,
            bit_count: 1,
        }),
        Instruction::new(Op::Mov {
            dest: MovDest::Y,
            op: MovOp::Invert,
            src: MovSrc::X,
        }),
        Instruction::new(Op::Irq {
            clear: false,
            wait: true,
            index: 0,
            rel: true,
        }),
    ];
    Program {
        wrap: instructions.len() as u8 - 1,
        instructions,
        origin: None,
        wrap_target: 0,
    }
}

/// The shared 32-word instruction store of a block.
#[derive(Debug, Clone)]
pub struct InstructionMemory {
    words: [u16; INSTRUCTION_MEMORY_WORDS],
    used: u32,
}

impl Default for InstructionMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionMemory {
    pub fn new() -> Self {
        Self {
            words: [Instruction::nop().encode().unwrap_or(0); INSTRUCTION_MEMORY_WORDS],
            used: 0,
        }
    }

    pub fn word(&self, addr: u8) -> u16 {
        self.words[addr as usize % INSTRUCTION_MEMORY_WORDS]
    }

    pub fn used_mask(&self) -> u32 {
        self.used
    }

    /// Finds a load offset for `program` without loading it.
    pub fn find_offset(&self, program: &Program) -> Result<u8, PioError> {
        let len = program.len();
        if len > INSTRUCTION_MEMORY_WORDS {
            return Err(PioError::ProgramTooLong {
                len,
                capacity: INSTRUCTION_MEMORY_WORDS,
            });
        }
        let fits = |offset: usize| {
            offset + len <= INSTRUCTION_MEMORY_WORDS && self.used & span_mask(offset, len) == 0
        };

        match program.origin() {
            Some(origin) if fits(origin as usize) => Ok(origin),
            Some(_) => Err(PioError::NoProgramSpace { len }),
            // Search from the top so fixed-origin programs at 0 keep their slot.
            None => (0..=INSTRUCTION_MEMORY_WORDS - len)
                .rev()
                .find(|&offset| fits(offset))
                .map(|offset| offset as u8)
                .ok_or(PioError::NoProgramSpace { len }),
        }
    }

    /// Loads `program` and returns its offset. `jmp` targets are rebased onto the offset.
    pub fn add_program(&mut self, program: &Program) -> Result<u8, PioError> {
        let offset = self.find_offset(program)?;

        for (idx, instr) in program.instructions().iter().enumerate() {
            let mut relocated = *instr;
            if let Op::Jmp { cond, addr } = instr.op {
                relocated.op = Op::Jmp {
                    cond,
                    addr: (addr + offset) % INSTRUCTION_MEMORY_WORDS as u8,
                };
            }
            self.words[offset as usize + idx] = relocated.encode()?;
        }
        self.used |= span_mask(offset as usize, program.len());

        Ok(offset)
    }

    /// Frees the words occupied by a program loaded at `offset`.
    pub fn remove_program(&mut self, program: &Program, offset: u8) {
        self.used &= !span_mask(offset as usize, program.len());
    }
}

fn span_mask(offset: usize, len: usize) -> u32 {
    let bits = if len >= 32 {
        u32::MAX
    } else {
        (1u32 << len) - 1
    };
    bits << offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pio::instr::JmpCondition;

    #[test]
    fn lane_event_program_wraps_over_all_four_instructions() {
        let program = lane_event_program();
        let rebuilt = Program::new(program.instructions().to_vec()).unwrap();
        assert_eq!(rebuilt, program);
        assert_eq!(program.len(), 4);
        assert_eq!(program.wrap_target(), 0);
        assert_eq!(program.wrap(), 3);
    }

    #[test]
    fn add_program_fills_from_the_top() {
        let mut imem = InstructionMemory::new();
        let program = lane_event_program();

        assert_eq!(imem.add_program(&program), Ok(28));
        assert_eq!(imem.add_program(&program), Ok(24));
        assert_eq!(imem.used_mask(), 0xFF00_0000);
        assert_eq!(imem.word(28), 0x80A0);
        assert_eq!(imem.word(31), 0xC030);
    }

    #[test]
    fn add_program_relocates_jumps() {
        let mut imem = InstructionMemory::new();
        let program = Program::new(vec![
            Instruction::nop(),
            Instruction::new(Op::Jmp {
                cond: JmpCondition::Always,
                addr: 0,
            }),
        ])
        .unwrap();

        let offset = imem.add_program(&program).unwrap();
        assert_eq!(offset, 30);
        let jmp = Instruction::decode(imem.word(31)).unwrap();
        assert_eq!(
            jmp.op,
            Op::Jmp {
                cond: JmpCondition::Always,
                addr: 30
            }
        );
    }

    #[test]
    fn fixed_origin_conflicts_are_rejected() {
        let mut imem = InstructionMemory::new();
        let program = lane_event_program().at_origin(0);
        assert_eq!(imem.add_program(&program), Ok(0));
        assert_eq!(
            imem.add_program(&program),
            Err(PioError::NoProgramSpace { len: 4 })
        );

        imem.remove_program(&program, 0);
        assert_eq!(imem.add_program(&program), Ok(0));
    }

    #[test]
    fn memory_runs_out_after_eight_copies() {
        let mut imem = InstructionMemory::new();
        let program = lane_event_program();
        for _ in 0..8 {
            imem.add_program(&program).unwrap();
        }
        assert_eq!(imem.used_mask(), u32::MAX);
        assert_eq!(
            imem.add_program(&program),
            Err(PioError::NoProgramSpace { len: 4 })
        );
    }

    #[test]
    fn program_shape_is_validated() {
        assert!(Program::new(Vec::new()).is_err());
        assert!(matches!(
            Program::new(vec![Instruction::nop(); 33]),
            Err(PioError::ProgramTooLong { len: 33, .. })
        ));
        assert!(matches!(
            Program::with_wrap(vec![Instruction::nop(); 2], 1, 2),
            Err(PioError::InvalidWrap { .. })
        ));
    }
}
