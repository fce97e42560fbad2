//////////////////////////////////////////////////////////////
/// Forth Interpreter Kernel
///
/// This module contains the core data structures for the interpreter:
/// the cell type, the register map, the opcode set, and the Kernel struct
/// that owns the single contiguous cell array everything else lives in.
///
/// All addresses handed around the interpreter are cell indices into that
/// array, never pointers, and every access from interpreted code goes
/// through the bounds-checked `get`/`set` accessors. An out-of-range index
/// is a fatal fault that unwinds the run loop and poisons the image.
///
use thiserror::Error;

#[cfg(feature = "cell16")]
pub type Cell = u16;
#[cfg(feature = "cell16")]
pub type SignedCell = i16;

#[cfg(all(feature = "cell32", not(feature = "cell16")))]
pub type Cell = u32;
#[cfg(all(feature = "cell32", not(feature = "cell16")))]
pub type SignedCell = i32;

#[cfg(not(any(feature = "cell16", feature = "cell32")))]
pub type Cell = u64;
#[cfg(not(any(feature = "cell16", feature = "cell32")))]
pub type SignedCell = i64;

pub const CELL_BYTES: usize = std::mem::size_of::<Cell>();

// MEMORY LAYOUT constants
pub const REGISTER_COUNT: usize = 32;
pub const MAXIMUM_WORD_LENGTH: usize = 32; // bytes, including the NUL
pub const WORD_BUFFER_START: usize = REGISTER_COUNT; // cell index of the token buffer
pub const DICTIONARY_START: usize = WORD_BUFFER_START + MAXIMUM_WORD_LENGTH / CELL_BYTES;
pub const MINIMUM_CORE_SIZE: usize = 2048; // cells
pub const DEFAULT_CORE_SIZE: usize = 32 * 1024; // cells
pub const MINIMUM_STACK_SIZE: usize = 64; // cells, per stack

// REGISTERS (cell indices into the low end of memory)
pub const PUSH_CELL: usize = 2; // prefilled with PUSH; compiled literals call it
pub const DIC: usize = 6; // next free dictionary cell
pub const RSTK: usize = 7; // return stack pointer
pub const STATE: usize = 8; // 0 = interpret, 1 = compile
pub const BASE: usize = 9; // numeric base, 0 = by prefix
pub const PWD: usize = 10; // link cell of the latest dictionary entry
pub const SOURCE_ID: usize = 11; // 0 = file-like input, all-ones = string input
pub const SIN: usize = 12; // string input pointer (informational)
pub const SIDX: usize = 13; // string input cursor
pub const SLEN: usize = 14; // string input length
pub const FIN: usize = 16; // file-like input id: 0 = stdin, 1 = file
pub const FOUT: usize = 17; // output sink id: 0 = stdout, 1 = custom
pub const INVALID: usize = 24; // sticky fatal flag
pub const TOP: usize = 25; // saved top-of-stack between runs
pub const INSTRUCTION: usize = 26; // saved program counter between runs
pub const STACK_SIZE: usize = 27; // size of each stack in cells

// OPCODES
//
// The numbering is pinned: opcode cells are stored in the dictionary and
// therefore in every serialized image.
pub const PUSH: Cell = 0;
pub const COMPILE: Cell = 1;
pub const RUN: Cell = 2;
pub const DEFINE: Cell = 3;
pub const IMMEDIATE: Cell = 4;
pub const READ: Cell = 5;
pub const LOAD: Cell = 6;
pub const STORE: Cell = 7;
pub const SUB: Cell = 8;
pub const ADD: Cell = 9;
pub const AND: Cell = 10;
pub const OR: Cell = 11;
pub const XOR: Cell = 12;
pub const INV: Cell = 13;
pub const SHL: Cell = 14;
pub const SHR: Cell = 15;
pub const MUL: Cell = 16;
pub const DIV: Cell = 17;
pub const LESS: Cell = 18;
pub const MORE: Cell = 19;
pub const EXIT: Cell = 20;
pub const EMIT: Cell = 21;
pub const KEY: Cell = 22;
pub const FROMR: Cell = 23;
pub const TOR: Cell = 24;
pub const BRANCH: Cell = 25;
pub const QBRANCH: Cell = 26;
pub const PNUM: Cell = 27;
pub const QUOTE: Cell = 28;
pub const COMMA: Cell = 29;
pub const EQUAL: Cell = 30;
pub const SWAP: Cell = 31;
pub const DUP: Cell = 32;
pub const DROP: Cell = 33;
pub const OVER: Cell = 34;
pub const TAIL: Cell = 35;
pub const BSAVE: Cell = 36;
pub const BLOAD: Cell = 37;
pub const FIND: Cell = 38;
pub const PRINT: Cell = 39;
pub const DEPTH: Cell = 40;
pub const CLOCK: Cell = 41;

pub const OPCODE_MASK: Cell = 0x7f;
pub const HIDDEN_BIT: Cell = 0x80;
const NAME_CELLS_SHIFT: u32 = 8;

/// Pack a word's misc cell: name length in cells, hidden flag clear,
/// opcode in the low seven bits.
pub fn misc_pack(name_cells: usize, opcode: Cell) -> Cell {
    ((name_cells as Cell) << NAME_CELLS_SHIFT) | (opcode & OPCODE_MASK)
}

pub fn misc_opcode(misc: Cell) -> Cell {
    misc & OPCODE_MASK
}

pub fn misc_name_cells(misc: Cell) -> usize {
    ((misc >> NAME_CELLS_SHIFT) & 0xff) as usize
}

pub fn misc_hidden(misc: Cell) -> bool {
    misc & HIDDEN_BIT != 0
}

/// Everything that can go wrong in the interpreter or its host interface.
///
/// `Bounds` and `IllegalOpcode` are the fatal kinds: the run loop maps them
/// to a `( fatal ... )` diagnostic and marks the image invalid.
#[derive(Debug, Error)]
pub enum ForthError {
    #[error("bounds check failed: {index} >= {size}")]
    Bounds { index: usize, size: usize },
    #[error("illegal opcode: {0}")]
    IllegalOpcode(Cell),
    #[error("core is invalid")]
    Invalid,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("{0} is not a word")]
    WordNotFound(String),
    #[error("word name too long: {0}")]
    NameTooLong(String),
    #[error("not a core file")]
    BadHeader,
    #[error("core file truncated")]
    Truncated,
    #[error("core too small: {0} cells")]
    CoreTooSmall(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ForthError {
    /// Fatal faults poison the image; everything else is recoverable or
    /// host-side only.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ForthError::Bounds { .. } | ForthError::IllegalOpcode(_)
        )
    }
}

/// The cell array. One zero-initialized allocation holds the registers,
/// the token buffer, the dictionary, and both stacks.
pub struct Kernel {
    m: Vec<Cell>,
}

impl Kernel {
    pub fn new(size: usize) -> Kernel {
        debug_assert!(size >= MINIMUM_CORE_SIZE);
        Kernel { m: vec![0; size] }
    }

    /// Rebuild a kernel from cells read back out of an image.
    pub fn from_cells(m: Vec<Cell>) -> Kernel {
        debug_assert!(m.len() >= MINIMUM_CORE_SIZE);
        Kernel { m }
    }

    pub fn size(&self) -> usize {
        self.m.len()
    }

    pub fn cells(&self) -> &[Cell] {
        &self.m
    }

    /// Bounds-checked cell read. Out of range is a fatal fault.
    #[inline(always)]
    pub fn get(&self, addr: usize) -> Result<Cell, ForthError> {
        match self.m.get(addr) {
            Some(v) => Ok(*v),
            None => Err(ForthError::Bounds {
                index: addr,
                size: self.m.len(),
            }),
        }
    }

    /// Bounds-checked cell write.
    #[inline(always)]
    pub fn set(&mut self, addr: usize, val: Cell) -> Result<(), ForthError> {
        let size = self.m.len();
        match self.m.get_mut(addr) {
            Some(slot) => {
                *slot = val;
                Ok(())
            }
            None => Err(ForthError::Bounds { index: addr, size }),
        }
    }

    /// Register access. Registers occupy the first few cells, below any
    /// address the interpreter can allocate, so this is infallible.
    #[inline(always)]
    pub fn reg(&self, r: usize) -> Cell {
        debug_assert!(r < REGISTER_COUNT);
        self.m[r]
    }

    #[inline(always)]
    pub fn set_reg(&mut self, r: usize, val: Cell) {
        debug_assert!(r < REGISTER_COUNT);
        self.m[r] = val;
    }

    /// Byte view of the cell array, native byte order within each cell.
    pub fn byte_get(&self, addr: usize) -> Result<u8, ForthError> {
        let cell = self.get(addr / CELL_BYTES)?;
        Ok(cell.to_ne_bytes()[addr % CELL_BYTES])
    }

    pub fn byte_set(&mut self, addr: usize, val: u8) -> Result<(), ForthError> {
        let mut bytes = self.get(addr / CELL_BYTES)?.to_ne_bytes();
        bytes[addr % CELL_BYTES] = val;
        self.set(addr / CELL_BYTES, Cell::from_ne_bytes(bytes))
    }

    pub fn write_bytes(&mut self, addr: usize, bytes: &[u8]) -> Result<(), ForthError> {
        for (i, b) in bytes.iter().enumerate() {
            self.byte_set(addr + i, *b)?;
        }
        Ok(())
    }

    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<Vec<u8>, ForthError> {
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            out.push(self.byte_get(addr + i)?);
        }
        Ok(out)
    }

    /// Write a name into memory as a NUL-terminated byte string.
    pub fn write_name(&mut self, addr: usize, name: &[u8]) -> Result<(), ForthError> {
        self.write_bytes(addr, name)?;
        self.byte_set(addr + name.len(), 0)
    }

    /// Read a NUL-terminated byte string starting at a byte address.
    /// Running off the end of memory before the NUL is a bounds fault.
    pub fn cstring_at(&self, addr: usize) -> Result<Vec<u8>, ForthError> {
        let mut out = Vec::new();
        let mut i = addr;
        loop {
            let b = self.byte_get(i)?;
            if b == 0 {
                return Ok(out);
            }
            out.push(b);
            i += 1;
        }
    }
}
