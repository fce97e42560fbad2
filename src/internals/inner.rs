/// Inner Interpreter
///
/// The threaded-code dispatch loop. The outer loop fetches the next code
/// cell through the instruction pointer I; the fetched cell becomes the
/// word pointer pc, and the inner dispatch executes the opcode found in
/// the low seven bits of m[pc]. Almost every opcode hands control back
/// to the outer loop; READ is the exception, re-entering the inner
/// dispatch with pc aimed at whatever word it just looked up.
///
/// The top of the data stack is cached in a local, f, with the rest of
/// the stack in the high region of cell memory; f is parked in the TOP
/// register whenever the loop yields, and the instruction pointer in
/// INSTRUCTION, which is what makes a suspended image resumable.
///
/// There is no per-operation stack checking here. Stack pointers that
/// wander out of their regions end up producing cell indexes outside
/// memory, and the bounds check on every access catches that and unwinds
/// with a fatal fault.
use crate::internals::reader::{format_cell, numberify};
use crate::kernel::{
    misc_opcode, Cell, ForthError, SignedCell, ADD, AND, BASE, BLOAD, BRANCH, BSAVE, CELL_BYTES,
    CLOCK, COMMA,
    COMPILE, DEFINE, DEPTH, DIC, DICTIONARY_START, DIV, DROP, DUP, EMIT, EQUAL, EXIT, FIND, FROMR,
    IMMEDIATE, INSTRUCTION, INV, KEY, LESS, LOAD, MORE, MUL, OPCODE_MASK, OR, OVER, PNUM, PRINT,
    PUSH, PUSH_CELL, QBRANCH, QUOTE, READ, RSTK, RUN, SHL, SHR, STATE, STORE, SUB, SWAP, TAIL, TOP,
    TOR, XOR,
};
use crate::runtime::ForthRuntime;

// Stack primitives. push saves the cached top into memory and caches the
// new value; pop returns the cached top and pulls the next cell up. nos
// pulls the cell below the cached top (the C idiom *S--).
macro_rules! push {
    ($self:ident, $f:ident, $val:expr) => {{
        let v = $val;
        $self.sp = $self.sp.wrapping_add(1);
        $self.kernel.set($self.sp, $f)?;
        $f = v;
    }};
}
macro_rules! nos {
    ($self:ident) => {{
        let r = $self.kernel.get($self.sp)?;
        $self.sp = $self.sp.wrapping_sub(1);
        r
    }};
}

impl ForthRuntime {
    /// Run threaded code from the saved instruction pointer until the
    /// input is exhausted, a zero code cell is fetched, or a fatal fault
    /// unwinds the loop. On a clean exit the cached top of stack and the
    /// instruction pointer are parked in their registers.
    pub(crate) fn execute(&mut self) -> Result<(), ForthError> {
        let mut i = self.kernel.reg(INSTRUCTION) as usize;
        let mut f = self.kernel.reg(TOP);

        'outer: loop {
            let next = self.kernel.get(i)?;
            i = i.wrapping_add(1);
            if next == 0 {
                break 'outer;
            }
            let mut pc = next as usize;

            'inner: loop {
                let op = misc_opcode(self.kernel.get(pc)?);
                pc = pc.wrapping_add(1);

                match op {
                    PUSH => {
                        push!(self, f, self.kernel.get(i)?);
                        i = i.wrapping_add(1);
                    }
                    // Append the current word position to the dictionary:
                    // this is what compiles a reference to a found word.
                    COMPILE => {
                        self.dict_append(pc as Cell)?;
                    }
                    RUN => {
                        let r = self.kernel.reg(RSTK).wrapping_add(1);
                        self.kernel.set(r as usize, i as Cell)?;
                        self.kernel.set_reg(RSTK, r);
                        i = pc;
                    }
                    // : <name>  enter compile mode and open a definition.
                    DEFINE => {
                        self.kernel.set_reg(STATE, 1);
                        let name = match self.get_word()? {
                            Some(name) => name,
                            None => break 'outer,
                        };
                        self.compile_word(COMPILE, &name)?;
                        self.dict_append(RUN)?;
                    }
                    // Rewrite the newest header so its misc cell executes
                    // RUN directly; the word now runs even while compiling,
                    // and its body starts where the RUN cell sat.
                    IMMEDIATE => {
                        let d = self.kernel.reg(DIC).wrapping_sub(2);
                        let misc = self.kernel.get(d as usize)?;
                        self.kernel
                            .set(d as usize, (misc & !OPCODE_MASK) | RUN)?;
                        self.kernel.set_reg(DIC, d.wrapping_add(1));
                    }
                    READ => {
                        let token = match self.get_word()? {
                            Some(token) => token,
                            None => break 'outer,
                        };
                        let w = self.find_word(&token)?;
                        if w > 1 {
                            pc = w as usize;
                            // In interpret mode, step past a compiling
                            // header so the underlying opcode executes.
                            if self.kernel.reg(STATE) == 0
                                && misc_opcode(self.kernel.get(pc)?) == COMPILE
                            {
                                pc = pc.wrapping_add(1);
                            }
                            continue 'inner;
                        }
                        match numberify(self.kernel.reg(BASE), &token) {
                            Some(n) => {
                                if self.kernel.reg(STATE) != 0 {
                                    self.dict_append(PUSH_CELL as Cell)?;
                                    self.dict_append(n)?;
                                } else {
                                    push!(self, f, n);
                                }
                            }
                            None => {
                                let text = String::from_utf8_lossy(&token);
                                log::debug!("lookup and number conversion failed: {text}");
                                self.msg.error(&format!("{text} is not a word"));
                            }
                        }
                    }
                    LOAD => {
                        f = self.kernel.get(f as usize)?;
                    }
                    STORE => {
                        let v = nos!(self);
                        self.kernel.set(f as usize, v)?;
                        f = nos!(self);
                    }
                    SUB => {
                        f = nos!(self).wrapping_sub(f);
                    }
                    ADD => {
                        f = nos!(self).wrapping_add(f);
                    }
                    AND => {
                        f = nos!(self) & f;
                    }
                    OR => {
                        f = nos!(self) | f;
                    }
                    XOR => {
                        f = nos!(self) ^ f;
                    }
                    INV => {
                        f = !f;
                    }
                    SHL => {
                        f = nos!(self).wrapping_shl(f as u32);
                    }
                    SHR => {
                        f = nos!(self).wrapping_shr(f as u32);
                    }
                    MUL => {
                        f = nos!(self).wrapping_mul(f);
                    }
                    DIV => {
                        if f == 0 {
                            self.msg.error("division by zero");
                        } else {
                            f = nos!(self) / f;
                        }
                    }
                    LESS => {
                        f = if nos!(self) < f { Cell::MAX } else { 0 };
                    }
                    MORE => {
                        f = if nos!(self) > f { Cell::MAX } else { 0 };
                    }
                    EQUAL => {
                        f = if nos!(self) == f { Cell::MAX } else { 0 };
                    }
                    EXIT => {
                        let r = self.kernel.reg(RSTK);
                        i = self.kernel.get(r as usize)? as usize;
                        self.kernel.set_reg(RSTK, r.wrapping_sub(1));
                    }
                    EMIT => {
                        let _ = self.output.write_all(&[(f & 0xff) as u8]);
                        f = nos!(self);
                    }
                    KEY => {
                        let c = self.get_char();
                        push!(self, f, c.map_or(Cell::MAX, |b| b as Cell));
                    }
                    FROMR => {
                        let r = self.kernel.reg(RSTK);
                        let v = self.kernel.get(r as usize)?;
                        self.kernel.set_reg(RSTK, r.wrapping_sub(1));
                        push!(self, f, v);
                    }
                    TOR => {
                        let r = self.kernel.reg(RSTK).wrapping_add(1);
                        self.kernel.set(r as usize, f)?;
                        self.kernel.set_reg(RSTK, r);
                        f = nos!(self);
                    }
                    BRANCH => {
                        let offset = self.kernel.get(i)? as SignedCell;
                        i = i.wrapping_add(offset as isize as usize);
                    }
                    QBRANCH => {
                        if f == 0 {
                            let offset = self.kernel.get(i)? as SignedCell;
                            i = i.wrapping_add(offset as isize as usize);
                        } else {
                            i = i.wrapping_add(1);
                        }
                        f = nos!(self);
                    }
                    PNUM => {
                        let text = format_cell(self.kernel.reg(BASE), f);
                        let _ = self.output.write_all(text.as_bytes());
                        f = nos!(self);
                    }
                    QUOTE => {
                        push!(self, f, self.kernel.get(i)?);
                        i = i.wrapping_add(1);
                    }
                    COMMA => {
                        self.dict_append(f)?;
                        f = nos!(self);
                    }
                    SWAP => {
                        let w = f;
                        f = self.kernel.get(self.sp)?;
                        self.kernel.set(self.sp, w)?;
                    }
                    DUP => {
                        push!(self, f, f);
                    }
                    DROP => {
                        f = nos!(self);
                    }
                    OVER => {
                        let w = self.kernel.get(self.sp)?;
                        push!(self, f, w);
                    }
                    // Drop the current return frame; the driver uses this
                    // to recurse without growing the return stack.
                    TAIL => {
                        let r = self.kernel.reg(RSTK);
                        self.kernel.set_reg(RSTK, r.wrapping_sub(1));
                    }
                    BSAVE => {
                        let offset = nos!(self);
                        f = self.blockio(offset, f, true);
                    }
                    BLOAD => {
                        let offset = nos!(self);
                        f = self.blockio(offset, f, false);
                    }
                    FIND => {
                        let token = match self.get_word()? {
                            Some(token) => token,
                            None => break 'outer,
                        };
                        let w = self.find_word(&token)?;
                        let w = if w < DICTIONARY_START as Cell { 0 } else { w };
                        push!(self, f, w);
                    }
                    PRINT => {
                        let addr = (f as usize).wrapping_mul(CELL_BYTES);
                        let text = self.kernel.cstring_at(addr)?;
                        let _ = self.output.write_all(&text);
                        f = nos!(self);
                    }
                    DEPTH => {
                        let depth = self.sp.saturating_sub(self.stack_start()) as Cell;
                        push!(self, f, depth);
                    }
                    CLOCK => {
                        push!(self, f, self.timer.elapsed().as_millis() as Cell);
                    }
                    _ => {
                        return Err(ForthError::IllegalOpcode(op));
                    }
                }
                break 'inner;
            }
        }

        self.kernel.set_reg(TOP, f);
        self.kernel.set_reg(INSTRUCTION, i as Cell);
        Ok(())
    }
}
