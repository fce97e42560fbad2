//////////////////////////////////////////////////////////////////
/// runtime.rs
///
/// Forth Runtime Engine
///
/// This module defines the ForthRuntime struct, the handle a host embeds.
/// It owns the kernel (the cell array), the active input source, the
/// output and diagnostic sinks, and the few pieces of interpreter state
/// that live outside cell memory: the data stack position and the clock.
///
/// `init` performs the cold start: it lays down the registers, the
/// self-recursive read/eval driver, the primitive word headers, a handful
/// of constants the boot program needs, and then feeds the embedded boot
/// program through the interpreter to define the standard words in Forth
/// itself.
///
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::internals::messages::Msg;
use crate::internals::reader::Input;
use crate::kernel::{
    Cell, ForthError, Kernel, ADD, AND, BASE, BLOAD, BRANCH, BSAVE, CLOCK, COMMA, COMPILE, DEFINE,
    DEPTH, DIC, DICTIONARY_START, DIV, DROP, DUP, EMIT, EQUAL, EXIT, FIN, FIND, FOUT, FROMR,
    IMMEDIATE, INSTRUCTION, INV, INVALID, KEY, LESS, LOAD, MINIMUM_CORE_SIZE, MINIMUM_STACK_SIZE,
    MORE, MUL, OR, OVER, PNUM, PRINT, PUSH, PUSH_CELL, PWD, QBRANCH, QUOTE, READ, RSTK, RUN, SHL,
    SHR, SIDX, SIN, SLEN, SOURCE_ID, STACK_SIZE, STATE, STORE, SUB, SWAP, TAIL, TOP, TOR, XOR,
};

/// The standard words, defined in Forth itself against the primitives.
/// The first line bootstraps `;` by exploiting its own immediacy: the
/// closing `;` executes the half-built definition, which appends the
/// exit, leaves compile mode, and then falls straight into the exit it
/// just appended.
const BOOT_PROGRAM: &str = r"
: ; immediate ' exit , 0 state ! ;
: here h @ ;
: [ immediate 0 state ! ;
: ] 1 state ! ;
: >mark here 0 , ;
: if immediate ' ?branch , >mark ;
: else immediate ' branch , >mark swap dup here swap - swap ! ;
: then immediate dup here swap - swap ! ;
: begin immediate here ;
: until immediate ' ?branch , here - , ;
: again immediate ' branch , here - , ;
: 2dup over over ;
: 2drop drop drop ;
: 1+ 1 + ;
: 1- 1 - ;
: 0= 0 = ;
: not 0= ;
: <> = invert ;
: negate invert 1+ ;
: mod 2dup / * - ;
: rot >r swap r> swap ;
: -rot rot rot ;
: tuck swap over ;
: nip swap drop ;
: allot here + h ! ;
: +! tuck @ + swap ! ;
: bl 32 ;
: space bl emit ;
: '\n' 10 ;
: ')' 41 ;
: cr '\n' emit ;
: ( immediate begin key dup ')' = swap -1 = or until ;
: . (.) space ;  ( n -- print the top of the stack )
: ? @ . ;  ( a -- print the cell at an address )
: hex 16 base ! ;
: decimal 10 base ! ;
: octal 8 base ! ;
: words pwd @ begin dup dup 1+ @ 256 / 255 and - print space @ dup 0= until drop cr ;
: b/buf 1024 ;
";

/// Primitive word names and the opcode each one wraps.
const PRIMITIVES: &[(&str, Cell)] = &[
    ("read", READ),
    ("@", LOAD),
    ("!", STORE),
    ("-", SUB),
    ("+", ADD),
    ("and", AND),
    ("or", OR),
    ("xor", XOR),
    ("invert", INV),
    ("lshift", SHL),
    ("rshift", SHR),
    ("*", MUL),
    ("/", DIV),
    ("u<", LESS),
    ("u>", MORE),
    ("exit", EXIT),
    ("emit", EMIT),
    ("key", KEY),
    ("r>", FROMR),
    (">r", TOR),
    ("branch", BRANCH),
    ("?branch", QBRANCH),
    ("(.)", PNUM),
    ("'", QUOTE),
    (",", COMMA),
    ("=", EQUAL),
    ("swap", SWAP),
    ("dup", DUP),
    ("drop", DROP),
    ("over", OVER),
    ("tail", TAIL),
    ("bsave", BSAVE),
    ("bload", BLOAD),
    ("find", FIND),
    ("print", PRINT),
    ("depth", DEPTH),
    ("clock", CLOCK),
];

pub struct ForthRuntime {
    pub(crate) kernel: Kernel,
    pub(crate) input: Input,
    pub(crate) output: Box<dyn Write>,
    pub(crate) msg: Msg,
    pub(crate) sp: usize, // data stack position, a cell index into memory
    pub(crate) block_path: PathBuf,
    pub(crate) timer: Instant,
}

impl ForthRuntime {
    /// Cold-start a fresh image: `size` cells of zeroed memory, then the
    /// driver, the primitives, and the boot program.
    pub fn init(
        size: usize,
        input: Input,
        output: Box<dyn Write>,
    ) -> Result<ForthRuntime, ForthError> {
        if size < MINIMUM_CORE_SIZE {
            return Err(ForthError::CoreTooSmall(size));
        }
        let mut rt = ForthRuntime {
            kernel: Kernel::new(size),
            input: Input::string(""),
            output,
            msg: Msg::new(),
            sp: 0,
            block_path: PathBuf::from("."),
            timer: Instant::now(),
        };
        rt.cold_start()?;
        rt.set_input(input);
        log::info!("initialized {size} cell core");
        Ok(rt)
    }

    /// A default-sized interpreter wired to stdin and stdout.
    pub fn new() -> Result<ForthRuntime, ForthError> {
        ForthRuntime::init(
            crate::kernel::DEFAULT_CORE_SIZE,
            Input::stdin(),
            Box::new(io::stdout()),
        )
    }

    /// Rebuild a handle around memory reloaded from an image. The cells
    /// are taken as-is; input, output, clock, and stack position start
    /// over.
    pub(crate) fn from_kernel(kernel: Kernel) -> ForthRuntime {
        let mut rt = ForthRuntime {
            kernel,
            input: Input::stdin(),
            output: Box::new(io::stdout()),
            msg: Msg::new(),
            sp: 0,
            block_path: PathBuf::from("."),
            timer: Instant::now(),
        };
        rt.sp = rt.stack_start();
        rt
    }

    /// First cell of the data stack region: the stacks sit at the top of
    /// memory, the data stack below the return stack.
    pub(crate) fn stack_start(&self) -> usize {
        let ss = self.kernel.reg(STACK_SIZE) as usize;
        self.kernel.size().saturating_sub(2 * ss)
    }

    fn cold_start(&mut self) -> Result<(), ForthError> {
        let size = self.kernel.size();
        let ss = MINIMUM_STACK_SIZE.max(size / MINIMUM_STACK_SIZE);
        self.kernel.set_reg(STACK_SIZE, ss as Cell);
        self.kernel.set_reg(RSTK, (size - ss) as Cell);
        self.sp = size - 2 * ss;
        self.kernel.set_reg(PUSH_CELL, PUSH);
        self.kernel.set_reg(DIC, DICTIONARY_START as Cell);

        // The driver: a READ instruction, then a word that calls READ,
        // drops the pending return frame, and calls itself again. The
        // interpreter spends its whole life inside this loop.
        let tail = self.kernel.reg(DIC);
        self.dict_append(TAIL)?;
        let read = self.kernel.reg(DIC);
        self.dict_append(READ)?;
        self.dict_append(RUN)?;
        self.kernel.set_reg(INSTRUCTION, self.kernel.reg(DIC));
        self.dict_append(read)?;
        self.dict_append(tail)?;
        self.dict_append(read + 1)?;

        self.compile_word(DEFINE, b":")?;
        self.compile_word(IMMEDIATE, b"immediate")?;
        for (name, opcode) in PRIMITIVES {
            self.compile_word(COMPILE, name.as_bytes())?;
            self.dict_append(*opcode)?;
        }

        self.define_constant("h", DIC as Cell)?;
        self.define_constant("state", STATE as Cell)?;
        self.define_constant("base", BASE as Cell)?;
        self.define_constant("pwd", PWD as Cell)?;
        self.define_constant("dictionary-start", DICTIONARY_START as Cell)?;
        self.define_constant("stack-size", ss as Cell)?;
        self.define_constant("core-size", size as Cell)?;

        self.eval(BOOT_PROGRAM)
    }

    /// Resume the interpreter against the current input source. Once a
    /// fatal fault has marked the image invalid, every further call
    /// fails immediately without executing anything.
    pub fn run(&mut self) -> Result<(), ForthError> {
        if self.kernel.reg(INVALID) != 0 {
            return Err(ForthError::Invalid);
        }
        let result = self.execute();
        let _ = self.output.flush();
        match result {
            Ok(()) => Ok(()),
            Err(fault) => {
                if fault.is_fatal() {
                    if log::log_enabled!(log::Level::Debug) {
                        let cell = match &fault {
                            ForthError::Bounds { index, .. } => *index as Cell,
                            ForthError::IllegalOpcode(op) => *op,
                            _ => 0,
                        };
                        self.msg.debug(cell, line!());
                    }
                    self.msg.fatal(&fault.to_string());
                    self.kernel.set_reg(INVALID, 1);
                }
                Err(fault)
            }
        }
    }

    /// Evaluate a string of source text.
    pub fn eval(&mut self, text: &str) -> Result<(), ForthError> {
        self.set_string_input(text);
        self.run()
    }

    /// Swap the input source, keeping the source registers in step.
    pub fn set_input(&mut self, input: Input) {
        match &input {
            Input::Str(bytes) => {
                self.kernel.set_reg(SOURCE_ID, Cell::MAX);
                self.kernel.set_reg(SIN, 0);
                self.kernel.set_reg(SIDX, 0);
                self.kernel.set_reg(SLEN, bytes.len() as Cell);
            }
            Input::File(_) => {
                self.kernel.set_reg(SOURCE_ID, 0);
                self.kernel.set_reg(FIN, 1);
            }
            Input::Stdin(_) => {
                self.kernel.set_reg(SOURCE_ID, 0);
                self.kernel.set_reg(FIN, 0);
            }
        }
        self.input = input;
    }

    pub fn set_file_input(&mut self, file: File) {
        self.set_input(Input::file(file));
    }

    pub fn set_string_input(&mut self, text: &str) {
        self.set_input(Input::string(text));
    }

    pub fn set_file_output(&mut self, out: Box<dyn Write>) {
        self.kernel.set_reg(FOUT, 1);
        self.output = out;
    }

    /// Redirect the diagnostic stream (default: stderr).
    pub fn set_error_output(&mut self, out: Box<dyn Write>) {
        self.msg.set_output(out);
    }

    /// Directory the `XXXX.blk` block files live in (default: ".").
    pub fn set_block_path(&mut self, path: &Path) {
        self.block_path = path.to_path_buf();
    }

    /// Push a cell onto the data stack from the host side.
    pub fn push(&mut self, value: Cell) -> Result<(), ForthError> {
        let top = self.kernel.reg(TOP);
        self.sp = self.sp.wrapping_add(1);
        self.kernel.set(self.sp, top)?;
        self.kernel.set_reg(TOP, value);
        Ok(())
    }

    /// Pop a cell off the data stack from the host side.
    pub fn pop(&mut self) -> Result<Cell, ForthError> {
        if self.sp <= self.stack_start() {
            return Err(ForthError::StackUnderflow);
        }
        let value = self.kernel.reg(TOP);
        let below = self.kernel.get(self.sp)?;
        self.kernel.set_reg(TOP, below);
        self.sp -= 1;
        Ok(value)
    }

    /// Current data stack depth in cells.
    pub fn stack_position(&self) -> usize {
        self.sp.saturating_sub(self.stack_start())
    }

    /// Install a named constant. The body is threaded code pushing the
    /// value, so the word behaves exactly like a colon definition.
    pub fn define_constant(&mut self, name: &str, value: Cell) -> Result<(), ForthError> {
        let exit = self.find_word(b"exit")?;
        if exit <= 1 {
            return Err(ForthError::WordNotFound("exit".to_owned()));
        }
        self.compile_word(COMPILE, name.as_bytes())?;
        self.dict_append(RUN)?;
        self.dict_append(PUSH_CELL as Cell)?;
        self.dict_append(value)?;
        self.dict_append(exit + 1)?;
        Ok(())
    }
}

/////////////////////////
/// TESTS
///
#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn runtime() -> (ForthRuntime, SharedBuf, SharedBuf) {
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let mut rt = ForthRuntime::init(4096, Input::string(""), Box::new(out.clone())).unwrap();
        rt.set_error_output(Box::new(err.clone()));
        (rt, out, err)
    }

    #[test]
    fn test_addition_prints_and_clears_stack() {
        let (mut rt, out, _) = runtime();
        rt.eval(" 2 3 + . ").unwrap();
        assert!(out.text().contains('5'));
        assert_eq!(rt.stack_position(), 0);
    }

    #[test]
    fn test_colon_definition_runs_and_is_findable() {
        let (mut rt, out, _) = runtime();
        rt.eval(": square dup * ; 7 square . ").unwrap();
        assert!(out.text().contains("49"));
        assert!(rt.find_word(b"square").unwrap() > 1);
    }

    #[test]
    fn test_recursive_factorial() {
        let (mut rt, out, _) = runtime();
        rt.eval(": fact dup 1 u< if drop 1 exit then dup 1 - fact * ; 5 fact . ")
            .unwrap();
        assert!(out.text().contains("120"));
    }

    #[test]
    fn test_unknown_word_reports_and_recovers() {
        let (mut rt, _, err) = runtime();
        rt.eval("xyzzy").unwrap();
        assert!(err.text().contains("( error \"xyzzy is not a word\" )"));
    }

    #[test]
    fn test_bounds_fault_is_fatal_and_sticky() {
        let (mut rt, _, err) = runtime();
        rt.eval(": bad 999999999 @ ;").unwrap();
        assert!(matches!(
            rt.eval("bad"),
            Err(ForthError::Bounds { .. })
        ));
        assert!(err.text().contains("( fatal \"bounds check failed: 999999999 >= 4096\" )"));
        assert!(matches!(rt.eval("1 2 +"), Err(ForthError::Invalid)));
        assert!(matches!(rt.run(), Err(ForthError::Invalid)));
    }

    #[test]
    fn test_save_load_roundtrip_preserves_definitions() {
        let (mut rt, _, _) = runtime();
        rt.eval(": c1 42 ; ").unwrap();
        let mut image = Vec::new();
        rt.save_core(&mut image).unwrap();

        let mut loaded = ForthRuntime::load_core(&mut image.as_slice()).unwrap();
        let out = SharedBuf::default();
        loaded.set_file_output(Box::new(out.clone()));
        loaded.eval("c1 . ").unwrap();
        assert!(out.text().contains("42"));
    }

    #[test]
    fn test_host_push_pop_and_depth() {
        let (mut rt, _, _) = runtime();
        assert_eq!(rt.stack_position(), 0);
        rt.push(11).unwrap();
        rt.push(22).unwrap();
        assert_eq!(rt.stack_position(), 2);
        assert_eq!(rt.pop().unwrap(), 22);
        assert_eq!(rt.pop().unwrap(), 11);
        assert!(matches!(rt.pop(), Err(ForthError::StackUnderflow)));
    }

    #[test]
    fn test_host_values_visible_to_forth() {
        let (mut rt, _, _) = runtime();
        rt.push(6).unwrap();
        rt.push(7).unwrap();
        rt.eval("*").unwrap();
        assert_eq!(rt.pop().unwrap(), 42);
    }

    #[test]
    fn test_define_constant() {
        let (mut rt, _, _) = runtime();
        rt.define_constant("answer", 42).unwrap();
        rt.eval("answer").unwrap();
        assert_eq!(rt.pop().unwrap(), 42);
        // constants compile into definitions like any other word
        rt.eval(": doubled answer answer + ; doubled").unwrap();
        assert_eq!(rt.pop().unwrap(), 84);
    }

    #[test]
    fn test_base_switching() {
        let (mut rt, out, _) = runtime();
        rt.eval("hex ff . decimal").unwrap();
        assert!(out.text().contains("ff"));
        rt.eval("16 .").unwrap();
        assert!(out.text().contains("16"));
    }

    #[test]
    fn test_state_toggles_during_definition() {
        let (mut rt, _, _) = runtime();
        rt.eval("state @").unwrap();
        assert_eq!(rt.pop().unwrap(), 0);
        rt.eval(": probe state @ ;").unwrap();
        // compiled while state was 1, runs with state back at 0
        rt.eval("probe").unwrap();
        assert_eq!(rt.pop().unwrap(), 0);
    }

    #[test]
    fn test_words_lists_dictionary_names() {
        let (mut rt, out, _) = runtime();
        rt.eval(": brand-new-word 1 ; words").unwrap();
        let listing = out.text();
        assert!(listing.contains("brand-new-word"));
        assert!(listing.contains("dup"));
        assert!(listing.contains(";"));
    }

    #[test]
    fn test_number_compiles_as_literal_in_definition() {
        let (mut rt, _, _) = runtime();
        rt.eval(": some-number 1234 ; some-number").unwrap();
        assert_eq!(rt.pop().unwrap(), 1234);
    }

    #[test]
    fn test_eval_continues_across_calls() {
        let (mut rt, _, _) = runtime();
        // a definition left open in one eval closes in the next
        rt.eval(": later 3").unwrap();
        rt.eval("4 + ;").unwrap();
        rt.eval("later").unwrap();
        assert_eq!(rt.pop().unwrap(), 7);
    }

    #[test]
    fn test_init_rejects_undersized_memory() {
        assert!(matches!(
            ForthRuntime::init(100, Input::string(""), Box::new(Vec::<u8>::new())),
            Err(ForthError::CoreTooSmall(100))
        ));
    }

    #[test]
    fn test_clock_starts_near_zero() {
        let (mut rt, _, _) = runtime();
        rt.eval("clock").unwrap();
        assert!(rt.pop().unwrap() < 10_000);
    }
}
