/// Diagnostic output
///
/// The interpreter reports problems on a dedicated error sink, separate
/// from the word output stream, using three fixed line forms:
///
/// ```text
/// ( error "<message>" )     recoverable, execution continues
/// ( fatal "<message>" )     the image is poisoned
/// ( debug <hexcell> <line> )
/// ```
///
/// The forms are part of the observable interface; tests match on them.
/// Host-side tracing goes through the `log` crate instead.
use std::io::{self, Write};

use crate::kernel::Cell;

pub struct Msg {
    out: Box<dyn Write>,
}

impl Msg {
    pub fn new() -> Msg {
        Msg {
            out: Box::new(io::stderr()),
        }
    }

    /// Redirect diagnostics, e.g. into a buffer a test can inspect.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// A recoverable problem. Diagnostics are best-effort: a failing sink
    /// must not take the interpreter down with it.
    pub fn error(&mut self, text: &str) {
        let _ = writeln!(self.out, "( error \"{text}\" )");
        let _ = self.out.flush();
    }

    /// A fault the interpreter cannot continue from.
    pub fn fatal(&mut self, text: &str) {
        log::error!("fatal fault: {text}");
        let _ = writeln!(self.out, "( fatal \"{text}\" )");
        let _ = self.out.flush();
    }

    /// Trace a single cell, tagged with the reporting source line.
    pub fn debug(&mut self, cell: Cell, line: u32) {
        let _ = writeln!(self.out, "( debug {cell:x} {line} )");
        let _ = self.out.flush();
    }
}

impl Default for Msg {
    fn default() -> Self {
        Msg::new()
    }
}
