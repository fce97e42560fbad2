//////////////////////////////////////////////////////////////
/// f4 - an embeddable, image-based Forth interpreter
///
/// The whole virtual machine lives in a single array of cells: registers,
/// the input word buffer, the dictionary, and both stacks. Because every
/// internal reference is a cell index rather than a pointer, the entire
/// machine state can be written out as a binary image and reloaded later
/// to resume execution where it left off.
///
/// Hosts embed the interpreter through [`ForthRuntime`]: create one with
/// `init` (or `new`), feed it source text with `eval` or an input source
/// plus `run`, and exchange values over the data stack with `push`/`pop`.
///
pub mod config;
pub mod internals;
pub mod kernel;
pub mod runtime;

pub use internals::reader::Input;
pub use kernel::{Cell, ForthError, SignedCell};
pub use runtime::ForthRuntime;
