// system configuration and command line processing

use argh::FromArgs;
use std::fs::File;
use std::io;
use std::path::PathBuf;

use crate::internals::reader::Input;
use crate::kernel::{CELL_BYTES, DEFAULT_CORE_SIZE, MINIMUM_CORE_SIZE};
use crate::runtime::ForthRuntime;

const DEFAULT_SAVE_FILE: &str = "forth.core";

#[derive(FromArgs)]
/// A small image-based Forth interpreter.
///
/// Source files are evaluated in order; with -t, or with no files and no
/// -e strings at all, stdin is read afterwards.
pub struct Config {
    /// evaluate a string of Forth, before any source files
    #[argh(option, short = 'e', long = "evaluate")]
    pub evaluate: Vec<String>,

    /// save the image on exit to this file (implies -d)
    #[argh(option, short = 's', long = "save")]
    pub save_file: Option<PathBuf>,

    /// save the image on exit to forth.core
    #[argh(switch, short = 'd', long = "dump")]
    pub dump: bool,

    /// load a previously saved image instead of cold starting
    #[argh(option, short = 'l', long = "load")]
    pub load_file: Option<PathBuf>,

    /// memory size in kilobytes, incompatible with -l
    #[argh(option, short = 'm', long = "memory")]
    pub memory: Option<usize>,

    /// read stdin after processing source files
    #[argh(switch, short = 't', long = "terminal")]
    pub stdin_after: bool,

    /// forth source files, evaluated in order
    #[argh(positional)]
    pub files: Vec<PathBuf>,
}

impl Config {
    /// Memory size in cells, from -m kilobytes or the default.
    fn core_size(&self) -> usize {
        match self.memory {
            Some(kilobytes) => kilobytes * 1024 / CELL_BYTES,
            None => DEFAULT_CORE_SIZE,
        }
    }

    /// Drive a whole interpreter session. Returns the process exit code.
    pub fn run_forth(self) -> i32 {
        match self.session() {
            Ok(()) => 0,
            Err(reason) => {
                eprintln!("f4: {reason}");
                1
            }
        }
    }

    fn session(&self) -> Result<(), String> {
        if self.load_file.is_some() && self.memory.is_some() {
            return Err("-l and -m are mutually exclusive".to_owned());
        }
        if self.memory.is_some() && self.core_size() < MINIMUM_CORE_SIZE {
            return Err(format!(
                "memory size must give at least {MINIMUM_CORE_SIZE} cells"
            ));
        }

        let mut rt = match &self.load_file {
            Some(path) => {
                let mut file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
                ForthRuntime::load_core(&mut file)
                    .map_err(|e| format!("{}: {e}", path.display()))?
            }
            None => {
                ForthRuntime::init(self.core_size(), Input::stdin(), Box::new(io::stdout()))
                    .map_err(|e| e.to_string())?
            }
        };

        for text in &self.evaluate {
            rt.eval(text).map_err(|e| e.to_string())?;
        }
        for path in &self.files {
            let file = File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
            rt.set_file_input(file);
            rt.run().map_err(|e| e.to_string())?;
        }
        if self.stdin_after || (self.files.is_empty() && self.evaluate.is_empty()) {
            rt.set_input(Input::stdin());
            rt.run().map_err(|e| e.to_string())?;
        }

        if self.dump || self.save_file.is_some() {
            let path = self
                .save_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SAVE_FILE));
            let mut out =
                File::create(&path).map_err(|e| format!("{}: {e}", path.display()))?;
            rt.save_core(&mut out)
                .map_err(|e| format!("{}: {e}", path.display()))?;
        }
        Ok(())
    }
}
