////////////////////////////
/// Block storage
///
/// External storage is a set of fixed-size block files in the working
/// directory, one per block id, named as the zero-padded four-digit hex
/// id with a `.blk` suffix. A transfer moves exactly BLOCK_SIZE bytes
/// between such a file and cell memory at a byte offset.
use std::fs;

use crate::kernel::{Cell, CELL_BYTES};
use crate::runtime::ForthRuntime;

pub const BLOCK_SIZE: usize = 1024; // bytes

impl ForthRuntime {
    /// Move one block between memory and its backing file. Returns 0 on
    /// success and all-ones on any failure; failures also leave a
    /// diagnostic on the error sink and the transfer is refused entirely
    /// when the block would not fit inside memory.
    pub(crate) fn blockio(&mut self, offset: Cell, id: Cell, write: bool) -> Cell {
        let name = format!("{id:04x}.blk");
        let offset = offset as usize;
        let end = offset.wrapping_add(BLOCK_SIZE);
        if end > self.kernel.size() * CELL_BYTES || end < offset {
            self.msg
                .error(&format!("block {name} outside of memory"));
            return Cell::MAX;
        }
        let path = self.block_path.join(&name);
        let result = if write {
            self.kernel
                .read_bytes(offset, BLOCK_SIZE)
                .map_err(|e| e.to_string())
                .and_then(|bytes| fs::write(&path, bytes).map_err(|e| e.to_string()))
        } else {
            fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    if bytes.len() != BLOCK_SIZE {
                        return Err(format!("{} bytes, expected {BLOCK_SIZE}", bytes.len()));
                    }
                    self.kernel
                        .write_bytes(offset, &bytes)
                        .map_err(|e| e.to_string())
                })
        };
        match result {
            Ok(()) => 0,
            Err(reason) => {
                log::debug!("block transfer failed for {name}: {reason}");
                self.msg.error(&format!("block {name} transfer failed"));
                Cell::MAX
            }
        }
    }
}

//////////////////////////////////////////
/// TESTS
///
#[cfg(test)]
mod tests {
    use super::*;
    use crate::internals::reader::Input;
    use crate::kernel::MINIMUM_CORE_SIZE;

    fn runtime_in(dir: &std::path::Path) -> ForthRuntime {
        let mut rt = ForthRuntime::init(
            MINIMUM_CORE_SIZE,
            Input::string(""),
            Box::new(Vec::<u8>::new()),
        )
        .unwrap();
        rt.set_block_path(dir);
        rt
    }

    #[test]
    fn test_block_file_name_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = runtime_in(dir.path());
        assert_eq!(rt.blockio(0, 0x1a, true), 0);
        let meta = fs::metadata(dir.path().join("001a.blk")).unwrap();
        assert_eq!(meta.len(), BLOCK_SIZE as u64);
    }

    #[test]
    fn test_block_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = runtime_in(dir.path());
        let offset = 1000 * CELL_BYTES;
        for i in 0..BLOCK_SIZE {
            rt.kernel.byte_set(offset + i, (i % 251) as u8).unwrap();
        }
        assert_eq!(rt.blockio(offset as Cell, 1, true), 0);
        // wipe, then load the block back over the same region
        for i in 0..BLOCK_SIZE {
            rt.kernel.byte_set(offset + i, 0).unwrap();
        }
        assert_eq!(rt.blockio(offset as Cell, 1, false), 0);
        for i in 0..BLOCK_SIZE {
            assert_eq!(rt.kernel.byte_get(offset + i).unwrap(), (i % 251) as u8);
        }
    }

    #[test]
    fn test_out_of_range_offset_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = runtime_in(dir.path());
        let bytes = rt.kernel.size() * CELL_BYTES;
        let offset = (bytes - BLOCK_SIZE + 1) as Cell;
        assert_eq!(rt.blockio(offset, 2, true), Cell::MAX);
        assert!(!dir.path().join("0002.blk").exists());
    }

    #[test]
    fn test_block_words_from_forth() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = runtime_in(dir.path());
        rt.eval("0 10 bsave").unwrap();
        assert_eq!(rt.pop().unwrap(), 0);
        assert!(dir.path().join("000a.blk").exists());
        rt.eval("0 10 bload").unwrap();
        assert_eq!(rt.pop().unwrap(), 0);
    }

    #[test]
    fn test_missing_block_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = runtime_in(dir.path());
        assert_eq!(rt.blockio(0, 0xbeef, false), Cell::MAX);
    }

    #[test]
    fn test_short_block_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut rt = runtime_in(dir.path());
        fs::write(dir.path().join("0003.blk"), b"short").unwrap();
        assert_eq!(rt.blockio(0, 3, false), Cell::MAX);
    }
}
