////////////////////////////
/// Image serialization
///
/// A core file is the whole cell array plus an eight-byte header:
///
/// ```text
/// 0xFF '4' 'T' 'H'  cell-size  version  endian  0xFF
/// ```
///
/// followed by the core size in cells as a little-endian u64, then the
/// cells themselves in host byte order. The header pins the build the
/// image belongs to: a file written by a host with a different cell
/// width or endianness is rejected outright rather than misread.
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::kernel::{Cell, ForthError, Kernel, CELL_BYTES, INVALID, MINIMUM_CORE_SIZE};
use crate::runtime::ForthRuntime;

pub const CORE_VERSION: u8 = 0x02;

/// The expected header for this build.
pub fn core_header() -> [u8; 8] {
    let endian = u8::from(cfg!(target_endian = "little"));
    [
        0xff,
        b'4',
        b'T',
        b'H',
        CELL_BYTES as u8,
        CORE_VERSION,
        endian,
        0xff,
    ]
}

impl ForthRuntime {
    /// Serialize the image. An invalid image is refused: a poisoned core
    /// would come back poisoned, or worse, half-written.
    pub fn save_core(&mut self, out: &mut dyn Write) -> Result<(), ForthError> {
        if self.kernel.reg(INVALID) != 0 {
            return Err(ForthError::Invalid);
        }
        out.write_all(&core_header())?;
        out.write_u64::<LittleEndian>(self.kernel.size() as u64)?;
        for cell in self.kernel.cells() {
            out.write_all(&cell.to_ne_bytes())?;
        }
        out.flush()?;
        log::info!("saved {} cell core image", self.kernel.size());
        Ok(())
    }

    /// Reconstitute a runtime from a serialized image. The header must
    /// match this build exactly, and the full cell payload must be
    /// present. Cell memory is restored verbatim; the host-side pieces
    /// (input, output, clock, stack position) start fresh.
    pub fn load_core(input: &mut dyn Read) -> Result<ForthRuntime, ForthError> {
        let mut header = [0u8; 8];
        input
            .read_exact(&mut header)
            .map_err(|_| ForthError::Truncated)?;
        if header != core_header() {
            return Err(ForthError::BadHeader);
        }
        let size = input
            .read_u64::<LittleEndian>()
            .map_err(|_| ForthError::Truncated)? as usize;
        if size < MINIMUM_CORE_SIZE {
            return Err(ForthError::CoreTooSmall(size));
        }
        let mut cells = Vec::with_capacity(size);
        for _ in 0..size {
            let mut bytes = [0u8; CELL_BYTES];
            input
                .read_exact(&mut bytes)
                .map_err(|_| ForthError::Truncated)?;
            cells.push(Cell::from_ne_bytes(bytes));
        }
        log::info!("loaded {size} cell core image");
        Ok(ForthRuntime::from_kernel(Kernel::from_cells(cells)))
    }

    /// Raw cell dump for debugging. No header, not reloadable.
    pub fn dump_core(&mut self, out: &mut dyn Write) -> Result<(), ForthError> {
        for cell in self.kernel.cells() {
            out.write_all(&cell.to_ne_bytes())?;
        }
        out.flush()?;
        Ok(())
    }
}

//////////////////////////////////////////
/// TESTS
///
#[cfg(test)]
mod tests {
    use super::*;
    use crate::internals::reader::Input;

    fn runtime() -> ForthRuntime {
        ForthRuntime::init(
            MINIMUM_CORE_SIZE,
            Input::string(""),
            Box::new(Vec::<u8>::new()),
        )
        .unwrap()
    }

    fn saved(rt: &mut ForthRuntime) -> Vec<u8> {
        let mut image = Vec::new();
        rt.save_core(&mut image).unwrap();
        image
    }

    #[test]
    fn test_roundtrip_is_bitwise_identical() {
        let mut rt = runtime();
        rt.eval(": c1 42 ;").unwrap();
        let image = saved(&mut rt);
        let loaded = ForthRuntime::load_core(&mut image.as_slice()).unwrap();
        assert_eq!(loaded.kernel.cells(), rt.kernel.cells());
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut rt = runtime();
        let mut image = saved(&mut rt);
        image[1] = b'5';
        assert!(matches!(
            ForthRuntime::load_core(&mut image.as_slice()),
            Err(ForthError::BadHeader)
        ));
    }

    #[test]
    fn test_rejects_other_cell_size() {
        let mut rt = runtime();
        let mut image = saved(&mut rt);
        image[4] = if CELL_BYTES == 8 { 4 } else { 8 };
        assert!(matches!(
            ForthRuntime::load_core(&mut image.as_slice()),
            Err(ForthError::BadHeader)
        ));
    }

    #[test]
    fn test_rejects_other_version() {
        let mut rt = runtime();
        let mut image = saved(&mut rt);
        image[5] = CORE_VERSION + 1;
        assert!(matches!(
            ForthRuntime::load_core(&mut image.as_slice()),
            Err(ForthError::BadHeader)
        ));
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let mut rt = runtime();
        let image = saved(&mut rt);
        let short = &image[..image.len() - CELL_BYTES];
        assert!(matches!(
            ForthRuntime::load_core(&mut &short[..]),
            Err(ForthError::Truncated)
        ));
    }

    #[test]
    fn test_rejects_undersized_core() {
        let mut image = core_header().to_vec();
        image.extend_from_slice(&64u64.to_le_bytes());
        image.extend(std::iter::repeat(0u8).take(64 * CELL_BYTES));
        assert!(matches!(
            ForthRuntime::load_core(&mut image.as_slice()),
            Err(ForthError::CoreTooSmall(64))
        ));
    }

    #[test]
    fn test_invalid_image_refuses_to_save() {
        let mut rt = runtime();
        rt.kernel.set_reg(INVALID, 1);
        let mut image = Vec::new();
        assert!(matches!(
            rt.save_core(&mut image),
            Err(ForthError::Invalid)
        ));
        assert!(image.is_empty());
    }

    #[test]
    fn test_dump_core_is_raw_cells() {
        let mut rt = runtime();
        let mut dump = Vec::new();
        rt.dump_core(&mut dump).unwrap();
        assert_eq!(dump.len(), rt.kernel.size() * CELL_BYTES);
        // no header magic at the front, just cell zero (register 0)
        assert_eq!(&dump[..CELL_BYTES], &[0u8; CELL_BYTES]);
    }
}
