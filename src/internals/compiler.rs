// Dictionary layout and word lookup

use crate::kernel::{
    misc_hidden, misc_name_cells, misc_pack, Cell, ForthError, CELL_BYTES, DIC, DICTIONARY_START,
    MAXIMUM_WORD_LENGTH, PWD,
};
use crate::runtime::ForthRuntime;

impl ForthRuntime {
    /// Append one cell at the dictionary frontier and advance it.
    pub(crate) fn dict_append(&mut self, val: Cell) -> Result<(), ForthError> {
        let d = self.kernel.reg(DIC);
        self.kernel.set(d as usize, val)?;
        self.kernel.set_reg(DIC, d.wrapping_add(1));
        Ok(())
    }

    /// Append a word header at the dictionary frontier:
    ///
    /// ```text
    /// name bytes, NUL-terminated, padded out to a cell boundary
    /// link cell   <- previous value of PWD
    /// misc cell   <- name length in cells, hidden flag clear, opcode
    /// ```
    ///
    /// PWD is left naming the new link cell. The link cell sits directly
    /// after the padded name; `find_word` relies on exactly that offset
    /// when it walks back from a link cell to the name bytes.
    pub(crate) fn compile_word(&mut self, opcode: Cell, name: &[u8]) -> Result<(), ForthError> {
        if name.len() >= MAXIMUM_WORD_LENGTH {
            return Err(ForthError::NameTooLong(
                String::from_utf8_lossy(name).into_owned(),
            ));
        }
        let dic = self.kernel.reg(DIC) as usize;
        self.kernel.write_name(dic * CELL_BYTES, name)?;
        let name_cells = (name.len() + 1).div_ceil(CELL_BYTES);
        self.kernel.set_reg(DIC, (dic + name_cells) as Cell);

        let link = self.kernel.reg(DIC);
        self.kernel.set(link as usize, self.kernel.reg(PWD))?;
        self.kernel.set_reg(PWD, link);
        self.kernel.set_reg(DIC, link.wrapping_add(1));

        self.dict_append(misc_pack(name_cells, opcode))
    }

    /// Walk the dictionary chain from PWD looking for a visible entry
    /// whose name matches, ASCII case folded. Returns the index of the
    /// matching entry's misc cell (one past its link cell), or 0.
    pub(crate) fn find_word(&mut self, name: &[u8]) -> Result<Cell, ForthError> {
        let mut w = self.kernel.reg(PWD);
        while w > DICTIONARY_START as Cell {
            let misc = self.kernel.get(w as usize + 1)?;
            if !misc_hidden(misc) {
                let name_cells = misc_name_cells(misc);
                let start = (w as usize).wrapping_sub(name_cells) * CELL_BYTES;
                let entry = self.kernel.cstring_at(start)?;
                if entry.eq_ignore_ascii_case(name) {
                    return Ok(w + 1);
                }
            }
            w = self.kernel.get(w as usize)?;
        }
        Ok(0)
    }
}
