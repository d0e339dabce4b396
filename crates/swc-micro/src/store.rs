//! Paged, append-only storage for instructions and operands.
//!
//! Both stores hand out stable 32-bit refs into a bank of fixed-size pages:
//! pushing never moves existing elements, so refs taken during emission stay
//! valid across every pass. Slot reuse does not exist; a pass that wants an
//! instruction gone rewrites its opcode to `Ignore`.

use swc_util::define_idx;

use crate::instr::MicroInstr;
use crate::operand::MicroOperand;

define_idx!(InstrRef);
define_idx!(OperandRef);

/// Sentinel for instructions without operands
pub const NO_OPERANDS: OperandRef = OperandRef(u32::MAX);

const INSTR_PAGE: usize = 256;
const OPERAND_PAGE: usize = 1024;

/// Append-only paged container
#[derive(Clone, Debug)]
pub struct PagedStore<T> {
    pages: Vec<Vec<T>>,
    page_cap: usize,
}

impl<T> PagedStore<T> {
    fn with_page_cap(page_cap: usize) -> Self {
        Self {
            pages: Vec::new(),
            page_cap,
        }
    }

    fn len(&self) -> u32 {
        match self.pages.last() {
            None => 0,
            Some(last) => ((self.pages.len() - 1) * self.page_cap + last.len()) as u32,
        }
    }

    fn push(&mut self, value: T) -> u32 {
        let index = self.len();
        let need_page = self
            .pages
            .last()
            .map(|p| p.len() == self.page_cap)
            .unwrap_or(true);
        if need_page {
            self.pages.push(Vec::with_capacity(self.page_cap));
        }
        self.pages.last_mut().unwrap().push(value);
        index
    }

    fn get(&self, index: u32) -> &T {
        let index = index as usize;
        &self.pages[index / self.page_cap][index % self.page_cap]
    }

    fn get_mut(&mut self, index: u32) -> &mut T {
        let index = index as usize;
        &mut self.pages[index / self.page_cap][index % self.page_cap]
    }
}

/// Instruction bank with stable [`InstrRef`] handles
#[derive(Clone, Debug)]
pub struct InstrStore {
    inner: PagedStore<MicroInstr>,
}

impl InstrStore {
    pub fn new() -> Self {
        Self {
            inner: PagedStore::with_page_cap(INSTR_PAGE),
        }
    }

    pub fn count(&self) -> u32 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn push(&mut self, inst: MicroInstr) -> InstrRef {
        InstrRef(self.inner.push(inst))
    }

    pub fn get(&self, r: InstrRef) -> &MicroInstr {
        self.inner.get(r.0)
    }

    pub fn get_mut(&mut self, r: InstrRef) -> &mut MicroInstr {
        self.inner.get_mut(r.0)
    }

    /// Iterate refs in stream order
    pub fn refs(&self) -> impl Iterator<Item = InstrRef> {
        (0..self.count()).map(InstrRef)
    }
}

impl Default for InstrStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Operand arena with contiguous ranges
///
/// A range of `n` operands always lives inside one page, so a slice view is
/// cheap. Ranges are allocated once at emission; passes overwrite slots in
/// place but never change a range's length.
#[derive(Clone, Debug)]
pub struct OperandStore {
    inner: PagedStore<MicroOperand>,
}

impl OperandStore {
    pub fn new() -> Self {
        Self {
            inner: PagedStore::with_page_cap(OPERAND_PAGE),
        }
    }

    /// Copy `values` into a fresh contiguous range
    pub fn alloc_from(&mut self, values: &[MicroOperand]) -> OperandRef {
        let n = values.len();
        if n == 0 {
            return NO_OPERANDS;
        }
        assert!(n <= OPERAND_PAGE, "operand range too large");

        // Pad the current page when the range would straddle a boundary.
        let len = self.inner.len() as usize;
        let remaining = OPERAND_PAGE - (len % OPERAND_PAGE);
        if remaining < n && len % OPERAND_PAGE != 0 {
            for _ in 0..remaining {
                self.inner.push(MicroOperand::default());
            }
        }

        let start = self.inner.len();
        for &value in values {
            self.inner.push(value);
        }
        OperandRef(start)
    }

    pub fn slice(&self, r: OperandRef, n: u8) -> &[MicroOperand] {
        if n == 0 {
            return &[];
        }
        let index = r.0 as usize;
        let page = index / OPERAND_PAGE;
        let off = index % OPERAND_PAGE;
        &self.inner.pages[page][off..off + n as usize]
    }

    pub fn slice_mut(&mut self, r: OperandRef, n: u8) -> &mut [MicroOperand] {
        if n == 0 {
            return &mut [];
        }
        let index = r.0 as usize;
        let page = index / OPERAND_PAGE;
        let off = index % OPERAND_PAGE;
        &mut self.inner.pages[page][off..off + n as usize]
    }
}

impl Default for OperandStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::{EncodeFlags, MicroOpcode};

    fn nop() -> MicroInstr {
        MicroInstr {
            op: MicroOpcode::Nop,
            emit_flags: EncodeFlags::none(),
            num_operands: 0,
            ops: NO_OPERANDS,
        }
    }

    #[test]
    fn refs_are_stable_across_pages() {
        let mut store = InstrStore::new();
        let refs: Vec<_> = (0..1000).map(|_| store.push(nop())).collect();
        assert_eq!(store.count(), 1000);
        for (i, r) in refs.iter().enumerate() {
            assert_eq!(r.0, i as u32);
            assert_eq!(store.get(*r).op, MicroOpcode::Nop);
        }
    }

    #[test]
    fn operand_ranges_stay_contiguous() {
        let mut store = OperandStore::new();
        let mut refs = Vec::new();
        for i in 0..500u64 {
            let ops = [
                MicroOperand::Imm(i),
                MicroOperand::Imm(i + 1),
                MicroOperand::Imm(i + 2),
            ];
            refs.push(store.alloc_from(&ops));
        }
        for (i, r) in refs.iter().enumerate() {
            let slice = store.slice(*r, 3);
            assert_eq!(slice[0].imm(), i as u64);
            assert_eq!(slice[2].imm(), i as u64 + 2);
        }
    }

    #[test]
    fn empty_range_uses_sentinel() {
        let mut store = OperandStore::new();
        assert_eq!(store.alloc_from(&[]), NO_OPERANDS);
        assert!(store.slice(NO_OPERANDS, 0).is_empty());
    }

    #[test]
    fn slot_overwrite_keeps_length() {
        let mut store = OperandStore::new();
        let r = store.alloc_from(&[MicroOperand::Imm(1), MicroOperand::Imm(2)]);
        store.slice_mut(r, 2)[1] = MicroOperand::Imm(99);
        assert_eq!(store.slice(r, 2)[1].imm(), 99);
    }
}
