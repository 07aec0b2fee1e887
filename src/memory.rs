// an owned piece of memory
pub struct Memory<'heap>(&'heap mut [u8]);

impl<'heap> Memory<'heap> {
    pub fn new(m: &'heap mut [u8]) -> Memory {
        Memory(m)
    }

    // trim the front so the region starts on an `align` boundary.
    pub fn align_up(self, align: usize) -> Memory<'heap> {
        let offset = self.0.as_ptr().align_offset(align).min(self.0.len());
        Memory(&mut self.0[offset..])
    }

    pub fn truncate(self, n: usize) -> Memory<'heap> {
        Memory(&mut self.0[..n])
    }

    pub fn split_at(self, n: usize) -> (Memory<'heap>, Memory<'heap>) {
        let (m1, m2) = self.0.split_at_mut(n);
        (Memory(m1), Memory(m2))
    }

    #[inline]
    pub fn inner(self) -> &'heap mut [u8] {
        self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn start(&self) -> *const u8 {
        self.0.as_ptr()
    }

    #[inline]
    pub fn end(&self) -> *const u8 {
        unsafe { self.start().add(self.0.len()) }
    }
}
