//! Write position in the circular row texture.

/// Index of the next texture row to write, wrapping at `rows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCursor {
    rows: u32,
    next: u32,
}

impl RowCursor {
    /// A cursor over `rows` rows starting at row 0. Zero is treated as one.
    pub fn new(rows: u32) -> Self {
        Self {
            rows: rows.max(1),
            next: 0,
        }
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Row the next upload goes to.
    pub fn current(&self) -> u32 {
        self.next
    }

    /// Row after the current one; also the oldest row once the texture has
    /// wrapped, which is where drawing starts.
    pub fn following(&self) -> u32 {
        (self.next + 1) % self.rows
    }

    /// Step to the next row, returning the one just used.
    pub fn advance(&mut self) -> u32 {
        let used = self.next;
        self.next = self.following();
        used
    }
}
