/// Reads variable-width codes, least significant bit first.
pub(crate) struct BitReader<'a> {
    buf: &'a [u8],
    // index by bit instead of by byte
    position: usize,
    length: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            position: 0,
            length: buf.len() * 8,
        }
    }

    /// Next `count` bits, or `None` once fewer than that remain.
    pub(crate) fn next(&mut self, count: u32) -> Option<u64> {
        let start_position = self.position;
        let end_position = self.position + count as usize;

        if end_position > self.length {
            return None;
        }
        // end_position not inclusive
        let mut value: u64 = 0;
        for (out_shift, i) in (start_position..end_position).enumerate() {
            let bit = u64::from(self.buf[i / 8] >> (i % 8)) & 1;
            value |= bit << out_shift;
        }
        self.position = end_position;
        Some(value)
    }
}
