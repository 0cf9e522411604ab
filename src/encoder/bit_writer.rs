/// Largest payload of a single data sub-block.
const SUB_BLOCK_LEN: usize = 255;

/// Packs variable-width codes least significant bit first and frames the resulting bytes
/// into length-prefixed data sub-blocks.
pub(crate) struct BitWriter<'a> {
    out: &'a mut Vec<u8>,
    accum: u32,
    // bits currently held in accum
    position: u32,
    chunk: Vec<u8>,
}

impl<'a> BitWriter<'a> {
    pub(crate) fn new(out: &'a mut Vec<u8>) -> Self {
        Self {
            out,
            accum: 0,
            position: 0,
            chunk: Vec::with_capacity(SUB_BLOCK_LEN),
        }
    }

    pub(crate) fn write(&mut self, code: u16, width: u8) {
        debug_assert!(u32::from(code) < 1 << width);
        self.accum |= u32::from(code) << self.position;
        self.position += u32::from(width);
        self.drain(false);
    }

    /// Moves accumulated bits into the current sub-block. With `full` set, a trailing partial
    /// byte is padded with zeros, otherwise only whole bytes leave the accumulator.
    fn drain(&mut self, full: bool) {
        let stop = if full { 0 } else { 7 };
        while self.position > stop {
            self.chunk.push((self.accum & 0xff) as u8);
            self.accum >>= 8;
            self.position = self.position.saturating_sub(8);

            if self.chunk.len() == SUB_BLOCK_LEN {
                self.dump();
            }
        }
    }

    fn dump(&mut self) {
        if !self.chunk.is_empty() {
            self.out.push(self.chunk.len() as u8);
            self.out.append(&mut self.chunk);
        }
    }

    /// Flushes every remaining bit and closes the sub-block sequence with its terminator.
    pub(crate) fn finish(mut self) {
        self.drain(true);
        self.dump();
        self.out.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::BitWriter;

    #[test]
    fn it_works() {
        let mut out = Vec::new();
        let mut writer = BitWriter::new(&mut out);
        for code in [0b100, 0b000, 0b110, 0b111, 0b000, 0b011, 0b010, 0b101] {
            writer.write(code, 3);
        }
        writer.finish();

        assert_eq!(out, [3, 0b10000100, 0b10001111, 0b10101001, 0]);
    }

    #[test]
    fn pads_trailing_bits() {
        let mut out = Vec::new();
        let mut writer = BitWriter::new(&mut out);
        writer.write(0b101, 3);
        writer.write(0b1_1111_1111, 9);
        writer.finish();

        assert_eq!(out, [2, 0b1111_1101, 0b0000_1111, 0]);
    }

    #[test]
    fn splits_sub_blocks_at_255_bytes() {
        let mut out = Vec::new();
        let mut writer = BitWriter::new(&mut out);
        for _ in 0..300 {
            writer.write(0xab, 8);
        }
        writer.finish();

        assert_eq!(out.len(), 1 + 255 + 1 + 45 + 1);
        assert_eq!(out[0], 255);
        assert_eq!(out[256], 45);
        assert_eq!(*out.last().unwrap(), 0);
        assert!(out[1..256].iter().all(|&b| b == 0xab));
    }

    #[test]
    fn empty_stream_is_just_the_terminator() {
        let mut out = Vec::new();
        BitWriter::new(&mut out).finish();
        assert_eq!(out, [0]);
    }
}
