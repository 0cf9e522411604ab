use std::collections::HashMap;

use super::bit_writer::BitWriter;
use super::frame::Rect;
use super::CODE_LIMIT;

/// Key of a dictionary string: the code of its prefix plus the byte that extends it.
type DictKey = (u16, u8);

/// Variable-width LZW compressor for a single image. Created once per compression run and
/// consumed by [`CodeStream::finish`].
struct CodeStream<'a> {
    bits: BitWriter<'a>,
    dict: HashMap<DictKey, u16>,
    clear_code: u16,
    end_of_information_code: u16,
    next_code: u16,
    // code of the string matched so far
    pending: Option<u16>,
    code_size: u8,
    minimum_code_size: u8,
}

impl<'a> CodeStream<'a> {
    fn new(minimum_code_size: u8, out: &'a mut Vec<u8>) -> Self {
        debug_assert!((2..=8).contains(&minimum_code_size));
        let clear_code = 1 << minimum_code_size;

        let mut stream = Self {
            bits: BitWriter::new(out),
            dict: HashMap::new(),
            clear_code,
            end_of_information_code: clear_code + 1,
            next_code: clear_code + 2,
            pending: None,
            code_size: minimum_code_size + 1,
            minimum_code_size,
        };
        stream.write_code(clear_code);
        stream
    }

    fn write_code(&mut self, code: u16) {
        self.bits.write(code, self.code_size);
        if code == self.clear_code {
            self.reset();
        }
    }

    /// Forgets every learned string. Single bytes are their own codes, so they never need a
    /// dictionary entry.
    fn reset(&mut self) {
        self.code_size = self.minimum_code_size + 1;
        self.next_code = self.end_of_information_code + 1;
        self.pending = None;
        self.dict.clear();
    }

    fn push(&mut self, byte: u8) {
        let Some(matched) = self.pending else {
            self.pending = Some(u16::from(byte));
            return;
        };

        let key = (matched, byte);
        if let Some(&code) = self.dict.get(&key) {
            self.pending = Some(code);
            return;
        }

        self.write_code(matched);
        let assigned = self.next_code;
        self.dict.insert(key, assigned);
        self.next_code += 1;

        // running out of codes takes priority over growing the code size
        if self.next_code == CODE_LIMIT {
            self.write_code(self.clear_code);
        } else if assigned == 1 << self.code_size {
            self.code_size += 1;
        }

        self.pending = Some(u16::from(byte));
    }

    fn finish(mut self) {
        if let Some(matched) = self.pending.take() {
            self.write_code(matched);
        }
        self.write_code(self.end_of_information_code);
        self.bits.finish();
    }
}

/// Compresses the `rect` region of a `stride`-wide index buffer into a GIF image data block:
/// the minimum code size byte followed by sub-blocks and their terminator.
///
/// When `substitute` carries a transparent index, every pixel equal to the same pixel of
/// `previous` is replaced by that index before compression.
pub fn lzw_compress(
    pixels: &[u8],
    stride: usize,
    rect: Rect,
    minimum_code_size: u8,
    substitute: Option<(&[u8], u8)>,
) -> Vec<u8> {
    let minimum_code_size = minimum_code_size.clamp(2, 8);
    let mut out = vec![minimum_code_size];

    let mut codes = CodeStream::new(minimum_code_size, &mut out);
    for row in rect.rows(stride) {
        let current = &pixels[row.clone()];
        match substitute {
            None => current.iter().for_each(|&index| codes.push(index)),
            Some((previous, transparent)) => current
                .iter()
                .zip(&previous[row])
                .for_each(|(&now, &before)| {
                    codes.push(if now != before { now } else { transparent })
                }),
        }
    }
    codes.finish();

    out
}
