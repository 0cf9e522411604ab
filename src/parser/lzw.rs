use super::bit_reader::BitReader;
use super::ParserError;

const MAX_TABLE_LEN: usize = 1 << 12;

/// Decompresses GIF image data (sub-blocks already joined) into palette indices.
///
/// Data ending without an end-of-information code is accepted; whatever was decoded up to
/// that point is returned.
pub fn lzw_decode(buf: &[u8], minimum_code_size: u8) -> Result<Vec<u8>, ParserError> {
    if !(1..=11).contains(&minimum_code_size) {
        return Err(ParserError::InvalidMinimumCodeSize(minimum_code_size));
    }

    let clear_code = 1usize << minimum_code_size;
    let end_of_information_code = clear_code + 1;

    let mut reader = BitReader::new(buf);
    let mut code_table = init_code_table(minimum_code_size);
    let mut code_size = u32::from(minimum_code_size) + 1;
    let mut last_code: Option<usize> = None;
    let mut indicies: Vec<u8> = Vec::new();

    while let Some(code) = reader.next(code_size) {
        let code = code as usize;

        if code == clear_code {
            code_table = init_code_table(minimum_code_size);
            code_size = u32::from(minimum_code_size) + 1;
            last_code = None;
            continue;
        }
        if code == end_of_information_code {
            break;
        }

        let entry = match (code_table.get(code), last_code) {
            (Some(entry), _) => entry.clone(),
            // {CODE-1}+K where K is the first index of {CODE-1}
            (None, Some(last)) if code == code_table.len() => {
                let mut entry = code_table[last].clone();
                entry.push(entry[0]);
                entry
            }
            _ => {
                return Err(ParserError::InvalidCode {
                    code,
                    table_len: code_table.len(),
                })
            }
        };
        indicies.extend_from_slice(&entry);

        if let Some(last) = last_code {
            if code_table.len() < MAX_TABLE_LEN {
                let mut new_code_table_entry = code_table[last].clone();
                new_code_table_entry.push(entry[0]);
                code_table.push(new_code_table_entry);

                if code_table.len() == 1 << code_size && code_size < 12 {
                    code_size += 1;
                }
            }
        }
        last_code = Some(code);
    }

    Ok(indicies)
}

/// Single indices plus two placeholder entries for the clear and end codes.
fn init_code_table(minimum_code_size: u8) -> Vec<Vec<u8>> {
    let clear_code = 1usize << minimum_code_size;
    (0..clear_code + 2).map(|i| vec![i as u8]).collect()
}
