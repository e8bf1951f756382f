const POLYNOMIAL: u8 = 0x31;
const INIT: u8 = 0xFF;

pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = INIT;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// Appends the checksum to a big-endian word, as the sensors expect on writes.
pub fn word_with_crc(word: u16) -> [u8; 3] {
    let [hi, lo] = word.to_be_bytes();
    [hi, lo, crc8(&[hi, lo])]
}
