//! Header and data checksums shared by MS/TP and PTP (ASHRAE 135 Annex G).
//!
//! - **Header CRC-8**, polynomial X^8 + X^7 + 1, seeded with [`CRC8_SEED`].
//! - **Data CRC-16**, CRC-CCITT polynomial X^16 + X^12 + X^5 + 1 in reflected
//!   form (0x8408), seeded with [`CRC16_SEED`]. This is not the MODBUS
//!   CRC-16 (0xA001).
//!
//! Both functions return the raw accumulator. The value placed on the wire is
//! its ones complement, the data CRC least significant octet first. A receiver
//! that runs the accumulator over the protected octets *and* the received
//! checksum ends up with a fixed residue ([`CRC8_RESIDUE`], [`CRC16_RESIDUE`])
//! when nothing was corrupted.
//!
//! # Examples
//!
//! ```
//! use bacnet_link::datalink::crc::{crc8, CRC8_SEED};
//!
//! // Token frame from station 5 to station 16 (Annex G.1)
//! let register = crc8(CRC8_SEED, &[0x00, 0x10, 0x05, 0x00, 0x00]);
//! assert_eq!(register, 0x73);
//! assert_eq!(!register, 0x8C);
//! ```

pub const CRC8_SEED: u8 = 0xFF;
pub const CRC16_SEED: u16 = 0xFFFF;

/// Accumulator after a header and its valid checksum octet.
pub const CRC8_RESIDUE: u8 = 0x55;
/// Accumulator after data and its two valid checksum octets.
pub const CRC16_RESIDUE: u16 = 0xF0B8;

static CRC8_TABLE: [u8; 256] = crc8_table();
static CRC16_TABLE: [u16; 256] = crc16_table();

/// One step of the Annex G.1 parallel header CRC.
const fn crc8_step(input: u8) -> u8 {
    // XOR C7..C0 with D7..D0 has already happened; fold the polynomial terms
    let mut temp = input as u16;
    temp = temp
        ^ (temp << 1)
        ^ (temp << 2)
        ^ (temp << 3)
        ^ (temp << 4)
        ^ (temp << 5)
        ^ (temp << 6)
        ^ (temp << 7);

    // Combine bits shifted out left hand end
    ((temp & 0xfe) ^ ((temp >> 8) & 1)) as u8
}

const fn crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = crc8_step(i as u8);
        i += 1;
    }
    table
}

const fn crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u16;
        let mut bit = 0;
        while bit < 8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0x8408;
            } else {
                crc >>= 1;
            }
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Update a header CRC accumulator with one octet.
#[inline]
pub fn crc8_byte(seed: u8, byte: u8) -> u8 {
    CRC8_TABLE[(seed ^ byte) as usize]
}

/// Run the header CRC accumulator over `buf`, starting from `seed`.
pub fn crc8(seed: u8, buf: &[u8]) -> u8 {
    buf.iter().fold(seed, |crc, &b| crc8_byte(crc, b))
}

/// Update a data CRC accumulator with one octet.
#[inline]
pub fn crc16_byte(seed: u16, byte: u8) -> u16 {
    (seed >> 8) ^ CRC16_TABLE[((seed ^ byte as u16) & 0xff) as usize]
}

/// Run the data CRC accumulator over `buf`, starting from `seed`.
pub fn crc16(seed: u16, buf: &[u8]) -> u16 {
    buf.iter().fold(seed, |crc, &b| crc16_byte(crc, b))
}

/// Header checksum octet as transmitted.
pub fn header_checksum(header: &[u8]) -> u8 {
    !crc8(CRC8_SEED, header)
}

/// Data checksum octets as transmitted (low octet first).
pub fn data_checksum(data: &[u8]) -> [u8; 2] {
    (!crc16(CRC16_SEED, data)).to_le_bytes()
}

/// True if `header` followed by its received checksum octet is intact.
pub fn header_valid(header: &[u8], checksum: u8) -> bool {
    crc8_byte(crc8(CRC8_SEED, header), checksum) == CRC8_RESIDUE
}

/// True if `data` followed by its two received checksum octets is intact.
pub fn data_valid(data: &[u8], checksum: [u8; 2]) -> bool {
    crc16(crc16(CRC16_SEED, data), &checksum) == CRC16_RESIDUE
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::crc::{Algorithm, Crc, CRC_16_IBM_SDLC};
    use proptest::prelude::*;

    /// X^8 + X^7 + 1, reflected, with the BACnet seed and complement.
    const CRC_8_BACNET: Algorithm<u8> = Algorithm {
        width: 8,
        poly: 0x81,
        init: 0xff,
        refin: true,
        refout: true,
        xorout: 0xff,
        check: 0x89,
        residue: 0x55,
    };

    // ===== Annex G vectors =====

    #[test]
    fn test_header_crc_token_frame_ashrae_vector() {
        // Token, dest=0x10, src=0x05, length=0
        let header = [0x00, 0x10, 0x05, 0x00, 0x00];
        let register = crc8(CRC8_SEED, &header);
        assert_eq!(register, 0x73, "expected 0x73, got 0x{:02X}", register);
        assert_eq!(header_checksum(&header), 0x8C);
    }

    #[test]
    fn test_header_crc_residue() {
        let header = [0x00, 0x10, 0x05, 0x00, 0x00];
        assert!(header_valid(&header, 0x8C));
        assert!(!header_valid(&header, 0x8D));
        assert_eq!(crc8(CRC8_SEED, &[0x00, 0x10, 0x05, 0x00, 0x00, 0x8C]), CRC8_RESIDUE);
    }

    #[test]
    fn test_data_crc_ashrae_vector() {
        let data = [0x01, 0x22, 0x30];
        let register = crc16(CRC16_SEED, &data);
        assert_eq!(register, 0x42EF, "expected 0x42EF, got 0x{:04X}", register);
        assert_eq!(data_checksum(&data), [0x10, 0xBD]);
        assert!(data_valid(&data, [0x10, 0xBD]));
        assert!(!data_valid(&data, [0xBD, 0x10]));
    }

    #[test]
    fn test_byte_and_slice_forms_agree() {
        let header = [0x05, 0xFF, 0x07, 0x00, 0x10];
        let mut crc = CRC8_SEED;
        for &b in &header {
            crc = crc8_byte(crc, b);
        }
        assert_eq!(crc, crc8(CRC8_SEED, &header));

        let mut crc = CRC16_SEED;
        for &b in &header {
            crc = crc16_byte(crc, b);
        }
        assert_eq!(crc, crc16(CRC16_SEED, &header));
    }

    #[test]
    fn test_empty_input_returns_seed() {
        assert_eq!(crc8(0x42, &[]), 0x42);
        assert_eq!(crc16(0x1234, &[]), 0x1234);
    }

    // ===== Cross-check against the crc crate =====

    #[test]
    fn test_check_values() {
        let crc8_ref = Crc::<u8>::new(&CRC_8_BACNET);
        let crc16_ref = Crc::<u16>::new(&CRC_16_IBM_SDLC);
        assert_eq!(header_checksum(b"123456789"), crc8_ref.checksum(b"123456789"));
        assert_eq!(
            u16::from_le_bytes(data_checksum(b"123456789")),
            crc16_ref.checksum(b"123456789")
        );
    }

    proptest! {
        #[test]
        fn prop_header_crc_matches_reference(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let reference = Crc::<u8>::new(&CRC_8_BACNET);
            prop_assert_eq!(header_checksum(&data), reference.checksum(&data));
        }

        #[test]
        fn prop_data_crc_matches_reference(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let reference = Crc::<u16>::new(&CRC_16_IBM_SDLC);
            prop_assert_eq!(u16::from_le_bytes(data_checksum(&data)), reference.checksum(&data));
        }

        #[test]
        fn prop_single_bit_error_detected(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            index in any::<proptest::sample::Index>(),
            bit in 0u8..8,
        ) {
            let crc8_out = header_checksum(&data);
            let crc16_out = data_checksum(&data);
            let mut corrupted = data.clone();
            let i = index.index(corrupted.len());
            corrupted[i] ^= 1 << bit;
            prop_assert!(!header_valid(&corrupted, crc8_out));
            prop_assert!(!data_valid(&corrupted, crc16_out));
            prop_assert!(header_valid(&data, crc8_out));
            prop_assert!(data_valid(&data, crc16_out));
        }
    }
}
