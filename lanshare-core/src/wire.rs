//! Transfer header framing: 8 bytes BE payload size + 4 bytes BE name byte length + UTF-16 BE name.

use serde::Serialize;

const SIZE_LEN: usize = 8;
const NAME_LEN_SIZE: usize = 4;
/// Smallest possible header: payload size + name length, empty name.
pub const MIN_HEADER_LEN: usize = SIZE_LEN + NAME_LEN_SIZE;
/// Upper bound on the encoded name (4096 UTF-16 units).
pub const MAX_NAME_BYTES: usize = 8192;
/// Name length marker for a null string. Never produced by `encode_header`.
const NULL_NAME: u32 = 0xFFFF_FFFF;

/// Prefix sent before the raw file bytes of every transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferHeader {
    pub payload_size: u64,
    pub file_name: String,
}

impl TransferHeader {
    pub fn new(payload_size: u64, file_name: impl Into<String>) -> Self {
        Self {
            payload_size,
            file_name: file_name.into(),
        }
    }

    /// Length of this header once encoded.
    pub fn encoded_len(&self) -> usize {
        MIN_HEADER_LEN + self.file_name.encode_utf16().count() * 2
    }
}

/// Encode a header into its wire form.
pub fn encode_header(header: &TransferHeader) -> Result<Vec<u8>, HeaderEncodeError> {
    let units: Vec<u16> = header.file_name.encode_utf16().collect();
    let name_len = units.len() * 2;
    if name_len > MAX_NAME_BYTES {
        return Err(HeaderEncodeError::NameTooLong(name_len));
    }
    let mut out = Vec::with_capacity(MIN_HEADER_LEN + name_len);
    out.extend_from_slice(&header.payload_size.to_be_bytes());
    out.extend_from_slice(&(name_len as u32).to_be_bytes());
    for unit in units {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    Ok(out)
}

/// Error encoding a header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderEncodeError {
    #[error("file name is {0} bytes encoded, limit is {}", MAX_NAME_BYTES)]
    NameTooLong(usize),
}

/// Decode a header from the front of `bytes`. Returns the header and the number of bytes consumed.
/// Call with a partial buffer as often as needed: `NeedMore` means "try again with more bytes",
/// `Malformed` means the stream can never become a valid header.
pub fn decode_header(bytes: &[u8]) -> Result<(TransferHeader, usize), HeaderDecodeError> {
    if bytes.len() < MIN_HEADER_LEN {
        return Err(HeaderDecodeError::NeedMore);
    }
    let mut size = [0u8; SIZE_LEN];
    size.copy_from_slice(&bytes[..SIZE_LEN]);
    let payload_size = u64::from_be_bytes(size);

    let mut len = [0u8; NAME_LEN_SIZE];
    len.copy_from_slice(&bytes[SIZE_LEN..MIN_HEADER_LEN]);
    let name_len = u32::from_be_bytes(len);
    if name_len == NULL_NAME {
        return Err(MalformedHeader::NullName.into());
    }
    if name_len as usize > MAX_NAME_BYTES {
        return Err(MalformedHeader::NameTooLong(name_len).into());
    }
    if name_len % 2 != 0 {
        return Err(MalformedHeader::OddNameLength(name_len).into());
    }

    let end = MIN_HEADER_LEN + name_len as usize;
    if bytes.len() < end {
        return Err(HeaderDecodeError::NeedMore);
    }
    let units: Vec<u16> = bytes[MIN_HEADER_LEN..end]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let file_name = String::from_utf16(&units).map_err(|_| MalformedHeader::InvalidName)?;
    Ok((
        TransferHeader {
            payload_size,
            file_name,
        },
        end,
    ))
}

/// Error decoding a header (need more bytes, or structurally invalid).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("malformed header: {0}")]
    Malformed(#[from] MalformedHeader),
}

/// Why a header can never be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MalformedHeader {
    #[error("file name is a null string")]
    NullName,
    #[error("file name length {0} exceeds {} bytes", MAX_NAME_BYTES)]
    NameTooLong(u32),
    #[error("file name length {0} is not a whole number of UTF-16 units")]
    OddNameLength(u32),
    #[error("file name is not valid UTF-16")]
    InvalidName,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> TransferHeader {
        TransferHeader::new(10_000, "report-ü-日本.pdf")
    }

    #[test]
    fn roundtrip_header() {
        let h = sample_header();
        let bytes = encode_header(&h).unwrap();
        assert_eq!(bytes.len(), h.encoded_len());
        let (decoded, n) = decode_header(&bytes).unwrap();
        assert_eq!(n, bytes.len());
        assert_eq!(decoded, h);
    }

    #[test]
    fn known_layout() {
        let bytes = encode_header(&TransferHeader::new(5, "ab")).unwrap();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 0, 0, 0, 0, 5, 0, 0, 0, 4, 0, b'a', 0, b'b']
        );
    }

    #[test]
    fn empty_name_and_zero_size() {
        let h = TransferHeader::new(0, "");
        let bytes = encode_header(&h).unwrap();
        assert_eq!(bytes.len(), MIN_HEADER_LEN);
        assert_eq!(decode_header(&bytes).unwrap(), (h, MIN_HEADER_LEN));
    }

    #[test]
    fn every_prefix_needs_more() {
        let bytes = encode_header(&sample_header()).unwrap();
        for cut in 0..bytes.len() {
            assert_eq!(
                decode_header(&bytes[..cut]),
                Err(HeaderDecodeError::NeedMore),
                "prefix of {} bytes",
                cut
            );
        }
    }

    #[test]
    fn trailing_body_bytes_not_consumed() {
        let h = sample_header();
        let mut bytes = encode_header(&h).unwrap();
        let header_len = bytes.len();
        bytes.extend_from_slice(b"body bytes");
        let (decoded, n) = decode_header(&bytes).unwrap();
        assert_eq!(decoded, h);
        assert_eq!(n, header_len);
    }

    #[test]
    fn null_name_is_malformed() {
        let mut bytes = 7u64.to_be_bytes().to_vec();
        bytes.extend_from_slice(&NULL_NAME.to_be_bytes());
        assert_eq!(
            decode_header(&bytes),
            Err(HeaderDecodeError::Malformed(MalformedHeader::NullName))
        );
    }

    #[test]
    fn oversized_name_is_malformed_before_bytes_arrive() {
        let mut bytes = 7u64.to_be_bytes().to_vec();
        bytes.extend_from_slice(&((MAX_NAME_BYTES as u32) + 2).to_be_bytes());
        assert!(matches!(
            decode_header(&bytes),
            Err(HeaderDecodeError::Malformed(MalformedHeader::NameTooLong(_)))
        ));
    }

    #[test]
    fn odd_name_length_is_malformed() {
        let mut bytes = 7u64.to_be_bytes().to_vec();
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&[0, b'a', 0]);
        assert_eq!(
            decode_header(&bytes),
            Err(HeaderDecodeError::Malformed(MalformedHeader::OddNameLength(3)))
        );
    }

    #[test]
    fn lone_surrogate_is_malformed() {
        let mut bytes = 7u64.to_be_bytes().to_vec();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&0xD800u16.to_be_bytes());
        assert_eq!(
            decode_header(&bytes),
            Err(HeaderDecodeError::Malformed(MalformedHeader::InvalidName))
        );
    }

    #[test]
    fn encode_rejects_huge_name() {
        let h = TransferHeader::new(1, "x".repeat(MAX_NAME_BYTES));
        assert!(matches!(
            encode_header(&h),
            Err(HeaderEncodeError::NameTooLong(_))
        ));
    }
}
