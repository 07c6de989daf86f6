//! Xilinx `.bit` file header parsing: spec.md §4.5.

use crate::error::{JtagError, Result};

/// A parsed `.bit` file: the tagged metadata fields plus the raw
/// configuration payload (still MSB-first per byte; the caller is
/// responsible for bit-reversal before shifting it onto the TAP).
#[derive(Debug, Clone)]
pub struct BitFile {
    pub design_name: Option<String>,
    pub device_name: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub data: Vec<u8>,
}

/// Parse a `.bit` file, tolerating a header-less file that's just the raw
/// configuration payload: if the tagged-field parse fails, the whole input
/// is treated as `data` with no metadata, per spec.md §6.
pub fn parse(bytes: &[u8]) -> Result<BitFile> {
    match parse_tagged(bytes) {
        Ok(bit_file) => Ok(bit_file),
        Err(_) => Ok(BitFile {
            design_name: None,
            device_name: None,
            date: None,
            time: None,
            data: bytes.to_vec(),
        }),
    }
}

fn parse_tagged(bytes: &[u8]) -> Result<BitFile> {
    let mut pos = 0usize;
    let header_len = read_u16_be(bytes, &mut pos)? as usize;
    pos += header_len;
    pos += 2;

    let mut design_name = None;
    let mut device_name = None;
    let mut date = None;
    let mut time = None;
    let mut data = None;

    while pos < bytes.len() {
        let tag = bytes[pos];
        pos += 1;
        match tag {
            b'a' | b'b' | b'c' | b'd' => {
                let len = read_u16_be(bytes, &mut pos)? as usize;
                let field = read_nul_terminated(bytes, &mut pos, len)?;
                match tag {
                    b'a' => design_name = Some(field),
                    b'b' => device_name = Some(field),
                    b'c' => date = Some(field),
                    _ => time = Some(field),
                }
            }
            b'e' => {
                let len = read_u32_be(bytes, &mut pos)? as usize;
                if pos + len > bytes.len() {
                    return Err(JtagError::BitstreamFormatError(format!(
                        "data field claims {} bytes, only {} remain",
                        len,
                        bytes.len() - pos
                    ))
                    .into());
                }
                data = Some(bytes[pos..pos + len].to_vec());
                pos += len;
            }
            other => {
                return Err(JtagError::BitstreamFormatError(format!("unknown tag byte {:#04x}", other)).into());
            }
        }
    }

    Ok(BitFile {
        design_name,
        device_name,
        date,
        time,
        data: data.ok_or_else(|| JtagError::BitstreamFormatError("missing 'e' data field".to_string()))?,
    })
}

fn read_u16_be(bytes: &[u8], pos: &mut usize) -> Result<u16> {
    if *pos + 2 > bytes.len() {
        return Err(JtagError::BitstreamFormatError("truncated length field".to_string()).into());
    }
    let v = u16::from_be_bytes([bytes[*pos], bytes[*pos + 1]]);
    *pos += 2;
    Ok(v)
}

fn read_u32_be(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    if *pos + 4 > bytes.len() {
        return Err(JtagError::BitstreamFormatError("truncated length field".to_string()).into());
    }
    let v = u32::from_be_bytes([bytes[*pos], bytes[*pos + 1], bytes[*pos + 2], bytes[*pos + 3]]);
    *pos += 4;
    Ok(v)
}

fn read_nul_terminated(bytes: &[u8], pos: &mut usize, len: usize) -> Result<String> {
    if *pos + len > bytes.len() {
        return Err(JtagError::BitstreamFormatError("truncated string field".to_string()).into());
    }
    let slice = &bytes[*pos..*pos + len];
    *pos += len;
    let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    Ok(String::from_utf8_lossy(&slice[..end]).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(tag: u8, value: &str) -> Vec<u8> {
        let mut v = vec![tag];
        let s = value.as_bytes();
        let len = (s.len() + 1) as u16;
        v.extend_from_slice(&len.to_be_bytes());
        v.extend_from_slice(s);
        v.push(0);
        v
    }

    #[test]
    fn parses_tagged_fields_and_data() {
        let mut bytes = Vec::new();
        let preamble = vec![0u8; 9];
        bytes.extend_from_slice(&(preamble.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&preamble);
        bytes.extend_from_slice(&[0, 0]); // the extra 2 skipped bytes
        bytes.extend(field(b'a', "top"));
        bytes.extend(field(b'b', "7a35tcsg324-1"));
        bytes.extend(field(b'c', "2026/07/26"));
        bytes.extend(field(b'd', "12:00:00"));
        bytes.push(b'e');
        let payload = vec![0xDEu8, 0xAD, 0xBE, 0xEF];
        bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        bytes.extend_from_slice(&payload);

        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.design_name.as_deref(), Some("top"));
        assert_eq!(parsed.device_name.as_deref(), Some("7a35tcsg324-1"));
        assert_eq!(parsed.data, payload);
    }

    #[test]
    fn missing_data_field_is_an_error_from_the_tagged_parser() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u16.to_be_bytes());
        bytes.extend_from_slice(&[0, 0]);
        assert!(parse_tagged(&bytes).is_err());
    }

    #[test]
    fn headerless_file_falls_back_to_raw_payload() {
        // No tagged-field header at all, just a run of configuration bytes
        // that doesn't parse as one: the whole input becomes `data`.
        let bytes = vec![0xFFu8, 0x00, 0xAA, 0x55, 0x12, 0x34];
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed.design_name, None);
        assert_eq!(parsed.device_name, None);
        assert_eq!(parsed.data, bytes);
    }
}
