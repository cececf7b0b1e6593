//! Text decoding for pre-wrapped inputs: BOM first, statistical probe
//! second, UTF-8 as the fallback.

use encoding_rs::Encoding;

/// Decode `bytes` into text.
///
/// An explicit `label` (from configuration) wins when it names a known
/// encoding; otherwise a BOM decides, then a statistical probe over the
/// whole input. Returns the text and the encoding actually used.
pub fn decode_text(bytes: &[u8], label: Option<&str>) -> (String, &'static Encoding) {
    if let Some(label) = label {
        if let Some(encoding) = Encoding::for_label(label.as_bytes()) {
            let (text, _, _) = encoding.decode(bytes);
            return (text.into_owned(), encoding);
        }
        tracing::warn!(label, "unknown encoding label, probing instead");
    }

    if let Some((encoding, _bom_len)) = Encoding::for_bom(bytes) {
        let (text, _, _) = encoding.decode(bytes);
        return (text.into_owned(), encoding);
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (text, encoding, _) = encoding.decode(bytes);
    (text.into_owned(), encoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_wins_over_probing() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hej".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let (text, encoding) = decode_text(&bytes, None);
        assert_eq!(text, "hej");
        assert_eq!(encoding, encoding_rs::UTF_16LE);
    }

    #[test]
    fn explicit_label_overrides_detection() {
        // 0xE9 is 'é' in latin-1 and invalid as a UTF-8 start byte.
        let bytes = b"caf\xe9";
        let (text, encoding) = decode_text(bytes, Some("windows-1252"));
        assert_eq!(text, "café");
        assert_eq!(encoding, encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn plain_ascii_probes_to_utf8() {
        let (text, encoding) = decode_text(b"plain text", None);
        assert_eq!(text, "plain text");
        assert_eq!(encoding, encoding_rs::UTF_8);
    }
}
