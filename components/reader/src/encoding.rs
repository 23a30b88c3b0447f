//! Encoding detection and incremental decoding
//!
//! The first four bytes of an entity select an encoding family. A declared
//! encoding may refine it later, as long as both agree on the code unit
//! layout.

use std::fmt;

use encoding_rs::{Decoder, DecoderResult, Encoding, UTF_16BE, UTF_16LE, UTF_8};

use crate::error::Reason;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Family {
    /// UTF-8 or any other encoding sharing ASCII's code points for markup
    AsciiCompatible,
    Utf16Be,
    Utf16Le,
    Utf32Be,
    Utf32Le,
}

impl Family {
    fn unit(self) -> usize {
        match self {
            Family::AsciiCompatible => 1,
            Family::Utf16Be | Family::Utf16Le => 2,
            Family::Utf32Be | Family::Utf32Le => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Sniffed {
    pub family: Family,
    pub bom_len: usize,
}

/// Detect the encoding family from the first bytes of an entity.
///
/// `bytes` should contain four bytes unless the entity is shorter.
pub(crate) fn sniff(bytes: &[u8]) -> Result<Sniffed, Reason> {
    let sniffed = |family, bom_len| Ok(Sniffed { family, bom_len });
    match bytes {
        [0x00, 0x00, 0xFE, 0xFF, ..] => sniffed(Family::Utf32Be, 4),
        [0xFF, 0xFE, 0x00, 0x00, ..] => sniffed(Family::Utf32Le, 4),
        [0x00, 0x00, 0x00, 0x3C, ..] => sniffed(Family::Utf32Be, 0),
        [0x3C, 0x00, 0x00, 0x00, ..] => sniffed(Family::Utf32Le, 0),
        [0xEF, 0xBB, 0xBF, ..] => sniffed(Family::AsciiCompatible, 3),
        [0xFE, 0xFF, ..] => sniffed(Family::Utf16Be, 2),
        [0xFF, 0xFE, ..] => sniffed(Family::Utf16Le, 2),
        [0x00, 0x3C, 0x00, 0x3F, ..] => sniffed(Family::Utf16Be, 0),
        [0x3C, 0x00, 0x3F, 0x00, ..] => sniffed(Family::Utf16Le, 0),
        [0x4C, 0x6F, 0xA7, 0x94, ..] => Err(Reason::UnsupportedEncoding("EBCDIC".to_string())),
        _ => sniffed(Family::AsciiCompatible, 0),
    }
}

/// Streaming decoder for one entity
pub(crate) enum TextDecoder {
    Rs(Decoder),
    Utf32 { big_endian: bool, pending: Vec<u8> },
}

impl fmt::Debug for TextDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TextDecoder").field(&self.name()).finish()
    }
}

impl TextDecoder {
    pub fn for_family(family: Family) -> Self {
        match family {
            Family::AsciiCompatible => TextDecoder::Rs(UTF_8.new_decoder_without_bom_handling()),
            Family::Utf16Be => TextDecoder::Rs(UTF_16BE.new_decoder_without_bom_handling()),
            Family::Utf16Le => TextDecoder::Rs(UTF_16LE.new_decoder_without_bom_handling()),
            Family::Utf32Be => TextDecoder::Utf32 {
                big_endian: true,
                pending: Vec::new(),
            },
            Family::Utf32Le => TextDecoder::Utf32 {
                big_endian: false,
                pending: Vec::new(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextDecoder::Rs(decoder) => decoder.encoding().name(),
            TextDecoder::Utf32 {
                big_endian: true, ..
            } => "UTF-32BE",
            TextDecoder::Utf32 {
                big_endian: false,
                ..
            } => "UTF-32LE",
        }
    }

    /// Decode `input` and append to `out`. Returns the number of consumed
    /// bytes, which is always all of them for a well-formed prefix.
    pub fn decode(&mut self, input: &[u8], out: &mut String, last: bool) -> Result<usize, Reason> {
        match self {
            TextDecoder::Rs(decoder) => {
                let mut read = 0;
                loop {
                    let needed = decoder
                        .max_utf8_buffer_length_without_replacement(input.len() - read)
                        .unwrap_or(input.len() - read + 16);
                    out.reserve(needed);
                    let (result, n) =
                        decoder.decode_to_string_without_replacement(&input[read..], out, last);
                    read += n;
                    match result {
                        DecoderResult::InputEmpty => return Ok(read),
                        DecoderResult::OutputFull => continue,
                        DecoderResult::Malformed(_, _) => {
                            return Err(Reason::InvalidBytes(decoder.encoding().name()))
                        }
                    }
                }
            }
            TextDecoder::Utf32 {
                big_endian,
                pending,
            } => {
                pending.extend_from_slice(input);
                let whole = pending.len() / 4 * 4;
                for unit in pending[..whole].chunks_exact(4) {
                    let bytes = [unit[0], unit[1], unit[2], unit[3]];
                    let code = if *big_endian {
                        u32::from_be_bytes(bytes)
                    } else {
                        u32::from_le_bytes(bytes)
                    };
                    match char::from_u32(code) {
                        Some(c) => out.push(c),
                        None => return Err(Reason::InvalidBytes(self_name(*big_endian))),
                    }
                }
                pending.drain(..whole);
                if last && !pending.is_empty() {
                    return Err(Reason::InvalidBytes(self_name(*big_endian)));
                }
                Ok(input.len())
            }
        }
    }
}

fn self_name(big_endian: bool) -> &'static str {
    if big_endian {
        "UTF-32BE"
    } else {
        "UTF-32LE"
    }
}

/// Length of the prefix of `raw` up to and including the first `>` code
/// unit. Decoding only this much keeps the rest available for a decoder
/// chosen by the XML declaration.
pub(crate) fn probe_len(family: Family, raw: &[u8]) -> Option<usize> {
    let unit = family.unit();
    match family {
        Family::AsciiCompatible => memchr::memchr(b'>', raw).map(|i| i + 1),
        _ => raw
            .chunks_exact(unit)
            .position(|chunk| match family {
                Family::Utf16Be => chunk == [0x00, 0x3E],
                Family::Utf16Le => chunk == [0x3E, 0x00],
                Family::Utf32Be => chunk == [0x00, 0x00, 0x00, 0x3E],
                _ => chunk == [0x3E, 0x00, 0x00, 0x00],
            })
            .map(|i| (i + 1) * unit),
    }
}

fn is_utf32_label(label: &str) -> bool {
    matches!(
        label.to_ascii_lowercase().as_str(),
        "utf-32" | "utf-32be" | "utf-32le" | "ucs-4" | "iso-10646-ucs-4"
    )
}

fn is_utf16_label(label: &str) -> bool {
    matches!(
        label.to_ascii_lowercase().as_str(),
        "utf-16" | "utf-16be" | "utf-16le" | "iso-10646-ucs-2" | "ucs-2" | "unicode"
    )
}

/// Decoder for an encoding forced by the caller.
pub(crate) fn decoder_for_label(label: &str) -> Result<(Family, TextDecoder), Reason> {
    let lower = label.to_ascii_lowercase();
    if is_utf32_label(label) {
        let family = if lower == "utf-32le" {
            Family::Utf32Le
        } else {
            Family::Utf32Be
        };
        return Ok((family, TextDecoder::for_family(family)));
    }
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| Reason::UnsupportedEncoding(label.to_string()))?;
    let family = if encoding == UTF_16BE {
        Family::Utf16Be
    } else if encoding == UTF_16LE {
        Family::Utf16Le
    } else {
        Family::AsciiCompatible
    };
    Ok((
        family,
        TextDecoder::Rs(encoding.new_decoder_without_bom_handling()),
    ))
}

/// What to do after an entity declares `label` as its encoding.
///
/// Returns a replacement decoder, or `None` when the current one stays.
pub(crate) fn switch_encoding(
    detected: Family,
    has_bom: bool,
    current: &TextDecoder,
    label: &str,
) -> Result<Option<TextDecoder>, Reason> {
    let mismatch = || Reason::EncodingSwitch {
        detected: current.name(),
        declared: label.to_string(),
    };

    match detected {
        Family::Utf16Be | Family::Utf16Le => {
            if is_utf16_label(label) {
                Ok(None)
            } else {
                Err(mismatch())
            }
        }
        Family::Utf32Be | Family::Utf32Le => {
            if is_utf32_label(label) {
                Ok(None)
            } else {
                Err(mismatch())
            }
        }
        Family::AsciiCompatible => {
            if is_utf16_label(label) || is_utf32_label(label) {
                return Err(mismatch());
            }
            let encoding = Encoding::for_label(label.as_bytes())
                .ok_or_else(|| Reason::UnsupportedEncoding(label.to_string()))?;
            if encoding == UTF_8 {
                return Ok(None);
            }
            if has_bom || !encoding.is_ascii_compatible() {
                return Err(mismatch());
            }
            Ok(Some(TextDecoder::Rs(
                encoding.new_decoder_without_bom_handling(),
            )))
        }
    }
}
