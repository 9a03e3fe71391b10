//! Streaming output decoder.
//!
//! PTY reads split multi-byte UTF-8 characters and escape sequences across
//! chunk boundaries, so the decoder is stateful: an incomplete UTF-8 tail
//! and an unterminated trailing escape are both carried into the next
//! `feed`. Each chunk yields two strings: `raw` (decoded text with escapes
//! intact, for the interactive renderer) and `clean` (escapes and stray C0
//! controls removed, for block accumulation and plain display).

use std::sync::OnceLock;

use regex::Regex;

/// An unterminated escape longer than this is treated as literal text
/// rather than buffered forever (a corrupt stream must not stall output).
const MAX_PENDING_ESCAPE: usize = 4096;

/// Decoded output of one `feed` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedChunk {
    pub clean: String,
    pub raw: String,
}

impl DecodedChunk {
    pub fn is_empty(&self) -> bool {
        self.clean.is_empty() && self.raw.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    /// Incomplete trailing UTF-8 sequence from the previous chunk.
    utf8_carry: Vec<u8>,
    /// Unterminated trailing escape sequence from the previous chunk.
    escape_carry: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk of bytes from the child.
    pub fn feed(&mut self, bytes: &[u8]) -> DecodedChunk {
        let decoded = self.decode_utf8(bytes);
        if decoded.is_empty() && self.escape_carry.is_empty() {
            return DecodedChunk::default();
        }

        let mut pending = std::mem::take(&mut self.escape_carry);
        pending.push_str(&decoded);

        let emit = match unterminated_escape_start(&pending) {
            Some(start) if pending.len() - start <= MAX_PENDING_ESCAPE => {
                self.escape_carry = pending.split_off(start);
                pending
            }
            _ => pending,
        };

        DecodedChunk {
            clean: strip_escapes(&emit),
            raw: emit,
        }
    }

    /// Drain whatever is still buffered (called at EOF).
    pub fn flush(&mut self) -> DecodedChunk {
        let mut raw = std::mem::take(&mut self.escape_carry);
        if !self.utf8_carry.is_empty() {
            self.utf8_carry.clear();
            raw.push('\u{FFFD}');
        }
        DecodedChunk {
            clean: strip_escapes(&raw),
            raw,
        }
    }

    /// Forget all buffered state.
    pub fn reset(&mut self) {
        self.utf8_carry.clear();
        self.escape_carry.clear();
    }

    fn decode_utf8(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.utf8_carry);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    // Safe: from_utf8 just validated this prefix.
                    out.push_str(unsafe { std::str::from_utf8_unchecked(&rest[..valid]) });
                    match e.error_len() {
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            rest = &rest[valid + bad..];
                        }
                        None => {
                            // Incomplete trailing sequence: carry it.
                            self.utf8_carry = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }
}

/// Byte offset where an unterminated escape sequence begins at the end of
/// `s`, or `None` when every sequence in `s` is complete.
fn unterminated_escape_start(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != 0x1b {
            i += 1;
            continue;
        }
        let start = i;
        let Some(&kind) = bytes.get(i + 1) else {
            return Some(start);
        };
        match kind {
            // CSI: parameters and intermediates until a final byte in @..~.
            b'[' => {
                let mut j = i + 2;
                while j < bytes.len() && !(0x40..=0x7e).contains(&bytes[j]) {
                    j += 1;
                }
                if j >= bytes.len() {
                    return Some(start);
                }
                i = j + 1;
            }
            // OSC: terminated by BEL or ST (ESC \).
            b']' => {
                let mut j = i + 2;
                loop {
                    match bytes.get(j) {
                        None => return Some(start),
                        Some(0x07) => {
                            i = j + 1;
                            break;
                        }
                        Some(0x1b) => match bytes.get(j + 1) {
                            None => return Some(start),
                            Some(b'\\') => {
                                i = j + 2;
                                break;
                            }
                            Some(_) => j += 1,
                        },
                        Some(_) => j += 1,
                    }
                }
            }
            // DCS / SOS / PM / APC: terminated by ST only.
            b'P' | b'X' | b'^' | b'_' => {
                let mut j = i + 2;
                loop {
                    match bytes.get(j) {
                        None => return Some(start),
                        Some(0x1b) => match bytes.get(j + 1) {
                            None => return Some(start),
                            Some(b'\\') => {
                                i = j + 2;
                                break;
                            }
                            Some(_) => j += 1,
                        },
                        Some(_) => j += 1,
                    }
                }
            }
            // Two-character escape, already complete.
            _ => i += 2,
        }
    }
    None
}

fn escape_regexes() -> &'static [Regex; 4] {
    static REGEXES: OnceLock<[Regex; 4]> = OnceLock::new();
    REGEXES.get_or_init(|| {
        let compile = |pattern| {
            Regex::new(pattern).expect("escape grammar patterns are hard-coded and valid")
        };
        [
            // CSI: ESC [ params intermediates final.
            compile(r"\x1b\[[0-?]*[ -/]*[@-~]"),
            // OSC: ESC ] ... (BEL | ST).
            compile(r"(?s)\x1b\].*?(?:\x07|\x1b\\)"),
            // DCS / SOS / PM / APC: ESC P|X|^|_ ... ST.
            compile(r"(?s)\x1b[PX^_].*?\x1b\\"),
            // Remaining single-character escapes.
            compile(r"\x1b[@-_]"),
        ]
    })
}

/// Remove every escape sequence, then drop C0 controls other than
/// TAB, LF and CR (BEL and BS go too).
pub fn strip_escapes(text: &str) -> String {
    let mut stripped = text.to_string();
    for regex in escape_regexes() {
        stripped = regex.replace_all(&stripped, "").into_owned();
    }
    stripped
        .chars()
        .filter(|&c| c == '\t' || c == '\n' || c == '\r' || !c.is_control())
        .collect()
}
