//! RTF markup to plain text.
//!
//! A single-pass group/control-word scanner. Formatting is dropped, known
//! non-text destinations (font and colour tables, pictures, field
//! instructions, document info) are skipped, and `\'hh` / `\uN` escapes are
//! decoded. Input that does not open with `{\rtf` or whose groups do not
//! balance is rejected, which is how truncated files are caught.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RtfError {
    #[error("missing {{\\rtf header")]
    MissingHeader,
    #[error("unexpected end of input inside {0} open group(s)")]
    Truncated(usize),
    #[error("unbalanced closing brace at byte {0}")]
    UnbalancedClose(usize),
    #[error("invalid hex escape at byte {0}")]
    BadHexEscape(usize),
}

/// Destinations whose content is never document text.
const SKIPPED_DESTINATIONS: &[&str] = &[
    "author", "buptim", "colortbl", "comment", "company", "creatim", "datastore", "doccomm",
    "docvar", "filetbl", "fldinst", "fonttbl", "footer", "footerf", "footerl", "footerr",
    "generator", "header", "headerf", "headerl", "headerr", "info", "keywords", "latentstyles",
    "listoverridetable", "listtable", "listtext", "nonshppict", "object", "objdata", "operator",
    "pict", "pntext", "printim", "revtbl", "revtim", "rsidtbl", "stylesheet", "subject",
    "themedata", "title", "xmlnstbl",
];

#[derive(Clone, Copy)]
struct GroupState {
    skip: bool,
    /// Number of fallback characters following each `\uN`.
    uc: usize,
}

impl Default for GroupState {
    fn default() -> Self {
        Self { skip: false, uc: 1 }
    }
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
    out: String,
    stack: Vec<GroupState>,
    state: GroupState,
    codepage: u32,
    /// Fallback characters still to drop after a `\uN`.
    pending_skip: usize,
    high_surrogate: Option<u16>,
}

/// Decodes RTF bytes to plain text.
pub fn rtf_to_text(input: &[u8]) -> Result<String, RtfError> {
    let start = input
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(input.len());
    let input = &input[start..];
    let input = input.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(input);
    if !input.starts_with(b"{\\rtf") {
        return Err(RtfError::MissingHeader);
    }

    let mut decoder = Decoder {
        input,
        pos: 0,
        out: String::new(),
        stack: Vec::new(),
        state: GroupState::default(),
        codepage: 1252,
        pending_skip: 0,
        high_surrogate: None,
    };
    decoder.run()?;
    Ok(decoder.out)
}

impl<'a> Decoder<'a> {
    fn run(&mut self) -> Result<(), RtfError> {
        while self.pos < self.input.len() {
            let b = self.input[self.pos];
            match b {
                b'{' => {
                    self.stack.push(self.state);
                    self.pos += 1;
                }
                b'}' => {
                    self.state = self
                        .stack
                        .pop()
                        .ok_or(RtfError::UnbalancedClose(self.pos))?;
                    self.pending_skip = 0;
                    self.pos += 1;
                    if self.stack.is_empty() {
                        // Document group closed; trailing bytes are ignored.
                        return Ok(());
                    }
                }
                b'\\' => self.control()?,
                b'\r' | b'\n' => self.pos += 1,
                _ => {
                    self.pos += 1;
                    self.emit_byte(b);
                }
            }
        }
        Err(RtfError::Truncated(self.stack.len()))
    }

    fn control(&mut self) -> Result<(), RtfError> {
        let at = self.pos;
        self.pos += 1;
        let next = *self
            .input
            .get(self.pos)
            .ok_or(RtfError::Truncated(self.stack.len()))?;

        if next.is_ascii_alphabetic() {
            let word_start = self.pos;
            while self.pos < self.input.len() && self.input[self.pos].is_ascii_alphabetic() {
                self.pos += 1;
            }
            let word = std::str::from_utf8(&self.input[word_start..self.pos]).unwrap_or_default();
            let param = self.parameter();
            if self.input.get(self.pos) == Some(&b' ') {
                self.pos += 1;
            }
            self.control_word(word, param);
            return Ok(());
        }

        self.pos += 1;
        match next {
            b'\'' => {
                let hex = self
                    .input
                    .get(self.pos..self.pos + 2)
                    .ok_or(RtfError::Truncated(self.stack.len()))?;
                let value = std::str::from_utf8(hex)
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or(RtfError::BadHexEscape(at))?;
                self.pos += 2;
                self.emit_byte(value);
            }
            b'*' => self.state.skip = true,
            b'\\' | b'{' | b'}' => self.emit_char(next as char),
            b'~' => self.emit_char('\u{00A0}'),
            b'_' => self.emit_char('-'),
            b'\r' | b'\n' => self.emit_char('\n'),
            _ => {}
        }
        Ok(())
    }

    fn parameter(&mut self) -> Option<i32> {
        let start = self.pos;
        if self.input.get(self.pos) == Some(&b'-') {
            self.pos += 1;
        }
        let digits = self.pos;
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos == digits {
            self.pos = start;
            return None;
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
    }

    fn control_word(&mut self, word: &str, param: Option<i32>) {
        if SKIPPED_DESTINATIONS.contains(&word) {
            self.state.skip = true;
            return;
        }
        match word {
            "par" | "line" | "sect" | "page" | "row" => self.emit_char('\n'),
            "tab" | "cell" => self.emit_char('\t'),
            "emdash" => self.emit_char('\u{2014}'),
            "endash" => self.emit_char('\u{2013}'),
            "bullet" => self.emit_char('\u{2022}'),
            "lquote" => self.emit_char('\u{2018}'),
            "rquote" => self.emit_char('\u{2019}'),
            "ldblquote" => self.emit_char('\u{201C}'),
            "rdblquote" => self.emit_char('\u{201D}'),
            "emspace" | "enspace" | "qmspace" => self.emit_char(' '),
            "ansicpg" => {
                if let Some(cp) = param.filter(|p| *p > 0) {
                    self.codepage = cp as u32;
                }
            }
            "uc" => self.state.uc = param.unwrap_or(1).max(0) as usize,
            "u" => {
                if let Some(value) = param {
                    // Parameters above 32767 are written as negative numbers.
                    let unit = (if value < 0 { value + 65536 } else { value }) as u16;
                    self.emit_utf16(unit);
                    self.pending_skip = self.state.uc;
                }
            }
            "bin" => {
                let len = param.unwrap_or(0).max(0) as usize;
                self.pos = (self.pos + len).min(self.input.len());
            }
            _ => {}
        }
    }

    fn emit_byte(&mut self, b: u8) {
        if self.pending_skip > 0 {
            self.pending_skip -= 1;
            return;
        }
        if b.is_ascii() {
            self.emit_char(b as char);
        } else {
            self.emit_char(decode_codepage(self.codepage, b));
        }
    }

    fn emit_utf16(&mut self, unit: u16) {
        if self.state.skip {
            return;
        }
        match unit {
            0xD800..=0xDBFF => self.high_surrogate = Some(unit),
            0xDC00..=0xDFFF => {
                if let Some(high) = self.high_surrogate.take() {
                    let c = char::decode_utf16([high, unit])
                        .next()
                        .and_then(|r| r.ok())
                        .unwrap_or(char::REPLACEMENT_CHARACTER);
                    self.out.push(c);
                }
            }
            _ => {
                self.high_surrogate = None;
                self.out
                    .push(char::from_u32(unit as u32).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
        }
    }

    fn emit_char(&mut self, c: char) {
        if !self.state.skip {
            self.out.push(c);
        }
    }
}

/// Windows-1251 code points for 0x80..=0xBF; 0xC0..=0xFF map linearly onto
/// U+0410..=U+044F.
const CP1251_HIGH: [u16; 64] = [
    0x0402, 0x0403, 0x201A, 0x0453, 0x201E, 0x2026, 0x2020, 0x2021, 0x20AC, 0x2030, 0x0409, 0x2039,
    0x040A, 0x040C, 0x040B, 0x040F, 0x0452, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014,
    0xFFFD, 0x2122, 0x0459, 0x203A, 0x045A, 0x045C, 0x045B, 0x045F, 0x00A0, 0x040E, 0x045E, 0x0408,
    0x00A4, 0x0490, 0x00A6, 0x00A7, 0x0401, 0x00A9, 0x0404, 0x00AB, 0x00AC, 0x00AD, 0x00AE, 0x0407,
    0x00B0, 0x00B1, 0x0406, 0x0456, 0x0491, 0x00B5, 0x00B6, 0x00B7, 0x0451, 0x2116, 0x0454, 0x00BB,
    0x0458, 0x0405, 0x0455, 0x0457,
];

/// Windows-1252 code points for 0x80..=0x9F; the rest is Latin-1.
const CP1252_C1: [u16; 32] = [
    0x20AC, 0xFFFD, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160, 0x2039,
    0x0152, 0xFFFD, 0x017D, 0xFFFD, 0xFFFD, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014,
    0x02DC, 0x2122, 0x0161, 0x203A, 0x0153, 0xFFFD, 0x017E, 0x0178,
];

/// Decodes a non-ASCII byte in the document's ANSI code page. Code pages
/// other than 1251 are read as 1252.
fn decode_codepage(codepage: u32, b: u8) -> char {
    let code = match (codepage, b) {
        (1251, 0x80..=0xBF) => CP1251_HIGH[(b - 0x80) as usize] as u32,
        (1251, 0xC0..=0xFF) => 0x0410 + (b - 0xC0) as u32,
        (_, 0x80..=0x9F) => CP1252_C1[(b - 0x80) as usize] as u32,
        _ => b as u32,
    };
    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
}
