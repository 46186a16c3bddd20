/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    marty_opgen::emit/mod.rs

    C source writer shared by the decoder and model emitters.

*/

pub mod decoder;
pub mod models;

pub use decoder::DecoderEmitter;
pub use models::ModelsEmitter;

/// Accumulates C source text, one tab per indentation level.
#[derive(Clone, Debug, Default)]
pub struct CodeWriter {
    text:  String,
    lines: usize,
}

impl CodeWriter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Write `text` at `depth`. Embedded newlines continue at the same depth.
    pub fn line(&mut self, depth: usize, text: impl AsRef<str>) {
        for line in text.as_ref().split('\n') {
            for _ in 0..depth {
                self.text.push('\t');
            }
            self.text.push_str(line);
            self.text.push('\n');
            self.lines += 1;
        }
    }

    /// Write `text` without indentation.
    pub fn raw(&mut self, text: impl AsRef<str>) {
        self.line(0, text)
    }

    /// The number of the line that will be written next.
    pub fn next_line(&self) -> usize {
        self.lines + 1
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Escape text for a C string literal.
pub fn c_string(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indentation() {
        let mut w = CodeWriter::new();
        w.line(0, "{");
        w.line(1, "a;\nb;");
        w.raw("#line 3 \"x.c\"");
        w.line(0, "}");
        assert_eq!(w.as_str(), "{\n\ta;\n\tb;\n#line 3 \"x.c\"\n}\n");
        assert_eq!(w.next_line(), 6);
    }

    #[test]
    fn test_c_string() {
        assert_eq!(c_string(r#"NEC "V20""#), r#"NEC \"V20\""#);
    }
}
