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

    marty_opgen::lib.rs

    Opcode table generator: builds decode tries from an instruction set description and renders them as a table driven C decoder.

*/

pub mod arch;
pub mod builder;
pub mod condition;
pub mod context;
pub mod emit;
pub mod error;
pub mod features;
pub mod instruction;
pub mod operands;
pub mod path;
pub mod processors;
pub mod semantics;
pub mod spec_file;
pub mod synth;
pub mod trie;
pub mod yaml;

#[cfg(test)]
mod test_fixtures;

pub use context::{DecoderOutput, GenContext, GenOptions, UndefinedMarkers};
pub use emit::models::ModelsOutput;
pub use error::{GenError, RowError, SpecError, SynthError, TrieError};
