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

    marty_opgen::error.rs

    Error types. Structural errors (SpecError, TrieError, SynthError) abort
    generation; RowError describes a problem with a single instruction set
    row, which is logged and skipped.

*/

use crate::path::Axis;

#[derive(thiserror::Error, Debug)]
pub enum SpecError {
    #[error("Error parsing @{section} section: {source}")]
    Yaml {
        section: &'static str,
        #[source]
        source:  serde_yaml::Error,
    },
    #[error("Malformed @features line {line}: '{text}'")]
    FeatureLine { line: usize, text: String },
    #[error("No architectures were defined")]
    NoArchitectures,
    #[error("Duplicate architecture id '{0}'")]
    DuplicateArchitecture(String),
    #[error("Architecture '{arch}' names unknown predecessor '{predecessor}'")]
    UnknownPredecessor { arch: String, predecessor: String },
    #[error("Processor '{processor}' imports the feature set of unknown processor '{import}'")]
    UnknownFeatureImport { processor: String, import: String },
    #[error("Processor '{processor}' references unknown architecture class '{class}'")]
    UnknownProcessorClass { processor: String, class: String },
    #[error("Processor '{processor}' references unknown FPU '{fpu}'")]
    UnknownFpu { processor: String, fpu: String },
    #[error("Processor '{processor}' has an invalid {field} value '{value}'")]
    BadProcessorField {
        processor: String,
        field: &'static str,
        value: String,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum TrieError {
    #[error("Attempted to assign an instruction to an empty path")]
    EmptyPath,
    #[error("Slot {value} is out of range for a {axis} table at {path}")]
    SlotOutOfRange { path: String, value: u8, axis: Axis },
    #[error("Conflicting decode axis at {path}: node selects on {found}, step needs {expected}")]
    AxisConflict { path: String, expected: Axis, found: Axis },
    #[error("Cannot decompose byte {value:02X} into ModRM fields at {path}")]
    BadDecomposition { path: String, value: u8 },
    #[error("Prefix node at {path} has a child table")]
    PrefixNotLeaf { path: String },
}

#[derive(thiserror::Error, Debug)]
pub enum SynthError {
    #[error("Node at {path} requires a ModRM byte that has not been fetched")]
    MissingModRm { path: String },
    #[error("Mode field switch at {path} outside of a ModRM decision")]
    ModFieldSwitch { path: String },
    #[error("Conflicting features at {path}: enclosing branch requires '{outer}', entry requires '{inner}'")]
    ConflictingFeature { path: String, outer: String, inner: String },
    #[error("Conflicting modes at {path}: enclosing branch is {outer}-bit only, entry is {inner}-bit only")]
    ConflictingMode { path: String, outer: String, inner: String },
    #[error("Feature dependency cycle at {path} involving '{feature}'")]
    FeatureCycle { path: String, feature: String },
    #[error("Feature '{0}' is not defined in the feature glossary")]
    UnknownFeature(String),
    #[error("Malformed description for feature '{feature}': '{description}'")]
    BadFeatureDescription { feature: String, description: String },
}

/// A recoverable problem with one opcode row.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum RowError {
    #[error("Row has no mnemonic")]
    MissingMnemonic,
    #[error("Unparseable opcode '{0}'")]
    BadOpcode(String),
    #[error("Unknown architecture '{0}'")]
    UnknownArchitecture(String),
    #[error("Undefined feature '{0}'")]
    UnknownFeature(String),
    #[error("Unknown row flag '{0}'")]
    UnknownFlag(String),
    #[error("Duplicate syntax entry '{0}'")]
    DuplicateSyntax(String),
    #[error("Row applies to no processor")]
    NoProcessors,
    #[error("Operands {0:?} select more than one ModRM operand class")]
    ConflictingModRmOperands(Vec<String>),
    #[error("{syntax} syntax has {found} operands, default syntax has {expected}")]
    AlternateArity { syntax: String, expected: usize, found: usize },
    #[error("{syntax} syntax has no {reading} reading")]
    UnresolvedAlternate { syntax: String, reading: &'static str },
}

/// Top level error returned by the generator pipeline.
#[derive(thiserror::Error, Debug)]
pub enum GenError {
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error(transparent)]
    Trie(#[from] TrieError),
    #[error(transparent)]
    Synth(#[from] SynthError),
}
