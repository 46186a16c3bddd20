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

    marty_opgen::spec_file.rs

    Reader for instruction set specification files.

    A specification file is split into sections by lines starting with '@':

        @architectures      YAML list of architectures
        @features           name<TAB>description lines
        @processors         YAML list of processor models
        @instructionset     opcode rows
        @instruction NAME   semantics block for NAME, with optional |qualifiers
        @comment ...        ignored

*/

use std::collections::VecDeque;

use indexmap::IndexMap;

use crate::{
    arch::{ArchRecord, ArchitectureTable},
    error::{RowError, SpecError},
    features::FeatureGlossary,
    instruction::{Syntax, SyntaxKind},
    path::prefix_slot,
};

/// An `@instruction` block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SemanticsBlock {
    /// Qualifier parts following the name, each a space separated list of terms.
    pub qualifiers: Vec<String>,
    /// Line the body starts on.
    pub line: usize,
    pub body: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Section {
    Architectures,
    Features,
    Processors,
    InstructionSet,
    Instruction,
}

/// The raw sections of a specification file.
#[derive(Clone, Debug, Default)]
pub struct SpecDocument {
    pub architectures: String,
    pub features: String,
    pub processors: String,
    /// Opcode rows with their line numbers, comments and blank lines removed.
    pub rows: Vec<(usize, String)>,
    /// Semantics blocks by name, in file order.
    pub semantics: IndexMap<String, Vec<SemanticsBlock>>,
}

impl SpecDocument {
    pub fn parse(text: &str) -> Self {
        let mut doc = SpecDocument::default();
        let mut section: Option<Section> = None;
        let mut current: Option<(String, SemanticsBlock)> = None;

        for (idx, line) in text.lines().enumerate() {
            let number = idx + 1;

            if let Some(header) = line.strip_prefix("@instruction ") {
                doc.close_block(current.take());
                let mut parts = header.trim().split('|');
                let name = parts.next().unwrap_or_default().trim().to_string();
                let qualifiers = parts.map(|q| q.trim().to_string()).collect();
                current = Some((
                    name,
                    SemanticsBlock {
                        qualifiers,
                        line: number + 1,
                        body: String::new(),
                    },
                ));
                section = Some(Section::Instruction);
                continue;
            }
            if line.starts_with("@comment") {
                continue;
            }
            let next = match line.trim_end() {
                "@architectures" => Some(Section::Architectures),
                "@features" => Some(Section::Features),
                "@processors" => Some(Section::Processors),
                "@instructionset" => Some(Section::InstructionSet),
                _ => None,
            };
            if next.is_some() {
                doc.close_block(current.take());
                section = next;
                continue;
            }

            match section {
                Some(Section::Instruction) => {
                    if let Some((_, block)) = current.as_mut() {
                        block.body.push_str(line);
                        block.body.push('\n');
                    }
                }
                Some(Section::InstructionSet) => {
                    let row = match line.find('#') {
                        Some(pos) => &line[..pos],
                        None => line,
                    };
                    let row = row.trim();
                    if !row.is_empty() {
                        doc.rows.push((number, row.to_string()));
                    }
                }
                Some(Section::Architectures) => push_line(&mut doc.architectures, line),
                Some(Section::Features) => push_line(&mut doc.features, line),
                Some(Section::Processors) => push_line(&mut doc.processors, line),
                None => {}
            }
        }
        doc.close_block(current);
        doc
    }

    fn close_block(&mut self, block: Option<(String, SemanticsBlock)>) {
        if let Some((name, mut block)) = block {
            block.body = block.body.trim().to_string();
            self.semantics.entry(name).or_default().push(block);
        }
    }

    pub fn architecture_table(&self) -> Result<ArchitectureTable, SpecError> {
        let records: Vec<ArchRecord> = parse_yaml_list(&self.architectures, "architectures")?;
        ArchitectureTable::from_records(records)
    }

    pub fn glossary(&self) -> Result<FeatureGlossary, SpecError> {
        FeatureGlossary::parse(&self.features)
    }
}

fn push_line(buf: &mut String, line: &str) {
    buf.push_str(line);
    buf.push('\n');
}

/// Deserialize a YAML list section. An empty section is an empty list.
pub fn parse_yaml_list<T>(text: &str, section: &'static str) -> Result<Vec<T>, SpecError>
where
    T: serde::de::DeserializeOwned,
{
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(text).map_err(|source| SpecError::Yaml { section, source })
}

/// One `@instructionset` row, split into its columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpcodeRow {
    pub line: usize,
    pub code: String,
    pub applicability: String,
    pub syntax: Syntax,
    pub alternates: Vec<(SyntaxKind, Syntax)>,
    pub features: Option<String>,
}

impl OpcodeRow {
    /// Split a tab separated row. Trailing fields that are not a recognized flag are
    /// reported and ignored.
    pub fn parse(line: usize, text: &str) -> Result<OpcodeRow, RowError> {
        let mut parts: VecDeque<&str> = text.split('\t').collect();
        let code = parts.pop_front().unwrap_or_default().trim().to_string();
        let applicability = parts.pop_front().ok_or(RowError::MissingMnemonic)?.trim().to_string();

        let mut current: Option<SyntaxKind> = None;
        let mut default: Option<Syntax> = None;
        let mut alternates: Vec<(SyntaxKind, Syntax)> = Vec::new();
        let mut features: Option<String> = None;

        while let Some(mnemonic) = parts.pop_front() {
            let operands: Vec<String> = match parts.front() {
                None => Vec::new(),
                Some(&"-") => {
                    parts.pop_front();
                    Vec::new()
                }
                Some(_) => parts
                    .pop_front()
                    .unwrap_or_default()
                    .split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect(),
            };
            let syntax = Syntax {
                mnemonic: mnemonic.trim().to_string(),
                operands,
            };
            match current {
                None if default.is_none() => default = Some(syntax),
                Some(kind) if alternates.iter().all(|(k, _)| *k != kind) => alternates.push((kind, syntax)),
                _ => {
                    return Err(RowError::DuplicateSyntax(
                        current.map(|k| k.to_string()).unwrap_or_else(|| "default".to_string()),
                    ))
                }
            }

            while parts.len() > 1 && parts[0].is_empty() {
                parts.pop_front();
            }
            if parts.len() > 1 {
                match parts[0] {
                    "nec:" | "intel:" => {
                        let flag = parts.pop_front().unwrap_or_default();
                        current = flag.trim_end_matches(':').parse().ok();
                    }
                    "feature:" => {
                        if features.is_some() {
                            return Err(RowError::DuplicateSyntax("feature".to_string()));
                        }
                        parts.pop_front();
                        features = parts.pop_front().map(|f| f.trim().to_string());
                    }
                    other => {
                        log::warn!("line {}: {}", line, RowError::UnknownFlag(other.to_string()));
                        break;
                    }
                }
            }
            else if let Some(stray) = parts.pop_front() {
                if !stray.trim().is_empty() {
                    log::warn!("line {}: {}", line, RowError::UnknownFlag(stray.to_string()));
                }
                break;
            }
        }

        let syntax = default.ok_or(RowError::MissingMnemonic)?;
        if syntax.mnemonic.is_empty() {
            return Err(RowError::MissingMnemonic);
        }
        Ok(OpcodeRow {
            line,
            code,
            applicability,
            syntax,
            alternates,
            features,
        })
    }
}

/// The opcode column of an x86 or x87 row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct X86Opcode {
    pub bytes: Vec<u8>,
    pub regfield: Option<u8>,
    /// Prefix slot selected by a leading 66/F3/F2 byte or by `NP`.
    pub prefix: Option<u8>,
}

/// Parse a run of hex digits as opcode bytes. Leading zero bytes are not significant.
fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, RowError> {
    let bad = || RowError::BadOpcode(text.to_string());
    if text.is_empty() || !text.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(bad());
    }
    let padded = if text.len() % 2 == 1 {
        format!("0{}", text)
    }
    else {
        text.to_string()
    };
    let mut bytes = Vec::with_capacity(padded.len() / 2);
    for idx in (0..padded.len()).step_by(2) {
        bytes.push(u8::from_str_radix(&padded[idx..idx + 2], 16).map_err(|_| bad())?);
    }
    while bytes.len() > 1 && bytes[0] == 0 {
        bytes.remove(0);
    }
    Ok(bytes)
}

/// Parse `[NP]hex[/N]`.
pub fn parse_x86_opcode(code: &str) -> Result<X86Opcode, RowError> {
    let bad = || RowError::BadOpcode(code.to_string());
    let (body, regfield) = match code.split_once('/') {
        Some((body, field)) => {
            let field = u8::from_str_radix(field.trim(), 16).map_err(|_| bad())?;
            if field > 7 {
                return Err(bad());
            }
            (body, Some(field))
        }
        None => (code, None),
    };

    let (body, mut prefix) = match body.strip_prefix("NP") {
        Some(rest) => (rest.trim(), Some(0)),
        None => (body.trim(), None),
    };

    let mut bytes = parse_hex_bytes(body)?;
    if bytes.len() > 1 {
        if let Some(slot) = prefix_slot(bytes[0]) {
            if prefix.is_some() {
                return Err(bad());
            }
            prefix = Some(slot);
            bytes.remove(0);
        }
    }
    Ok(X86Opcode {
        bytes,
        regfield,
        prefix,
    })
}

/// Parse the opcode column of an 8-bit row.
pub fn parse_x80_opcode(code: &str) -> Result<Vec<u8>, RowError> {
    parse_hex_bytes(code.trim())
}
