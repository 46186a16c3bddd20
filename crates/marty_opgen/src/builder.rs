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

    marty_opgen::builder.rs

    Builds the three decode tries from opcode rows and runs the propagation
    passes over them.

*/

use crate::{
    arch::{Applicability, ArchId, ArchitectureTable, Family},
    error::{RowError, TrieError},
    features::{FeatureGlossary, FeatureSet},
    instruction::{exclusive_modfield, IndexRegister, Instruction},
    path::{Axis, Path, Step},
    spec_file::{parse_x80_opcode, parse_x86_opcode, OpcodeRow},
    trie::Table,
};

/// The decode tries of one specification, one per family.
#[derive(Clone, Debug, PartialEq)]
pub struct TrieSet {
    pub x86: Table,
    pub x80: Table,
    pub x87: Table,
}

impl TrieSet {
    pub fn get(&self, family: Family) -> &Table {
        match family {
            Family::X86 => &self.x86,
            Family::X80 => &self.x80,
            Family::X87 => &self.x87,
        }
    }

    fn get_mut(&mut self, family: Family) -> &mut Table {
        match family {
            Family::X86 => &mut self.x86,
            Family::X80 => &mut self.x80,
            Family::X87 => &mut self.x87,
        }
    }
}

impl Default for TrieSet {
    fn default() -> Self {
        Self {
            x86: Table::new(Axis::Byte),
            x80: Table::new(Axis::Byte),
            x87: Table::new(Axis::Byte),
        }
    }
}

/// An instruction ready to be assigned.
type Placement = (Family, Path, Instruction);

pub struct TrieBuilder<'a> {
    archs: &'a ArchitectureTable,
    glossary: &'a FeatureGlossary,
    /// Architecture that receives the DD/FD index register forms of 8-bit rows.
    index_arch: Option<ArchId>,
    tries: TrieSet,
    skipped: usize,
}

impl<'a> TrieBuilder<'a> {
    pub fn new(archs: &'a ArchitectureTable, glossary: &'a FeatureGlossary, index_arch: Option<&str>) -> Self {
        let index_arch = index_arch.and_then(|name| {
            let id = archs.lookup(name);
            if id.is_none() {
                log::warn!("Index register architecture '{}' is not defined", name);
            }
            id
        });
        Self {
            archs,
            glossary,
            index_arch,
            tries: TrieSet::default(),
            skipped: 0,
        }
    }

    /// Number of rows rejected so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Parse and insert a raw row. A malformed row is reported and skipped.
    pub fn add_line(&mut self, line: usize, text: &str) -> Result<(), TrieError> {
        match OpcodeRow::parse(line, text) {
            Ok(row) => self.add_row(&row),
            Err(e) => {
                log::warn!("line {}: {}: skipping '{}'", line, e, text);
                self.skipped += 1;
                Ok(())
            }
        }
    }

    /// Insert a row. Row level problems are reported and the row skipped; a structural
    /// contradiction in the trie is returned.
    pub fn add_row(&mut self, row: &OpcodeRow) -> Result<(), TrieError> {
        let placements = match self.prepare(row) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("line {}: {}: skipping {} {}", row.line, e, row.code, row.syntax);
                self.skipped += 1;
                return Ok(());
            }
        };
        for (family, path, instruction) in placements {
            self.tries.get_mut(family).assign(&path, instruction)?;
        }
        Ok(())
    }

    fn prepare(&self, row: &OpcodeRow) -> Result<Vec<Placement>, RowError> {
        let (app, unknown) = Applicability::parse(&row.applicability, self.archs);
        if let Some(name) = unknown.into_iter().next() {
            return Err(RowError::UnknownArchitecture(name));
        }
        let family = app.family(self.archs);

        let features = match &row.features {
            Some(text) => {
                let (features, unknown) = FeatureSet::parse(text, self.glossary);
                if let Some(name) = unknown.into_iter().next() {
                    return Err(RowError::UnknownFeature(name));
                }
                features
            }
            None => FeatureSet::new(),
        };

        let cpus = app.resolve(self.archs, family);
        if cpus.is_empty() {
            return Err(RowError::NoProcessors);
        }

        let mut instruction = Instruction::new(row.syntax.clone());
        instruction.alternates = row.alternates.clone();
        instruction.cpus = cpus;
        instruction.features = features;
        instruction.flags = app.flags_for(family);

        match family {
            Family::X80 => self.prepare_x80(row, instruction),
            Family::X86 | Family::X87 => Self::prepare_x86(row, family, instruction),
        }
    }

    fn prepare_x86(row: &OpcodeRow, family: Family, mut instruction: Instruction) -> Result<Vec<Placement>, RowError> {
        let opcode = parse_x86_opcode(&row.code)?;

        let mut path = Path::from_steps(opcode.bytes.iter().map(|b| Step::byte(*b)));
        if let Some(field) = opcode.regfield {
            path.push(Step::regfield(field));
        }
        if let Some(slot) = exclusive_modfield(instruction.operands())? {
            path.insert_modfield(slot);
        }
        if let Some(slot) = opcode.prefix {
            path.push(Step::prefix(slot));
        }

        if !instruction.requires_modrm() {
            return Ok(vec![(family, path, instruction)]);
        }

        let mut placements = Vec::with_capacity(2);
        for (slot, form) in instruction.split_by_modfield()?.into_iter().enumerate() {
            if let Some(form) = form {
                placements.push((family, path.with_modfield(slot as u8), form));
            }
        }
        Ok(placements)
    }

    fn prepare_x80(&self, row: &OpcodeRow, instruction: Instruction) -> Result<Vec<Placement>, RowError> {
        let bytes = parse_x80_opcode(&row.code)?;
        let path = Path::from_steps(bytes.iter().map(|b| Step::byte(*b)));

        let mut placements = Vec::with_capacity(3);
        if let Some(index_arch) = self.index_arch {
            if bytes.len() == 1 && instruction.cpus.contains(&index_arch) {
                for index in [IndexRegister::Ix, IndexRegister::Iy] {
                    let mut indexed = Path::from_steps([Step::byte(index.prefix_byte())]);
                    indexed.push(Step::byte(bytes[0]));
                    placements.push((Family::X80, indexed, instruction.indexed_variant(index, index_arch)));
                }
            }
        }
        placements.insert(0, (Family::X80, path, instruction));
        Ok(placements)
    }

    /// Run the propagation passes and hand over the tries.
    pub fn finish(mut self) -> Result<TrieSet, TrieError> {
        let tries = &mut self.tries;

        tries.x80.aggregate();

        tries.x86.aggregate();
        tries.x86.apply_prefix_defaults()?;
        // Prefix defaults add leaves to prefix tables, refresh their feature sets.
        tries.x86.aggregate();
        tries.x86.bubble_modrm();

        tries.x87.aggregate();
        tries.x87.bubble_modrm();

        log::debug!(
            "built tries: {} x86, {} x80, {} x87 forms, {} rows skipped",
            tries.x86.leaf_count(),
            tries.x80.leaf_count(),
            tries.x87.leaf_count(),
            self.skipped
        );
        Ok(self.tries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instruction::ModRm,
        path::{MODFIELD_MEMORY, MODFIELD_REGISTER},
        spec_file::SpecDocument,
        test_fixtures::FIXTURE_SPEC,
    };

    fn build(text: &str) -> (ArchitectureTable, TrieSet, usize) {
        let doc = SpecDocument::parse(text);
        let archs = doc.architecture_table().unwrap();
        let glossary = doc.glossary().unwrap();
        let mut builder = TrieBuilder::new(&archs, &glossary, Some("z80"));
        for (line, row) in &doc.rows {
            builder.add_line(*line, row).unwrap();
        }
        let skipped = builder.skipped();
        let tries = builder.finish().unwrap();
        (archs, tries, skipped)
    }

    fn path(steps: &[Step]) -> Path {
        Path::from_steps(steps.iter().copied())
    }

    #[test]
    fn test_fixture_builds() {
        let (archs, tries, skipped) = build(FIXTURE_SPEC);
        assert_eq!(skipped, 0);

        // 00 ADD Eb,Gb splits into a memory and a register form.
        let mem = tries.x86.lookup(&path(&[Step::byte(0x00), Step::modfield(MODFIELD_MEMORY)])).unwrap();
        assert_eq!(mem.instructions[0].operands(), &["Mb".to_string(), "Gb".to_string()]);
        let reg = tries.x86.lookup(&path(&[Step::byte(0x00), Step::modfield(MODFIELD_REGISTER)])).unwrap();
        assert_eq!(reg.instructions[0].operands(), &["Rb".to_string(), "Gb".to_string()]);
        assert_eq!(reg.instructions[0].modrm, ModRm::Inherited);
        let node = tries.x86.entry(0x00).unwrap().table.as_deref().unwrap();
        assert_eq!(node.modrm, ModRm::Full);

        // LEA only has a memory form.
        let lea = tries.x86.entry(0x8D).unwrap().table.as_deref().unwrap();
        assert!(lea.entry(MODFIELD_REGISTER).unwrap().is_empty());

        // POP CS and the 0F table share a slot.
        let slot = tries.x86.entry(0x0F).unwrap();
        assert_eq!(slot.instructions.len(), 1);
        assert!(slot.table.is_some());

        // FADD lands in the x87 trie.
        let fadd = tries
            .x87
            .lookup(&path(&[Step::byte(0xD8), Step::modfield(MODFIELD_MEMORY), Step::regfield(0)]))
            .unwrap();
        assert_eq!(fadd.instructions[0].mnemonic(), "FADD");

        let syscall = tries.x86.lookup(&path(&[Step::byte(0x0F), Step::byte(0x05)])).unwrap();
        assert!(syscall.instructions[0].flags.only64);
        assert_eq!(archs.names(&syscall.instructions[0].cpus), vec!["x64"]);
    }

    #[test]
    fn test_prefixed_rows_and_defaults() {
        let (archs, tries, _) = build(FIXTURE_SPEC);
        let prefix = tries.x86.lookup(&path(&[Step::byte(0x0F), Step::byte(0x58)])).unwrap();
        // ADDPS is replaced by the per-prefix copies.
        assert!(prefix.instructions.is_empty());
        let table = prefix.table.as_deref().unwrap();
        assert_eq!(table.entry(1).unwrap().instructions[0].mnemonic(), "ADDPD");
        assert_eq!(table.entry(0).unwrap().instructions[0].mnemonic(), "ADDPS");
        assert_eq!(table.entry(2).unwrap().instructions[0].mnemonic(), "ADDPS");
        assert_eq!(archs.names(&table.cpus), vec!["386", "x64"]);
    }

    #[test]
    fn test_z80_index_clones() {
        let (archs, tries, _) = build(FIXTURE_SPEC);
        let z80 = archs.lookup("z80").unwrap();

        let ld = tries.x80.lookup(&path(&[Step::byte(0xDD), Step::byte(0x7E)])).unwrap();
        assert_eq!(ld.instructions[0].operands(), &["A".to_string(), "(IX+Ib)".to_string()]);
        assert!(ld.instructions[0].alternates.is_empty());
        assert_eq!(ld.instructions[0].cpus.iter().copied().collect::<Vec<_>>(), vec![z80]);

        let nop = tries.x80.lookup(&path(&[Step::byte(0xFD), Step::byte(0x00)])).unwrap();
        assert_eq!(nop.instructions[0].mnemonic(), "NOP");

        // The unprefixed form keeps every 8-bit architecture.
        let plain = tries.x80.entry(0x7E).unwrap();
        assert_eq!(archs.names(&plain.instructions[0].cpus), vec!["8080", "z80"]);
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let text = FIXTURE_SPEC.replace(
            "@instructionset\n",
            "@instructionset\n\
             01\tpentium9\tADD\tEv,Gv\n\
             02\t8086\tADD\tGb,Eb\tfeature:\tnosuch\n\
             03\t!8086\tADD\tGv,Ev\n\
             XYZ\t8086\tBAD\n\
             04\t8086\tBAD\tM,Rv\n",
        );
        let (_, tries, skipped) = build(&text);
        assert_eq!(skipped, 5);
        for byte in 0x01..=0x04 {
            assert!(tries.x86.entry(byte).unwrap().is_empty());
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let (_, first, _) = build(FIXTURE_SPEC);
        let (_, second, _) = build(FIXTURE_SPEC);
        assert_eq!(first, second);
    }
}
