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

    marty_opgen::trie::mod.rs

    The decode trie. Each [Table] selects on one [Axis] and owns a fixed
    number of [Entry] slots. A slot holds an optional child table and a list
    of instruction forms, in specification order.

*/

pub mod passes;

use std::fmt::Write;

use crate::{
    arch::{ArchitectureTable, IsaSet, ModeFlags},
    error::TrieError,
    features::FeatureSet,
    instruction::{Instruction, ModRm},
    path::{Axis, Path, Step, MODFIELD_REGISTER},
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entry {
    pub table: Option<Box<Table>>,
    pub instructions: Vec<Instruction>,
}

impl Entry {
    pub fn is_empty(&self) -> bool {
        self.table.is_none() && self.instructions.is_empty()
    }

    /// Everything that can decode this slot: the child table first, then the leaves
    /// in specification order.
    pub fn candidates(&self) -> Vec<Candidate<'_>> {
        let mut candidates = Vec::with_capacity(self.instructions.len() + 1);
        if let Some(table) = self.table.as_deref() {
            candidates.push(Candidate::Table(table));
        }
        candidates.extend(self.instructions.iter().map(Candidate::Leaf));
        candidates
    }
}

/// One alternative for decoding a slot.
#[derive(Copy, Clone, Debug)]
pub enum Candidate<'a> {
    Table(&'a Table),
    Leaf(&'a Instruction),
}

impl<'a> Candidate<'a> {
    pub fn cpus(&self) -> &'a IsaSet {
        match self {
            Candidate::Table(t) => &t.cpus,
            Candidate::Leaf(i) => &i.cpus,
        }
    }

    pub fn features(&self) -> &'a FeatureSet {
        match self {
            Candidate::Table(t) => &t.features,
            Candidate::Leaf(i) => &i.features,
        }
    }

    pub fn flags(&self) -> ModeFlags {
        match self {
            Candidate::Table(t) => t.flags,
            Candidate::Leaf(i) => i.flags,
        }
    }

    pub fn modrm(&self) -> ModRm {
        match self {
            Candidate::Table(t) => t.modrm,
            Candidate::Leaf(i) => i.modrm,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Candidate::Table(t) => format!("<{} table>", t.axis()),
            Candidate::Leaf(i) => i.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    axis: Axis,
    entries: Vec<Entry>,
    /// Union of the CPUs of everything below. Set by [Table::aggregate].
    pub cpus: IsaSet,
    /// Features required by everything below. Set by [Table::aggregate].
    pub features: FeatureSet,
    /// Mode restrictions shared by everything below. Set by [Table::aggregate].
    pub flags: ModeFlags,
    /// Set by [Table::bubble_modrm].
    pub modrm: ModRm,
}

impl Table {
    pub fn new(axis: Axis) -> Self {
        Self {
            axis,
            entries: vec![Entry::default(); axis.fan_out()],
            cpus: IsaSet::new(),
            features: FeatureSet::new(),
            flags: ModeFlags::default(),
            modrm: ModRm::Absent,
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, index: u8) -> Option<&Entry> {
        self.entries.get(index as usize)
    }

    fn check_step(&self, step: Step, at: &Path) -> Result<(), TrieError> {
        if step.axis != self.axis {
            return Err(TrieError::AxisConflict {
                path: at.to_string(),
                expected: step.axis,
                found: self.axis,
            });
        }
        if step.value as usize >= self.entries.len() {
            return Err(TrieError::SlotOutOfRange {
                path: at.to_string(),
                value: step.value,
                axis: self.axis,
            });
        }
        Ok(())
    }

    /// Append `instruction` to the slot addressed by `path`, creating intermediate
    /// tables as needed.
    pub fn assign(&mut self, path: &Path, instruction: Instruction) -> Result<(), TrieError> {
        if path.is_empty() {
            return Err(TrieError::EmptyPath);
        }
        self.assign_steps(path.steps(), &Path::new(), instruction)
    }

    fn assign_steps(&mut self, steps: &[Step], at: &Path, instruction: Instruction) -> Result<(), TrieError> {
        let step = steps[0];
        self.check_step(step, at)?;

        let mut here = at.clone();
        here.push(step);
        let slot = &mut self.entries[step.value as usize];

        if steps.len() == 1 {
            slot.instructions.push(instruction);
            return Ok(());
        }

        let next = steps[1];
        let child = slot.table.get_or_insert_with(|| Box::new(Table::new(next.axis)));
        if child.axis == next.axis {
            child.assign_steps(&steps[1..], &here, instruction)
        }
        else if child.axis == Axis::ModField && next.axis == Axis::Byte {
            let steps = decompose_byte(next, &steps[2..], &here)?;
            child.assign_steps(&steps, &here, instruction)
        }
        else {
            Err(TrieError::AxisConflict {
                path: here.to_string(),
                expected: next.axis,
                found: child.axis,
            })
        }
    }

    /// Find the slot addressed by `path` without modifying the trie.
    pub fn lookup(&self, path: &Path) -> Option<&Entry> {
        if path.is_empty() {
            return None;
        }
        self.lookup_steps(path.steps())
    }

    fn lookup_steps(&self, steps: &[Step]) -> Option<&Entry> {
        let step = steps[0];
        if step.axis != self.axis {
            return None;
        }
        let slot = self.entries.get(step.value as usize)?;
        if steps.len() == 1 {
            return Some(slot);
        }

        let next = steps[1];
        let child = slot.table.as_deref()?;
        if child.axis == next.axis {
            child.lookup_steps(&steps[1..])
        }
        else if child.axis == Axis::ModField && next.axis == Axis::Byte {
            let steps = decompose_byte(next, &steps[2..], &Path::new()).ok()?;
            child.lookup_steps(&steps)
        }
        else {
            None
        }
    }

    /// Visit every slot that holds instructions or a table, depth first.
    pub fn visit<F>(&self, at: &Path, f: &mut F)
    where
        F: FnMut(&Path, &Table, &Entry),
    {
        for (idx, entry) in self.entries.iter().enumerate() {
            if entry.is_empty() {
                continue;
            }
            let mut here = at.clone();
            here.push(Step::new(idx as u8, self.axis));
            f(&here, self, entry);
            if let Some(child) = entry.table.as_deref() {
                child.visit(&here, f);
            }
        }
    }

    /// Number of instruction forms in the trie.
    pub fn leaf_count(&self) -> usize {
        let mut count = 0;
        self.visit(&Path::new(), &mut |_, _, entry| count += entry.instructions.len());
        count
    }

    /// A human readable listing of the trie, one line per leaf and child table.
    pub fn dump(&self, archs: &ArchitectureTable) -> String {
        let mut out = String::new();
        self.visit(&Path::new(), &mut |path, _, entry| {
            for ins in &entry.instructions {
                let _ = writeln!(
                    out,
                    "{}\t{}\t[{}]{}{}",
                    path,
                    ins,
                    archs.names(&ins.cpus).join(","),
                    if ins.features.is_empty() {
                        String::new()
                    }
                    else {
                        format!(" feature: {}", ins.features.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(","))
                    },
                    if ins.modrm.is_present() {
                        format!(" modrm: {}", ins.modrm)
                    }
                    else {
                        String::new()
                    }
                );
            }
            if let Some(child) = entry.table.as_deref() {
                let _ = writeln!(
                    out,
                    "{}\t> {} [{}] modrm: {}",
                    path,
                    child.axis,
                    archs.names(&child.cpus).join(","),
                    child.modrm
                );
            }
        });
        out
    }
}

/// Split a full ModRM byte into mode/register/memory field steps.
fn decompose_byte(step: Step, rest: &[Step], at: &Path) -> Result<Vec<Step>, TrieError> {
    if step.value < 0xC0 {
        return Err(TrieError::BadDecomposition {
            path: at.to_string(),
            value: step.value,
        });
    }
    let mut steps = vec![
        Step::modfield(MODFIELD_REGISTER),
        Step::regfield((step.value >> 3) & 7),
        Step::memfield(step.value & 7),
    ];
    steps.extend_from_slice(rest);
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Syntax;

    fn ins(mnemonic: &str, operands: &[&str]) -> Instruction {
        Instruction::new(Syntax::new(mnemonic, operands))
    }

    #[test]
    fn test_assign_then_lookup() {
        let mut root = Table::new(Axis::Byte);
        let path = Path::from_steps([Step::byte(0x0F), Step::byte(0xA2)]);
        root.assign(&path, ins("CPUID", &[])).unwrap();

        let entry = root.lookup(&path).unwrap();
        assert_eq!(entry.instructions.len(), 1);
        assert_eq!(entry.instructions[0].mnemonic(), "CPUID");

        assert!(root.lookup(&Path::from_steps([Step::byte(0x0F), Step::byte(0xA3)])).unwrap().is_empty());
        assert!(root.lookup(&Path::from_steps([Step::byte(0x0E), Step::byte(0xA2)])).is_none());
        assert_eq!(root.leaf_count(), 1);
    }

    #[test]
    fn test_child_typed_by_next_step() {
        let mut root = Table::new(Axis::Byte);
        let path = Path::from_steps([Step::byte(0x80), Step::modfield(0), Step::regfield(7)]);
        root.assign(&path, ins("CMP", &["Mb", "Ib"])).unwrap();

        let child = root.entry(0x80).unwrap().table.as_deref().unwrap();
        assert_eq!(child.axis(), Axis::ModField);
        assert_eq!(child.entries().len(), 2);
        let grandchild = child.entry(0).unwrap().table.as_deref().unwrap();
        assert_eq!(grandchild.axis(), Axis::RegField);
        assert_eq!(grandchild.entries().len(), 8);
    }

    #[test]
    fn test_full_byte_decomposition() {
        let mut root = Table::new(Axis::Byte);
        root.assign(
            &Path::from_steps([Step::byte(0x0F), Step::byte(0x01), Step::modfield(0), Step::regfield(1)]),
            ins("SIDT", &["M"]),
        )
        .unwrap();
        // 0F 01 C8 is mod=3, reg=1, rm=0
        let monitor = Path::from_steps([Step::byte(0x0F), Step::byte(0x01), Step::byte(0xC8)]);
        root.assign(&monitor, ins("MONITOR", &[])).unwrap();

        let entry = root.lookup(&monitor).unwrap();
        assert_eq!(entry.instructions[0].mnemonic(), "MONITOR");

        let long_form = Path::from_steps([
            Step::byte(0x0F),
            Step::byte(0x01),
            Step::modfield(1),
            Step::regfield(1),
            Step::memfield(0),
        ]);
        assert_eq!(root.lookup(&long_form).unwrap().instructions.len(), 1);

        let bad = Path::from_steps([Step::byte(0x0F), Step::byte(0x01), Step::byte(0x48)]);
        assert!(matches!(
            root.assign(&bad, ins("BAD", &[])),
            Err(TrieError::BadDecomposition { value: 0x48, .. })
        ));
    }

    #[test]
    fn test_axis_conflict() {
        let mut root = Table::new(Axis::Byte);
        root.assign(&Path::from_steps([Step::byte(0xD8), Step::byte(0xC0)]), ins("A", &[]))
            .unwrap();
        let result = root.assign(&Path::from_steps([Step::byte(0xD8), Step::regfield(0)]), ins("B", &[]));
        assert!(matches!(
            result,
            Err(TrieError::AxisConflict {
                expected: Axis::RegField,
                found: Axis::Byte,
                ..
            })
        ));
        assert!(matches!(root.assign(&Path::new(), ins("C", &[])), Err(TrieError::EmptyPath)));
    }

    #[test]
    fn test_slot_out_of_range() {
        let mut root = Table::new(Axis::Byte);
        let result = root.assign(&Path::from_steps([Step::byte(0x0F), Step::prefix(4)]), ins("X", &[]));
        assert!(matches!(result, Err(TrieError::SlotOutOfRange { value: 4, .. })));
    }

    #[test]
    fn test_candidates_order() {
        let mut root = Table::new(Axis::Byte);
        root.assign(&Path::from_steps([Step::byte(0x90)]), ins("NOP", &[])).unwrap();
        root.assign(&Path::from_steps([Step::byte(0x90)]), ins("XCHG", &["AX", "AX"]))
            .unwrap();
        root.assign(&Path::from_steps([Step::byte(0x90), Step::prefix(2)]), ins("PAUSE", &[]))
            .unwrap();

        let entry = root.entry(0x90).unwrap();
        let names: Vec<String> = entry.candidates().iter().map(|c| c.describe()).collect();
        assert_eq!(names, vec!["<prefix table>", "NOP", "XCHG AX, AX"]);
    }

    #[test]
    fn test_rebuild_is_identical() {
        let build = || {
            let mut root = Table::new(Axis::Byte);
            for (b, m) in [(0x40u8, "INC"), (0x48, "DEC"), (0x90, "NOP")] {
                root.assign(&Path::from_steps([Step::byte(b)]), ins(m, &[])).unwrap();
            }
            root.aggregate();
            root
        };
        assert_eq!(build(), build());
    }
}
