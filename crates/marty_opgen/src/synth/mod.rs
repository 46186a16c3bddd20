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

    marty_opgen::synth::mod.rs

    Decision tree synthesis. A finished trie is walked top down and every slot
    becomes an ordered chain of guarded branches, so that each (CPU, code mode)
    pair of the enclosing range reaches exactly one leaf or an undefined marker.

    The resulting [Decision] tree borrows the trie and is independent of the
    output language. The emitter lowers it to C.

*/

pub mod cells;
pub mod coverage;

use crate::{
    arch::{ArchId, ArchitectureTable, CodeMode, Family},
    condition::{compress_runs, Condition},
    error::SynthError,
    instruction::{Instruction, ModRm},
    path::{Axis, Path, Step, MODFIELD_MEMORY, MODFIELD_REGISTER},
    trie::{Candidate, Table},
};

use cells::{collect_cells, Cell};
use coverage::Coverage;

/// Which form of ModRM byte an enclosing decision has established.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModRmForm {
    Memory,
    Register,
}

impl ModRmForm {
    pub fn slot(&self) -> u8 {
        match self {
            ModRmForm::Memory => MODFIELD_MEMORY,
            ModRmForm::Register => MODFIELD_REGISTER,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Branch<'t> {
    pub condition: Condition,
    pub body: Decision<'t>,
}

#[derive(Clone, Debug)]
pub enum Decision<'t> {
    /// Select on the value of `axis`. One arm per slot.
    Switch {
        axis: Axis,
        path: Path,
        arms: Vec<Decision<'t>>,
    },
    /// Fetch the ModRM byte, then separate register and memory forms. Without a memory
    /// arm the mod field is ignored and no addressing is decoded.
    ModRm {
        register: Box<Decision<'t>>,
        memory:   Option<Box<Decision<'t>>>,
    },
    /// Guarded branches tried in order.
    Chain {
        branches:  Vec<Branch<'t>>,
        otherwise: Option<Box<Decision<'t>>>,
    },
    Leaf {
        instruction: &'t Instruction,
        path: Path,
        form: Option<ModRmForm>,
    },
    Undefined,
}

impl<'t> Decision<'t> {
    /// Collect every leaf reachable from this decision, in emission order.
    pub fn leaves(&self) -> Vec<&'t Instruction> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<&'t Instruction>) {
        match self {
            Decision::Switch { arms, .. } => arms.iter().for_each(|a| a.collect_leaves(out)),
            Decision::ModRm { register, memory } => {
                register.collect_leaves(out);
                if let Some(memory) = memory {
                    memory.collect_leaves(out);
                }
            }
            Decision::Chain { branches, otherwise } => {
                branches.iter().for_each(|b| b.body.collect_leaves(out));
                if let Some(otherwise) = otherwise {
                    otherwise.collect_leaves(out);
                }
            }
            Decision::Leaf { instruction, .. } => out.push(instruction),
            Decision::Undefined => {}
        }
    }
}

/// Context inherited from enclosing branches.
#[derive(Clone, Debug)]
struct Scope {
    /// CPUs that can reach this point, in succession order.
    range: Vec<ArchId>,
    modrm: Option<ModRmForm>,
    /// Positive feature every enclosing branch has required.
    feature: Option<String>,
    only_mode: Option<CodeMode>,
}

pub struct Synthesizer<'a> {
    archs:  &'a ArchitectureTable,
    family: Family,
}

impl<'a> Synthesizer<'a> {
    pub fn new(archs: &'a ArchitectureTable, family: Family) -> Self {
        Self { archs, family }
    }

    /// Build the decision tree for a finished trie.
    pub fn synthesize<'t>(&self, root: &'t Table) -> Result<Decision<'t>, SynthError> {
        let scope = Scope {
            range: self.archs.active_range(self.family),
            modrm: None,
            feature: None,
            only_mode: None,
        };
        log::debug!(
            "synthesizing {} decoder over {} processors",
            self.family,
            scope.range.len()
        );
        self.table(root, &Path::new(), &scope)
    }

    fn table<'t>(&self, table: &'t Table, path: &Path, scope: &Scope) -> Result<Decision<'t>, SynthError> {
        match table.axis() {
            Axis::Byte | Axis::Prefix => self.switch(table, path, scope),
            Axis::RegField | Axis::MemField => {
                if scope.modrm.is_none() {
                    return Err(SynthError::MissingModRm { path: path.to_string() });
                }
                self.switch(table, path, scope)
            }
            Axis::ModField => match scope.modrm {
                Some(form) => self.slot(table, path, form.slot(), scope),
                None => {
                    let register = Scope {
                        modrm: Some(ModRmForm::Register),
                        ..scope.clone()
                    };
                    let memory = Scope {
                        modrm: Some(ModRmForm::Memory),
                        ..scope.clone()
                    };
                    match table.modrm {
                        ModRm::Full => Ok(Decision::ModRm {
                            register: Box::new(self.slot(table, path, MODFIELD_REGISTER, &register)?),
                            memory:   Some(Box::new(self.slot(table, path, MODFIELD_MEMORY, &memory)?)),
                        }),
                        ModRm::RegisterOnly => Ok(Decision::ModRm {
                            register: Box::new(self.slot(table, path, MODFIELD_REGISTER, &register)?),
                            memory:   None,
                        }),
                        _ => Err(SynthError::MissingModRm { path: path.to_string() }),
                    }
                }
            },
        }
    }

    fn switch<'t>(&self, table: &'t Table, path: &Path, scope: &Scope) -> Result<Decision<'t>, SynthError> {
        let mut arms = Vec::with_capacity(table.axis().fan_out());
        for idx in 0..table.axis().fan_out() {
            arms.push(self.slot(table, path, idx as u8, scope)?);
        }
        Ok(Decision::Switch {
            axis: table.axis(),
            path: path.clone(),
            arms,
        })
    }

    /// Decide one slot of `table`.
    fn slot<'t>(&self, table: &'t Table, path: &Path, index: u8, scope: &Scope) -> Result<Decision<'t>, SynthError> {
        let mut here = path.clone();
        here.push(Step::new(index, table.axis()));

        let Some(entry) = table.entry(index)
        else {
            return Ok(Decision::Undefined);
        };

        let candidates: Vec<Candidate<'t>> = entry
            .candidates()
            .into_iter()
            .filter(|c| {
                let reachable = scope.range.iter().any(|cpu| c.cpus().contains(cpu));
                if !reachable {
                    log::debug!("{}: {} is unreachable from the enclosing range", here, c.describe());
                }
                reachable
            })
            .collect();

        let cells = collect_cells(&candidates, &scope.range, &here)?;

        let modes = match scope.only_mode {
            Some(mode) => vec![mode],
            None => self.family.code_modes().to_vec(),
        };
        let mut grid = Coverage::new(&scope.range, &modes);
        let mut branches = Vec::new();
        let mut otherwise = None;

        for (idx, cell) in cells.iter().enumerate() {
            let inner = self.inner_scope(scope, cell, &here)?;
            let features = cell.candidate.features();
            let condition = Condition {
                cpu_runs: compress_runs(&scope.range, &cell.cpu_set()),
                features: features.clone(),
                mode: cell.mode.filter(|m| Some(*m) != scope.only_mode),
            };
            let body = self.candidate(cell.candidate, &here, &inner)?;
            grid.record(&cell.cpus, inner.only_mode, features, &here);

            if condition.is_empty() {
                for shadowed in &cells[idx + 1..] {
                    log::warn!("{}: shadowed implementation: {}", here, shadowed.candidate.describe());
                }
                if branches.is_empty() {
                    return Ok(body);
                }
                otherwise = Some(Box::new(body));
                break;
            }
            branches.push(Branch { condition, body });
        }

        if otherwise.is_none() && !grid.is_complete() {
            log::debug!("{}: undefined for {}", here, grid.describe_uncovered(self.archs));
            otherwise = Some(Box::new(Decision::Undefined));
        }

        if branches.is_empty() {
            return Ok(otherwise.map(|d| *d).unwrap_or(Decision::Undefined));
        }
        Ok(Decision::Chain { branches, otherwise })
    }

    fn inner_scope(&self, scope: &Scope, cell: &Cell<'_>, path: &Path) -> Result<Scope, SynthError> {
        let mut feature = scope.feature.clone();
        for positive in cell.candidate.features().positives() {
            match &feature {
                Some(outer) if outer != positive => {
                    return Err(SynthError::ConflictingFeature {
                        path:  path.to_string(),
                        outer: outer.clone(),
                        inner: positive.to_string(),
                    });
                }
                _ => feature = Some(positive.to_string()),
            }
        }

        let only_mode = match (scope.only_mode, cell.mode) {
            (Some(outer), Some(inner)) if outer != inner => {
                return Err(SynthError::ConflictingMode {
                    path:  path.to_string(),
                    outer: outer.to_string(),
                    inner: inner.to_string(),
                });
            }
            (outer, inner) => inner.or(outer),
        };

        Ok(Scope {
            range: cell.cpus.clone(),
            modrm: scope.modrm,
            feature,
            only_mode,
        })
    }

    fn candidate<'t>(&self, candidate: Candidate<'t>, path: &Path, scope: &Scope) -> Result<Decision<'t>, SynthError> {
        match candidate {
            Candidate::Table(table) => self.table(table, path, scope),
            Candidate::Leaf(instruction) => {
                if instruction.modrm.is_present() && scope.modrm.is_none() {
                    return Err(SynthError::MissingModRm { path: path.to_string() });
                }
                Ok(Decision::Leaf {
                    instruction,
                    path: path.clone(),
                    form: scope.modrm,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::IsaSet,
        condition::CpuRun,
        features::FeatureTerm,
        instruction::Syntax,
        test_fixtures::{archs_from, fixture_archs},
    };

    fn ins(archs: &ArchitectureTable, mnemonic: &str, operands: &[&str], cpus: &[&str]) -> Instruction {
        let mut i = Instruction::new(Syntax::new(mnemonic, operands));
        i.cpus = cpus.iter().map(|c| archs.lookup(c).unwrap()).collect();
        i
    }

    const ALL_X86: &[&str] = &["8086", "186", "v20", "286", "386", "x64"];

    fn finish(root: &mut Table) {
        root.aggregate();
        root.bubble_modrm();
    }

    fn arm<'d, 't>(decision: &'d Decision<'t>, idx: usize) -> &'d Decision<'t> {
        match decision {
            Decision::Switch { arms, .. } => &arms[idx],
            other => panic!("expected a switch, got {:?}", other),
        }
    }

    #[test]
    fn test_gap_in_middle_of_range() {
        let archs = archs_from("- id: a\n- id: b\n  predecessors: [a]\n- id: c\n  predecessors: [b]\n");
        let mut root = Table::new(Axis::Byte);
        root.assign(&Path::from_steps([Step::byte(0x00)]), ins(&archs, "X", &[], &["a", "c"]))
            .unwrap();
        finish(&mut root);

        let tree = Synthesizer::new(&archs, Family::X86).synthesize(&root).unwrap();
        match arm(&tree, 0) {
            Decision::Chain { branches, otherwise } => {
                assert_eq!(branches.len(), 1);
                let a = archs.lookup("a").unwrap();
                let c = archs.lookup("c").unwrap();
                assert_eq!(branches[0].condition.cpu_runs, vec![CpuRun::Exactly(a), CpuRun::Exactly(c)]);
                assert!(matches!(otherwise.as_deref(), Some(Decision::Undefined)));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
        assert!(matches!(arm(&tree, 1), Decision::Undefined));
    }

    #[test]
    fn test_unconditional_leaf_has_no_chain() {
        let archs = fixture_archs();
        let mut root = Table::new(Axis::Byte);
        root.assign(&Path::from_steps([Step::byte(0x90)]), ins(&archs, "NOP", &[], ALL_X86))
            .unwrap();
        finish(&mut root);

        let tree = Synthesizer::new(&archs, Family::X86).synthesize(&root).unwrap();
        assert!(matches!(arm(&tree, 0x90), Decision::Leaf { form: None, .. }));
        assert_eq!(tree.leaves().len(), 1);
    }

    #[test]
    fn test_chain_covering_range_needs_no_fallback() {
        let archs = fixture_archs();
        let mut root = Table::new(Axis::Byte);
        let path = Path::from_steps([Step::byte(0x0F)]);
        root.assign(&path, ins(&archs, "POP", &["CS"], &["8086"])).unwrap();
        root.assign(&path, ins(&archs, "EXT", &[], &["186", "v20", "286", "386", "x64"]))
            .unwrap();
        finish(&mut root);

        let tree = Synthesizer::new(&archs, Family::X86).synthesize(&root).unwrap();
        match arm(&tree, 0x0F) {
            Decision::Chain { branches, otherwise } => {
                assert_eq!(branches.len(), 2);
                assert!(otherwise.is_none());
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_register_only_operand() {
        let archs = fixture_archs();
        let mut root = Table::new(Axis::Byte);
        let mut mov = ins(&archs, "MOV", &["Rd", "Cy"], ALL_X86);
        assert!(mov.requires_modrm());
        assert_eq!(mov.modrm, ModRm::RegisterOnly);
        root.assign(
            &Path::from_steps([Step::byte(0x0F), Step::byte(0x20), Step::modfield(MODFIELD_REGISTER)]),
            mov,
        )
        .unwrap();
        finish(&mut root);

        let tree = Synthesizer::new(&archs, Family::X86).synthesize(&root).unwrap();
        match arm(arm(&tree, 0x0F), 0x20) {
            Decision::ModRm { register, memory } => {
                assert!(memory.is_none());
                assert!(matches!(
                    register.as_ref(),
                    Decision::Leaf {
                        form: Some(ModRmForm::Register),
                        ..
                    }
                ));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_full_modrm_splits_forms() {
        let archs = fixture_archs();
        let mut root = Table::new(Axis::Byte);
        let mut add = ins(&archs, "ADD", &["Eb", "Gb"], ALL_X86);
        assert!(add.requires_modrm());
        let [memory, register] = add.split_by_modfield().unwrap();
        let path = Path::from_steps([Step::byte(0x00)]);
        root.assign(&path.with_modfield(MODFIELD_MEMORY), memory.unwrap()).unwrap();
        root.assign(&path.with_modfield(MODFIELD_REGISTER), register.unwrap()).unwrap();
        finish(&mut root);

        let tree = Synthesizer::new(&archs, Family::X86).synthesize(&root).unwrap();
        match arm(&tree, 0x00) {
            Decision::ModRm {
                register,
                memory: Some(memory),
            } => {
                let Decision::Leaf { instruction, .. } = register.as_ref()
                else {
                    panic!("expected a leaf");
                };
                assert_eq!(instruction.operands(), &["Rb".to_string(), "Gb".to_string()]);
                let Decision::Leaf { instruction, form, .. } = memory.as_ref()
                else {
                    panic!("expected a leaf");
                };
                assert_eq!(instruction.operands(), &["Mb".to_string(), "Gb".to_string()]);
                assert_eq!(*form, Some(ModRmForm::Memory));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_conflicting_feature() {
        let archs = fixture_archs();
        let mut root = Table::new(Axis::Byte);
        let mut packed = ins(&archs, "ADDPD", &[], ALL_X86);
        packed.features.insert(FeatureTerm::Present("sse2".into()));
        let mut odd = ins(&archs, "ODD", &[], ALL_X86);
        odd.features.insert(FeatureTerm::Present("sse2".into()));
        odd.features.insert(FeatureTerm::Present("nec".into()));
        root.assign(&Path::from_steps([Step::byte(0x58), Step::prefix(1)]), packed).unwrap();
        root.assign(&Path::from_steps([Step::byte(0x58), Step::prefix(3)]), odd).unwrap();
        finish(&mut root);

        let result = Synthesizer::new(&archs, Family::X86).synthesize(&root);
        match result {
            Err(SynthError::ConflictingFeature { outer, inner, .. }) => {
                assert_eq!(outer, "sse2");
                assert_eq!(inner, "nec");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_conflicting_mode() {
        let archs = fixture_archs();
        let mut table = Table::new(Axis::Byte);
        let mut legacy = ins(&archs, "AAA", &[], &["386", "x64"]);
        legacy.flags.only32 = true;
        table.assign(&Path::from_steps([Step::byte(0x37)]), legacy).unwrap();
        table.aggregate();

        let synth = Synthesizer::new(&archs, Family::X86);
        let scope = Scope {
            range: vec![archs.lookup("386").unwrap(), archs.lookup("x64").unwrap()],
            modrm: None,
            feature: None,
            only_mode: Some(CodeMode::Bits64),
        };
        let result = synth.candidate(Candidate::Table(&table), &Path::new(), &scope);
        assert!(matches!(result, Err(SynthError::ConflictingMode { .. })));
    }

    #[test]
    fn test_mode_split_covers_both_modes() {
        let archs = fixture_archs();
        let mut root = Table::new(Axis::Byte);
        let path = Path::from_steps([Step::byte(0x63)]);
        let mut arpl = ins(&archs, "ARPL", &[], &["286", "386", "x64"]);
        arpl.flags.only32 = true;
        let mut movsxd = ins(&archs, "MOVSXD", &[], &["x64"]);
        movsxd.flags.only64 = true;
        root.assign(&path, arpl).unwrap();
        root.assign(&path, movsxd).unwrap();
        finish(&mut root);

        let tree = Synthesizer::new(&archs, Family::X86).synthesize(&root).unwrap();
        match arm(&tree, 0x63) {
            Decision::Chain { branches, otherwise } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(branches[0].condition.mode, Some(CodeMode::Bits32));
                assert_eq!(branches[1].condition.mode, Some(CodeMode::Bits64));
                // 8086 through v20 remain undecided.
                assert!(matches!(otherwise.as_deref(), Some(Decision::Undefined)));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_missing_modrm() {
        let archs = fixture_archs();
        let mut root = Table::new(Axis::Byte);
        root.assign(
            &Path::from_steps([Step::byte(0x80), Step::regfield(7)]),
            ins(&archs, "CMP", &[], ALL_X86),
        )
        .unwrap();
        finish(&mut root);

        let result = Synthesizer::new(&archs, Family::X86).synthesize(&root);
        assert!(matches!(result, Err(SynthError::MissingModRm { .. })));
    }

    #[test]
    fn test_unreachable_candidate_skipped() {
        let archs = fixture_archs();
        let mut root = Table::new(Axis::Byte);
        let mut z80 = Instruction::new(Syntax::new("NOP", &[]));
        z80.cpus = IsaSet::from([archs.lookup("z80").unwrap()]);
        root.assign(&Path::from_steps([Step::byte(0x00)]), z80).unwrap();
        finish(&mut root);

        let tree = Synthesizer::new(&archs, Family::X86).synthesize(&root).unwrap();
        assert!(matches!(arm(&tree, 0x00), Decision::Undefined));
    }
}
