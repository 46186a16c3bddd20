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

    marty_opgen::trie::passes.rs

    Bottom-up passes run once all rows have been inserted:
    - aggregate: CPU union, feature and mode flag intersection
    - apply_prefix_defaults: older CPUs ignore an unknown SIMD prefix
    - bubble_modrm: hoist ModRM usage to the node that fetches the byte

*/

use crate::{
    arch::{IsaSet, ModeFlags},
    error::TrieError,
    features::FeatureSet,
    instruction::{Instruction, ModRm},
    path::{Axis, Path, Step},
    trie::Table,
};

#[derive(Default)]
struct Aggregate {
    cpus: IsaSet,
    features: Option<FeatureSet>,
    flags: Option<ModeFlags>,
}

impl Aggregate {
    fn fold(&mut self, cpus: &IsaSet, features: &FeatureSet, flags: ModeFlags) {
        self.cpus.extend(cpus.iter().copied());
        self.features = Some(match self.features.take() {
            None => features.clone(),
            Some(f) => f.intersect(features),
        });
        self.flags = Some(match self.flags {
            None => flags,
            Some(f) => f.intersect(&flags),
        });
    }
}

impl Table {
    /// Compute CPU, feature and mode flag aggregates for every table.
    pub fn aggregate(&mut self) {
        let mut agg = Aggregate::default();
        for entry in self.entries.iter_mut() {
            if let Some(child) = entry.table.as_deref_mut() {
                child.aggregate();
                agg.fold(&child.cpus, &child.features, child.flags);
            }
            for ins in &entry.instructions {
                agg.fold(&ins.cpus, &ins.features, ins.flags);
            }
        }
        self.cpus = agg.cpus;
        self.features = agg.features.unwrap_or_default();
        self.flags = agg.flags.unwrap_or_default();
    }

    /// Determine where the ModRM byte is fetched. A ModRM field node takes over the usage
    /// of its children, which then inherit it.
    pub fn bubble_modrm(&mut self) {
        for entry in self.entries.iter_mut() {
            if let Some(child) = entry.table.as_deref_mut() {
                child.bubble_modrm();
            }
            for ins in entry.instructions.iter_mut() {
                ins.requires_modrm();
            }
        }

        match self.axis {
            Axis::ModField | Axis::RegField | Axis::MemField => {
                let mut full = false;
                self.for_each_child_modrm(|usage| {
                    full |= *usage == ModRm::Full;
                    *usage = ModRm::Inherited;
                });
                self.modrm = if full { ModRm::Full } else { ModRm::RegisterOnly };
            }
            Axis::Prefix => {
                let mut hoisted: Option<ModRm> = None;
                self.for_each_child_modrm(|usage| {
                    if hoisted.is_none() || *usage == ModRm::Full {
                        hoisted = Some(*usage);
                    }
                    *usage = ModRm::Inherited;
                });
                if let Some(usage) = hoisted {
                    self.modrm = usage;
                }
            }
            Axis::Byte => {}
        }
    }

    /// Apply `f` to the ModRM usage of every direct child that has one.
    fn for_each_child_modrm<F: FnMut(&mut ModRm)>(&mut self, mut f: F) {
        for entry in self.entries.iter_mut() {
            if let Some(child) = entry.table.as_deref_mut() {
                if child.modrm.is_present() {
                    f(&mut child.modrm);
                }
            }
            for ins in entry.instructions.iter_mut() {
                if ins.modrm.is_present() {
                    f(&mut ins.modrm);
                }
            }
        }
    }

    /// For every slot that has both instructions and a prefix table, give each prefix slot
    /// a copy of the slot's instructions for the CPUs that have no explicit form there. The
    /// slot's own instructions then keep only the CPUs outside the prefix table.
    ///
    /// Must run after [Table::aggregate].
    pub fn apply_prefix_defaults(&mut self) -> Result<(), TrieError> {
        self.apply_prefix_defaults_at(&Path::new())
    }

    fn apply_prefix_defaults_at(&mut self, at: &Path) -> Result<(), TrieError> {
        let axis = self.axis;
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            let Some(child) = entry.table.as_deref_mut()
            else {
                continue;
            };
            let mut here = at.clone();
            here.push(Step::new(idx as u8, axis));

            if child.axis == Axis::Prefix {
                child.fill_prefix_defaults(&entry.instructions, &here)?;

                for ins in entry.instructions.iter_mut() {
                    ins.cpus = ins.cpus.difference(&child.cpus).copied().collect();
                }
                entry.instructions.retain(|ins| {
                    if ins.cpus.is_empty() {
                        log::debug!("{}: {} is fully replaced by prefixed forms", here, ins);
                        false
                    }
                    else {
                        true
                    }
                });
            }
            else {
                child.apply_prefix_defaults_at(&here)?;
            }
        }
        Ok(())
    }

    fn fill_prefix_defaults(&mut self, fallbacks: &[Instruction], at: &Path) -> Result<(), TrieError> {
        let table_cpus = self.cpus.clone();
        for (idx, entry) in self.entries.iter_mut().enumerate() {
            if entry.table.is_some() {
                let mut here = at.clone();
                here.push(Step::prefix(idx as u8));
                return Err(TrieError::PrefixNotLeaf { path: here.to_string() });
            }

            let covered: IsaSet = entry.instructions.iter().flat_map(|i| i.cpus.iter().copied()).collect();
            let mut defaults = Vec::new();
            for fallback in fallbacks {
                let cpus: IsaSet = table_cpus
                    .intersection(&fallback.cpus)
                    .filter(|cpu| !covered.contains(cpu))
                    .copied()
                    .collect();
                if !cpus.is_empty() {
                    let mut default = fallback.clone();
                    default.cpus = cpus;
                    defaults.push(default);
                }
            }
            entry.instructions.extend(defaults);
        }
        Ok(())
    }
}
