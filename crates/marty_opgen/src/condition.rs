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

    marty_opgen::condition.rs

    Branch conditions of the decision tree and their rendering into C.

*/

use crate::{
    arch::{ArchId, ArchitectureTable, CodeMode, Family, IsaSet},
    error::SynthError,
    features::{FeatureGlossary, FeatureSet},
};

/// A maximal run of consecutive CPUs within a decision range.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpuRun {
    Exactly(ArchId),
    /// A run starting at the first CPU of the range.
    AtMost(ArchId),
    /// A run ending at the last CPU of the range.
    AtLeast(ArchId),
    Between(ArchId, ArchId),
}

/// Compress the CPUs of `subset` into runs over `range`. A run spanning the whole range
/// is a tautology and produces nothing.
pub fn compress_runs(range: &[ArchId], subset: &IsaSet) -> Vec<CpuRun> {
    let mut intervals: Vec<(ArchId, ArchId)> = Vec::new();
    let mut open = false;
    for cpu in range {
        if subset.contains(cpu) {
            match intervals.last_mut() {
                Some(last) if open => last.1 = *cpu,
                _ => intervals.push((*cpu, *cpu)),
            }
            open = true;
        }
        else {
            open = false;
        }
    }

    let (Some(first), Some(last)) = (range.first(), range.last())
    else {
        return Vec::new();
    };

    intervals
        .into_iter()
        .filter_map(|(start, end)| {
            if start == *first && end == *last {
                None
            }
            else if start == end {
                Some(CpuRun::Exactly(start))
            }
            else if start == *first {
                Some(CpuRun::AtMost(end))
            }
            else if end == *last {
                Some(CpuRun::AtLeast(start))
            }
            else {
                Some(CpuRun::Between(start, end))
            }
        })
        .collect()
}

/// The type enumerator prefix and parser field that select the processor of a family.
fn cpu_selector(family: Family) -> (&'static str, &'static str) {
    match family {
        Family::X86 => ("X86_CPU_", "cpu_type"),
        Family::X80 => ("X80_CPU_", "cpu_type"),
        Family::X87 => ("X87_FPU_", "fpu_type"),
    }
}

impl CpuRun {
    pub fn render(&self, family: Family, archs: &ArchitectureTable) -> String {
        let (prefix, field) = cpu_selector(family);
        let name = |id: &ArchId| format!("{}{}", prefix, archs.get(*id).display_name().to_uppercase());
        match self {
            CpuRun::Exactly(id) => format!("prs->{} == {}", field, name(id)),
            CpuRun::AtMost(id) => format!("prs->{} <= {}", field, name(id)),
            CpuRun::AtLeast(id) => format!("{} <= prs->{}", name(id), field),
            CpuRun::Between(start, end) => {
                format!("{} <= prs->{} && prs->{} <= {}", name(start), field, field, name(end))
            }
        }
    }
}

/// The guard of one branch of a decision chain. An empty condition always holds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Condition {
    pub cpu_runs: Vec<CpuRun>,
    pub features: FeatureSet,
    pub mode: Option<CodeMode>,
}

impl Condition {
    pub fn is_empty(&self) -> bool {
        self.cpu_runs.is_empty() && self.features.is_empty() && self.mode.is_none()
    }

    /// Render as a C expression. CPU runs are OR-ed, then the feature and mode clauses
    /// are AND-ed on.
    pub fn render(
        &self,
        family: Family,
        archs: &ArchitectureTable,
        glossary: &FeatureGlossary,
    ) -> Result<String, SynthError> {
        let mut clauses = Vec::new();

        let runs: Vec<String> = self.cpu_runs.iter().map(|r| r.render(family, archs)).collect();
        match runs.len() {
            0 => {}
            1 => clauses.push(runs[0].clone()),
            _ => {
                let runs: Vec<String> = runs
                    .into_iter()
                    .map(|r| if r.contains("&&") { format!("({})", r) } else { r })
                    .collect();
                let joined = runs.join(" || ");
                if self.features.is_empty() && self.mode.is_none() {
                    clauses.push(joined);
                }
                else {
                    clauses.push(format!("({})", joined));
                }
            }
        }

        for term in self.features.iter() {
            clauses.push(glossary.render(term)?);
        }

        match self.mode {
            Some(CodeMode::Bits32) => clauses.push("prs->code_size != SIZE_64BIT".to_string()),
            Some(CodeMode::Bits64) => clauses.push("prs->code_size == SIZE_64BIT".to_string()),
            None => {}
        }

        Ok(clauses.join(" && "))
    }
}
