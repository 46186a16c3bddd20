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

    marty_opgen::synth::cells.rs

    Grouping of a slot's candidates into (introducing CPU, feature) cells.

*/

use indexmap::IndexMap;

use crate::{
    arch::{ArchId, CodeMode, IsaSet},
    error::SynthError,
    features::FeatureOrder,
    path::Path,
    trie::Candidate,
};

type CellKey = (ArchId, Option<String>);

/// One branch's worth of a slot: the candidate that decodes it and the CPUs it covers.
#[derive(Clone, Debug)]
pub struct Cell<'t> {
    pub candidate: Candidate<'t>,
    /// Mode restriction of the candidate.
    pub mode: Option<CodeMode>,
    /// CPUs of the decision range the candidate supports, in range order.
    pub cpus: Vec<ArchId>,
}

impl<'t> Cell<'t> {
    pub fn cpu_set(&self) -> IsaSet {
        self.cpus.iter().copied().collect()
    }
}

/// Group `candidates` into cells over `range`, in emission order.
///
/// Each candidate is keyed by the first CPU of the range it supports and by its first
/// positive feature. If two candidates of the same mode restriction share a key, the
/// earlier one wins and the later one is reported. Candidates that support no CPU of the
/// range must already have been removed.
pub fn collect_cells<'t>(
    candidates: &[Candidate<'t>],
    range: &[ArchId],
    path: &Path,
) -> Result<Vec<Cell<'t>>, SynthError> {
    let mut order = FeatureOrder::new();
    let mut general: IndexMap<CellKey, Candidate<'t>> = IndexMap::new();
    let mut only32: IndexMap<CellKey, Candidate<'t>> = IndexMap::new();
    let mut only64: IndexMap<CellKey, Candidate<'t>> = IndexMap::new();

    for candidate in candidates {
        let features = candidate.features();
        order.observe(features.first_positive(), features.negatives(), path)?;

        let Some(intro) = range.iter().find(|cpu| candidate.cpus().contains(*cpu))
        else {
            continue;
        };
        let key = (*intro, features.first_positive().map(String::from));

        let map = match candidate.flags().mode() {
            Some(CodeMode::Bits32) => &mut only32,
            Some(CodeMode::Bits64) => &mut only64,
            None => &mut general,
        };
        if map.contains_key(&key) {
            log::warn!("{}: instruction ignored: {}", path, candidate.describe());
        }
        else {
            map.insert(key, *candidate);
        }
    }

    let mut cells = Vec::new();
    for intro in range {
        for feature in order.order() {
            let key = (*intro, feature.clone());
            for (map, mode) in [
                (&general, None),
                (&only32, Some(CodeMode::Bits32)),
                (&only64, Some(CodeMode::Bits64)),
            ] {
                if let Some(candidate) = map.get(&key) {
                    cells.push(Cell {
                        candidate: *candidate,
                        mode,
                        cpus: range
                            .iter()
                            .filter(|cpu| candidate.cpus().contains(*cpu))
                            .copied()
                            .collect(),
                    });
                }
            }
        }
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        features::FeatureTerm,
        instruction::{Instruction, Syntax},
    };

    fn ins(mnemonic: &str, cpus: &[u16]) -> Instruction {
        let mut i = Instruction::new(Syntax::new(mnemonic, &[]));
        i.cpus = cpus.iter().map(|c| ArchId(*c)).collect();
        i
    }

    fn range(n: u16) -> Vec<ArchId> {
        (0..n).map(ArchId).collect()
    }

    fn names(cells: &[Cell]) -> Vec<String> {
        cells.iter().map(|c| c.candidate.describe()).collect()
    }

    #[test]
    fn test_intro_order() {
        let late = ins("LATE", &[2, 3]);
        let early = ins("EARLY", &[0, 1]);
        let candidates = [Candidate::Leaf(&late), Candidate::Leaf(&early)];
        let cells = collect_cells(&candidates, &range(4), &Path::new()).unwrap();
        assert_eq!(names(&cells), vec!["EARLY", "LATE"]);
        assert_eq!(cells[1].cpus, vec![ArchId(2), ArchId(3)]);
    }

    #[test]
    fn test_first_candidate_wins() {
        let first = ins("FIRST", &[1, 2]);
        let second = ins("SECOND", &[1]);
        let candidates = [Candidate::Leaf(&first), Candidate::Leaf(&second)];
        let cells = collect_cells(&candidates, &range(3), &Path::new()).unwrap();
        assert_eq!(names(&cells), vec!["FIRST"]);
    }

    #[test]
    fn test_mode_maps_are_separate() {
        let mut legacy = ins("AAA", &[0, 1]);
        legacy.flags.only32 = true;
        let mut long = ins("MOVSXD", &[1]);
        long.flags.only64 = true;
        let generic = ins("NOP", &[0, 1]);
        let candidates = [Candidate::Leaf(&legacy), Candidate::Leaf(&long), Candidate::Leaf(&generic)];
        let cells = collect_cells(&candidates, &range(2), &Path::new()).unwrap();
        assert_eq!(names(&cells), vec!["NOP", "AAA", "MOVSXD"]);
        assert_eq!(cells[1].mode, Some(CodeMode::Bits32));
        assert_eq!(cells[2].mode, Some(CodeMode::Bits64));
    }

    #[test]
    fn test_negated_feature_orders_cells() {
        let mut plain = ins("PLAIN", &[0, 1]);
        plain.features.insert(FeatureTerm::Absent("nec".into()));
        let mut nec = ins("NECONLY", &[0, 1]);
        nec.features.insert(FeatureTerm::Present("nec".into()));
        let candidates = [Candidate::Leaf(&plain), Candidate::Leaf(&nec)];
        let cells = collect_cells(&candidates, &range(2), &Path::new()).unwrap();
        // The cell excluding "nec" is decided after the cell gated on it.
        assert_eq!(names(&cells), vec!["NECONLY", "PLAIN"]);
    }
}
