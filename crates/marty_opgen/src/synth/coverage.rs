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

    marty_opgen::synth::coverage.rs

    Tracks which (CPU, code mode) pairs of a decision chain are decided.

*/

use indexmap::IndexMap;

use crate::{
    arch::{ArchId, ArchitectureTable, CodeMode},
    features::FeatureSet,
    path::Path,
};

#[derive(Clone, Debug, PartialEq, Eq)]
enum PairState {
    Untouched,
    /// Only branches gated on a feature have matched so far.
    Gated,
}

#[derive(Clone, Debug)]
pub struct Coverage {
    open:  IndexMap<(ArchId, CodeMode), PairState>,
    modes: Vec<CodeMode>,
}

impl Coverage {
    /// A grid over every CPU of `range` and each of `modes`.
    pub fn new(range: &[ArchId], modes: &[CodeMode]) -> Self {
        let mut open = IndexMap::new();
        for mode in modes {
            for cpu in range {
                open.insert((*cpu, *mode), PairState::Untouched);
            }
        }
        Self {
            open,
            modes: modes.to_vec(),
        }
    }

    /// Record a branch matching `cpus` in `mode` (every grid mode if `None`) under `features`.
    ///
    /// A branch gated on a positive feature leaves its pairs open. A branch with no features
    /// closes them, as does a negatively gated branch following a gated one. A branch with
    /// only negative features on an untouched pair leaves it open.
    pub fn record(&mut self, cpus: &[ArchId], mode: Option<CodeMode>, features: &FeatureSet, path: &Path) {
        let modes = match mode {
            Some(m) => vec![m],
            None => self.modes.clone(),
        };
        let gate = features.first_positive();

        for cpu in cpus {
            for mode in &modes {
                let key = (*cpu, *mode);
                match (self.open.get(&key).cloned(), gate) {
                    (Some(_), Some(_)) => {
                        self.open.insert(key, PairState::Gated);
                    }
                    (Some(state), None) => {
                        if state != PairState::Untouched || features.is_empty() {
                            self.open.shift_remove(&key);
                        }
                    }
                    (None, None) if features.is_empty() => {
                        log::warn!("{}: overlapping implementation for CPU {:?} in {}-bit mode", path, cpu, mode);
                    }
                    (None, _) => {}
                }
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.open.is_empty()
    }

    /// The pairs no branch has decided, in grid order.
    pub fn uncovered(&self) -> impl Iterator<Item = (ArchId, CodeMode)> + '_ {
        self.open.keys().copied()
    }

    /// Uncovered pairs rendered as `cpu/mode`, for diagnostics.
    pub fn describe_uncovered(&self, archs: &ArchitectureTable) -> String {
        self.uncovered()
            .map(|(cpu, mode)| format!("{}/{}", archs.name(cpu), mode))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{features::FeatureTerm, test_fixtures::fixture_archs};

    fn ids(n: u16) -> Vec<ArchId> {
        (0..n).map(ArchId).collect()
    }

    #[test]
    fn test_unconditional_branch_covers() {
        let mut grid = Coverage::new(&ids(3), &[CodeMode::Bits32, CodeMode::Bits64]);
        grid.record(&ids(3), None, &FeatureSet::new(), &Path::new());
        assert!(grid.is_complete());
    }

    #[test]
    fn test_mode_restricted_branch() {
        let mut grid = Coverage::new(&ids(2), &[CodeMode::Bits32, CodeMode::Bits64]);
        grid.record(&ids(2), Some(CodeMode::Bits32), &FeatureSet::new(), &Path::new());
        assert!(!grid.is_complete());
        grid.record(&ids(2), Some(CodeMode::Bits64), &FeatureSet::new(), &Path::new());
        assert!(grid.is_complete());
    }

    #[test]
    fn test_feature_gating() {
        let mut gated = FeatureSet::new();
        gated.insert(FeatureTerm::Present("nec".into()));
        let mut excluded = FeatureSet::new();
        excluded.insert(FeatureTerm::Absent("nec".into()));

        let mut grid = Coverage::new(&ids(1), &[CodeMode::Bits32]);
        grid.record(&ids(1), None, &gated, &Path::new());
        assert!(!grid.is_complete());
        grid.record(&ids(1), None, &excluded, &Path::new());
        assert!(grid.is_complete());

        // A negative gate alone decides nothing.
        let mut grid = Coverage::new(&ids(1), &[CodeMode::Bits32]);
        grid.record(&ids(1), None, &excluded, &Path::new());
        assert!(!grid.is_complete());
    }

    #[test]
    fn test_uncovered_pairs() {
        let archs = fixture_archs();
        let range = archs.active_range(crate::arch::Family::X86);
        let mut grid = Coverage::new(&range, &[CodeMode::Bits32, CodeMode::Bits64]);
        grid.record(&range[1..], None, &FeatureSet::new(), &Path::new());

        let open: Vec<(ArchId, CodeMode)> = grid.uncovered().collect();
        assert_eq!(open, vec![(range[0], CodeMode::Bits32), (range[0], CodeMode::Bits64)]);
        assert_eq!(grid.describe_uncovered(&archs), "8086/32, 8086/64");
    }
}
