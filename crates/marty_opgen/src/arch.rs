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

    marty_opgen::arch.rs

    Architecture definitions, processor families and resolution of a row's
    applicability specification ("8086,!v20,386+,64") into a set of
    architectures.

*/

use std::collections::BTreeSet;

use fxhash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use strum_macros::Display;

use crate::{error::SpecError, yaml::StringList};

/// The three independent decode tries.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Display)]
pub enum Family {
    #[default]
    #[serde(rename = "cpu")]
    #[strum(serialize = "x86")]
    X86,
    #[serde(rename = "8bit")]
    #[strum(serialize = "x80")]
    X80,
    #[serde(rename = "fpu")]
    #[strum(serialize = "x87")]
    X87,
}

impl Family {
    /// Code modes a decision must cover for this family.
    pub fn code_modes(&self) -> &'static [CodeMode] {
        match self {
            Family::X86 => &[CodeMode::Bits32, CodeMode::Bits64],
            _ => &[CodeMode::Bits32],
        }
    }
}

/// Operating mode distinction used by decisions. `Bits32` stands for every non-64-bit mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum CodeMode {
    #[strum(serialize = "32")]
    Bits32,
    #[strum(serialize = "64")]
    Bits64,
}

/// Index of an architecture in definition order. Definition order is the succession
/// order used for CPU range comparisons.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchId(pub u16);

pub type IsaSet = BTreeSet<ArchId>;

/// An `@architectures` entry as written in the spec file.
#[derive(Clone, Debug, Deserialize)]
pub struct ArchRecord {
    #[serde(deserialize_with = "crate::yaml::scalar")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub family: Family,
    #[serde(default, deserialize_with = "crate::yaml::opt_scalar")]
    pub name: Option<String>,
    #[serde(default)]
    pub predecessors: StringList,
    #[serde(default)]
    pub modes: StringList,
    #[serde(default, deserialize_with = "crate::yaml::opt_scalar")]
    pub generate: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Architecture {
    pub id: String,
    pub family: Family,
    pub name: Option<String>,
    pub predecessors: Vec<ArchId>,
    pub modes: Vec<String>,
    pub generate: bool,
}

impl Architecture {
    /// The name used in generated enumerators.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn has_mode(&self, mode: &str) -> bool {
        self.modes.iter().any(|m| m == mode)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ArchitectureTable {
    archs: Vec<Architecture>,
    by_id: FxHashMap<String, ArchId>,
}

impl ArchitectureTable {
    pub fn from_records(records: Vec<ArchRecord>) -> Result<Self, SpecError> {
        if records.is_empty() {
            return Err(SpecError::NoArchitectures);
        }

        let mut by_id = FxHashMap::default();
        for (idx, record) in records.iter().enumerate() {
            if by_id.insert(record.id.clone(), ArchId(idx as u16)).is_some() {
                return Err(SpecError::DuplicateArchitecture(record.id.clone()));
            }
        }

        let mut archs = Vec::with_capacity(records.len());
        for record in records {
            let mut predecessors = Vec::new();
            for pred in record.predecessors.iter() {
                match by_id.get(pred) {
                    Some(id) => predecessors.push(*id),
                    None => {
                        return Err(SpecError::UnknownPredecessor {
                            arch: record.id.clone(),
                            predecessor: pred.clone(),
                        })
                    }
                }
            }
            let generate = !matches!(record.generate.as_deref(), Some("no") | Some("false"));
            archs.push(Architecture {
                id: record.id,
                family: record.family,
                name: record.name,
                predecessors,
                modes: record.modes.into_vec(),
                generate,
            });
        }

        Ok(Self { archs, by_id })
    }

    pub fn len(&self) -> usize {
        self.archs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archs.is_empty()
    }

    pub fn get(&self, id: ArchId) -> &Architecture {
        &self.archs[id.0 as usize]
    }

    pub fn lookup(&self, name: &str) -> Option<ArchId> {
        self.by_id.get(name).copied()
    }

    pub fn name(&self, id: ArchId) -> &str {
        &self.get(id).id
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArchId, &Architecture)> {
        self.archs.iter().enumerate().map(|(i, a)| (ArchId(i as u16), a))
    }

    /// All architectures of a family, in succession order.
    pub fn family_list(&self, family: Family) -> Vec<ArchId> {
        self.iter().filter(|(_, a)| a.family == family).map(|(id, _)| id).collect()
    }

    /// The architectures a decoder is generated for.
    pub fn active_range(&self, family: Family) -> Vec<ArchId> {
        self.iter()
            .filter(|(_, a)| a.family == family && a.generate)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn names(&self, set: &IsaSet) -> Vec<&str> {
        set.iter().map(|id| self.name(*id)).collect()
    }
}

/// Mode restrictions carried by a row.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ModeFlags {
    pub only32: bool,
    pub only64: bool,
}

impl ModeFlags {
    pub fn intersect(&self, other: &ModeFlags) -> ModeFlags {
        ModeFlags {
            only32: self.only32 && other.only32,
            only64: self.only64 && other.only64,
        }
    }

    pub fn mode(&self) -> Option<CodeMode> {
        if self.only32 {
            Some(CodeMode::Bits32)
        }
        else if self.only64 {
            Some(CodeMode::Bits64)
        }
        else {
            None
        }
    }
}

/// A parsed applicability column.
#[derive(Clone, Debug, Default)]
pub struct Applicability {
    plain: FxHashSet<String>,
    successors: FxHashSet<String>,
    excluded: FxHashSet<String>,
    pub flags: ModeFlags,
}

impl Applicability {
    /// Parse a comma separated applicability column. Returns the names of any
    /// architectures that are not defined, which the caller reports.
    pub fn parse(text: &str, archs: &ArchitectureTable) -> (Self, Vec<String>) {
        let mut app = Applicability::default();
        let mut unknown = Vec::new();

        for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let base = match token {
                "64" => {
                    app.flags.only64 = true;
                    continue;
                }
                "!64" => {
                    app.flags.only32 = true;
                    continue;
                }
                t if t.ends_with('+') => {
                    let base = &t[..t.len() - 1];
                    app.successors.insert(base.to_string());
                    base
                }
                t if t.starts_with('!') => {
                    let base = &t[1..];
                    app.excluded.insert(base.to_string());
                    base
                }
                t => {
                    app.plain.insert(t.to_string());
                    t
                }
            };
            if archs.lookup(base).is_none() {
                unknown.push(base.to_string());
            }
        }
        (app, unknown)
    }

    fn names(&self) -> impl Iterator<Item = &String> {
        self.plain.iter().chain(self.successors.iter()).chain(self.excluded.iter())
    }

    /// Decide which trie a row belongs to. The 8-bit family takes precedence, then the FPU.
    pub fn family(&self, archs: &ArchitectureTable) -> Family {
        let families: FxHashSet<Family> = self
            .names()
            .filter_map(|n| archs.lookup(n))
            .map(|id| archs.get(id).family)
            .collect();
        if families.contains(&Family::X80) {
            Family::X80
        }
        else if families.contains(&Family::X87) {
            Family::X87
        }
        else {
            Family::X86
        }
    }

    /// Resolve into the set of architectures of `family` that implement the row.
    ///
    /// `id+` includes every architecture that has a predecessor already included this way.
    /// `!id` excludes an architecture including its successor chain through it. A `64` row
    /// skips architectures without a 64-bit mode but still lets the successor chain pass
    /// through them.
    pub fn resolve(&self, archs: &ArchitectureTable, family: Family) -> IsaSet {
        let mut supported = IsaSet::new();
        let mut chained = IsaSet::new();

        for id in archs.family_list(family) {
            let arch = archs.get(id);
            if self.excluded.contains(&arch.id) {
                continue;
            }
            let ignore = family != Family::X80 && self.flags.only64 && !arch.has_mode("64");

            if self.successors.contains(&arch.id) || arch.predecessors.iter().any(|p| chained.contains(p)) {
                chained.insert(id);
                if !ignore {
                    supported.insert(id);
                }
            }
            else if self.plain.contains(&arch.id) && !ignore {
                supported.insert(id);
            }
        }
        supported
    }

    /// Mode flags for `family`. The 8-bit family has no operating modes.
    pub fn flags_for(&self, family: Family) -> ModeFlags {
        match family {
            Family::X80 => ModeFlags::default(),
            _ => self.flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::fixture_archs;

    fn ids(archs: &ArchitectureTable, set: &IsaSet) -> Vec<String> {
        archs.names(set).into_iter().map(String::from).collect()
    }

    #[test]
    fn test_family_lists() {
        let archs = fixture_archs();
        let x86: Vec<&str> = archs.family_list(Family::X86).iter().map(|id| archs.name(*id)).collect();
        assert_eq!(x86, vec!["8086", "186", "v20", "286", "386", "x64"]);
        let x87: Vec<&str> = archs.active_range(Family::X87).iter().map(|id| archs.name(*id)).collect();
        assert_eq!(x87, vec!["8087", "287", "387"]);
        // "8085" is marked `generate: no`
        assert!(archs.family_list(Family::X80).len() > archs.active_range(Family::X80).len());
    }

    #[test]
    fn test_successors() {
        let archs = fixture_archs();
        let (app, unknown) = Applicability::parse("186+", &archs);
        assert!(unknown.is_empty());
        let set = app.resolve(&archs, Family::X86);
        assert_eq!(ids(&archs, &set), vec!["186", "v20", "286", "386", "x64"]);
    }

    #[test]
    fn test_exclusion_cuts_chain() {
        let archs = fixture_archs();
        let (app, _) = Applicability::parse("8086+,!v20", &archs);
        let set = app.resolve(&archs, Family::X86);
        // v20 descends from 186 but is excluded; 286 still descends from 186.
        assert_eq!(ids(&archs, &set), vec!["8086", "186", "286", "386", "x64"]);
    }

    #[test]
    fn test_plain_and_unknown() {
        let archs = fixture_archs();
        let (app, unknown) = Applicability::parse("v20, 286, pentium9", &archs);
        assert_eq!(unknown, vec!["pentium9".to_string()]);
        let set = app.resolve(&archs, Family::X86);
        assert_eq!(ids(&archs, &set), vec!["v20", "286"]);
    }

    #[test]
    fn test_64bit_only() {
        let archs = fixture_archs();
        let (app, _) = Applicability::parse("386+,64", &archs);
        assert!(app.flags.only64);
        let set = app.resolve(&archs, Family::X86);
        assert_eq!(ids(&archs, &set), vec!["x64"]);

        let (app, _) = Applicability::parse("8086+,!64", &archs);
        assert!(app.flags.only32);
        assert_eq!(app.flags.mode(), Some(CodeMode::Bits32));
        assert_eq!(app.resolve(&archs, Family::X86).len(), 6);
    }

    #[test]
    fn test_row_family() {
        let archs = fixture_archs();
        assert_eq!(Applicability::parse("8080+", &archs).0.family(&archs), Family::X80);
        assert_eq!(Applicability::parse("8087+", &archs).0.family(&archs), Family::X87);
        assert_eq!(Applicability::parse("386+,64", &archs).0.family(&archs), Family::X86);
    }

    #[test]
    fn test_duplicate_architecture() {
        let records: Vec<ArchRecord> = serde_yaml::from_str("- id: a\n- id: a\n").unwrap();
        assert!(matches!(
            ArchitectureTable::from_records(records),
            Err(SpecError::DuplicateArchitecture(_))
        ));
    }
}
