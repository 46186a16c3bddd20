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

    marty_opgen::processors.rs

    Processor models: resolved feature sets and CPUID values.

*/

use std::collections::{BTreeMap, BTreeSet};

use fxhash::FxHashMap;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::{
    arch::{ArchitectureTable, Family},
    error::SpecError,
    features::{CpuidCheck, FeatureGlossary},
    yaml::StringList,
};

/// A `@processors` entry as written in the spec file.
#[derive(Clone, Debug, Deserialize)]
pub struct ProcessorRecord {
    #[serde(deserialize_with = "crate::yaml::scalar")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: Family,
    #[serde(default, deserialize_with = "crate::yaml::opt_scalar")]
    pub class: Option<String>,
    #[serde(default, deserialize_with = "crate::yaml::opt_scalar")]
    pub variant: Option<String>,
    #[serde(default, deserialize_with = "crate::yaml::opt_scalar")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "crate::yaml::opt_scalar")]
    pub vendor: Option<String>,
    #[serde(default)]
    pub features: StringList,
    #[serde(default)]
    pub fpu: StringList,
    #[serde(default)]
    pub aliases: StringList,
    #[serde(rename = "family", default, deserialize_with = "crate::yaml::opt_scalar")]
    pub cpu_family: Option<String>,
    #[serde(default, deserialize_with = "crate::yaml::opt_scalar")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "crate::yaml::opt_scalar")]
    pub stepping: Option<String>,
    #[serde(default, deserialize_with = "crate::yaml::opt_scalar")]
    pub highest_function: Option<String>,
    #[serde(default, deserialize_with = "crate::yaml::opt_scalar")]
    pub highest_extended_function: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Processor {
    pub id: String,
    pub kind: Family,
    /// Enumerator name of the architecture class, e.g. `V20` for class `v20`.
    pub class_name: String,
    pub variant: Option<String>,
    pub description: String,
    pub vendor: Option<String>,
    pub features: BTreeSet<String>,
    /// FPU ids or aliases, default first.
    pub fpu: Vec<String>,
    pub aliases: Vec<String>,
    /// CPUID function 1 EAX value, if the family is known.
    pub signature: Option<u32>,
    pub highest_function: Option<u32>,
    pub highest_extended_function: Option<u32>,
}

/// CPUID 1 EAX from family, model and stepping numbers.
pub fn cpuid_signature(family: u32, model: Option<u32>, stepping: Option<u32>) -> u32 {
    let mut info = if family > 15 {
        ((family - 15) << 20) | (15 << 8)
    }
    else {
        family << 8
    };
    if let Some(model) = model {
        info |= (model & 0xF) << 4;
        info |= (model & 0xF0) << 12;
    }
    if let Some(stepping) = stepping {
        info |= stepping & 0xF;
    }
    info
}

fn parse_number(
    processor: &str,
    field: &'static str,
    value: &Option<String>,
    radix: u32,
) -> Result<Option<u32>, SpecError> {
    match value {
        Some(text) => u32::from_str_radix(text.trim(), radix)
            .map(Some)
            .map_err(|_| SpecError::BadProcessorField {
                processor: processor.to_string(),
                field,
                value: text.clone(),
            }),
        None => Ok(None),
    }
}

/// Resolve processor feature lists. `$id` imports the set of an earlier processor,
/// `-name` removes `name`.
fn expand_features(records: &[ProcessorRecord]) -> Result<Vec<BTreeSet<String>>, SpecError> {
    let mut resolved: FxHashMap<&str, BTreeSet<String>> = FxHashMap::default();
    let mut sets = Vec::with_capacity(records.len());

    for record in records {
        let mut set = BTreeSet::new();
        let mut removed = Vec::new();
        for feature in record.features.iter() {
            if let Some(import) = feature.strip_prefix('$') {
                let imported = resolved.get(import).ok_or_else(|| SpecError::UnknownFeatureImport {
                    processor: record.id.clone(),
                    import: import.to_string(),
                })?;
                set.extend(imported.iter().cloned());
            }
            else if let Some(name) = feature.strip_prefix('-') {
                removed.push(name.to_string());
            }
            else {
                set.insert(feature.clone());
            }
        }
        for name in removed {
            set.remove(&name);
        }
        resolved.insert(&record.id, set.clone());
        sets.push(set);
    }
    Ok(sets)
}

#[derive(Clone, Debug, Default)]
pub struct ProcessorTable {
    processors: Vec<Processor>,
}

impl ProcessorTable {
    pub fn from_records(records: Vec<ProcessorRecord>, archs: &ArchitectureTable) -> Result<Self, SpecError> {
        let feature_sets = expand_features(&records)?;

        let mut processors = Vec::with_capacity(records.len());
        for (record, features) in records.into_iter().zip(feature_sets) {
            let class = record.class.clone().unwrap_or_else(|| record.id.clone());
            let class_name = archs
                .lookup(&class)
                .map(|id| archs.get(id).display_name().to_string())
                .ok_or_else(|| SpecError::UnknownProcessorClass {
                    processor: record.id.clone(),
                    class: class.clone(),
                })?;

            let signature = parse_number(&record.id, "family", &record.cpu_family, 10)?.map(|family| {
                Ok::<_, SpecError>(cpuid_signature(
                    family,
                    parse_number(&record.id, "model", &record.model, 10)?,
                    parse_number(&record.id, "stepping", &record.stepping, 10)?,
                ))
            });
            let signature = signature.transpose()?;

            processors.push(Processor {
                class_name,
                signature,
                highest_function: parse_number(&record.id, "highest_function", &record.highest_function, 16)?,
                highest_extended_function: parse_number(
                    &record.id,
                    "highest_extended_function",
                    &record.highest_extended_function,
                    16,
                )?,
                description: record.description.unwrap_or_default(),
                id: record.id,
                kind: record.kind,
                variant: record.variant,
                vendor: record.vendor,
                features,
                fpu: record.fpu.into_vec(),
                aliases: record.aliases.into_vec(),
            });
        }
        Ok(Self { processors })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Processor> {
        self.processors.iter()
    }

    pub fn cpus(&self) -> impl Iterator<Item = &Processor> {
        self.processors.iter().filter(|p| p.kind == Family::X86)
    }

    pub fn fpus(&self) -> impl Iterator<Item = &Processor> {
        self.processors.iter().filter(|p| p.kind == Family::X87)
    }

    /// Find an FPU by id or alias.
    pub fn fpu(&self, name: &str) -> Option<&Processor> {
        self.fpus()
            .find(|p| p.aliases.iter().any(|a| a == name))
            .or_else(|| self.fpus().find(|p| p.id == name))
    }

    /// FPU class enumerator names of a CPU, default first.
    pub fn fpu_classes(&self, cpu: &Processor) -> Result<Vec<String>, SpecError> {
        cpu.fpu
            .iter()
            .map(|name| {
                self.fpu(name)
                    .map(|fpu| fpu.class_name.clone())
                    .ok_or_else(|| SpecError::UnknownFpu {
                        processor: cpu.id.clone(),
                        fpu: name.clone(),
                    })
            })
            .collect()
    }
}

/// What a feature contributes to a processor's traits structure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraitBit {
    Cpuid {
        leaf: String,
        /// Register field, lower case.
        register: String,
        name: String,
        bit: u32,
    },
    Flag(String),
}

/// Feature name to trait bits, built from glossary descriptions. Only single CPUID checks
/// written with a bit number and plain trait names contribute.
#[derive(Clone, Debug, Default)]
pub struct CpuidMap {
    entries: IndexMap<String, Vec<TraitBit>>,
}

impl CpuidMap {
    pub fn from_glossary(glossary: &FeatureGlossary) -> Self {
        let mut entries: IndexMap<String, Vec<TraitBit>> = IndexMap::new();
        for (feature, description) in glossary.iter() {
            for part in description.split(',').map(str::trim) {
                let bit = if part.starts_with("CPUID.") {
                    if part.contains('/') || part.contains('|') {
                        continue;
                    }
                    let Some(check) = CpuidCheck::parse(part)
                    else {
                        log::warn!("Feature '{}' has a malformed CPUID check '{}'", feature, part);
                        continue;
                    };
                    let Some(bit) = check.bit()
                    else {
                        continue;
                    };
                    TraitBit::Cpuid {
                        leaf: check.leaf.clone(),
                        register: check.register.to_lowercase(),
                        name: check.label.as_deref().unwrap_or(feature).to_lowercase(),
                        bit,
                    }
                }
                else if part.starts_with("CPU:") || part.starts_with("FPU:") || part == "emulated" {
                    continue;
                }
                else {
                    TraitBit::Flag(part.to_string())
                };
                entries.entry(feature.to_lowercase()).or_default().push(bit);
            }
        }
        Self { entries }
    }

    pub fn get(&self, feature: &str) -> Option<&[TraitBit]> {
        self.entries.get(feature).map(Vec::as_slice)
    }
}

/// The CPUID and trait values of one processor.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CpuidValues {
    /// Leaf field name to register field name to value text, in output order.
    pub leaves: Vec<(String, BTreeMap<String, String>)>,
    pub traits: BTreeSet<String>,
    /// Features of the processor with no CPUID or trait mapping.
    pub unmapped: BTreeSet<String>,
}

impl Processor {
    pub fn cpuid_values(&self, map: &CpuidMap) -> CpuidValues {
        let mut values = CpuidValues::default();
        let mut bits: BTreeMap<(String, String), BTreeSet<(u32, String)>> = BTreeMap::new();

        for feature in &self.features {
            let Some(entries) = map.get(feature)
            else {
                values.unmapped.insert(feature.clone());
                continue;
            };
            for entry in entries {
                match entry {
                    TraitBit::Flag(name) => {
                        values.traits.insert(name.clone());
                    }
                    TraitBit::Cpuid {
                        leaf,
                        register,
                        name,
                        bit,
                    } => {
                        let enumerator = format!("X86_{}_{}_{}", leaf, register, name).to_uppercase();
                        bits.entry((leaf.clone(), register.clone()))
                            .or_default()
                            .insert((*bit, enumerator));
                    }
                }
            }
        }

        for ((leaf, register), set) in bits {
            let text = set.into_iter().map(|(_, name)| name).collect::<Vec<_>>().join(" | ");
            match values.leaves.last_mut() {
                Some((last, registers)) if *last == leaf => {
                    registers.insert(register, text);
                }
                _ => values.leaves.push((leaf, BTreeMap::from([(register, text)]))),
            }
        }

        if let Some(signature) = self.signature {
            let text = format!("0x{:08X}", signature);
            match values.leaves.iter().position(|(leaf, _)| leaf.as_str() >= "cpuid1") {
                Some(idx) if values.leaves[idx].0 == "cpuid1" => {
                    values.leaves[idx].1.insert("eax".to_string(), text);
                }
                Some(idx) => values
                    .leaves
                    .insert(idx, ("cpuid1".to_string(), BTreeMap::from([("eax".to_string(), text)]))),
                None => values
                    .leaves
                    .push(("cpuid1".to_string(), BTreeMap::from([("eax".to_string(), text)]))),
            }
        }

        if let Some(ext) = self.highest_extended_function {
            let text = format!("0x{:08X}", 0x8000_0000u32.wrapping_add(ext));
            match values.leaves.iter_mut().find(|(leaf, _)| leaf == "cpuid_ext0") {
                Some((_, registers)) => {
                    registers.insert("eax".to_string(), text);
                }
                None => values
                    .leaves
                    .push(("cpuid_ext0".to_string(), BTreeMap::from([("eax".to_string(), text)]))),
            }
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        spec_file::parse_yaml_list,
        test_fixtures::{fixture_archs, fixture_glossary, FIXTURE_PROCESSORS},
    };

    fn table() -> ProcessorTable {
        let records = parse_yaml_list(FIXTURE_PROCESSORS, "processors").unwrap();
        ProcessorTable::from_records(records, &fixture_archs()).unwrap()
    }

    fn find<'a>(table: &'a ProcessorTable, id: &str) -> &'a Processor {
        table.iter().find(|p| p.id == id).unwrap()
    }

    #[test]
    fn test_signature() {
        assert_eq!(cpuid_signature(6, Some(0x3A), Some(9)), 0x0003_06A9);
        assert_eq!(cpuid_signature(0x17, Some(0x71), Some(0)), 0x0087_0F10);
        assert_eq!(cpuid_signature(4, None, None), 0x0000_0400);
    }

    #[test]
    fn test_feature_expansion() {
        let table = table();
        let k8 = find(&table, "k8");
        assert!(k8.features.contains("syscall"));
        let k8e = find(&table, "k8e");
        assert!(!k8e.features.contains("syscall"));
        assert!(k8e.features.contains("sse2"));
        assert_eq!(find(&table, "necv20").class_name, "V20");
    }

    #[test]
    fn test_unknown_import() {
        let records = parse_yaml_list("- id: a\n  class: 8086\n  features: $b\n", "processors").unwrap();
        assert!(matches!(
            ProcessorTable::from_records(records, &fixture_archs()),
            Err(SpecError::UnknownFeatureImport { .. })
        ));
    }

    #[test]
    fn test_fpu_lookup() {
        let table = table();
        let i8086 = find(&table, "i8086");
        assert_eq!(table.fpu_classes(i8086).unwrap(), vec!["8087".to_string()]);
        assert_eq!(table.fpus().count(), 1);
        assert_eq!(table.cpus().count(), 4);
    }

    #[test]
    fn test_cpuid_values() {
        let table = table();
        let map = CpuidMap::from_glossary(&fixture_glossary());
        let values = find(&table, "k8").cpuid_values(&map);

        let leaves: Vec<&str> = values.leaves.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(leaves, vec!["cpuid1", "cpuid_ext0"]);
        assert_eq!(values.leaves[0].1["edx"], "X86_CPUID1_EDX_SSE2");
        assert_eq!(values.leaves[0].1["eax"], format!("0x{:08X}", cpuid_signature(15, Some(4), Some(2))));
        assert_eq!(values.leaves[1].1["eax"], "0x80000008");
        assert!(values.traits.contains("amd"));
        // 'syscall' only has alternative checks, 'cpuid' has no glossary entry.
        assert!(values.unmapped.contains("syscall"));
        assert!(values.unmapped.contains("cpuid"));
    }
}
