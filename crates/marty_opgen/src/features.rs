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

    marty_opgen::features.rs

    Feature predicates. A row may be gated on features ("feature: sse2,!amd")
    which are described in the @features glossary. The glossary description
    determines how the predicate is tested at decode time.

*/

use std::fmt;

use indexmap::{IndexMap, IndexSet};

use crate::{error::SpecError, error::SynthError, path::Path};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FeatureTerm {
    Present(String),
    Absent(String),
}

impl FeatureTerm {
    pub fn name(&self) -> &str {
        match self {
            FeatureTerm::Present(name) | FeatureTerm::Absent(name) => name,
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, FeatureTerm::Present(_))
    }
}

impl fmt::Display for FeatureTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureTerm::Present(name) => write!(f, "{}", name),
            FeatureTerm::Absent(name) => write!(f, "!{}", name),
        }
    }
}

/// An ordered set of feature terms. Order is the order written in the row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FeatureSet(IndexSet<FeatureTerm>);

impl FeatureSet {
    pub fn new() -> Self {
        Self(IndexSet::new())
    }

    /// Parse a `feature:` column. Names missing from the glossary are dropped and returned.
    pub fn parse(text: &str, glossary: &FeatureGlossary) -> (Self, Vec<String>) {
        let mut set = FeatureSet::new();
        let mut unknown = Vec::new();
        for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let term = match token.strip_prefix('!') {
                Some(name) => FeatureTerm::Absent(name.to_string()),
                None => FeatureTerm::Present(token.to_string()),
            };
            if !glossary.contains(term.name()) {
                unknown.push(term.name().to_string());
                continue;
            }
            set.insert(term);
        }
        (set, unknown)
    }

    pub fn insert(&mut self, term: FeatureTerm) -> bool {
        self.0.insert(term)
    }

    pub fn contains(&self, term: &FeatureTerm) -> bool {
        self.0.contains(term)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureTerm> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Terms present in both sets, in the order of `self`.
    pub fn intersect(&self, other: &FeatureSet) -> FeatureSet {
        FeatureSet(self.0.iter().filter(|t| other.0.contains(*t)).cloned().collect())
    }

    /// The feature that selects a decision cell.
    pub fn first_positive(&self) -> Option<&str> {
        self.0.iter().find(|t| t.is_positive()).map(|t| t.name())
    }

    pub fn positives(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter(|t| t.is_positive()).map(|t| t.name())
    }

    pub fn negatives(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter(|t| !t.is_positive()).map(|t| t.name())
    }
}

impl FromIterator<FeatureTerm> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = FeatureTerm>>(iter: I) -> Self {
        FeatureSet(iter.into_iter().collect())
    }
}

/// One `CPUID.EAX=nnnnnnnn[.ECX=nn]:REG.FLAG` check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuidCheck {
    /// Leaf field name in the traits structure, e.g. `cpuid1`, `cpuid7_0` or `cpuid_ext1`.
    pub leaf:     String,
    /// Register name, upper case.
    pub register: String,
    /// Flag token following the register. May be a decimal bit number.
    pub flag:     String,
    /// A quoted name following the check.
    pub label:    Option<String>,
}

impl CpuidCheck {
    pub fn parse(part: &str) -> Option<CpuidCheck> {
        let body = part.trim().strip_prefix("CPUID.")?;
        let (setup, check) = body.split_once(':')?;

        let mut eax = None;
        let mut ecx = None;
        for portion in setup.split('.') {
            if let Some(v) = portion.strip_prefix("EAX=") {
                if eax.is_some() {
                    return None;
                }
                eax = Some(u32::from_str_radix(v, 16).ok()?);
            }
            else if let Some(v) = portion.strip_prefix("ECX=") {
                if ecx.is_some() {
                    return None;
                }
                ecx = Some(u32::from_str_radix(v, 16).ok()?);
            }
            else {
                return None;
            }
        }
        let eax = eax?;
        let mut leaf = if eax >= 0x8000_0000 {
            format!("cpuid_ext{}", eax - 0x8000_0000)
        }
        else {
            format!("cpuid{}", eax)
        };
        if let Some(ecx) = ecx {
            leaf.push_str(&format!("_{}", ecx));
        }

        let (check, label) = match check.find('"') {
            Some(q) => {
                let rest = &check[q + 1..];
                let label = rest.split('"').next().unwrap_or("").trim().to_string();
                (check[..q].trim(), Some(label))
            }
            None => (check.trim(), None),
        };
        let (register, flag) = check.split_once('.')?;
        if !matches!(register, "EAX" | "EBX" | "ECX" | "EDX") {
            return None;
        }

        Some(CpuidCheck {
            leaf,
            register: register.to_string(),
            flag: flag.trim().to_string(),
            label,
        })
    }

    /// The bit number, if the flag is written as one.
    pub fn bit(&self) -> Option<u32> {
        self.flag.parse::<u32>().ok()
    }
}

/// How a feature is tested at decode time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeatureTest {
    CpuSubtype { class: String, flag: String },
    FpuSubtype { class: String, flag: String },
    /// Outer list selects by operation size (16/32-bit, then 64-bit); inner list holds alternatives.
    Cpuid(Vec<Vec<CpuidCheck>>),
    Emulated,
    Trait(String),
}

impl FeatureTest {
    pub fn parse(feature: &str, description: &str) -> Result<FeatureTest, SynthError> {
        let bad = || SynthError::BadFeatureDescription {
            feature: feature.to_string(),
            description: description.to_string(),
        };

        // Only the first comma separated part is the decode-time condition.
        let description = description.split(',').next().unwrap_or("").trim();

        if let Some(rest) = description.strip_prefix("CPU:") {
            let (class, flag) = rest.split_once('/').ok_or_else(bad)?;
            Ok(FeatureTest::CpuSubtype {
                class: class.to_string(),
                flag:  flag.to_string(),
            })
        }
        else if let Some(rest) = description.strip_prefix("FPU:") {
            let (class, flag) = rest.split_once('/').ok_or_else(bad)?;
            Ok(FeatureTest::FpuSubtype {
                class: class.to_string(),
                flag:  flag.to_string(),
            })
        }
        else if description.starts_with("CPUID.") {
            let mut sizes = Vec::new();
            for size in description.split('/') {
                let mut options = Vec::new();
                for option in size.split('|') {
                    options.push(CpuidCheck::parse(option).ok_or_else(bad)?);
                }
                sizes.push(options);
            }
            Ok(FeatureTest::Cpuid(sizes))
        }
        else if description == "emulated" {
            Ok(FeatureTest::Emulated)
        }
        else if description.is_empty() {
            Err(bad())
        }
        else {
            Ok(FeatureTest::Trait(description.to_string()))
        }
    }

    /// Render the test as a C expression.
    pub fn render(&self, feature: &str, negated: bool) -> String {
        let eq = if negated { "!=" } else { "==" };
        match self {
            FeatureTest::CpuSubtype { class, flag } => {
                format!("prs->cpu_traits.cpu_subtype {} X86_CPU_{}_{}", eq, class, flag)
            }
            FeatureTest::FpuSubtype { class, flag } => {
                format!("prs->fpu_subtype {} X87_FPU_{}_{}", eq, class, flag)
            }
            FeatureTest::Cpuid(sizes) => {
                let mut clause: Option<String> = None;
                for options in sizes {
                    let rendered: Vec<String> = options
                        .iter()
                        .map(|check| {
                            // Bit numbers are named after the feature, matching the model tables.
                            let flag = match check.bit() {
                                Some(_) => check.label.as_deref().unwrap_or(feature).to_uppercase(),
                                None => check.flag.clone(),
                            };
                            format!(
                                "(prs->cpu_traits.{}.{} & X86_{}_{}_{}) != 0",
                                check.leaf,
                                check.register.to_lowercase(),
                                check.leaf.to_uppercase(),
                                check.register,
                                flag
                            )
                        })
                        .collect();
                    let part = if rendered.len() > 1 {
                        let joined = format!("({})", rendered.join(" || "));
                        if negated {
                            format!("!{}", joined)
                        }
                        else {
                            joined
                        }
                    }
                    else if negated {
                        format!("!({})", rendered.join(""))
                    }
                    else {
                        rendered.join("")
                    };
                    clause = Some(match clause {
                        None => part,
                        Some(prev) => format!("(prs->operation_size != SIZE_64BIT ? {} : {})", prev, part),
                    });
                }
                clause.unwrap_or_default()
            }
            FeatureTest::Emulated => format!("prs->cpu_method {} X80_CPUMETHOD_EMULATED", eq),
            FeatureTest::Trait(name) => {
                format!("{}prs->cpu_traits.{}", if negated { "!" } else { "" }, name)
            }
        }
    }
}

/// The `@features` section: feature name to description.
#[derive(Clone, Debug, Default)]
pub struct FeatureGlossary {
    entries: IndexMap<String, String>,
}

impl FeatureGlossary {
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let mut entries = IndexMap::new();
        for (idx, line) in text.lines().enumerate() {
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (name, description) = line.split_once('\t').ok_or_else(|| SpecError::FeatureLine {
                line: idx + 1,
                text: line.to_string(),
            })?;
            entries.insert(name.trim().to_string(), description.trim().to_string());
        }
        Ok(Self { entries })
    }

    pub fn insert(&mut self, name: &str, description: &str) {
        self.entries.insert(name.to_string(), description.to_string());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn description(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn test(&self, name: &str) -> Result<FeatureTest, SynthError> {
        let description = self
            .description(name)
            .ok_or_else(|| SynthError::UnknownFeature(name.to_string()))?;
        FeatureTest::parse(name, description)
    }

    /// Render a feature term as a C expression.
    pub fn render(&self, term: &FeatureTerm) -> Result<String, SynthError> {
        Ok(self.test(term.name())?.render(term.name(), !term.is_positive()))
    }
}

/// Orders the cell features of one slot so that a feature tested negatively by a cell
/// is decided before that cell. `None` stands for cells without a positive feature.
#[derive(Clone, Debug, Default)]
pub struct FeatureOrder {
    order: Vec<Option<String>>,
    after: IndexMap<Option<String>, IndexSet<String>>,
}

impl FeatureOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cell gated on `positive` with `negatives` excluded.
    pub fn observe<'a>(
        &mut self,
        positive: Option<&str>,
        negatives: impl Iterator<Item = &'a str>,
        path: &Path,
    ) -> Result<(), SynthError> {
        let key = positive.map(String::from);
        let deps = self.after.entry(key.clone()).or_default();
        for n in negatives {
            if Some(n) != positive {
                deps.insert(n.to_string());
            }
        }

        if !self.order.contains(&key) {
            self.order.push(key);
        }
        self.settle(path)
    }

    fn position(&self, feature: &str) -> Option<usize> {
        self.order.iter().position(|f| f.as_deref() == Some(feature))
    }

    /// Promote entries after their dependencies until the order is consistent.
    fn settle(&mut self, path: &Path) -> Result<(), SynthError> {
        let limit = self.order.len() * self.order.len() + 1;
        for _ in 0..limit {
            let violation = self.order.iter().enumerate().find_map(|(idx, key)| {
                self.after.get(key).and_then(|deps| {
                    deps.iter()
                        .any(|d| self.position(d).map_or(false, |dix| dix > idx))
                        .then_some(idx)
                })
            });
            match violation {
                Some(idx) => {
                    let key = self.order.remove(idx);
                    self.order.push(key);
                }
                None => return Ok(()),
            }
        }
        let feature = self.order.last().cloned().flatten().unwrap_or_default();
        Err(SynthError::FeatureCycle {
            path: path.to_string(),
            feature,
        })
    }

    pub fn order(&self) -> &[Option<String>] {
        &self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::fixture_glossary;

    fn names(order: &FeatureOrder) -> Vec<String> {
        order
            .order()
            .iter()
            .map(|f| f.clone().unwrap_or_else(|| "-".to_string()))
            .collect()
    }

    #[test]
    fn test_parse_feature_column() {
        let glossary = fixture_glossary();
        let (set, unknown) = FeatureSet::parse("sse2,!amd, bogus", &glossary);
        assert_eq!(unknown, vec!["bogus".to_string()]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.first_positive(), Some("sse2"));
        assert_eq!(set.negatives().collect::<Vec<_>>(), vec!["amd"]);
    }

    #[test]
    fn test_intersection_keeps_order() {
        let a: FeatureSet = [FeatureTerm::Present("b".into()), FeatureTerm::Absent("a".into())]
            .into_iter()
            .collect();
        let b: FeatureSet = [FeatureTerm::Absent("a".into()), FeatureTerm::Present("c".into())]
            .into_iter()
            .collect();
        let i = a.intersect(&b);
        assert_eq!(i.iter().collect::<Vec<_>>(), vec![&FeatureTerm::Absent("a".into())]);
    }

    #[test]
    fn test_render_tests() {
        let glossary = fixture_glossary();
        assert_eq!(
            glossary.render(&FeatureTerm::Present("sse2".into())).unwrap(),
            "(prs->cpu_traits.cpuid1.edx & X86_CPUID1_EDX_SSE2) != 0"
        );
        assert_eq!(
            glossary.render(&FeatureTerm::Absent("sse2".into())).unwrap(),
            "!((prs->cpu_traits.cpuid1.edx & X86_CPUID1_EDX_SSE2) != 0)"
        );
        assert_eq!(
            glossary.render(&FeatureTerm::Present("nec".into())).unwrap(),
            "prs->cpu_traits.cpu_subtype == X86_CPU_186_V20"
        );
        assert_eq!(
            glossary.render(&FeatureTerm::Absent("amd".into())).unwrap(),
            "!prs->cpu_traits.amd"
        );
        assert_eq!(
            glossary.render(&FeatureTerm::Present("emu".into())).unwrap(),
            "prs->cpu_method == X80_CPUMETHOD_EMULATED"
        );
        assert_eq!(
            glossary.render(&FeatureTerm::Present("cx8".into())).unwrap(),
            "(prs->operation_size != SIZE_64BIT ? (prs->cpu_traits.cpuid1.edx & X86_CPUID1_EDX_CX8) != 0 : \
             (prs->cpu_traits.cpuid1.ecx & X86_CPUID1_ECX_CX16) != 0)"
        );
        assert_eq!(
            glossary.render(&FeatureTerm::Present("syscall".into())).unwrap(),
            "((prs->cpu_traits.cpuid_ext1.edx & X86_CPUID_EXT1_EDX_SYSCALL_K6) != 0 || \
             (prs->cpu_traits.cpuid_ext1.edx & X86_CPUID_EXT1_EDX_SYSCALL) != 0)"
        );
        assert!(matches!(
            glossary.render(&FeatureTerm::Present("nope".into())),
            Err(SynthError::UnknownFeature(_))
        ));
    }

    #[test]
    fn test_cpuid_check_parse() {
        let check = CpuidCheck::parse("CPUID.EAX=00000007.ECX=00000000:EBX.0 \"fsgsbase\"").unwrap();
        assert_eq!(check.leaf, "cpuid7_0");
        assert_eq!(check.register, "EBX");
        assert_eq!(check.bit(), Some(0));
        assert_eq!(check.label.as_deref(), Some("fsgsbase"));
        assert!(CpuidCheck::parse("CPUID.EBX=1:EDX.X").is_none());
    }

    #[test]
    fn test_feature_order_dependencies() {
        let path = Path::new();
        let mut order = FeatureOrder::new();
        order.observe(Some("a"), ["b"].into_iter(), &path).unwrap();
        order.observe(Some("b"), std::iter::empty(), &path).unwrap();
        assert_eq!(names(&order), vec!["b", "a"]);

        // Re-observing "a" with another dependency does not duplicate it.
        order.observe(Some("a"), ["c"].into_iter(), &path).unwrap();
        order.observe(Some("c"), std::iter::empty(), &path).unwrap();
        assert_eq!(names(&order), vec!["b", "c", "a"]);

        order.observe(None, ["a"].into_iter(), &path).unwrap();
        assert_eq!(names(&order), vec!["b", "c", "a", "-"]);
    }

    #[test]
    fn test_feature_order_cycle() {
        let path = Path::new();
        let mut order = FeatureOrder::new();
        order.observe(Some("a"), ["b"].into_iter(), &path).unwrap();
        let result = order.observe(Some("b"), ["a"].into_iter(), &path);
        assert!(matches!(result, Err(SynthError::FeatureCycle { .. })));
    }
}
