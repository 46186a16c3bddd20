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

    marty_opgen::instruction.rs

    Instruction forms stored at the leaves of the decode trie, and operand
    token classification with respect to the ModRM byte.

*/

use std::fmt;

use strum_macros::{Display, EnumString};

use crate::{
    arch::{ArchId, IsaSet, ModeFlags},
    error::RowError,
    features::FeatureSet,
    path::{MODFIELD_MEMORY, MODFIELD_REGISTER},
};

/// How an instruction or node uses the ModRM byte.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Display)]
pub enum ModRm {
    /// No ModRM byte.
    #[default]
    Absent,
    /// The ModRM byte is fetched, but the mod field is ignored and no addressing is decoded.
    RegisterOnly,
    /// Register and memory forms are distinguished and memory operands are decoded.
    Full,
    /// An enclosing node already fetches and decodes the ModRM byte.
    Inherited,
}

impl ModRm {
    pub fn is_present(&self) -> bool {
        !matches!(self, ModRm::Absent)
    }
}

/// Classification of an operand token with respect to ModRM decoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OperandClass {
    /// Only valid with a memory form ModRM byte.
    Memory,
    /// A register selected by the r/m field (register form only).
    ModRmRegister,
    /// A register selected by the reg field.
    RegField,
    /// A reg field register for which the mod field is ignored (control/debug/test registers).
    RegisterOnly,
    /// Register or memory, depending on the mod field.
    Dual,
    /// Not encoded in the ModRM byte.
    Fixed,
}

const MEMORY_OPERANDS: &[&str] = &[
    "M", "Mb", "Mw", "Md", "Mz", "Mv", "Ma", "Mp", "M10", "Mq/Mo", "M14/M28", "M94/M108", "mem32real", "mem64real",
    "mem80real", "mem80dec",
];
const MODRM_REGISTER_OPERANDS: &[&str] = &["Rb", "Rw", "Rd", "Rv", "Ry", "ST(i)"];
const REGISTER_ONLY_OPERANDS: &[&str] = &["Cy", "Dy", "Ty"];
const REGFIELD_OPERANDS: &[&str] = &["Gb", "Gw", "Gd", "Gz", "Gv", "Sw"];
const DUAL_OPERANDS: &[&str] = &["E", "Eb", "Ew", "Ed", "Ez", "Ev", "Mw/Rv"];

pub fn classify_operand(token: &str) -> OperandClass {
    if MEMORY_OPERANDS.contains(&token) {
        OperandClass::Memory
    }
    else if MODRM_REGISTER_OPERANDS.contains(&token) {
        OperandClass::ModRmRegister
    }
    else if REGISTER_ONLY_OPERANDS.contains(&token) {
        OperandClass::RegisterOnly
    }
    else if REGFIELD_OPERANDS.contains(&token) {
        OperandClass::RegField
    }
    else if DUAL_OPERANDS.contains(&token) {
        OperandClass::Dual
    }
    else {
        OperandClass::Fixed
    }
}

/// Register form of a dual-purpose operand.
fn register_form(token: &str) -> String {
    if let Some((_, reg)) = token.split_once('/') {
        reg.to_string()
    }
    else if token == "E" {
        "Rb".to_string()
    }
    else {
        format!("R{}", &token[1..])
    }
}

/// Memory form of a dual-purpose operand.
fn memory_form(token: &str) -> String {
    if let Some((mem, _)) = token.split_once('/') {
        mem.to_string()
    }
    else {
        format!("M{}", &token[1..])
    }
}

/// The operand lists for the memory and register forms. A form is `None` if an operand
/// cannot appear in it.
fn modfield_readings(operands: &[String]) -> (Option<Vec<String>>, Option<Vec<String>>) {
    let mut memory = Some(Vec::with_capacity(operands.len()));
    let mut register = Some(Vec::with_capacity(operands.len()));

    for op in operands {
        match classify_operand(op) {
            OperandClass::ModRmRegister => {
                memory = None;
                if let Some(r) = register.as_mut() {
                    r.push(op.clone());
                }
            }
            OperandClass::Memory => {
                register = None;
                if let Some(m) = memory.as_mut() {
                    m.push(op.clone());
                }
            }
            OperandClass::Dual => {
                if let Some(r) = register.as_mut() {
                    r.push(register_form(op));
                }
                if let Some(m) = memory.as_mut() {
                    m.push(memory_form(op));
                }
            }
            _ => {
                if let Some(r) = register.as_mut() {
                    r.push(op.clone());
                }
                if let Some(m) = memory.as_mut() {
                    m.push(op.clone());
                }
            }
        }
    }
    (memory, register)
}

/// If the operands only admit one ModRM form, the mode-field slot of that form.
/// Operands selecting more than one ModRM operand are rejected.
pub fn exclusive_modfield(operands: &[String]) -> Result<Option<u8>, RowError> {
    let mut exclusive: Option<OperandClass> = None;
    for op in operands {
        let class = classify_operand(op);
        if matches!(class, OperandClass::Memory | OperandClass::ModRmRegister | OperandClass::Dual) {
            if exclusive.is_some() {
                return Err(RowError::ConflictingModRmOperands(operands.to_vec()));
            }
            exclusive = Some(class);
        }
    }
    Ok(match exclusive {
        Some(OperandClass::Memory) => Some(MODFIELD_MEMORY),
        Some(OperandClass::ModRmRegister) => Some(MODFIELD_REGISTER),
        _ => None,
    })
}

/// An alternate assembler syntax.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString)]
pub enum SyntaxKind {
    #[strum(serialize = "nec")]
    Nec,
    #[strum(serialize = "intel")]
    Intel,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Syntax {
    pub mnemonic: String,
    pub operands: Vec<String>,
}

impl Syntax {
    pub fn new(mnemonic: &str, operands: &[&str]) -> Self {
        Self {
            mnemonic: mnemonic.to_string(),
            operands: operands.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            write!(f, "{}", self.mnemonic)
        }
        else {
            write!(f, "{} {}", self.mnemonic, self.operands.join(", "))
        }
    }
}

/// Index registers for prefixed 8-bit forms.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexRegister {
    Ix,
    Iy,
}

impl IndexRegister {
    pub fn prefix_byte(&self) -> u8 {
        match self {
            IndexRegister::Ix => 0xDD,
            IndexRegister::Iy => 0xFD,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            IndexRegister::Ix => "IX",
            IndexRegister::Iy => "IY",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Instruction {
    pub syntax: Syntax,
    pub alternates: Vec<(SyntaxKind, Syntax)>,
    pub cpus: IsaSet,
    pub features: FeatureSet,
    pub flags: ModeFlags,
    pub modrm: ModRm,
}

impl Instruction {
    pub fn new(syntax: Syntax) -> Self {
        Self {
            syntax,
            ..Default::default()
        }
    }

    pub fn mnemonic(&self) -> &str {
        &self.syntax.mnemonic
    }

    pub fn operands(&self) -> &[String] {
        &self.syntax.operands
    }

    pub fn alternate(&self, kind: SyntaxKind) -> Option<&Syntax> {
        self.alternates.iter().find(|(k, _)| *k == kind).map(|(_, s)| s)
    }

    /// Prefix pseudo-instructions ("ES:", "REX:") modify the parser state and restart decoding.
    pub fn is_prefix(&self) -> bool {
        self.syntax.mnemonic.ends_with(':')
    }

    /// Whether the instruction takes a ModRM byte, recording how it is used.
    pub fn requires_modrm(&mut self) -> bool {
        if self.modrm.is_present() {
            return true;
        }
        let classes: Vec<OperandClass> = self.syntax.operands.iter().map(|op| classify_operand(op)).collect();
        if classes.contains(&OperandClass::RegisterOnly) {
            self.modrm = ModRm::RegisterOnly;
            return true;
        }
        if classes
            .iter()
            .any(|c| matches!(c, OperandClass::Memory | OperandClass::Dual | OperandClass::ModRmRegister))
        {
            self.modrm = ModRm::Full;
            return true;
        }
        false
    }

    /// Split into memory form and register form siblings, indexed by mode-field slot.
    /// If both forms have the same operands, both slots hold the unchanged instruction.
    pub fn split_by_modfield(&self) -> Result<[Option<Instruction>; 2], RowError> {
        let (memory, register) = modfield_readings(&self.syntax.operands);
        if memory == register {
            return Ok([Some(self.clone()), Some(self.clone())]);
        }

        let mut alt_readings = Vec::with_capacity(self.alternates.len());
        for (kind, alt) in &self.alternates {
            if alt.operands.len() != self.syntax.operands.len() {
                return Err(RowError::AlternateArity {
                    syntax: kind.to_string(),
                    expected: self.syntax.operands.len(),
                    found: alt.operands.len(),
                });
            }
            alt_readings.push((*kind, alt, modfield_readings(&alt.operands)));
        }

        let make_form = |operands: Option<Vec<String>>, want_memory: bool| -> Result<Option<Instruction>, RowError> {
            let Some(operands) = operands
            else {
                return Ok(None);
            };
            let mut form = self.clone();
            form.syntax.operands = operands;
            form.alternates.clear();
            for (kind, alt, (alt_mem, alt_reg)) in &alt_readings {
                let reading = if want_memory { alt_mem } else { alt_reg };
                let operands = reading.clone().ok_or_else(|| RowError::UnresolvedAlternate {
                    syntax: kind.to_string(),
                    reading: if want_memory { "memory" } else { "register" },
                })?;
                form.alternates.push((
                    *kind,
                    Syntax {
                        mnemonic: alt.mnemonic.clone(),
                        operands,
                    },
                ));
            }
            Ok(Some(form))
        };

        Ok([make_form(memory, true)?, make_form(register, false)?])
    }

    /// Clone an 8-bit form for an index register prefix (DD/FD). Indirect HL addressing
    /// becomes indexed addressing with a displacement, and H/L/HL become the index register
    /// halves. The CB group gains a trailing indexed operand.
    pub fn indexed_variant(&self, index: IndexRegister, arch: ArchId) -> Instruction {
        let name = index.name();
        let ops = &self.syntax.operands;
        let has = |t: &str| ops.iter().any(|o| o == t);
        let indexed = format!("({}+Ib)", name);

        let mut variant = self.clone();
        if has("(HL)") {
            variant.syntax.operands = ops
                .iter()
                .map(|o| if o == "(HL)" { indexed.clone() } else { o.clone() })
                .collect();
        }
        else if has("H")
            || has("L")
            || (has("HL") && !(self.syntax.mnemonic == "EX" && ops.len() == 2 && ops[0] == "DE" && ops[1] == "HL"))
        {
            variant.syntax.operands = ops
                .iter()
                .map(|o| match o.as_str() {
                    "H" => format!("{}H", name),
                    "L" => format!("{}L", name),
                    "HL" => name.to_string(),
                    _ => o.clone(),
                })
                .collect();
        }
        else if self.syntax.mnemonic == "bits" {
            variant.syntax.operands.push(indexed);
        }

        variant.alternates.retain(|(kind, _)| *kind != SyntaxKind::Intel);
        variant.cpus = IsaSet::from([arch]);
        variant
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.syntax)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ins(mnemonic: &str, operands: &[&str]) -> Instruction {
        Instruction::new(Syntax::new(mnemonic, operands))
    }

    #[test]
    fn test_requires_modrm() {
        let mut mov_cr = ins("MOV", &["Rd", "Cy"]);
        assert!(mov_cr.requires_modrm());
        assert_eq!(mov_cr.modrm, ModRm::RegisterOnly);

        let mut add = ins("ADD", &["Eb", "Gb"]);
        assert!(add.requires_modrm());
        assert_eq!(add.modrm, ModRm::Full);

        let mut push = ins("PUSH", &["Sw"]);
        assert!(!push.requires_modrm());
        assert_eq!(push.modrm, ModRm::Absent);

        let mut explicit = ins("NOP", &[]);
        explicit.modrm = ModRm::Full;
        assert!(explicit.requires_modrm());
    }

    #[test]
    fn test_split_without_dual_operands() {
        let ins = ins("MOV", &["Gb", "Ib"]);
        let [m, r] = ins.split_by_modfield().unwrap();
        assert_eq!(m.as_ref(), Some(&ins));
        assert_eq!(r.as_ref(), Some(&ins));
    }

    #[test]
    fn test_split_dual_operand() {
        let mut mov = ins("MOV", &["Ev", "Gv"]);
        mov.alternates.push((SyntaxKind::Nec, Syntax::new("MOV", &["Ev", "Gv"])));
        let [m, r] = mov.split_by_modfield().unwrap();
        let m = m.unwrap();
        let r = r.unwrap();
        assert_eq!(m.operands(), &["Mv".to_string(), "Gv".to_string()]);
        assert_eq!(r.operands(), &["Rv".to_string(), "Gv".to_string()]);
        assert_eq!(r.alternate(SyntaxKind::Nec).unwrap().operands[0], "Rv");

        let [m, r] = ins("SMSW", &["Mw/Rv"]).split_by_modfield().unwrap();
        assert_eq!(m.unwrap().operands()[0], "Mw");
        assert_eq!(r.unwrap().operands()[0], "Rv");

        let [_, r] = ins("TEST", &["E"]).split_by_modfield().unwrap();
        assert_eq!(r.unwrap().operands()[0], "Rb");
    }

    #[test]
    fn test_split_exclusive_operand() {
        let [m, r] = ins("LEA", &["Gv", "M"]).split_by_modfield().unwrap();
        assert!(m.is_some());
        assert!(r.is_none());

        let [m, r] = ins("FADD", &["ST", "ST(i)"]).split_by_modfield().unwrap();
        assert!(m.is_none());
        assert!(r.is_some());
    }

    #[test]
    fn test_split_alternate_arity_mismatch() {
        let mut ins = ins("MOV", &["Ev", "Gv"]);
        ins.alternates.push((SyntaxKind::Nec, Syntax::new("MOV", &["Ev"])));
        assert_eq!(
            ins.split_by_modfield(),
            Err(RowError::AlternateArity {
                syntax: "nec".to_string(),
                expected: 2,
                found: 1
            })
        );
    }

    #[test]
    fn test_exclusive_modfield() {
        let ops = |o: &[&str]| o.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(exclusive_modfield(&ops(&["Gv", "M"])), Ok(Some(MODFIELD_MEMORY)));
        assert_eq!(exclusive_modfield(&ops(&["Rd", "Cy"])), Ok(Some(MODFIELD_REGISTER)));
        assert_eq!(exclusive_modfield(&ops(&["Eb", "Gb"])), Ok(None));
        assert!(exclusive_modfield(&ops(&["Eb", "M"])).is_err());
    }

    #[test]
    fn test_indexed_variants() {
        let arch = ArchId(9);
        let mut ld = ins("LD", &["A", "(HL)"]);
        ld.alternates.push((SyntaxKind::Intel, Syntax::new("MOV", &["A", "M"])));
        let v = ld.indexed_variant(IndexRegister::Ix, arch);
        assert_eq!(v.operands(), &["A".to_string(), "(IX+Ib)".to_string()]);
        assert!(v.alternate(SyntaxKind::Intel).is_none());
        assert_eq!(v.cpus, IsaSet::from([arch]));

        let v = ins("INC", &["HL"]).indexed_variant(IndexRegister::Iy, arch);
        assert_eq!(v.operands(), &["IY".to_string()]);
        let v = ins("LD", &["H", "L"]).indexed_variant(IndexRegister::Ix, arch);
        assert_eq!(v.operands(), &["IXH".to_string(), "IXL".to_string()]);

        let ex = ins("EX", &["DE", "HL"]);
        assert_eq!(ex.indexed_variant(IndexRegister::Ix, arch).operands(), ex.operands());

        let v = ins("bits", &[]).indexed_variant(IndexRegister::Iy, arch);
        assert_eq!(v.operands(), &["(IY+Ib)".to_string()]);
    }
}
