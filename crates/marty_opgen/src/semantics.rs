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

    marty_opgen::semantics.rs

    Selection and expansion of @instruction semantics blocks.

*/

use std::collections::BTreeSet;

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    arch::Family,
    operands::{OperandSize, OperandTemplate},
    spec_file::SemanticsBlock,
    synth::ModRmForm,
};

/// Mnemonic prefixes that share one semantics block per condition code family.
const CONDITION_FAMILIES: &[(&str, &str)] = &[
    ("J", "Jcc"),
    ("CMOV", "CMOVcc"),
    ("SET", "SETcc"),
    ("LOOP", "LOOPcc"),
    ("FCMOV", "FCMOVcc"),
];

/// Far pointer loads, implemented as a three operand MOV into the segment register.
const FAR_LOADS: &[&str] = &["LDS", "LES", "LFS", "LGS", "LSS"];

const Z80_BYTE_OPERANDS: &[&str] = &[
    "a", "b", "c", "d", "e", "h", "l", "(hl)", "ixh", "ixl", "(ix+ib)", "iyh", "iyl", "(iy+ib)", "i", "r",
];
const Z80_WORD_OPERANDS: &[&str] = &["bc", "de", "hl", "sp", "ix", "iy"];

/// The instruction a semantics block is selected for.
#[derive(Clone, Debug)]
pub struct Query<'q> {
    pub family: Family,
    pub mnemonic: &'q str,
    pub operands: &'q [String],
    pub size: Option<OperandSize>,
    pub form: Option<ModRmForm>,
}

/// How a mnemonic maps onto a semantics block name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub name: String,
    /// Condition code of a `cc` family member.
    pub condition: Option<String>,
    /// Segment register operand prepended to a far pointer load.
    pub segment: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Selection<'s> {
    Block {
        block: &'s SemanticsBlock,
        resolved: Resolved,
    },
    /// Blocks exist for the name, but none of their qualifiers match.
    MissingConditions,
    MissingInstruction,
}

#[derive(Clone, Debug, Default)]
pub struct SemanticsTable {
    blocks: IndexMap<String, Vec<SemanticsBlock>>,
}

impl SemanticsTable {
    pub fn new(blocks: IndexMap<String, Vec<SemanticsBlock>>) -> Self {
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    /// Map an x86 or x87 mnemonic to the name of its semantics blocks.
    pub fn resolve(&self, mnemonic: &str) -> Resolved {
        let base = match mnemonic.strip_suffix(&['b', 'z', 'v'][..]) {
            Some(stripped) if !stripped.is_empty() => stripped,
            _ => mnemonic,
        };

        if !self.contains(base) {
            for (prefix, family) in CONDITION_FAMILIES {
                if base.starts_with(prefix) && base.len() > prefix.len() {
                    return Resolved {
                        name: family.to_string(),
                        condition: Some(base[prefix.len()..].to_string()),
                        segment: None,
                    };
                }
            }
        }
        if FAR_LOADS.contains(&base) {
            return Resolved {
                name: "MOV".to_string(),
                condition: None,
                segment: Some(base[1..].to_string()),
            };
        }
        Resolved {
            name: base.to_string(),
            condition: None,
            segment: None,
        }
    }

    /// Find the first block whose qualifiers accept the instruction.
    pub fn select(&self, query: &Query<'_>) -> Selection<'_> {
        let resolved = match query.family {
            Family::X80 => Resolved {
                name: format!("Z80.{}", query.mnemonic),
                condition: None,
                segment: None,
            },
            _ => self.resolve(query.mnemonic),
        };
        let Some(blocks) = self.blocks.get(&resolved.name)
        else {
            return Selection::MissingInstruction;
        };

        let count = query.operands.len() + usize::from(resolved.segment.is_some());
        for block in blocks {
            if block.qualifiers.is_empty()
                || block
                    .qualifiers
                    .iter()
                    .any(|part| part.split(' ').all(|term| term_holds(term, query, count)))
            {
                return Selection::Block { block, resolved };
            }
        }
        Selection::MissingConditions
    }
}

fn term_holds(term: &str, query: &Query<'_>, count: usize) -> bool {
    let operand = |idx: usize| query.operands.get(idx).map(|o| o.to_lowercase());

    if let Some(size) = term.strip_prefix("op=") {
        if query.family == Family::X80 {
            let Some(first) = operand(0)
            else {
                return false;
            };
            return match size {
                "b" => Z80_BYTE_OPERANDS.contains(&first.as_str()),
                "w" => Z80_WORD_OPERANDS.contains(&first.as_str()),
                _ => true,
            };
        }
        return query.size.map(|s| s.letter().to_string()).as_deref() == Some(size);
    }
    if let Some(form) = term.strip_prefix("mod=") {
        return match query.form {
            Some(ModRmForm::Memory) => form == "m",
            Some(ModRmForm::Register) => form == "r",
            None => false,
        };
    }
    if let Some(n) = term.strip_prefix("cnt=") {
        return n.parse::<usize>().map(|n| n == count).unwrap_or(false);
    }
    if let Some(name) = term.strip_prefix("op0=") {
        return operand(0).as_deref() == Some(name);
    }
    if let Some(name) = term.strip_prefix("op1=") {
        return operand(1).as_deref() == Some(name);
    }
    log::warn!("{}: unknown semantics qualifier '{}'", query.mnemonic, term);
    false
}

/// Placeholder names (`$` followed by alphanumerics) used by a block body.
pub fn params(code: &str) -> BTreeSet<String> {
    lazy_static! {
        static ref PARAM_REX: Regex = Regex::new(r"\$[A-Za-z0-9]*").unwrap();
    }
    PARAM_REX.find_iter(code).map(|m| m.as_str().to_string()).collect()
}

/// The operator of an assignment at the start of `text`, and its length.
fn assignment(text: &str) -> Option<(Option<&str>, usize)> {
    let b = text.as_bytes();
    match b {
        [b'=', b'=', ..] => None,
        [b'=', ..] => Some((None, 1)),
        [op, b'=', ..] if b"%^&*-+|/".contains(op) => Some((Some(&text[..1]), 2)),
        [x, y, b'=', ..] if (*x == b'<' || *x == b'>') && x == y => Some((Some(&text[..2]), 3)),
        _ => None,
    }
}

/// Rewrite assignments `target op= rhs;` using the write template of `target`.
/// Compound assignments read the target through `read`.
fn replace_assignments(code: &str, target: &str, write: &str, read: Option<&str>) -> String {
    let mut out = String::with_capacity(code.len());
    let mut rest = code;
    while let Some(at) = rest.find(target) {
        let after = &rest[at + target.len()..];
        let trimmed = after.trim_start();
        let Some((operator, len)) = assignment(trimmed)
        else {
            out.push_str(&rest[..at + target.len()]);
            rest = after;
            continue;
        };
        let rhs_text = &trimmed[len..];
        let end = rhs_text.find(';').unwrap_or(rhs_text.len());
        let rhs = rhs_text[..end].trim();
        let value = match operator {
            None => rhs.to_string(),
            Some(op) => format!("{} {} ({})", read.unwrap_or("0/*TODO*/"), op, rhs),
        };
        out.push_str(&rest[..at]);
        out.push_str(&write.replace("$$", &value));
        rest = &rhs_text[end..];
    }
    out.push_str(rest);
    out
}

/// Apply placeholder replacements, longest placeholder first. Keys ending in `=`
/// rewrite assignments to the placeholder.
pub fn replace(code: &str, replacements: &IndexMap<String, String>) -> String {
    let mut keys: Vec<&String> = replacements.keys().collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()));

    let mut code = code.to_string();
    for key in keys {
        let value = &replacements[key];
        code = match key.strip_suffix('=') {
            Some(target) => replace_assignments(&code, target, value, replacements.get(target).map(String::as_str)),
            None => code.replace(key.as_str(), value),
        };
    }
    code
}

const GENERAL_REGISTERS: [(&str, &str); 8] = [
    ("a", "AX"),
    ("c", "CX"),
    ("d", "DX"),
    ("b", "BX"),
    ("sp", "SP"),
    ("bp", "BP"),
    ("si", "SI"),
    ("di", "DI"),
];
const FLAGS: [(&str, &str); 9] = [
    ("cf", "CF"),
    ("pf", "PF"),
    ("af", "AF"),
    ("zf", "ZF"),
    ("sf", "SF"),
    ("tf", "TF"),
    ("df", "DF"),
    ("of", "OF"),
    ("ac", "AC"),
];
const SEGMENTS: [&str; 8] = ["es", "cs", "ss", "ds", "fs", "gs", "ds2", "ds3"];

fn insert(map: &mut IndexMap<String, String>, key: impl Into<String>, value: impl Into<String>) {
    map.insert(key.into(), value.into());
}

/// Register names usable in x86 and x87 block bodies.
fn x86_registers() -> IndexMap<String, String> {
    let mut map = IndexMap::new();
    insert(&mut map, "$s", "emu->sr");
    for (name, reg) in GENERAL_REGISTERS {
        let (word, half) = if name.len() == 1 {
            (format!("{}x", name), true)
        }
        else {
            (name.to_string(), false)
        };
        if half {
            for (suffix, part) in [("l", "low"), ("h", "high")] {
                insert(
                    &mut map,
                    format!("${}{}", name, suffix),
                    format!("x86_register_get8_{}(emu, X86_R_{})", part, reg),
                );
                insert(
                    &mut map,
                    format!("${}{}=", name, suffix),
                    format!("x86_register_set8_{}(emu, X86_R_{}, $$)", part, reg),
                );
            }
        }
        for (prefix, bits) in [("", 16), ("e", 32), ("r", 64)] {
            insert(
                &mut map,
                format!("${}{}", prefix, word),
                format!("x86_register_get{}(emu, X86_R_{})", bits, reg),
            );
            insert(
                &mut map,
                format!("${}{}=", prefix, word),
                format!("x86_register_set{}(emu, X86_R_{}, $$)", bits, reg),
            );
        }
    }
    insert(&mut map, "$flagsl", "x86_flags_get_image8(emu)");
    insert(&mut map, "$flagsl=", "x86_flags_set_image8(emu, $$)");
    insert(&mut map, "$flags", "x86_flags_get_image16(emu)");
    insert(&mut map, "$flags=", "x86_flags_set_image16(emu, $$)");
    insert(&mut map, "$ip", "(emu->xip & 0xFFFF)");
    insert(&mut map, "$ip=", "x86_jump(emu, ($$) & 0xFFFF)");
    insert(&mut map, "$eip", "(emu->xip & 0xFFFFFFFF)");
    insert(&mut map, "$eip=", "x86_jump(emu, ($$) & 0xFFFFFFFF)");
    insert(&mut map, "$rip", "emu->xip");
    insert(&mut map, "$rip=", "x86_jump(emu, $$)");
    insert(&mut map, "$old_rip", "emu->old_xip");
    for (name, flag) in FLAGS {
        insert(&mut map, format!("${}", name), format!("emu->{}", name));
        insert(
            &mut map,
            format!("${}=", name),
            format!("emu->{} = ($$) != 0 ? X86_FL_{} : 0", name, flag),
        );
    }
    insert(&mut map, "$if", "emu->_if");
    insert(&mut map, "$if=", "emu->_if = ($$) != 0 ? X86_FL_IF : 0");
    for segment in SEGMENTS {
        let upper = segment.to_uppercase();
        insert(&mut map, format!("${}", segment), format!("emu->sr[X86_R_{}].selector", upper));
        if segment != "cs" {
            insert(
                &mut map,
                format!("${}=", segment),
                format!("x86_segment_set(emu, X86_R_{}, $$)", upper),
            );
        }
    }
    insert(&mut map, "$cpl", "x86_get_cpl(emu)");
    insert(&mut map, "$cpl=", "x86_set_cpl(emu, $$)");
    insert(&mut map, "$st", "x87_register_get80(emu, 0)");
    insert(&mut map, "$st=", "x87_register_set80(emu, 0, $$)");
    for i in 0..8 {
        insert(&mut map, format!("$st{}", i), format!("x87_register_get80(emu, {})", i));
        insert(&mut map, format!("$st{}=", i), format!("x87_register_set80(emu, {}, $$)", i));
    }
    map
}

fn x80_flag(mask: &str) -> (String, String) {
    (
        format!("(emu->bank[emu->af_bank].af & {})", mask),
        format!(
            "($$) != 0 ? (emu->bank[emu->af_bank].af |= {m}) : (emu->bank[emu->af_bank].af &= ~{m})",
            m = mask
        ),
    )
}

/// Register names usable in 8-bit block bodies.
fn x80_registers() -> IndexMap<String, String> {
    let mut map = IndexMap::new();
    insert(&mut map, "$f", "x86_get_low(emu->bank[emu->af_bank].af)");
    insert(&mut map, "$f=", "x86_set_low(&emu->bank[emu->af_bank].af, $$)");
    for (name, mask) in [
        ("cf", "X86_FL_CF"),
        ("nf", "0x0002"),
        ("pf", "X86_FL_PF"),
        ("af", "X86_FL_AF"),
        ("zf", "X86_FL_ZF"),
        ("sf", "X86_FL_SF"),
    ] {
        let (read, write) = x80_flag(mask);
        insert(&mut map, format!("${}", name), read);
        insert(&mut map, format!("${}=", name), write);
    }
    insert(&mut map, "$if", "emu->iff1");
    insert(&mut map, "$a", "x86_get_high(emu->bank[emu->af_bank].af)");
    insert(&mut map, "$a=", "x86_set_high(&emu->bank[emu->af_bank].af, $$)");
    insert(&mut map, "$b", "x86_get_high(emu->bank[emu->main_bank].bc)");
    insert(&mut map, "$b=", "x86_set_high(&emu->bank[emu->main_bank].bc, $$)");
    insert(&mut map, "$bc", "emu->bank[emu->main_bank].bc");
    insert(&mut map, "$de", "emu->bank[emu->main_bank].de");
    insert(&mut map, "$hl", "emu->bank[emu->main_bank].hl");
    insert(&mut map, "$pc", "emu->pc");
    insert(&mut map, "$pc=", "emu->pc = $$");
    insert(&mut map, "$old_pc", "old_pc");
    map
}

const MISSING_READ: &str = "0/*TODO*/";

/// Expand a block body for one decoded form of an instruction.
#[derive(Clone, Debug)]
pub struct Expansion<'a> {
    pub family: Family,
    pub operands: &'a [OperandTemplate],
    /// Operation size (`$O`).
    pub size: Option<OperandSize>,
    /// Address size (`$A`).
    pub address_size: Option<OperandSize>,
    /// Stack size (`$S`).
    pub stack_size: Option<OperandSize>,
    /// Condition code (`$C`).
    pub condition: Option<&'a str>,
}

impl<'a> Expansion<'a> {
    pub fn new(family: Family, operands: &'a [OperandTemplate]) -> Self {
        Self {
            family,
            operands,
            size: None,
            address_size: None,
            stack_size: None,
            condition: None,
        }
    }

    pub fn expand(&self, code: &str) -> String {
        let map = match self.family {
            Family::X80 => self.x80_replacements(),
            _ => self.x86_replacements(),
        };
        replace(code, &map)
    }

    fn x80_replacements(&self) -> IndexMap<String, String> {
        let registers = x80_registers();
        let mut map = registers.clone();
        let displacement = if self.operands.iter().any(|o| o.has_prepare()) { "imm0" } else { "0" };
        insert(&mut map, "$dsp", displacement);
        for (i, op) in self.operands.iter().enumerate() {
            insert(
                &mut map,
                format!("${}", i),
                replace(op.read.as_deref().unwrap_or("/*TODO*/"), &registers),
            );
            insert(
                &mut map,
                format!("${}=", i),
                replace(op.write.as_deref().unwrap_or("/*TODO*/"), &registers),
            );
            if let Some(cond) = &op.condition {
                insert(&mut map, format!("${}.cond", i), cond.clone());
            }
        }
        map
    }

    /// Access text of an operand at `width`, displaced by `offset`.
    fn access(registers: &IndexMap<String, String>, text: Option<&str>, width: Option<OperandSize>, offset: &str) -> String {
        let mut local = registers.clone();
        insert(&mut local, "$?", offset);
        if let Some(width) = width {
            insert(&mut local, "$S", width.bits().to_string());
            insert(
                &mut local,
                "$Sc",
                if width == OperandSize::Long { "(uint32_t)" } else { "" },
            );
        }
        replace(text.unwrap_or(MISSING_READ), &local)
    }

    fn x86_replacements(&self) -> IndexMap<String, String> {
        let registers = x86_registers();
        let mut map = registers.clone();

        if let Some(cond) = self.condition {
            insert(&mut map, "$C", cond);
        }
        if let Some(size) = self.size {
            let bits = size.bits();
            insert(&mut map, "$O", bits.to_string());
            for (name, reg) in GENERAL_REGISTERS {
                if bits == 8 && name.len() == 2 {
                    continue;
                }
                let key = if name.len() == 1 { format!("{}x", name) } else { name.to_string() };
                insert(
                    &mut map,
                    format!("${}.$O", key),
                    format!("x86_register_get{}(emu, X86_R_{})", bits, reg),
                );
                insert(
                    &mut map,
                    format!("${}.$O=", key),
                    format!("x86_register_set{}(emu, X86_R_{}, $$)", bits, reg),
                );
            }
            insert(&mut map, "$flags.$O", format!("x86_flags_get_image{}(emu)", bits));
            insert(&mut map, "$flags.$O=", format!("x86_flags_set_image{}(emu, $$)", bits));
            if size != OperandSize::Byte {
                let half = bits / 2;
                insert(&mut map, "$Ohalf", half.to_string());
                insert(&mut map, "$ax.$Ohalf", format!("x86_register_get{}(emu, X86_R_AX)", half));
                insert(&mut map, "$ax.$Ohalf=", format!("x86_register_set{}(emu, X86_R_AX, $$)", half));
            }
            insert(&mut map, "$Odup", (bits * 2).to_string());
        }
        if let Some(size) = self.address_size {
            let bits = size.bits();
            insert(&mut map, "$A", bits.to_string());
            for reg in ["cx", "bx", "si", "di"] {
                let upper = reg.to_uppercase();
                insert(
                    &mut map,
                    format!("${}.$A", reg),
                    format!("x86_register_get{}(emu, X86_R_{})", bits, upper),
                );
                insert(
                    &mut map,
                    format!("${}.$A=", reg),
                    format!("x86_register_set{}(emu, X86_R_{}, $$)", bits, upper),
                );
            }
        }
        if let Some(size) = self.stack_size {
            let bits = size.bits();
            insert(&mut map, "$S", bits.to_string());
            for reg in ["sp", "bp"] {
                let upper = reg.to_uppercase();
                insert(
                    &mut map,
                    format!("${}.$S", reg),
                    format!("x86_register_get{}(emu, X86_R_{})", bits, upper),
                );
                insert(
                    &mut map,
                    format!("${}.$S=", reg),
                    format!("x86_register_set{}(emu, X86_R_{}, $$)", bits, upper),
                );
            }
        }

        for (i, op) in self.operands.iter().enumerate() {
            let read = op.read.as_deref();
            let write = op.write.as_deref();
            if let Some(size) = self.size {
                insert(&mut map, format!("${}.$O", i), Self::access(&registers, read, Some(size), ""));
                insert(&mut map, format!("${}.$O=", i), Self::access(&registers, write, Some(size), ""));
                let displaced = format!(" + {}", size.bytes());
                if let Some(high) = op.read2.as_deref().or(read.filter(|r| r.contains("$?"))) {
                    insert(
                        &mut map,
                        format!("${}@$O.$O", i),
                        Self::access(&registers, Some(high), Some(size), &displaced),
                    );
                    insert(
                        &mut map,
                        format!("${}@$O.w", i),
                        Self::access(&registers, Some(high), Some(OperandSize::Word), &displaced),
                    );
                }
                if let Some(high) = op.write2.as_deref().or(write.filter(|w| w.contains("$?"))) {
                    insert(
                        &mut map,
                        format!("${}@$O.$O=", i),
                        Self::access(&registers, Some(high), Some(size), &displaced),
                    );
                }
            }
            for width in [OperandSize::Byte, OperandSize::Word, OperandSize::Long, OperandSize::Quad] {
                let letter = width.letter();
                insert(&mut map, format!("${}.{}", i, letter), Self::access(&registers, read, Some(width), ""));
                insert(&mut map, format!("${}.{}=", i, letter), Self::access(&registers, write, Some(width), ""));
            }
            insert(&mut map, format!("${}", i), Self::access(&registers, read, None, ""));
            insert(&mut map, format!("${}=", i), Self::access(&registers, write, None, ""));
            if op.sizes.len() == 1 {
                if let Some(only) = op.sizes.chars().next().and_then(OperandSize::from_letter) {
                    insert(&mut map, format!("${}.size", i), only.bits().to_string());
                }
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        operands::{BuiltinOperands, OperandCatalog},
        spec_file::SpecDocument,
    };

    fn table(text: &str) -> SemanticsTable {
        SemanticsTable::new(SpecDocument::parse(text).semantics)
    }

    const BLOCKS: &str = "\
@instruction MOV|op=b|cnt=3
\tbyte or segment;
@instruction MOV|mod=r op=w
\tregister word;
@instruction MOV
\tfallback;
@instruction Jcc
\tif($C) $rip = $0;
@instruction XCHG|op0=al
\tswap;
@instruction Z80.LD|op=w
\tword load;
@instruction Z80.LD|op=b
\tbyte load;
";

    fn ops(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    fn query<'q>(mnemonic: &'q str, operands: &'q [String], size: Option<OperandSize>) -> Query<'q> {
        Query {
            family: Family::X86,
            mnemonic,
            operands,
            size,
            form: None,
        }
    }

    fn body<'s>(selection: &Selection<'s>) -> &'s str {
        match selection {
            Selection::Block { block, .. } => &block.body,
            other => panic!("no block selected: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_names() {
        let table = table(BLOCKS);
        let jz = table.resolve("JZ");
        assert_eq!(jz.name, "Jcc");
        assert_eq!(jz.condition.as_deref(), Some("Z"));
        assert_eq!(table.resolve("MOVb").name, "MOV");
        assert_eq!(table.resolve("LES").segment.as_deref(), Some("ES"));
        assert_eq!(table.resolve("SETNZ").condition.as_deref(), Some("NZ"));
        assert_eq!(table.resolve("NOP").name, "NOP");
    }

    #[test]
    fn test_qualifier_matching() {
        let table = table(BLOCKS);
        let two = ops(&["Gw", "Rw"]);
        let mut q = query("MOV", &two, Some(OperandSize::Word));
        assert_eq!(body(&table.select(&q)), "fallback;");
        q.form = Some(ModRmForm::Register);
        assert_eq!(body(&table.select(&q)), "register word;");
        q.form = Some(ModRmForm::Memory);
        assert_eq!(body(&table.select(&q)), "fallback;");

        // The far pointer load counts the segment register as an operand.
        let lds = query("LDS", &two, Some(OperandSize::Word));
        assert_eq!(body(&table.select(&lds)), "byte or segment;");

        let al = ops(&["AL", "Rb"]);
        assert_eq!(body(&table.select(&query("XCHG", &al, Some(OperandSize::Byte)))), "swap;");
        let ax = ops(&["AX", "Rw"]);
        assert_eq!(
            table.select(&query("XCHG", &ax, Some(OperandSize::Word))),
            Selection::MissingConditions
        );
        assert_eq!(table.select(&query("HLT", &[], None)), Selection::MissingInstruction);
    }

    #[test]
    fn test_unknown_qualifier_fails() {
        let table = table("@instruction NOP|cpu=386\n\t;\n");
        assert_eq!(table.select(&query("NOP", &[], None)), Selection::MissingConditions);
    }

    #[test]
    fn test_z80_register_sets() {
        let table = table(BLOCKS);
        let word = ops(&["HL", "Iw"]);
        let q = Query {
            family: Family::X80,
            mnemonic: "LD",
            operands: &word,
            size: None,
            form: None,
        };
        assert_eq!(body(&table.select(&q)), "word load;");
        let byte = ops(&["(IX+Ib)", "A"]);
        let q = Query { operands: &byte, ..q };
        assert_eq!(body(&table.select(&q)), "byte load;");
    }

    #[test]
    fn test_params() {
        let found = params("if($C) $0.$O = $ax.$O + 1;");
        assert!(found.contains("$C"));
        assert!(found.contains("$O"));
        assert!(found.contains("$0"));
        assert!(!found.contains("$A"));
    }

    #[test]
    fn test_assignment_rewriting() {
        let mut map = IndexMap::new();
        map.insert("$0".to_string(), "get()".to_string());
        map.insert("$0=".to_string(), "set($$)".to_string());
        assert_eq!(replace("$0 = x + 1;", &map), "set(x + 1);");
        assert_eq!(replace("$0 += 2;", &map), "set(get() + (2));");
        assert_eq!(replace("$0 <<= 1;", &map), "set(get() << (1));");
        assert_eq!(replace("if($0 == 1) y = $0;", &map), "if(get() == 1) y = get();");
    }

    #[test]
    fn test_expand_x86() {
        let catalog = BuiltinOperands::new(Family::X86);
        let operands = vec![catalog.operand("Rv").unwrap().clone(), catalog.operand("Gv").unwrap().clone()];
        let mut expansion = Expansion::new(Family::X86, &operands);
        expansion.size = Some(OperandSize::Long);
        assert_eq!(
            expansion.expand("$0.$O = $1.$O;"),
            "x86_register_set32(emu, _mem, (uint32_t)x86_register_get32(emu, _reg));"
        );
        assert_eq!(expansion.expand("$cf = 0;"), "emu->cf = (0) != 0 ? X86_FL_CF : 0;");

        let jb = vec![catalog.operand("Jb").unwrap().numbered(0)];
        let mut expansion = Expansion::new(Family::X86, &jb);
        expansion.condition = Some("Z");
        assert_eq!(
            expansion.expand("if(x86_condition(emu, X86_CC_$C)) $rip = $0;"),
            "if(x86_condition(emu, X86_CC_Z)) x86_jump(emu, (imm0 + emu->xip));"
        );
    }

    #[test]
    fn test_expand_x80() {
        let catalog = BuiltinOperands::new(Family::X80);
        let operands = vec![catalog.operand("A").unwrap().clone(), catalog.operand("(HL)").unwrap().clone()];
        let expansion = Expansion::new(Family::X80, &operands);
        assert_eq!(
            expansion.expand("$0 = $1;"),
            "x86_set_high(&emu->bank[emu->af_bank].af, _read80b(emu->bank[emu->main_bank].hl));"
        );
    }
}
