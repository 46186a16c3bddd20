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

    marty_opgen::operands.rs

    Operand code templates used to render disassembly and semantics.

*/

use fxhash::FxHashMap;
use lazy_static::lazy_static;

use crate::arch::Family;

/// An operand size, as selected by the operation size of the decoded instruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperandSize {
    Byte,
    Word,
    Long,
    Quad,
}

impl OperandSize {
    pub fn from_letter(c: char) -> Option<OperandSize> {
        match c {
            'b' => Some(OperandSize::Byte),
            'w' => Some(OperandSize::Word),
            'l' => Some(OperandSize::Long),
            'q' => Some(OperandSize::Quad),
            _ => None,
        }
    }

    pub fn letter(&self) -> char {
        match self {
            OperandSize::Byte => 'b',
            OperandSize::Word => 'w',
            OperandSize::Long => 'l',
            OperandSize::Quad => 'q',
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OperandSize::Byte => "byte",
            OperandSize::Word => "word",
            OperandSize::Long => "long",
            OperandSize::Quad => "quad",
        }
    }

    pub fn bits(&self) -> u32 {
        match self {
            OperandSize::Byte => 8,
            OperandSize::Word => 16,
            OperandSize::Long => 32,
            OperandSize::Quad => 64,
        }
    }

    pub fn bytes(&self) -> u32 {
        self.bits() >> 3
    }

    /// Fit an operation size to the sizes an operand supports. An operand with a single
    /// size always uses it, otherwise the size is widened or narrowed to a supported one.
    pub fn fit(self, sizes: &str) -> OperandSize {
        let supports = |s: OperandSize| sizes.contains(s.letter());
        let mut size = self;
        if !supports(size) && sizes.len() == 1 {
            if let Some(only) = sizes.chars().next().and_then(OperandSize::from_letter) {
                size = only;
            }
        }
        if !supports(size) && size == OperandSize::Byte {
            size = OperandSize::Word;
        }
        if !supports(size) && size == OperandSize::Word {
            size = OperandSize::Long;
        }
        if !supports(size) {
            size = match size {
                OperandSize::Long if sizes.contains('q') => OperandSize::Quad,
                OperandSize::Long => OperandSize::Word,
                OperandSize::Quad => OperandSize::Long,
                other => other,
            };
        }
        size
    }
}

/// Code fragments describing how an operand is fetched, accessed and printed.
///
/// Fragments contain placeholders: `$#` is the operand's immediate number, `$size$` and
/// `$bits$` the fitted operand size, `$S`, `$Sc` and `$?` the access width, a cast for
/// 32-bit writes and an address displacement for multi-part accesses. `$$` in a write
/// stands for the value being written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperandTemplate {
    /// Size letters the operand supports. Empty if the operand has no size.
    pub sizes: String,
    pub prepare: Option<String>,
    pub read: Option<String>,
    pub read2: Option<String>,
    pub write: Option<String>,
    pub write2: Option<String>,
    /// Disassembly format specifier and the C arguments it consumes.
    pub format: Option<(String, Vec<String>)>,
    /// The operand addresses memory through the decoded ModRM address.
    pub address: bool,
    /// Branch condition named by the operand (8-bit family).
    pub condition: Option<String>,
}

impl OperandTemplate {
    /// Number the immediates of this operand.
    pub fn numbered(&self, index: usize) -> OperandTemplate {
        let n = index.to_string();
        let map = |s: &Option<String>| s.as_ref().map(|s| s.replace("$#", &n));
        OperandTemplate {
            sizes: self.sizes.clone(),
            prepare: map(&self.prepare),
            read: map(&self.read),
            read2: map(&self.read2),
            write: map(&self.write),
            write2: map(&self.write2),
            format: self.format.as_ref().map(|(fmt, args)| {
                (
                    fmt.replace("$#", &n),
                    args.iter().map(|a| a.replace("$#", &n)).collect(),
                )
            }),
            address: self.address,
            condition: self.condition.clone(),
        }
    }

    pub fn has_prepare(&self) -> bool {
        self.prepare.is_some()
    }

    /// Substitute `$size$` and `$bits$`. Without an operation size only single size
    /// operands have a defined width.
    fn fit_patterns(&self, text: &str, size: Option<OperandSize>) -> String {
        let fitted = match size {
            Some(size) => Some(size.fit(&self.sizes)),
            None if self.sizes.len() == 1 => self.sizes.chars().next().and_then(OperandSize::from_letter),
            None => None,
        };
        match fitted {
            Some(size) => text.replace("$size$", size.name()).replace("$bits$", &size.bits().to_string()),
            None => text.replace("$size$", "void").replace("$bits$", "0"),
        }
    }

    /// The fetch statements for an operation of `size`.
    pub fn prepare_text(&self, size: Option<OperandSize>) -> Option<String> {
        self.prepare.as_ref().map(|p| self.fit_patterns(p, size))
    }

    /// The disassembly format and arguments for an operation of `size`.
    pub fn format_text(&self, size: Option<OperandSize>) -> Option<(String, Vec<String>)> {
        self.format.as_ref().map(|(fmt, args)| {
            (
                self.fit_patterns(fmt, size),
                args.iter().map(|a| self.fit_patterns(a, size)).collect(),
            )
        })
    }

    fn for_x87(&self) -> OperandTemplate {
        let map = |s: &Option<String>| {
            s.as_ref()
                .map(|s| s.replace("_read", "_x87_read").replace("_write", "_x87_write"))
        };
        OperandTemplate {
            prepare: map(&self.prepare),
            read: map(&self.read),
            read2: map(&self.read2),
            write: map(&self.write),
            write2: map(&self.write2),
            ..self.clone()
        }
    }
}

/// Union of the size letters of a list of operands, in `bwlq` order.
pub fn operand_sizes<'a>(templates: impl IntoIterator<Item = &'a OperandTemplate>) -> String {
    let mut seen: Vec<char> = Vec::new();
    for t in templates {
        seen.extend(t.sizes.chars());
    }
    "bwlq".chars().filter(|c| seen.contains(c)).collect()
}

/// Resolves operand tokens to code templates.
pub trait OperandCatalog {
    fn operand(&self, token: &str) -> Option<&OperandTemplate>;

    fn contains(&self, token: &str) -> bool {
        self.operand(token).is_some()
    }
}

/// The operand catalog compiled into the generator.
#[derive(Copy, Clone, Debug)]
pub struct BuiltinOperands {
    family: Family,
}

impl BuiltinOperands {
    pub fn new(family: Family) -> Self {
        Self { family }
    }
}

impl OperandCatalog for BuiltinOperands {
    fn operand(&self, token: &str) -> Option<&OperandTemplate> {
        match self.family {
            Family::X86 => X86_OPERANDS.get(token),
            Family::X87 => X87_OPERANDS.get(token),
            Family::X80 => X80_OPERANDS.get(token),
        }
    }
}

/// Static operand definition.
struct Def {
    name:      &'static str,
    size:      &'static str,
    prepare:   Option<&'static str>,
    read:      Option<&'static str>,
    read2:     Option<&'static str>,
    write:     Option<&'static str>,
    write2:    Option<&'static str>,
    format:    &'static str,
    args:      &'static [&'static str],
    address:   bool,
    condition: Option<&'static str>,
}

const BASE: Def = Def {
    name: "",
    size: "",
    prepare: None,
    read: None,
    read2: None,
    write: None,
    write2: None,
    format: "",
    args: &[],
    address: false,
    condition: None,
};

impl Def {
    fn template(&self) -> OperandTemplate {
        let owned = |s: Option<&'static str>| s.map(str::to_string);
        OperandTemplate {
            sizes: self.size.to_string(),
            prepare: owned(self.prepare),
            read: owned(self.read),
            read2: owned(self.read2),
            write: owned(self.write),
            write2: owned(self.write2),
            format: Some((self.format.to_string(), self.args.iter().map(|a| a.to_string()).collect())),
            address: self.address,
            condition: owned(self.condition),
        }
    }
}

const IMM_ARGS: &[&str] = &["(uoff_t)imm$#"];
const ADDRESS_TEXT: &[&str] = &["prs->address_text"];
const X87_ADDRESS_TEXT: &[&str] = &["emu ? emu->x87.address_text : prs->address_text"];
const MEM_READ: Option<&str> = Some("(_int$S)_read$S(_seg, _off$?)");
const MEM_WRITE: Option<&str> = Some("_write$S(_seg, _off$?, $$)");

#[rustfmt::skip]
const X86_DEFS: &[Def] = &[
    Def { name: "1", read: Some("1"), format: "1", ..BASE },
    Def { name: "3", format: "3", ..BASE },
    Def {
        name: "Ib", size: "b",
        prepare: Some("soff_t imm$# = (int8_t)x86_fetch8(prs, emu);"),
        read: Some("imm$#"), write: Some("imm$# = $$"),
        format: "%\"PRIX64\"", args: IMM_ARGS, ..BASE
    },
    Def {
        name: "Ub", size: "b",
        prepare: Some("soff_t imm$# = (uint8_t)x86_fetch8(prs, emu);"),
        read: Some("imm$#"), write: Some("imm$# = $$"),
        format: "%\"PRIX64\"", args: IMM_ARGS, ..BASE
    },
    Def {
        name: "Iw", size: "w",
        prepare: Some("soff_t imm$# = (int16_t)x86_fetch16(prs, emu);"),
        read: Some("imm$#"), write: Some("imm$# = $$"),
        format: "%\"PRIX64\"", args: IMM_ARGS, ..BASE
    },
    Def {
        name: "Iz", size: "wl",
        prepare: Some("soff_t imm$# = (int$bits$_t)x86_fetch$bits$(prs, emu);"),
        read: Some("imm$#"), write: Some("imm$# = $$"),
        format: "%\"PRIX64\"", args: IMM_ARGS, ..BASE
    },
    Def {
        name: "Iv", size: "wlq",
        prepare: Some("soff_t imm$# = (int$bits$_t)x86_fetch$bits$(prs, emu);"),
        read: Some("imm$#"), write: Some("imm$# = $$"),
        format: "%\"PRIX64\"", args: IMM_ARGS, ..BASE
    },
    Def {
        name: "Ap", size: "wl",
        prepare: Some("soff_t imm$# = (int$bits$_t)x86_fetch$bits$(prs, emu);\nsoff_t seg$# = x86_fetch16(prs, emu);"),
        read: Some("imm$#"), read2: Some("seg$#"),
        write: Some("imm$# = $$"), write2: Some("seg$# = $$"),
        format: "%\"PRIX64 \":%\"PRIX64\"", args: &["(uoff_t)seg$#", "(uoff_t)imm$#"], ..BASE
    },
    Def {
        name: "Jb", size: "b",
        prepare: Some("soff_t imm$# = (int8_t)x86_fetch8(prs, emu);"),
        read: Some("(imm$# + emu->xip)"),
        format: "%\"PRIX64\"", args: &["(uoff_t)(imm$# + prs->current_position)"], ..BASE
    },
    Def {
        name: "Jz", size: "wl",
        prepare: Some("soff_t imm$# = (int$bits$_t)x86_fetch$bits$(prs, emu);"),
        read: Some("(imm$# + emu->xip)"),
        format: "%\"PRIX64\"", args: &["(uoff_t)(imm$# + prs->current_position)"], ..BASE
    },
    Def {
        name: "Ov",
        prepare: Some("prs->address_offset = x86_fetch_addrsize(prs, emu);"),
        read: Some("_read$S(_seg == X86_R_SEGMENT_NONE ? X86_R_DS : _seg, _off$?)"),
        write: Some("_write$S(_seg == X86_R_SEGMENT_NONE ? X86_R_DS : _seg, _off$?, $$)"),
        format: "[%s:%\"PRIX64\"]",
        args: &["x86_segment_name(prs, _seg == X86_R_SEGMENT_NONE ? X86_R_DS : _seg)", "prs->address_offset"],
        address: true, ..BASE
    },
    Def {
        name: "AL", size: "b",
        read: Some("x86_register_get8_low(emu, X86_R_AX)"), write: Some("x86_register_set8_low(emu, X86_R_AX, $$)"),
        format: "al", ..BASE
    },
    Def {
        name: "CL", size: "b",
        read: Some("x86_register_get8_low(emu, X86_R_CX)"), write: Some("x86_register_set8_low(emu, X86_R_CX, $$)"),
        format: "cl", ..BASE
    },
    Def {
        name: "AX", size: "w",
        read: Some("x86_register_get16(emu, X86_R_AX)"), write: Some("x86_register_set16(emu, X86_R_AX, $$)"),
        format: "%s", args: &["x86_is_nec(prs) ? \"aw\" : \"ax\""], ..BASE
    },
    Def {
        name: "DX", size: "w",
        read: Some("x86_register_get16(emu, X86_R_DX)"), write: Some("x86_register_set16(emu, X86_R_DX, $$)"),
        format: "%s", args: &["x86_is_nec(prs) ? \"dw\" : \"dx\""], ..BASE
    },
    Def {
        name: "rAX", size: "wlq",
        read: Some("x86_register_get$S(emu, X86_R_AX)"), write: Some("x86_register_set$S(emu, X86_R_AX, $Sc$$)"),
        format: "%s", args: &["x86_register_name$bits$(prs, X86_R_AX)"], ..BASE
    },
    Def {
        name: "Gb", size: "b",
        read: Some("x86_register_get8(emu, _reg)"), write: Some("x86_register_set8(emu, _reg, $$)"),
        format: "%s", args: &["x86_register_name8(prs, REGFLD(prs))"], ..BASE
    },
    Def {
        name: "Gw", size: "w",
        read: Some("x86_register_get16(emu, _reg)"), write: Some("x86_register_set16(emu, _reg, $$)"),
        format: "%s", args: &["x86_register_name16(prs, REGFLD(prs))"], ..BASE
    },
    Def {
        name: "Gd", size: "l",
        read: Some("x86_register_get32(emu, _reg)"), write: Some("x86_register_set32(emu, _reg, $$)"),
        format: "%s", args: &["x86_register_name32(prs, REGFLD(prs))"], ..BASE
    },
    Def {
        name: "Gz", size: "wl",
        read: Some("x86_register_get$S(emu, _reg)"), write: Some("x86_register_set$S(emu, _reg, $Sc$$)"),
        format: "%s", args: &["x86_register_name$bits$(prs, REGFLD(prs))"], ..BASE
    },
    Def {
        name: "Gv", size: "wlq",
        read: Some("x86_register_get$S(emu, _reg)"), write: Some("x86_register_set$S(emu, _reg, $Sc$$)"),
        format: "%s", args: &["x86_register_name$bits$(prs, REGFLD(prs))"], ..BASE
    },
    Def {
        name: "Rb", size: "b",
        read: Some("x86_register_get8(emu, _mem)"), write: Some("x86_register_set8(emu, _mem, $$)"),
        format: "%s", args: &["x86_register_name8(prs, MEMFLD(prs))"], ..BASE
    },
    Def {
        name: "Rw", size: "w",
        read: Some("x86_register_get16(emu, _mem)"), write: Some("x86_register_set16(emu, _mem, $$)"),
        format: "%s", args: &["x86_register_name16(prs, MEMFLD(prs))"], ..BASE
    },
    Def {
        name: "Rd", size: "l",
        read: Some("x86_register_get32(emu, _mem)"), write: Some("x86_register_set32(emu, _mem, $$)"),
        format: "%s", args: &["x86_register_name32(prs, MEMFLD(prs))"], ..BASE
    },
    Def {
        name: "Rz", size: "wl",
        read: Some("x86_register_get$S(emu, _mem)"), write: Some("x86_register_set$S(emu, _mem, $Sc$$)"),
        format: "%s", args: &["x86_register_name$bits$(prs, MEMFLD(prs))"], ..BASE
    },
    Def {
        name: "Rv", size: "wlq",
        read: Some("x86_register_get$S(emu, _mem)"), write: Some("x86_register_set$S(emu, _mem, $Sc$$)"),
        format: "%s", args: &["x86_register_name$bits$(prs, MEMFLD(prs))"], ..BASE
    },
    Def {
        name: "Ry", size: "lq",
        read: Some("x86_register_get32(emu, _mem)"), write: Some("x86_register_set32(emu, _mem, $$)"),
        format: "%s", args: &["x86_register_name$bits$(prs, MEMFLD(prs))"], ..BASE
    },
    Def {
        name: "Sw", size: "w",
        read: Some("x86_segment_get(emu, REGFLDVAL(prs))"), write: Some("x86_segment_set(emu, REGFLDVAL(prs), $$)"),
        format: "%s", args: &["x86_segment_name(prs, REGFLDVAL(prs))"], ..BASE
    },
    Def {
        name: "Cy", size: "lq",
        read: Some("_crget$S(REGFLDLOCK(prs))"), write: Some("_crset$S(REGFLDLOCK(prs), $$)"),
        format: "cr%d", args: &["REGFLDLOCK(prs)"], ..BASE
    },
    Def {
        name: "Dy", size: "lq",
        read: Some("_drget$S(REGFLDLOCK(prs))"), write: Some("_drset$S(REGFLDLOCK(prs), $$)"),
        format: "dr%d", args: &["REGFLDLOCK(prs)"], ..BASE
    },
    Def {
        name: "Ty", size: "lq",
        read: Some("_trget32(REGFLDLOCK(prs))"), write: Some("_trset32(REGFLDLOCK(prs), $$)"),
        format: "tr%d", args: &["REGFLDLOCK(prs)"], ..BASE
    },
    Def { name: "M", format: "%s", args: ADDRESS_TEXT, address: true, ..BASE },
    Def { name: "M10", format: "%s", args: ADDRESS_TEXT, address: true, ..BASE },
    Def {
        name: "Mb", size: "b",
        read: Some("(_int8)_read8(_seg, _off$?)"), write: Some("_write8(_seg, _off$?, $$)"),
        format: "byte %s", args: ADDRESS_TEXT, address: true, ..BASE
    },
    Def {
        name: "Mw", size: "w",
        read: Some("(_int16)_read16(_seg, _off$?)"), write: Some("_write16(_seg, _off$?, $$)"),
        format: "word %s", args: ADDRESS_TEXT, address: true, ..BASE
    },
    Def {
        name: "Md", size: "l",
        read: Some("(_int32)_read32(_seg, _off$?)"), write: Some("_write32(_seg, _off$?, $$)"),
        format: "long %s", args: ADDRESS_TEXT, address: true, ..BASE
    },
    Def { name: "Mz", size: "wl", read: MEM_READ, write: MEM_WRITE, format: "$size$ %s", args: ADDRESS_TEXT, address: true, ..BASE },
    Def { name: "Mv", size: "wlq", read: MEM_READ, write: MEM_WRITE, format: "$size$ %s", args: ADDRESS_TEXT, address: true, ..BASE },
    Def { name: "Ma", size: "wl", read: MEM_READ, write: MEM_WRITE, format: "%s", args: ADDRESS_TEXT, address: true, ..BASE },
    Def { name: "Mq/Mo", size: "lq", read: MEM_READ, write: MEM_WRITE, format: "%s", args: ADDRESS_TEXT, address: true, ..BASE },
    Def { name: "Mp", size: "wlq", read: MEM_READ, write: MEM_WRITE, format: "%s", args: ADDRESS_TEXT, address: true, ..BASE },
    Def {
        name: "ST",
        read: Some("x87_register_get80(emu, 0)"), write: Some("x87_register_set80(emu, 0, $$)"),
        format: "st", ..BASE
    },
    Def {
        name: "ST(i)",
        read: Some("x87_register_get80(emu, _mem)"), write: Some("x87_register_set80(emu, _mem, $$)"),
        format: "st(%d)", args: &["MEMFLD(prs)"], ..BASE
    },
    Def {
        name: "mem32real",
        read: Some("x87_float32_to_float80(emu, _read32fp(_seg, _off))"),
        write: Some("_write32fp(_seg, _off, x87_float80_to_float32(emu, $$))"),
        format: "%s", args: X87_ADDRESS_TEXT, address: true, ..BASE
    },
    Def {
        name: "mem64real",
        read: Some("x87_float64_to_float80(emu, _read64fp(_seg, _off))"),
        write: Some("_write64fp(_seg, _off, x87_float80_to_float64(emu, $$))"),
        format: "%s", args: X87_ADDRESS_TEXT, address: true, ..BASE
    },
    Def {
        name: "mem80real",
        read: Some("_read80fp(_seg, _off)"), write: Some("_write80fp(_seg, _off, $$)"),
        format: "%s", args: X87_ADDRESS_TEXT, address: true, ..BASE
    },
    Def { name: "M14/M28", format: "%s", args: X87_ADDRESS_TEXT, address: true, ..BASE },
    Def { name: "M94/M108", format: "%s", args: X87_ADDRESS_TEXT, address: true, ..BASE },
    // NEC syntax only
    Def { name: "R", format: "r", ..BASE },
    Def { name: "PSW", format: "psw", ..BASE },
    Def { name: "AH", format: "ah", ..BASE },
    Def { name: "DS0", format: "ds0", ..BASE },
    Def { name: "DS1", format: "ds1", ..BASE },
    Def { name: "CY", format: "cy", ..BASE },
    Def { name: "DIR", format: "dir", ..BASE },
];

const WORD_REGISTERS: [&str; 8] = ["AX", "CX", "DX", "BX", "SP", "BP", "SI", "DI"];
const SEGMENT_REGISTERS: [&str; 8] = ["ES", "CS", "SS", "DS", "FS", "GS", "DS3", "DS2"];

/// Opcode-embedded registers and the segment registers.
fn x86_register_templates() -> Vec<(String, OperandTemplate)> {
    let mut out = Vec::new();
    for (i, (word, segment)) in WORD_REGISTERS.iter().zip(SEGMENT_REGISTERS).enumerate() {
        let num = format!("REGNUM(prs, {})", i);
        out.push((
            format!("r{}", i),
            OperandTemplate {
                sizes: "wlq".to_string(),
                read: Some(format!("x86_register_get$S(emu, {})", num)),
                write: Some(format!("x86_register_set$S(emu, {}, $Sc$$)", num)),
                format: Some(("%s".to_string(), vec![format!("x86_register_name$bits$(prs, {})", num)])),
                ..Default::default()
            },
        ));
        out.push((
            format!("R{}B", i),
            OperandTemplate {
                sizes: "b".to_string(),
                read: Some(format!("x86_register_get8(emu, {})", num)),
                write: Some(format!("x86_register_set8(emu, {}, $$)", num)),
                format: Some(("%s".to_string(), vec![format!("x86_register_name8(prs, {})", num)])),
                ..Default::default()
            },
        ));
        out.push((
            format!("e{}", word),
            OperandTemplate {
                sizes: "wl".to_string(),
                read: Some(format!("x86_register_get16(emu, {})", num)),
                write: Some(format!("x86_register_set16(emu, {}, $$)", num)),
                format: Some((
                    "%s".to_string(),
                    vec![format!("x86_register_name$bits$(prs, X86_R_{})", word)],
                )),
                ..Default::default()
            },
        ));
        out.push((
            segment.to_string(),
            OperandTemplate {
                sizes: "w".to_string(),
                read: Some(format!("emu->sr[{}].selector", i)),
                write: Some(format!("x86_segment_set(emu, X86_R_{}, $$)", segment)),
                format: Some((
                    "%s".to_string(),
                    vec![format!("x86_segment_name(prs, X86_R_{})", segment)],
                )),
                ..Default::default()
            },
        ));
    }
    out
}

#[rustfmt::skip]
const X80_DEFS: &[Def] = &[
    Def { name: "Ib", prepare: Some("soff_t imm$# = (int8_t)x80_fetch8(prs, emu);"), read: Some("imm$#"), format: "%\"PRIX64\"", args: IMM_ARGS, ..BASE },
    Def { name: "Iw", prepare: Some("soff_t imm$# = (int16_t)x80_fetch16(prs, emu);"), read: Some("imm$#"), format: "%\"PRIX64\"", args: IMM_ARGS, ..BASE },
    Def {
        name: "Jb",
        prepare: Some("soff_t imm$# = (int8_t)x80_fetch8(prs, emu);"),
        read: Some("imm$# + (emu->pc & 0xFFFF)"),
        format: "%\"PRIX64\"", args: &["(uoff_t)(imm$# + (prs->current_position & 0xFFFF))"], ..BASE
    },
    Def { name: "A", read: Some("x86_get_high(emu->bank[emu->af_bank].af)"), write: Some("x86_set_high(&emu->bank[emu->af_bank].af, $$)"), format: "a", ..BASE },
    Def { name: "B", read: Some("x86_get_high(emu->bank[emu->main_bank].bc)"), write: Some("x86_set_high(&emu->bank[emu->main_bank].bc, $$)"), format: "b", ..BASE },
    Def { name: "C", read: Some("x86_get_low(emu->bank[emu->main_bank].bc)"), write: Some("x86_set_low(&emu->bank[emu->main_bank].bc, $$)"), format: "c", condition: Some("C"), ..BASE },
    Def { name: "D", read: Some("x86_get_high(emu->bank[emu->main_bank].de)"), write: Some("x86_set_high(&emu->bank[emu->main_bank].de, $$)"), format: "d", ..BASE },
    Def { name: "E", read: Some("x86_get_low(emu->bank[emu->main_bank].de)"), write: Some("x86_set_low(&emu->bank[emu->main_bank].de, $$)"), format: "e", ..BASE },
    Def { name: "H", read: Some("x86_get_high(emu->bank[emu->main_bank].hl)"), write: Some("x86_set_high(&emu->bank[emu->main_bank].hl, $$)"), format: "h", ..BASE },
    Def { name: "L", read: Some("x86_get_low(emu->bank[emu->main_bank].hl)"), write: Some("x86_set_low(&emu->bank[emu->main_bank].hl, $$)"), format: "l", ..BASE },
    Def { name: "IXH", read: Some("x86_get_high(emu->ix)"), write: Some("x86_set_high(&emu->ix, $$)"), format: "ixh", ..BASE },
    Def { name: "IXL", read: Some("x86_get_low(emu->ix)"), write: Some("x86_set_low(&emu->ix, $$)"), format: "ixl", ..BASE },
    Def { name: "IYH", read: Some("x86_get_high(emu->iy)"), write: Some("x86_set_high(&emu->iy, $$)"), format: "iyh", ..BASE },
    Def { name: "IYL", read: Some("x86_get_low(emu->iy)"), write: Some("x86_set_low(&emu->iy, $$)"), format: "iyl", ..BASE },
    Def { name: "AF", read: Some("emu->bank[emu->af_bank].af"), write: Some("emu->bank[emu->af_bank].af = $$"), format: "af", ..BASE },
    Def { name: "BC", read: Some("emu->bank[emu->main_bank].bc"), write: Some("emu->bank[emu->main_bank].bc = $$"), format: "bc", ..BASE },
    Def { name: "DE", read: Some("emu->bank[emu->main_bank].de"), write: Some("emu->bank[emu->main_bank].de = $$"), format: "de", ..BASE },
    Def { name: "HL", read: Some("emu->bank[emu->main_bank].hl"), write: Some("emu->bank[emu->main_bank].hl = $$"), format: "hl", ..BASE },
    Def { name: "SP", read: Some("emu->sp"), write: Some("emu->sp = $$"), format: "sp", ..BASE },
    Def { name: "IX", read: Some("emu->ix"), write: Some("emu->ix = $$"), format: "ix", ..BASE },
    Def { name: "IY", read: Some("emu->iy"), write: Some("emu->iy = $$"), format: "iy", ..BASE },
    Def {
        name: "(Iw)",
        prepare: Some("soff_t imm$# = (int16_t)x80_fetch16(prs, emu);"),
        read: Some("_read80b(imm$#)"), write: Some("_write80b(imm$#, $$)"),
        format: "(%\"PRIX64\")", args: IMM_ARGS, ..BASE
    },
    Def { name: "(BC)", read: Some("_read80b(emu->bank[emu->main_bank].bc)"), write: Some("_write80b(emu->bank[emu->main_bank].bc, $$)"), format: "(bc)", ..BASE },
    Def { name: "(DE)", read: Some("_read80b(emu->bank[emu->main_bank].de)"), write: Some("_write80b(emu->bank[emu->main_bank].de, $$)"), format: "(de)", ..BASE },
    Def { name: "(HL)", read: Some("_read80b(emu->bank[emu->main_bank].hl)"), write: Some("_write80b(emu->bank[emu->main_bank].hl, $$)"), format: "(hl)", ..BASE },
    Def { name: "(SP)", read: Some("_read80b(emu->sp)"), write: Some("_write80b(emu->sp, $$)"), format: "(sp)", ..BASE },
    Def {
        name: "(Ib)",
        prepare: Some("soff_t imm$# = x80_fetch8(prs, emu) & 0xFF;"),
        read: Some("(emu->bank[emu->af_bank].af & 0xFF00) | imm$#"),
        format: "(%\"PRIX64\")", args: IMM_ARGS, ..BASE
    },
    Def {
        name: "(IX+Ib)",
        prepare: Some("soff_t imm$# = (int8_t)x80_fetch8(prs, emu);"),
        read: Some("_read80b(emu->ix + imm$#)"), write: Some("_write80b(emu->ix + imm$#, $$)"),
        format: "(ix+%\"PRIX64\")", args: IMM_ARGS, ..BASE
    },
    Def {
        name: "(IY+Ib)",
        prepare: Some("soff_t imm$# = (int8_t)x80_fetch8(prs, emu);"),
        read: Some("_read80b(emu->iy + imm$#)"), write: Some("_write80b(emu->iy + imm$#, $$)"),
        format: "(iy+%\"PRIX64\")", args: IMM_ARGS, ..BASE
    },
    // The port address is the whole of BC
    Def { name: "(C)", read: Some("emu->bank[emu->main_bank].bc"), format: "(c)", ..BASE },
    Def { name: "I", read: Some("emu->i"), write: Some("emu->i = $$"), format: "i", ..BASE },
    Def { name: "R", read: Some("emu->r"), write: Some("emu->r = $$"), format: "r", ..BASE },
    Def { name: "AF'", format: "af'", ..BASE },
    Def { name: "Z", format: "z", condition: Some("Z"), ..BASE },
    Def { name: "NZ", format: "nz", condition: Some("NZ"), ..BASE },
    Def { name: "NC", format: "nc", condition: Some("NC"), ..BASE },
    Def { name: "PE", format: "pe", condition: Some("PE"), ..BASE },
    Def { name: "PO", format: "po", condition: Some("PO"), ..BASE },
    Def { name: "M", format: "m", condition: Some("M"), ..BASE },
    Def { name: "P", format: "p", condition: Some("P"), ..BASE },
];

fn x86_templates() -> FxHashMap<String, OperandTemplate> {
    let mut map: FxHashMap<String, OperandTemplate> =
        X86_DEFS.iter().map(|d| (d.name.to_string(), d.template())).collect();
    map.extend(x86_register_templates());
    map
}

fn x80_templates() -> FxHashMap<String, OperandTemplate> {
    let mut map: FxHashMap<String, OperandTemplate> =
        X80_DEFS.iter().map(|d| (d.name.to_string(), d.template())).collect();
    for i in 0..8 {
        map.insert(
            i.to_string(),
            OperandTemplate {
                read: Some(i.to_string()),
                format: Some((i.to_string(), Vec::new())),
                ..Default::default()
            },
        );
    }
    for vector in (0..0x40).step_by(8) {
        map.insert(
            format!("{:02X}h", vector),
            OperandTemplate {
                read: Some(vector.to_string()),
                format: Some((format!("{:02X}h", vector), Vec::new())),
                ..Default::default()
            },
        );
    }
    map
}

lazy_static! {
    static ref X86_OPERANDS: FxHashMap<String, OperandTemplate> = x86_templates();
    static ref X87_OPERANDS: FxHashMap<String, OperandTemplate> =
        X86_OPERANDS.iter().map(|(k, v)| (k.clone(), v.for_x87())).collect();
    static ref X80_OPERANDS: FxHashMap<String, OperandTemplate> = x80_templates();
}
