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

    marty_opgen::emit/decoder.rs

    Renders decision trees as C parse functions.

*/

use std::collections::BTreeSet;

use crate::{
    arch::{ArchitectureTable, Family},
    context::GenOptions,
    emit::CodeWriter,
    error::{GenError, SynthError},
    features::FeatureGlossary,
    instruction::{Instruction, Syntax, SyntaxKind},
    operands::{operand_sizes, BuiltinOperands, OperandCatalog, OperandSize, OperandTemplate},
    path::{Axis, Path},
    semantics::{params, Expansion, Query, Selection, SemanticsTable},
    spec_file::SemanticsBlock,
    synth::{Decision, ModRmForm},
};

const SEGMENT_PREFIXES: &[&str] = &["ES:", "CS:", "SS:", "DS:", "FS:", "GS:", "DS2:", "DS3:", "IRAM:"];
const REPEAT_PREFIXES: &[&str] = &["REPZ:", "REPNZ:", "REPC:", "REPNC:"];
const X87_ASYNC: &[&str] = &[
    "fnclex", "fndisi", "fneni", "fninit", "fnsave", "fnstcw", "fnstenv", "fnstsw", "fstsg",
];
/// Instructions that accept a LOCK prefix with a memory destination.
const LOCKABLE: &[&str] = &[
    "ADC", "ADD", "AND", "BTC", "BTR", "BTS", "DEC", "INC", "NEG", "NOT", "OR", "SBB", "SUB", "XCHG", "XOR",
];
/// Instructions that restore the FPU environment and must not overwrite the exception pointers.
const X87_ENVIRONMENT: &[&str] = &["fldcw", "fldenv", "frstor", "frstpm", "fsetpm"];

/// How the operation size of a multi-size instruction is selected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SizeOption {
    Plain,
    Branch,
    Stack,
    Control,
}

/// Operation sizes an instruction is generated for.
fn size_plan(syntax: &Syntax, templates: &[OperandTemplate]) -> (String, SizeOption) {
    let mnem = syntax.mnemonic.as_str();
    let has = |t: &str| syntax.operands.iter().any(|o| o == t);
    let control_register = has("Cy") || has("Dy") || has("Ty");

    let (mut sizes, option) = if mnem.ends_with('b') {
        ("b".to_string(), SizeOption::Plain)
    }
    else if mnem.ends_with('z') || mnem == "POPAd" || mnem == "PUSHAd" {
        ("wl".to_string(), SizeOption::Plain)
    }
    else if mnem.ends_with('v') || mnem == "IRET" || mnem == "RETF" {
        ("wlq".to_string(), SizeOption::Plain)
    }
    else if mnem == "CBW/CWDE/CDQE" || mnem == "CWD/CDQ/CQO" {
        ("wlq".to_string(), SizeOption::Plain)
    }
    else if mnem == "MOV" && syntax.operands.len() == 3 && matches!(syntax.operands[0].as_str(), "DS2" | "DS3") {
        ("w".to_string(), SizeOption::Plain)
    }
    else if matches!(mnem, "CALL" | "JMP" | "RET") || mnem.starts_with("LOOP") || mnem.starts_with('J') {
        ("wlq".to_string(), SizeOption::Branch)
    }
    else if matches!(mnem, "POP" | "PUSH" | "POPF" | "PUSHF" | "ENTER" | "LEAVE") {
        ("wlq".to_string(), SizeOption::Stack)
    }
    else if matches!(mnem, "SGDT" | "SIDT") {
        ("lq".to_string(), SizeOption::Control)
    }
    else if matches!(mnem, "LGDT" | "LIDT") || control_register {
        (operand_sizes(templates), SizeOption::Control)
    }
    else {
        (operand_sizes(templates), SizeOption::Plain)
    };

    if sizes.len() > 1 {
        sizes = sizes.replace('b', "");
    }
    (sizes, option)
}

/// The disassembled mnemonic for an operation size.
fn sized_mnemonic(mnemonic: &str, size: Option<OperandSize>) -> String {
    let stem = || &mnemonic[..mnemonic.len() - 1];
    let mnem = match (mnemonic, size) {
        ("CBW/CWDE/CDQE" | "CWD/CDQ/CQO", Some(size)) => {
            let idx = match size {
                OperandSize::Long => 1,
                OperandSize::Quad => 2,
                _ => 0,
            };
            mnemonic.split('/').nth(idx).unwrap_or(mnemonic).to_string()
        }
        (m, _) if m.ends_with('b') => format!("{}B", stem()),
        (m, Some(size)) if m.ends_with('z') || m == "POPAd" || m == "PUSHAd" => {
            let suffix = if size == OperandSize::Word { "W" } else { "D" };
            format!("{}{}", stem(), suffix)
        }
        (m, Some(size)) if m.ends_with('v') => {
            let suffix = match size {
                OperandSize::Quad => "Q",
                OperandSize::Long => "D",
                _ => "W",
            };
            format!("{}{}", stem(), suffix)
        }
        (m, _) => m.to_string(),
    };
    mnem.to_lowercase()
}

/// A `DEBUG()` disassembly statement.
fn debug_line(mnemonic: &str, operands: &[OperandTemplate], size: Option<OperandSize>) -> String {
    let mut pars = Vec::new();
    let mut args = String::new();
    for op in operands {
        let Some((fmt, fmt_args)) = op.format_text(size).filter(|(fmt, _)| !fmt.is_empty())
        else {
            continue;
        };
        pars.push(fmt);
        for arg in fmt_args {
            args.push_str(", ");
            args.push_str(&arg);
        }
    }
    if pars.is_empty() {
        format!("DEBUG(\"{}\\n\");", mnemonic)
    }
    else {
        format!("DEBUG(\"{}\\t{}\\n\"{});", mnemonic, pars.join(", "), args)
    }
}

/// Renders the decision tree of one family as a C parse function.
pub struct DecoderEmitter<'a> {
    family: Family,
    archs: &'a ArchitectureTable,
    glossary: &'a FeatureGlossary,
    semantics: &'a SemanticsTable,
    catalog: BuiltinOperands,
    options: &'a GenOptions,
    missing: BTreeSet<String>,
    w: CodeWriter,
}

impl<'a> DecoderEmitter<'a> {
    pub fn new(
        family: Family,
        archs: &'a ArchitectureTable,
        glossary: &'a FeatureGlossary,
        semantics: &'a SemanticsTable,
        options: &'a GenOptions,
        w: CodeWriter,
    ) -> Self {
        Self {
            family,
            archs,
            glossary,
            semantics,
            catalog: BuiltinOperands::new(family),
            options,
            missing: BTreeSet::new(),
            w,
        }
    }

    /// Mnemonics and operand tokens that could not be implemented.
    pub fn missing(&self) -> &BTreeSet<String> {
        &self.missing
    }

    pub fn finish(self) -> (CodeWriter, BTreeSet<String>) {
        (self.w, self.missing)
    }

    /// Write the complete parse function for `tree`.
    pub fn function(&mut self, tree: &Decision<'_>) -> Result<(), GenError> {
        match self.family {
            Family::X86 => {
                self.w.raw(
                    "static inline void x86_parse(x86_parser_t * prs, x86_state_t * emu, bool disassemble, bool execute)",
                );
                self.w.raw("{");
                self.w.line(1, "uint8_t opcode;");
                self.w.line(1, "uoff_t opcode_offset;");
                self.w.raw("restart:");
                self.w.line(1, "opcode_offset = prs->current_position;");
                self.decision(tree, 1)?;
                self.w.raw("}");
            }
            Family::X80 => {
                self.w.raw(
                    "static inline x86_result_t x80_parse(x80_parser_t * prs, x80_state_t * emu, x86_state_t * emu86, bool disassemble, bool execute)",
                );
                self.w.raw("{");
                self.w.line(1, "uint16_t old_pc = prs->current_position;");
                self.w.line(1, "uint8_t opcode;");
                self.decision(tree, 1)?;
                self.w.line(1, "return X86_RESULT(X86_RESULT_SUCCESS, 0);");
                self.w.raw("}");
            }
            Family::X87 => {
                self.w.raw(
                    "static inline void x87_parse(x86_parser_t * prs, x86_state_t * emu, bool sync, uint16_t fop, uint16_t fcs, uaddr_t fip, uint16_t fds, uaddr_t fdp, x86_segnum_t segment_number, uoff_t segment_offset, bool disassemble, bool execute)",
                );
                self.w.raw("{");
                self.w.line(1, "_seg = segment_number;");
                self.w.line(1, "_off = segment_offset;");
                self.decision(tree, 1)?;
                self.w.raw("}");
            }
        }
        Ok(())
    }

    fn undefined(&mut self, depth: usize) {
        let marker = match self.family {
            Family::X86 => &self.options.undefined.x86,
            Family::X80 => &self.options.undefined.x80,
            Family::X87 => &self.options.undefined.x87,
        };
        self.w.line(depth, marker);
    }

    /// Write a decision. Returns whether control falls through to the end of the
    /// enclosing case.
    fn decision(&mut self, decision: &Decision<'_>, depth: usize) -> Result<bool, GenError> {
        match decision {
            Decision::Switch { axis, path, arms } => {
                self.switch(*axis, path, arms, depth)?;
                Ok(true)
            }
            Decision::ModRm { register, memory } => {
                if self.family == Family::X87 {
                    self.w.line(depth, "prs->modrm_byte = fop & 0xFF;");
                }
                else {
                    self.w.line(depth, "prs->modrm_byte = x86_fetch8(prs, emu);");
                }
                match memory {
                    Some(memory) => {
                        self.w.line(depth, "if((prs->modrm_byte & 0xC0) == 0xC0)");
                        self.w.line(depth, "{");
                        self.decision(register, depth + 1)?;
                        self.w.line(depth, "}");
                        self.w.line(depth, "else");
                        self.w.line(depth, "{");
                        if self.family != Family::X87 {
                            self.w.line(depth + 1, "x86_parse_modrm(prs, emu, execute);");
                        }
                        self.decision(memory, depth + 1)?;
                        self.w.line(depth, "}");
                        Ok(true)
                    }
                    None => self.decision(register, depth),
                }
            }
            Decision::Chain { branches, otherwise } => {
                for (idx, branch) in branches.iter().enumerate() {
                    let condition = branch.condition.render(self.family, self.archs, self.glossary)?;
                    let keyword = if idx == 0 { "if" } else { "else if" };
                    self.w.line(depth, format!("{}({})", keyword, condition));
                    self.w.line(depth, "{");
                    self.decision(&branch.body, depth + 1)?;
                    self.w.line(depth, "}");
                }
                if let Some(otherwise) = otherwise {
                    self.w.line(depth, "else");
                    self.w.line(depth, "{");
                    self.decision(otherwise, depth + 1)?;
                    self.w.line(depth, "}");
                }
                Ok(true)
            }
            Decision::Leaf { instruction, form, .. } => self.leaf(instruction, *form, depth),
            Decision::Undefined => {
                self.undefined(depth);
                Ok(true)
            }
        }
    }

    fn switch(&mut self, axis: Axis, path: &Path, arms: &[Decision<'_>], depth: usize) -> Result<(), GenError> {
        let root = path.is_empty();
        let header = match (axis, self.family) {
            (Axis::Byte, Family::X86) if root => "switch((opcode = x86_translate_opcode(prs, x86_fetch8(prs, emu))))",
            (Axis::Byte, Family::X86) => "switch((opcode = x86_fetch8(prs, emu)))",
            (Axis::Byte, Family::X80) => "switch((opcode = x80_fetch8(prs, emu)))",
            (Axis::Byte, Family::X87) => "switch(fop >> 8)",
            (Axis::RegField, _) => "switch(REGFLDVAL(prs))",
            (Axis::MemField, _) => "switch(MEMFLDVAL(prs))",
            (Axis::Prefix, _) => "switch(prs->simd_prefix)",
            (Axis::ModField, _) => {
                return Err(SynthError::ModFieldSwitch { path: path.to_string() }.into());
            }
        };
        self.w.line(depth, header);
        self.w.line(depth, "{");
        for (idx, arm) in arms.iter().enumerate() {
            let label = match axis {
                Axis::Byte => format!("case 0x{:02X}:", idx),
                Axis::Prefix => match idx {
                    1 => "case X86_PREF_66:".to_string(),
                    2 => "case X86_PREF_F3:".to_string(),
                    3 => "case X86_PREF_F2:".to_string(),
                    _ => "default:".to_string(),
                },
                _ => format!("case {}:", idx),
            };
            self.w.line(depth, label);
            if self.decision(arm, depth + 1)? {
                self.w.line(depth + 1, "break;");
            }
        }
        if matches!(axis, Axis::RegField | Axis::MemField) {
            self.w.line(depth, "default:");
            self.w.line(depth + 1, "assert(false);");
        }
        self.w.line(depth, "}");
        Ok(())
    }

    fn leaf(&mut self, ins: &Instruction, form: Option<ModRmForm>, depth: usize) -> Result<bool, GenError> {
        self.w.line(depth, format!("/* {} */", ins.syntax));
        if ins.is_prefix() {
            self.prefix(ins, form, depth);
            return Ok(false);
        }
        match self.family {
            Family::X80 => self.leaf_x80(ins, depth),
            _ => self.leaf_x86(ins, form, depth),
        }
    }

    fn illegal_with_rex(&mut self, depth: usize) {
        self.w.line(depth, "if(prs->rex_prefix)");
        self.w.line(depth, "{");
        self.w.line(depth + 1, "UNDEFINED();");
        self.w.line(depth, "}");
    }

    /// Parser state updates of a prefix pseudo-instruction, followed by a restart.
    fn prefix(&mut self, ins: &Instruction, form: Option<ModRmForm>, depth: usize) {
        let mnem = ins.mnemonic();
        let name = &mnem[..mnem.len() - 1];
        let d = depth;

        if SEGMENT_PREFIXES.contains(&mnem) {
            self.illegal_with_rex(d);
            self.w.line(d, format!("prs->segment = X86_R_{};", name));
            if name == "DS3" || name == "IRAM" {
                self.w.line(d, "prs->destination_segment = prs->segment;");
            }
            else {
                self.w.line(d, "prs->source_segment = prs->segment;");
            }
            if name == "DS2" {
                self.w.line(d, "prs->source_segment2 = prs->segment;");
            }
            if name != "DS3" {
                self.w.line(d, "prs->source_segment3 = prs->segment;");
            }
        }
        else if REPEAT_PREFIXES.contains(&mnem) {
            self.illegal_with_rex(d);
            self.w.line(d, format!("prs->rep_prefix = X86_PREF_{};", name));
            match name {
                "REPZ" => self.w.line(d, "prs->simd_prefix = X86_PREF_F3;"),
                "REPNZ" => self.w.line(d, "prs->simd_prefix = X86_PREF_F2;"),
                _ => {}
            }
        }
        else {
            match name {
                "REX" => {
                    self.illegal_with_rex(d);
                    self.w.line(d, "prs->rex_prefix = true;");
                    self.w.line(d, "prs->rex_w = (opcode & X86_REX_W) != 0;");
                    self.w.line(d, "prs->rex_r = opcode & X86_REX_R ? 8 : 0;");
                    self.w.line(d, "prs->evex_vx = prs->rex_x = opcode & X86_REX_X ? 8 : 0;");
                    self.w.line(d, "prs->evex_vb = prs->rex_b = opcode & X86_REX_B ? 8 : 0;");
                }
                "OPSIZE" => {
                    self.illegal_with_rex(d);
                    self.w.line(
                        d,
                        "prs->operation_size = prs->code_size == SIZE_16BIT ? SIZE_32BIT : SIZE_16BIT;",
                    );
                    self.w.line(d, "if(prs->simd_prefix == X86_PREF_NONE)");
                    self.w.line(d, "{");
                    self.w.line(d + 1, "prs->simd_prefix = X86_PREF_66;");
                    self.w.line(d, "}");
                }
                "ADSIZE" => {
                    self.illegal_with_rex(d);
                    self.w.line(
                        d,
                        "prs->address_size = prs->code_size == SIZE_32BIT ? SIZE_16BIT : SIZE_32BIT;",
                    );
                }
                "LOCK" => {
                    self.illegal_with_rex(d);
                    self.w.line(d, "prs->lock_prefix = true;");
                }
                "USR" => {
                    self.illegal_with_rex(d);
                    self.w.line(d, "prs->user_mode = true;");
                }
                "VEX2" | "VEX3" | "XOP" => self.vex_prefix(name, form, d),
                _ => {
                    log::warn!("no prefix handler for '{}'", mnem);
                    self.missing.insert(mnem.to_string());
                    self.w.line(d, "/* TODO */;");
                }
            }
        }
        self.w.line(d, "goto restart;");
    }

    fn vex_prefix(&mut self, name: &str, form: Option<ModRmForm>, d: usize) {
        self.w.line(d, "{");
        self.w.line(d, "if(prs->simd_prefix != X86_PREF_NONE || prs->rex_prefix)");
        self.w.line(d + 1, "UNDEFINED();");
        if form.is_none() {
            self.w.line(d + 1, "uint8_t byte = x86_fetch8(prs, emu);");
        }
        else {
            self.w.line(d + 1, "uint8_t byte = prs->modrm_byte;");
        }
        self.w.line(d + 1, "prs->rex_r = (byte & 0x80) == 0 ? 8 : 0;");
        if name == "VEX2" {
            self.w.line(d + 1, "prs->evex_vx = prs->rex_x = 0;");
            self.w.line(d + 1, "prs->evex_vb = prs->rex_b = 0;");
            self.w.line(d + 1, "prs->opcode_map = 1;");
            self.w.line(d + 1, "prs->rex_w = false;");
        }
        else {
            self.w.line(d + 1, "prs->evex_vx = prs->rex_x = (byte & 0x40) == 0 ? 8 : 0;");
            self.w.line(d + 1, "prs->evex_vb = prs->rex_b = (byte & 0x20) == 0 ? 8 : 0;");
            self.w.line(d + 1, "prs->opcode_map = byte & 0x1F;");
            let maps = if name == "VEX3" { ["0x01", "0x02", "0x03"] } else { ["0x08", "0x09", "0x0A"] };
            self.w.line(
                d + 1,
                format!(
                    "if(prs->opcode_map != {} && prs->opcode_map != {} && prs->opcode_map != {})",
                    maps[0], maps[1], maps[2]
                ),
            );
            self.w.line(d + 2, "UNDEFINED();");
            self.w.line(d + 1, "byte = x86_fetch8(prs, emu);");
            self.w.line(d + 1, "prs->rex_w = (byte & 0x80) != 0;");
        }
        self.w.line(d + 1, "prs->vex_v = ((byte >> 3) & 0xF) ^ 0xF;");
        self.w.line(d + 1, "prs->vex_l = (byte & 0x04) != 0 ? 1 : 0;");
        self.w.line(d + 1, "prs->simd_prefix = (x86_simd_prefix_t)(byte & 3);");
        self.w.line(d, "}");
    }

    /// Operand templates of a syntax. Immediates are numbered in operand order.
    fn templates(&mut self, syntax: &Syntax, record_missing: bool) -> Vec<OperandTemplate> {
        let mut count = 0;
        let mut out = Vec::with_capacity(syntax.operands.len());
        for token in &syntax.operands {
            match self.catalog.operand(token) {
                Some(t) if t.has_prepare() => {
                    out.push(t.numbered(count));
                    count += 1;
                }
                Some(t) => out.push(t.clone()),
                None => {
                    if record_missing {
                        log::warn!("{}: unknown operand '{}'", syntax.mnemonic, token);
                        self.missing.insert(token.clone());
                    }
                    out.push(OperandTemplate::default());
                }
            }
        }
        out
    }

    /// Write the fetch statements of the operands, opening a block if there are any.
    fn prepare(&mut self, templates: &[OperandTemplate], size: Option<OperandSize>, depth: usize) -> usize {
        let mut d = depth;
        for (idx, text) in templates.iter().filter_map(|t| t.prepare_text(size)).enumerate() {
            if idx == 0 {
                self.w.line(d, "{");
                d += 1;
            }
            self.w.line(d, text);
        }
        d
    }

    /// Write one disassembly line per syntax, selecting the alternate at run time.
    fn disassembly(&mut self, lines: &[(Option<&str>, String)], depth: usize) {
        if lines.len() == 1 {
            self.w.line(depth, &lines[0].1);
            return;
        }
        for (guard, line) in lines {
            match guard {
                Some(flag) => self.w.line(depth, format!("if(prs->{})", flag)),
                None => self.w.line(depth, "else"),
            }
            self.w.line(depth, "{");
            self.w.line(depth + 1, line);
            self.w.line(depth, "}");
        }
    }

    /// Write an expanded semantics block bracketed by line directives.
    fn body(&mut self, block: &SemanticsBlock, expansion: &Expansion<'_>, depth: usize) {
        let code = expansion.expand(&block.body);
        if self.options.line_directives {
            self.w.raw(format!("#line {} \"{}\"", block.line, self.options.source_name));
        }
        self.w.line(depth, code);
        if self.options.line_directives {
            let next = self.w.next_line() + 1;
            self.w.raw(format!("#line {} \"{}\"", next, self.options.output_name));
        }
    }

    fn leaf_x80(&mut self, ins: &Instruction, depth: usize) -> Result<bool, GenError> {
        if let Some(token) = ins.operands().iter().find(|t| !self.catalog.contains(t)) {
            log::warn!("{}: unknown operand '{}'", ins.mnemonic(), token);
            self.missing.insert(ins.mnemonic().to_string());
            self.w.line(depth, "/* TODO */;");
            return Ok(true);
        }
        let templates = self.templates(&ins.syntax, false);
        let d = self.prepare(&templates, None, depth);

        let mut lines = Vec::new();
        if let Some(intel) = ins.alternate(SyntaxKind::Intel) {
            let alt = self.templates(intel, false);
            lines.push((
                Some("use_intel8080_syntax"),
                debug_line(&intel.mnemonic.to_lowercase(), &alt, None),
            ));
        }
        lines.push((None, debug_line(&ins.mnemonic().to_lowercase(), &templates, None)));
        self.disassembly(&lines, d);

        let query = Query {
            family: Family::X80,
            mnemonic: ins.mnemonic(),
            operands: ins.operands(),
            size: None,
            form: None,
        };
        let semantics = self.semantics;
        match semantics.select(&query) {
            Selection::Block { block, .. } => {
                self.w.line(d, "if(!execute)");
                self.w.line(d + 1, "return X86_RESULT(X86_RESULT_SUCCESS, 0);");
                self.w.line(d, "{");
                self.body(block, &Expansion::new(Family::X80, &templates), d + 1);
                self.w.line(d, "}");
            }
            Selection::MissingConditions => {
                self.w.raw(format!("// MISSING CONDITIONS: {}", ins.mnemonic()));
            }
            Selection::MissingInstruction => {
                self.w.raw(format!("// MISSING INSTRUCTION: {}", ins.mnemonic()));
                self.missing.insert(ins.mnemonic().to_string());
            }
        }

        if d > depth {
            self.w.line(depth, "}");
        }
        Ok(true)
    }

    fn leaf_x86(&mut self, ins: &Instruction, form: Option<ModRmForm>, depth: usize) -> Result<bool, GenError> {
        let templates = self.templates(&ins.syntax, true);
        let (sizes, option) = size_plan(&ins.syntax, &templates);

        let has = |t: &str| ins.operands().iter().any(|o| o == t);
        if ins.mnemonic() == "MOV" && (has("Cy") || has("Dy")) {
            self.w.line(
                depth,
                "if(!x86_traits_is_long_mode_supported(&prs->cpu_traits) && prs->lock_prefix)",
            );
            self.w.line(depth, "{");
            self.w.line(depth + 1, "UNDEFINED();");
            self.w.line(depth, "}");
        }

        self.each_size(&sizes, option, depth, &mut |this: &mut Self, d: usize, size: Option<OperandSize>| {
            this.sized_x86(ins, form, &templates, size, d)
        })?;
        Ok(true)
    }

    /// Write `f` once per operation size, inside the C switch that selects it.
    fn each_size(
        &mut self,
        sizes: &str,
        option: SizeOption,
        depth: usize,
        f: &mut dyn FnMut(&mut Self, usize, Option<OperandSize>) -> Result<(), GenError>,
    ) -> Result<(), GenError> {
        let has = |c: char| sizes.contains(c);
        if sizes.len() <= 1 {
            return f(self, depth, sizes.chars().next().and_then(OperandSize::from_letter));
        }

        if option == SizeOption::Control {
            self.w.line(depth, "if(prs->code_size == SIZE_64BIT)");
            self.w.line(depth, "{");
            f(self, depth + 1, Some(OperandSize::Quad))?;
            self.w.line(depth, "}");
            self.w.line(depth, "else");
            self.w.line(depth, "{");
            if has('w') {
                self.w.line(depth + 1, "switch(prs->operation_size)");
                self.w.line(depth + 1, "{");
                self.w.line(depth + 1, "case SIZE_16BIT:");
                f(self, depth + 2, Some(OperandSize::Word))?;
                self.w.line(depth + 2, "break;");
                self.w.line(depth + 1, "case SIZE_32BIT:");
                f(self, depth + 2, Some(OperandSize::Long))?;
                self.w.line(depth + 2, "break;");
                self.w.line(depth + 1, "default:");
                self.w.line(depth + 2, "assert(false);");
                self.w.line(depth + 1, "}");
            }
            else {
                f(self, depth + 1, Some(OperandSize::Long))?;
            }
            self.w.line(depth, "}");
            return Ok(());
        }

        let split_long = has('q') && matches!(option, SizeOption::Branch | SizeOption::Stack);
        if has('q') && option == SizeOption::Branch {
            // Intel 64 branches always use a 64-bit operand in long mode
            self.w.line(depth, "if(prs->operation_size == SIZE_64BIT && x86_is_intel64(emu))");
            self.w.line(depth, "{");
            f(self, depth + 1, Some(OperandSize::Quad))?;
            self.w.line(depth, "}");
            self.w.line(depth, "else");
        }
        self.w.line(depth, "switch(prs->operation_size)");
        self.w.line(depth, "{");
        self.w.line(depth, "case SIZE_16BIT:");
        if has('w') {
            f(self, depth + 1, Some(OperandSize::Word))?;
            self.w.line(depth + 1, "break;");
        }
        self.w.line(depth, "case SIZE_32BIT:");
        if !has('q') {
            self.w.line(depth, "case SIZE_64BIT:");
        }
        let mut d = depth;
        if split_long {
            self.w.line(depth + 1, "if(prs->code_size != SIZE_64BIT)");
            self.w.line(depth + 1, "{");
            d += 1;
        }
        f(self, d + 1, Some(OperandSize::Long))?;
        self.w.line(d + 1, "break;");
        if split_long {
            self.w.line(depth + 1, "}");
            self.w.line(depth + 1, "__attribute__((fallthrough));");
        }
        if has('q') {
            self.w.line(depth, "case SIZE_64BIT:");
            f(self, depth + 1, Some(OperandSize::Quad))?;
            self.w.line(depth + 1, "break;");
        }
        self.w.line(depth, "default:");
        self.w.line(depth + 1, "assert(false);");
        self.w.line(depth, "}");
        Ok(())
    }

    fn sized_x86(
        &mut self,
        ins: &Instruction,
        form: Option<ModRmForm>,
        templates: &[OperandTemplate],
        size: Option<OperandSize>,
        depth: usize,
    ) -> Result<(), GenError> {
        let x87 = self.family == Family::X87;
        let mut d = self.prepare(templates, size, depth);

        let mnem = sized_mnemonic(ins.mnemonic(), size);
        let x87_async = x87 && X87_ASYNC.contains(&mnem.as_str());

        let mut lines = Vec::new();
        if let Some(nec) = ins.alternate(SyntaxKind::Nec) {
            // NEC processors have no 32-bit or 64-bit operands
            if !matches!(size, Some(OperandSize::Long | OperandSize::Quad)) {
                let alt = self.templates(nec, false);
                lines.push((Some("use_nec_syntax"), debug_line(&nec.mnemonic.to_lowercase(), &alt, size)));
            }
        }
        lines.push((None, debug_line(&mnem, templates, size)));

        let esc = mnem == "esc";
        if x87 && x87_async {
            self.w.line(d, "if(!(prs->fpu_type == X87_FPU_INTEGRATED || !sync || !execute))");
            self.w.line(d + 1, "DEBUG(\"[FPU] ~\\t\");");
            self.disassembly(&lines, d);
        }
        else if x87 || esc {
            if x87 {
                self.w.line(d, "if(prs->fpu_type == X87_FPU_INTEGRATED || !sync || !execute)");
            }
            else {
                self.w.line(
                    d,
                    "if(prs->fpu_type != X87_FPU_INTEGRATED && (execute || prs->fpu_type == X87_FPU_NONE))",
                );
            }
            self.w.line(d, "{");
            self.disassembly(&lines, d + 1);
            self.w.line(d, "}");
        }
        else {
            self.disassembly(&lines, d);
        }

        if ins.mnemonic() != "ESC" {
            self.w.line(d, "if(!execute)");
            self.w.line(d + 1, "return;");
        }

        let has = |t: &str| ins.operands().iter().any(|o| o == t);
        let control_move = ins.mnemonic() == "MOV" && (has("Cy") || has("Dy"));
        if form == Some(ModRmForm::Memory) {
            // IP relative addresses need the final instruction length
            self.w.line(d, "x86_calculate_operand_address(emu);");
            let lockable = LOCKABLE.contains(&ins.mnemonic()) && templates.iter().any(|t| t.address);
            if !lockable && !control_move && !x87 {
                self.w.line(d, "NO_LOCK();");
            }
        }
        else {
            self.w.line(d, "if(execute)");
            self.w.line(d + 1, "NO_LOCK();");
        }

        let query = Query {
            family: self.family,
            mnemonic: ins.mnemonic(),
            operands: ins.operands(),
            size,
            form,
        };
        let semantics = self.semantics;
        match semantics.select(&query) {
            Selection::Block { block, resolved } => {
                let mut operands = templates.to_vec();
                if let Some(segment) = &resolved.segment {
                    operands.insert(0, self.catalog.operand(segment).cloned().unwrap_or_default());
                }
                let mut expansion = Expansion::new(self.family, &operands);
                expansion.condition = resolved.condition.as_deref();
                expansion.size = match size {
                    Some(OperandSize::Quad) if matches!(resolved.name.as_str(), "LAR" | "LSL") => Some(OperandSize::Long),
                    other => other,
                };

                let used = params(&block.body);
                let selector = if used.contains("$A") {
                    Some(("switch(prs->address_size)", true))
                }
                else if used.contains("$S") {
                    Some(("switch(x86_get_stack_size(emu))", false))
                }
                else {
                    None
                };
                match selector {
                    Some((header, address)) => {
                        self.w.line(d, header);
                        self.w.line(d, "{");
                        for width in [OperandSize::Word, OperandSize::Long, OperandSize::Quad] {
                            if address {
                                expansion.address_size = Some(width);
                            }
                            else {
                                expansion.stack_size = Some(width);
                            }
                            self.w.line(d, format!("case SIZE_{}BIT:", width.bits()));
                            self.w.line(d + 1, "{");
                            self.body(block, &expansion, d + 2);
                            self.w.line(d + 1, "}");
                            self.w.line(d + 1, "break;");
                        }
                        self.w.line(d, "default:");
                        self.w.line(d + 1, "assert(false);");
                        self.w.line(d, "}");
                    }
                    None => {
                        self.w.line(d, "{");
                        if x87 && !x87_async {
                            self.w.line(d + 1, "if(emu->x87.fpu_type == X87_FPU_INTEGRATED)");
                            self.w.line(d + 2, "_x87_int();");
                            self.w.line(d + 1, "_x87_busy();");
                        }
                        if x87 && (x87_async || !X87_ENVIRONMENT.contains(&mnem.as_str())) {
                            self.w.line(d + 1, "x87_store_exception_pointers(emu);");
                        }
                        self.body(block, &expansion, d + 1);
                        self.w.line(d, "}");
                    }
                }
            }
            Selection::MissingConditions => {
                log::debug!("{}: no semantics block matches", ins.syntax);
                self.w.raw(format!("// MISSING CONDITIONS: {}", ins.mnemonic()));
            }
            Selection::MissingInstruction => {
                self.w.raw(format!("// MISSING INSTRUCTION: {}", ins.mnemonic()));
                self.missing.insert(ins.mnemonic().to_string());
            }
        }

        if d > depth {
            d -= 1;
            self.w.line(d, "}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        path::{Path, Step},
        spec_file::SpecDocument,
        test_fixtures::{fixture_archs, fixture_glossary},
    };

    fn ins(mnemonic: &str, operands: &[&str]) -> Instruction {
        Instruction::new(Syntax::new(mnemonic, operands))
    }

    struct Fixture {
        archs: ArchitectureTable,
        glossary: FeatureGlossary,
        semantics: SemanticsTable,
        options: GenOptions,
    }

    fn fixture(blocks: &str) -> Fixture {
        Fixture {
            archs: fixture_archs(),
            glossary: fixture_glossary(),
            semantics: SemanticsTable::new(SpecDocument::parse(blocks).semantics),
            options: GenOptions {
                line_directives: false,
                ..Default::default()
            },
        }
    }

    fn render(fx: &Fixture, family: Family, decision: &Decision<'_>) -> (String, BTreeSet<String>) {
        let mut emitter = DecoderEmitter::new(
            family,
            &fx.archs,
            &fx.glossary,
            &fx.semantics,
            &fx.options,
            CodeWriter::new(),
        );
        emitter.decision(decision, 0).unwrap();
        let (w, missing) = emitter.finish();
        (w.into_string(), missing)
    }

    fn leaf<'t>(instruction: &'t Instruction, form: Option<ModRmForm>) -> Decision<'t> {
        Decision::Leaf {
            instruction,
            path: Path::from_steps([Step::byte(0)]),
            form,
        }
    }

    #[test]
    fn test_size_plan() {
        let x86 = BuiltinOperands::new(Family::X86);
        let plan = |m: &str, ops: &[&str]| {
            let syntax = Syntax::new(m, ops);
            let templates: Vec<OperandTemplate> =
                ops.iter().filter_map(|o| x86.operand(o).cloned()).collect();
            size_plan(&syntax, &templates)
        };
        assert_eq!(plan("ADD", &["Rb", "Gb"]), ("b".to_string(), SizeOption::Plain));
        assert_eq!(plan("ADD", &["Rv", "Ib"]), ("wlq".to_string(), SizeOption::Plain));
        assert_eq!(plan("PUSH", &["Iz"]), ("wlq".to_string(), SizeOption::Stack));
        assert_eq!(plan("JZ", &["Jb"]), ("wlq".to_string(), SizeOption::Branch));
        assert_eq!(plan("MOV", &["Rd", "Cy"]), ("lq".to_string(), SizeOption::Control));
        assert_eq!(plan("NOP", &[]), (String::new(), SizeOption::Plain));
    }

    #[test]
    fn test_sized_mnemonics() {
        assert_eq!(sized_mnemonic("MOVSb", Some(OperandSize::Byte)), "movsb");
        assert_eq!(sized_mnemonic("MOVSv", Some(OperandSize::Quad)), "movsq");
        assert_eq!(sized_mnemonic("PUSHAd", Some(OperandSize::Long)), "pushad");
        assert_eq!(sized_mnemonic("CBW/CWDE/CDQE", Some(OperandSize::Long)), "cwde");
        assert_eq!(sized_mnemonic("NOP", None), "nop");
    }

    #[test]
    fn test_debug_line() {
        let x86 = BuiltinOperands::new(Family::X86);
        let ops = vec![x86.operand("Rb").unwrap().clone(), x86.operand("Ib").unwrap().numbered(0)];
        assert_eq!(
            debug_line("add", &ops, Some(OperandSize::Byte)),
            "DEBUG(\"add\\t%s, %\"PRIX64\"\\n\", x86_register_name8(prs, MEMFLD(prs)), (uoff_t)imm0);"
        );
        assert_eq!(debug_line("nop", &[], None), "DEBUG(\"nop\\n\");");
    }

    #[test]
    fn test_segment_prefix() {
        let fx = fixture("");
        let es = ins("ES:", &[]);
        let (text, _) = render(&fx, Family::X86, &leaf(&es, None));
        assert!(text.contains("prs->segment = X86_R_ES;"));
        assert!(text.contains("prs->source_segment = prs->segment;"));
        assert!(text.contains("prs->source_segment3 = prs->segment;"));
        assert!(text.trim_end().ends_with("goto restart;"));

        let ds3 = ins("DS3:", &[]);
        let (text, _) = render(&fx, Family::X86, &leaf(&ds3, None));
        assert!(text.contains("prs->destination_segment = prs->segment;"));
        assert!(!text.contains("source_segment3"));
    }

    #[test]
    fn test_prefix_arm_has_no_break() {
        let fx = fixture("");
        let rex = ins("REX:", &[]);
        let mut arms: Vec<Decision<'_>> = (0..256).map(|_| Decision::Undefined).collect();
        arms[0x40] = leaf(&rex, None);
        let switch = Decision::Switch {
            axis: Axis::Byte,
            path: Path::new(),
            arms,
        };
        let (text, _) = render(&fx, Family::X86, &switch);
        assert!(text.starts_with("switch((opcode = x86_translate_opcode(prs, x86_fetch8(prs, emu))))\n{\n"));
        assert!(text.contains("case 0x40:\n\t/* REX: */\n"));
        assert!(text.contains("\tgoto restart;\ncase 0x41:\n\tUNDEFINED();\n\tbreak;\n"));
    }

    #[test]
    fn test_mode_field_switch_is_rejected() {
        let fx = fixture("");
        let switch = Decision::Switch {
            axis: Axis::ModField,
            path: Path::from_steps([Step::byte(0x0F)]),
            arms: vec![Decision::Undefined, Decision::Undefined],
        };
        let mut emitter = DecoderEmitter::new(
            Family::X86,
            &fx.archs,
            &fx.glossary,
            &fx.semantics,
            &fx.options,
            CodeWriter::new(),
        );
        match emitter.decision(&switch, 0) {
            Err(GenError::Synth(SynthError::ModFieldSwitch { path })) => assert_eq!(path, "0F"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_leaf_with_semantics() {
        let fx = fixture("@instruction MOV|op=b\n\t$0 = $1;\n");
        let mov = ins("MOVb", &["Rb", "Gb"]);
        let (text, missing) = render(&fx, Family::X86, &leaf(&mov, Some(ModRmForm::Register)));
        assert!(missing.is_empty());
        assert!(text.contains(
            "DEBUG(\"movb\\t%s, %s\\n\", x86_register_name8(prs, MEMFLD(prs)), x86_register_name8(prs, REGFLD(prs)));\n"
        ));
        assert!(text.contains("if(!execute)\n\treturn;\nif(execute)\n\tNO_LOCK();\n"));
        assert!(text.contains("\tx86_register_set8(emu, _mem, x86_register_get8(emu, _reg));\n"));
    }

    #[test]
    fn test_missing_instruction_is_recorded() {
        let fx = fixture("");
        let hlt = ins("HLT", &[]);
        let (text, missing) = render(&fx, Family::X86, &leaf(&hlt, None));
        assert!(text.contains("// MISSING INSTRUCTION: HLT"));
        assert!(missing.contains("HLT"));

        let odd = ins("PADDB", &["Pq", "Qq"]);
        assert!(!BuiltinOperands::new(Family::X86).contains("Pq"));
        let (_, missing) = render(&fx, Family::X86, &leaf(&odd, None));
        assert!(missing.contains("Pq"));
        assert!(missing.contains("PADDB"));
    }

    #[test]
    fn test_size_switch() {
        let fx = fixture("@instruction INC\n\t$0.$O += 1;\n");
        let inc = ins("INC", &["Rv"]);
        let (text, _) = render(&fx, Family::X86, &leaf(&inc, Some(ModRmForm::Register)));
        assert!(text.contains("switch(prs->operation_size)\n{\ncase SIZE_16BIT:\n"));
        assert!(text.contains("\tx86_register_set16(emu, _mem, x86_register_get16(emu, _mem) + (1));\n"));
        assert!(text.contains("\tx86_register_set32(emu, _mem, (uint32_t)x86_register_get32(emu, _mem) + (1));\n"));
        assert!(text.contains("case SIZE_64BIT:\n"));
        assert!(text.contains("default:\n\tassert(false);\n}"));
    }

    #[test]
    fn test_memory_form_calculates_address() {
        let fx = fixture("");
        let lea = ins("LEA", &["Gv", "M"]);
        let (text, _) = render(&fx, Family::X86, &leaf(&lea, Some(ModRmForm::Memory)));
        assert!(text.contains("\tx86_calculate_operand_address(emu);\n\tNO_LOCK();\n"));
    }

    #[test]
    fn test_nec_alternate() {
        let fx = fixture("");
        let mut nop = ins("NOP", &[]);
        nop.alternates.push((SyntaxKind::Nec, Syntax::new("NOP", &[])));
        let (text, _) = render(&fx, Family::X86, &leaf(&nop, None));
        assert!(text.contains("if(prs->use_nec_syntax)\n{\n\tDEBUG(\"nop\\n\");\n}\nelse\n{\n\tDEBUG(\"nop\\n\");\n}\n"));
    }

    #[test]
    fn test_x80_leaf() {
        let fx = fixture("@instruction Z80.LD\n\t$0 = $1;\n");
        let mut ld = ins("LD", &["A", "(HL)"]);
        ld.alternates.push((SyntaxKind::Intel, Syntax::new("MOV", &["A", "M"])));
        let (text, missing) = render(&fx, Family::X80, &leaf(&ld, None));
        assert!(missing.is_empty());
        assert!(text.contains("if(prs->use_intel8080_syntax)\n{\n\tDEBUG(\"mov\\ta, m\\n\");\n}\n"));
        assert!(text.contains("if(!execute)\n\treturn X86_RESULT(X86_RESULT_SUCCESS, 0);\n"));

        let ld_ib = ins("LD", &["B", "Ib"]);
        let (text, _) = render(&fx, Family::X80, &leaf(&ld_ib, None));
        assert!(text.starts_with("/* LD B, Ib */\n{\n\tsoff_t imm0 = (int8_t)x80_fetch8(prs, emu);\n"));
        assert!(text.trim_end().ends_with('}'));
    }

    #[test]
    fn test_chain_rendering() {
        let fx = fixture("");
        let archs = &fx.archs;
        let pop = ins("POP", &["CS"]);
        let chain = Decision::Chain {
            branches: vec![crate::synth::Branch {
                condition: crate::condition::Condition {
                    cpu_runs: vec![crate::condition::CpuRun::Exactly(archs.lookup("8086").unwrap())],
                    ..Default::default()
                },
                body: leaf(&pop, None),
            }],
            otherwise: Some(Box::new(Decision::Undefined)),
        };
        let (text, _) = render(&fx, Family::X86, &chain);
        assert!(text.starts_with("if(prs->cpu_type == X86_CPU_8086)\n{\n\t/* POP CS */\n"));
        assert!(text.ends_with("}\nelse\n{\n\tUNDEFINED();\n}\n"));
    }
}
