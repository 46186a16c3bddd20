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

    marty_opgen::context.rs

    Generation context: the frozen tables of one specification and the top level generation entry points.

*/

use std::collections::BTreeSet;

use crate::{
    arch::{ArchitectureTable, Family},
    builder::{TrieBuilder, TrieSet},
    emit::{models::ModelsOutput, CodeWriter, DecoderEmitter, ModelsEmitter},
    error::GenError,
    features::FeatureGlossary,
    processors::{CpuidMap, ProcessorRecord, ProcessorTable},
    semantics::SemanticsTable,
    spec_file::{parse_yaml_list, SpecDocument},
    synth::{Decision, Synthesizer},
};

/// Statement written where a family has no instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UndefinedMarkers {
    pub x86: String,
    pub x80: String,
    pub x87: String,
}

impl Default for UndefinedMarkers {
    fn default() -> Self {
        Self {
            x86: "UNDEFINED();".to_string(),
            x80: "/* UNDEFINED(); */".to_string(),
            x87: "X87_UNDEFINED();".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GenOptions {
    /// Architecture that receives the IX/IY forms of 8-bit rows.
    pub index_arch: Option<String>,
    pub emit_metadata: bool,
    /// Bracket semantics bodies with `#line` directives pointing back at the spec file.
    pub line_directives: bool,
    pub source_name: String,
    pub output_name: String,
    pub undefined: UndefinedMarkers,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            index_arch: Some("z80".to_string()),
            emit_metadata: true,
            line_directives: true,
            source_name: String::new(),
            output_name: String::new(),
            undefined: UndefinedMarkers::default(),
        }
    }
}

/// Generated decoder source and the operations it could not implement.
#[derive(Clone, Debug, Default)]
pub struct DecoderOutput {
    pub text: String,
    pub missing: BTreeSet<String>,
}

/// Everything read from one specification file. Frozen once built.
pub struct GenContext {
    pub archs: ArchitectureTable,
    pub glossary: FeatureGlossary,
    pub processors: ProcessorTable,
    pub semantics: SemanticsTable,
    pub tries: TrieSet,
    skipped: usize,
}

impl GenContext {
    /// Parse a specification and build its decode tries.
    pub fn build(text: &str, options: &GenOptions) -> Result<Self, GenError> {
        let doc = SpecDocument::parse(text);
        let archs = doc.architecture_table()?;
        let glossary = doc.glossary()?;
        let records: Vec<ProcessorRecord> = parse_yaml_list(&doc.processors, "processors")?;
        let processors = ProcessorTable::from_records(records, &archs)?;

        let mut builder = TrieBuilder::new(&archs, &glossary, options.index_arch.as_deref());
        for (line, row) in &doc.rows {
            builder.add_line(*line, row)?;
        }
        let skipped = builder.skipped();
        if skipped > 0 {
            log::warn!("{} of {} instruction rows skipped", skipped, doc.rows.len());
        }
        let tries = builder.finish()?;

        log::debug!(
            "read {} architectures, {} processors, {} semantics blocks",
            archs.len(),
            processors.iter().count(),
            doc.semantics.len()
        );

        Ok(Self {
            semantics: SemanticsTable::new(doc.semantics),
            archs,
            glossary,
            processors,
            tries,
            skipped,
        })
    }

    /// Number of instruction rows that were rejected.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn synthesize(&self, family: Family) -> Result<Decision<'_>, GenError> {
        let tree = Synthesizer::new(&self.archs, family).synthesize(self.tries.get(family))?;
        Ok(tree)
    }

    /// Render the `x86_parse`, `x80_parse` and `x87_parse` functions.
    pub fn generate_decoder(&self, options: &GenOptions) -> Result<DecoderOutput, GenError> {
        let mut w = CodeWriter::new();
        let mut missing = BTreeSet::new();

        for family in [Family::X86, Family::X80, Family::X87] {
            let tree = self.synthesize(family)?;
            let mut emitter = DecoderEmitter::new(family, &self.archs, &self.glossary, &self.semantics, options, w);
            emitter.function(&tree)?;
            let (writer, family_missing) = emitter.finish();
            log::debug!("{} decoder: {} missing operations", family, family_missing.len());
            missing.extend(family_missing);
            w = writer;
        }

        Ok(DecoderOutput {
            text: w.into_string(),
            missing,
        })
    }

    /// Render the processor model tables.
    pub fn generate_models(&self) -> Result<ModelsOutput, GenError> {
        let cpuid = CpuidMap::from_glossary(&self.glossary);
        ModelsEmitter::new(&self.processors, &cpuid).emit().map_err(Into::into)
    }

    /// Text dump of the three decode tries.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for family in [Family::X86, Family::X80, Family::X87] {
            out.push_str(&format!("# {}\n", family));
            out.push_str(&self.tries.get(family).dump(&self.archs));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::FIXTURE_SPEC;

    fn options() -> GenOptions {
        GenOptions {
            source_name: "fixture.txt".to_string(),
            output_name: "fixture.gen.c".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_fixture() {
        let ctx = GenContext::build(FIXTURE_SPEC, &options()).unwrap();
        assert_eq!(ctx.skipped(), 0);
        assert!(ctx.semantics.contains("MOV"));
        assert_eq!(ctx.processors.cpus().count(), 1);
    }

    #[test]
    fn test_generate_decoder() {
        let options = options();
        let ctx = GenContext::build(FIXTURE_SPEC, &options).unwrap();
        let out = ctx.generate_decoder(&options).unwrap();

        let x86 = out.text.find("static inline void x86_parse(").unwrap();
        let x80 = out.text.find("static inline x86_result_t x80_parse(").unwrap();
        let x87 = out.text.find("static inline void x87_parse(").unwrap();
        assert!(x86 < x80 && x80 < x87);

        assert!(out.text.contains("/* LEA Gv, M */"));
        assert!(out.text.contains("#line "));
        assert!(out.text.contains(" \"fixture.txt\"\n"));
        assert!(out.text.contains(" \"fixture.gen.c\"\n"));
        assert!(out.missing.contains("LEA"));
        assert!(out.missing.contains("SYSCALL"));
    }

    #[test]
    fn test_generation_is_deterministic() {
        let options = options();
        let first = GenContext::build(FIXTURE_SPEC, &options).unwrap();
        let second = GenContext::build(FIXTURE_SPEC, &options).unwrap();
        assert_eq!(
            first.generate_decoder(&options).unwrap().text,
            second.generate_decoder(&options).unwrap().text
        );
    }

    #[test]
    fn test_generate_models() {
        let ctx = GenContext::build(FIXTURE_SPEC, &options()).unwrap();
        let out = ctx.generate_models().unwrap();
        assert!(out.text.contains("\tX86_CPU_TYPE_I8086,\n"));
        assert!(out.text.contains("\t{ \"i8086\", X86_CPU_TYPE_I8086 },\n"));
    }

    #[test]
    fn test_dump_lists_families() {
        let ctx = GenContext::build(FIXTURE_SPEC, &options()).unwrap();
        let dump = ctx.dump();
        assert!(dump.starts_with("# x86\n"));
        assert!(dump.contains("# x80\n"));
        assert!(dump.contains("# x87\n"));
    }
}
