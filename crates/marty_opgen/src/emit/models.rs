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

    marty_opgen::emit/models.rs

    Renders the processor model list.

*/

use std::{collections::BTreeSet, fmt::Write};

use crate::{
    emit::c_string,
    error::SpecError,
    processors::{CpuidMap, Processor, ProcessorTable},
};

/// Renders the processor model list: the CPU version enumeration, the traits table
/// and the name lookup tables for CPUs and FPUs.
pub struct ModelsEmitter<'a> {
    processors: &'a ProcessorTable,
    cpuid: &'a CpuidMap,
}

/// Generated model list and the processor features it could not express.
#[derive(Clone, Debug, Default)]
pub struct ModelsOutput {
    pub text: String,
    pub missing: BTreeSet<String>,
}

fn enumerator(text: &str) -> String {
    text.to_uppercase()
}

impl<'a> ModelsEmitter<'a> {
    pub fn new(processors: &'a ProcessorTable, cpuid: &'a CpuidMap) -> Self {
        Self { processors, cpuid }
    }

    pub fn emit(&self) -> Result<ModelsOutput, SpecError> {
        let mut out = ModelsOutput::default();
        let text = &mut out.text;

        text.push_str("typedef enum x86_cpu_version_t\n{\n");
        for cpu in self.processors.cpus() {
            let _ = writeln!(text, "\tX86_CPU_TYPE_{},", enumerator(&cpu.id));
        }
        text.push_str("} x86_cpu_version_t;\n");

        text.push_str("x86_cpu_traits_t x86_cpu_traits[] =\n{\n");
        for cpu in self.processors.cpus() {
            let (entry, missing) = self.traits_entry(cpu)?;
            text.push_str(&entry);
            out.missing.extend(missing);
        }
        text.push_str("};\n");

        self.cpu_table(text);
        self.fpu_table(text);
        Ok(out)
    }

    /// One `x86_cpu_traits` initializer.
    fn traits_entry(&self, cpu: &Processor) -> Result<(String, BTreeSet<String>), SpecError> {
        let values = cpu.cpuid_values(self.cpuid);
        let mut fields = String::new();

        if let Some(variant) = &cpu.variant {
            let _ = write!(
                fields,
                "\n\t\t\t.cpu_subtype = X86_CPU_{}_{},",
                enumerator(&cpu.class_name),
                enumerator(variant)
            );
        }

        let fpus = self.processors.fpu_classes(cpu)?;
        if let Some(default) = fpus.first() {
            let _ = write!(fields, "\n\t\t\t.default_fpu = X87_FPU_{},", enumerator(default));
            let types: Vec<String> = fpus.iter().map(|f| format!("(1 << X87_FPU_{})", enumerator(f))).collect();
            let _ = write!(fields, "\n\t\t\t.supported_fpu_types = {},", types.join(" | "));
        }

        if cpu.features.contains("cpuid") {
            let highest = match cpu.highest_function {
                Some(function) => format!("\t\t\t\t.eax = 0x{:08X},\n", function),
                // TODO: derive the highest standard function from the leaves present
                None => "\t\t\t\t.eax = 0x00000001, // TODO\n".to_string(),
            };
            let vendor = cpu.vendor.as_deref().unwrap_or_else(|| {
                log::warn!("Processor '{}' supports CPUID but names no vendor", cpu.id);
                "intel"
            });
            let _ = write!(
                fields,
                "\n\t\t\t.cpuid0 =\n\t\t\t{{\n{}\t\t\t\tX86_CPUID_VENDOR_{},\n\t\t\t}},",
                highest,
                enumerator(vendor)
            );
        }

        for (leaf, registers) in &values.leaves {
            let _ = write!(fields, "\n\t\t\t.{} =\n\t\t\t{{", leaf);
            for (register, value) in registers {
                let _ = write!(fields, "\n\t\t\t\t.{} = {},", register, value);
            }
            fields.push_str("\n\t\t\t},");
        }

        for flag in &values.traits {
            let _ = write!(fields, "\n\t\t\t.{} = true,", flag);
        }

        let entry = format!(
            "\t[X86_CPU_TYPE_{}] =\n\t\t{{\n\t\t\t.description = \"{}\",\n\t\t\t.cpu_type = X86_CPU_{},{}\n\t\t}},\n\n",
            enumerator(&cpu.id),
            c_string(&cpu.description),
            enumerator(&cpu.class_name),
            fields
        );
        Ok((entry, values.unmapped))
    }

    /// Names accepted for a processor: its aliases, then its id unless an alias already covers it.
    fn names(processor: &Processor) -> Vec<String> {
        let mut names = processor.aliases.clone();
        let id = processor.id.to_lowercase();
        if !names.contains(&id) {
            names.push(id);
        }
        names
    }

    fn cpu_table(&self, text: &mut String) {
        text.push_str("\tstatic const struct\n{\n\tconst char * name;\n\tx86_cpu_version_t type;\n} supported_cpu_table[] =\n{\n");
        for cpu in self.processors.cpus() {
            for name in Self::names(cpu) {
                let _ = writeln!(text, "\t{{ \"{}\", X86_CPU_TYPE_{} }},", name, enumerator(&cpu.id));
            }
        }
        text.push_str("};\n");
    }

    fn fpu_table(&self, text: &mut String) {
        text.push_str(
            "\tstatic const struct\n{\n\tconst char * name;\n\tconst char * description;\n\tx87_fpu_type_t type;\n\tx87_fpu_subtype_t subtype;\n} supported_fpu_table[] =\n{\n",
        );
        for fpu in self.processors.fpus() {
            let class = enumerator(&fpu.class_name);
            let subtype = match &fpu.variant {
                Some(variant) => format!("X87_FPU_{}_{}", class, enumerator(variant)),
                None => "0".to_string(),
            };
            let description = c_string(&fpu.description);
            for name in Self::names(fpu) {
                let _ = writeln!(
                    text,
                    "\t{{ \"{}\", \"{}\", X87_FPU_{}, {} }},",
                    name, description, class, subtype
                );
            }
        }
        text.push_str("};\n");
    }
}
