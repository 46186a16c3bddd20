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

    marty_opgen::test_fixtures.rs

    Small synthetic instruction set shared by the unit tests.

*/

use crate::{
    arch::{ArchRecord, ArchitectureTable, Family},
    features::FeatureGlossary,
};

pub const FIXTURE_ARCHITECTURES: &str = r#"
- id: 8086
- id: 186
  predecessors: [8086]
- id: v20
  name: V20
  predecessors: [186]
- id: 286
  predecessors: [186]
- id: 386
  predecessors: [286]
  modes: [16, 32]
- id: x64
  name: X64
  predecessors: [386]
  modes: [16, 32, 64]
- id: 8080
  type: 8bit
- id: 8085
  type: 8bit
  predecessors: [8080]
  generate: no
- id: z80
  type: 8bit
  name: Z80
  predecessors: [8080]
- id: 8087
  type: fpu
- id: 287
  type: fpu
  predecessors: [8087]
- id: 387
  type: fpu
  predecessors: [287]
"#;

pub const FIXTURE_FEATURES: &str = "\
# name\tdescription
sse2\tCPUID.EAX=00000001:EDX.26
nec\tCPU:186/V20
amd\tamd
emu\temulated
cx8\tCPUID.EAX=00000001:EDX.CX8/CPUID.EAX=00000001:ECX.CX16
syscall\tCPUID.EAX=80000001:EDX.SYSCALL_K6|CPUID.EAX=80000001:EDX.SYSCALL
";

pub const FIXTURE_PROCESSORS: &str = r#"
- id: i8086
  class: 8086
  description: Intel 8086
  aliases: 8086
  fpu: i8087
- id: necv20
  class: v20
  variant: v20
  description: NEC V20
  features: nec
- id: k8
  class: x64
  description: AMD K8
  vendor: amd
  family: 15
  model: 4
  stepping: 2
  highest_function: 1
  highest_extended_function: 8
  features: cpuid, sse2, amd, syscall
- id: k8e
  class: x64
  description: AMD K8 without SYSCALL
  features: $k8, -syscall
- id: i8087
  type: fpu
  class: 8087
  description: Intel 8087
  aliases: 8087
"#;

/// A complete specification file covering every section kind.
pub const FIXTURE_SPEC: &str = "\
@comment fixture instruction set
@architectures
- id: 8086
- id: 186
  predecessors: [8086]
- id: 386
  predecessors: [186]
- id: x64
  name: X64
  predecessors: [386]
  modes: [16, 32, 64]
- id: 8080
  type: 8bit
- id: z80
  type: 8bit
  name: Z80
  predecessors: [8080]
- id: 8087
  type: fpu
@features
sse2\tCPUID.EAX=00000001:EDX.26
@processors
- id: i8086
  class: 8086
  description: Intel 8086
@instructionset
# x86
00\t8086+\tADD\tEb,Gb
0F\t8086\tPOP\tCS
0F05\tx64,64\tSYSCALL
0F20\t386+\tMOV\tRd,Cy
0F58\t386+\tADDPS\tVx,Wx\tfeature:\tsse2
660F58\t386+\tADDPD\tVx,Wx\tfeature:\tsse2
8D\t8086+\tLEA\tGv,M
90\t8086+\tNOP\t-\tnec:\tNOP
C6/0\t8086+\tMOVb\tEb,Ib
D8/0\t8087+\tFADD\tST,mem32real
# x80
00\t8080+\tNOP
7E\t8080+\tMOV\tA,(HL)\tintel:\tMOV\tA,M
@instruction MOV|op=b
\t$0 = $1;
@instruction NOP
\t;
";

pub fn archs_from(text: &str) -> ArchitectureTable {
    let records: Vec<ArchRecord> = serde_yaml::from_str(text).unwrap();
    ArchitectureTable::from_records(records).unwrap()
}

pub fn fixture_archs() -> ArchitectureTable {
    archs_from(FIXTURE_ARCHITECTURES)
}

pub fn fixture_glossary() -> FeatureGlossary {
    FeatureGlossary::parse(FIXTURE_FEATURES).unwrap()
}

#[test]
fn test_fixture_families() {
    let archs = fixture_archs();
    assert_eq!(archs.family_list(Family::X80).len(), 3);
    assert!(archs.get(archs.lookup("x64").unwrap()).has_mode("64"));
    assert!(!archs.get(archs.lookup("386").unwrap()).has_mode("64"));
}
