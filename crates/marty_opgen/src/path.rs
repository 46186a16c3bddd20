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

    marty_opgen::path.rs

    A trie address: the sequence of decode steps (opcode bytes, ModRM
    sub-fields and SIMD prefix) that leads to a set of instruction forms.

*/

use std::{fmt, ops::Range};

use strum_macros::Display;

/// The field of the instruction stream inspected by a trie node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum Axis {
    #[strum(serialize = "byte")]
    Byte,
    #[strum(serialize = "modfield")]
    ModField,
    #[strum(serialize = "regfield")]
    RegField,
    #[strum(serialize = "memfield")]
    MemField,
    #[strum(serialize = "prefix")]
    Prefix,
}

impl Axis {
    /// Number of slots in a table keyed on this axis.
    pub const fn fan_out(&self) -> usize {
        match self {
            Axis::Byte => 256,
            Axis::ModField => 2,
            Axis::RegField => 8,
            Axis::MemField => 8,
            Axis::Prefix => 4,
        }
    }

    /// Whether this axis selects on part of a ModRM byte.
    pub const fn is_modrm_field(&self) -> bool {
        matches!(self, Axis::ModField | Axis::RegField | Axis::MemField)
    }
}

/// Slot index of the memory form on a [Axis::ModField] node.
pub const MODFIELD_MEMORY: u8 = 0;
/// Slot index of the register form (mod == 3) on a [Axis::ModField] node.
pub const MODFIELD_REGISTER: u8 = 1;

/// SIMD prefix names, indexed by prefix slot. Slot 0 is "no prefix".
pub const PREFIX_NAMES: [&str; 4] = ["NONE", "66", "F3", "F2"];

/// Map a legacy prefix byte to its prefix slot.
pub fn prefix_slot(byte: u8) -> Option<u8> {
    match byte {
        0x66 => Some(1),
        0xF3 => Some(2),
        0xF2 => Some(3),
        _ => None,
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Step {
    pub value: u8,
    pub axis:  Axis,
}

impl Step {
    pub const fn new(value: u8, axis: Axis) -> Self {
        Self { value, axis }
    }
    pub const fn byte(value: u8) -> Self {
        Self::new(value, Axis::Byte)
    }
    pub const fn modfield(value: u8) -> Self {
        Self::new(value, Axis::ModField)
    }
    pub const fn regfield(value: u8) -> Self {
        Self::new(value, Axis::RegField)
    }
    pub const fn memfield(value: u8) -> Self {
        Self::new(value, Axis::MemField)
    }
    pub const fn prefix(value: u8) -> Self {
        Self::new(value, Axis::Prefix)
    }
}

/// An ordered list of [Step]s. A path never holds more than one [Axis::ModField] step;
/// any later one is dropped when the path is built.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Path {
    steps: Vec<Step>,
}

impl Path {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn from_steps<I: IntoIterator<Item = Step>>(steps: I) -> Self {
        let mut path = Path::new();
        for step in steps {
            path.push(step);
        }
        path
    }

    /// Append a step. A second mode-field step is ignored.
    pub fn push(&mut self, step: Step) {
        if step.axis == Axis::ModField && self.has_modfield() {
            return;
        }
        self.steps.push(step);
    }

    /// Concatenate two paths, normalizing the result.
    pub fn append(&self, other: &Path) -> Path {
        Path::from_steps(self.steps.iter().chain(other.steps.iter()).copied())
    }

    /// The steps in `range`, or `None` if the range does not lie within the path.
    pub fn slice(&self, range: Range<usize>) -> Option<Path> {
        self.steps.get(range).map(|steps| Path { steps: steps.to_vec() })
    }

    /// The path with its first step removed.
    pub fn tail(&self) -> Path {
        self.slice(1..self.steps.len()).unwrap_or_default()
    }

    pub fn has_modfield(&self) -> bool {
        self.steps.iter().any(|s| s.axis == Axis::ModField)
    }

    /// Place a mode-field step immediately before the first register-field, memory-field
    /// or prefix step, or at the end if there is none. Does nothing if the path already
    /// selects on the mode field.
    pub fn insert_modfield(&mut self, value: u8) {
        if self.has_modfield() {
            return;
        }
        let step = Step::modfield(value);
        match self
            .steps
            .iter()
            .position(|s| matches!(s.axis, Axis::RegField | Axis::MemField | Axis::Prefix))
        {
            Some(idx) => self.steps.insert(idx, step),
            None => self.steps.push(step),
        }
    }

    /// Non-mutating form of [Path::insert_modfield].
    pub fn with_modfield(&self, value: u8) -> Path {
        let mut path = self.clone();
        path.insert_modfield(value);
        path
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn first(&self) -> Option<&Step> {
        self.steps.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }
}

impl From<Vec<Step>> for Path {
    fn from(steps: Vec<Step>) -> Self {
        Path::from_steps(steps)
    }
}

impl fmt::Display for Path {
    /// Render the path the way opcode tables in vendor manuals write it. The prefix is
    /// always shown first.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            match step.axis {
                Axis::Byte => parts.push(format!("{:02X}", step.value)),
                Axis::ModField => parts.push(if step.value == MODFIELD_MEMORY { "M" } else { "R" }.to_string()),
                Axis::RegField => parts.push(format!("/{}", step.value)),
                Axis::MemField => parts.push(format!("+{}", step.value)),
                Axis::Prefix => {
                    if step.value != 0 {
                        let name = PREFIX_NAMES.get(step.value as usize).copied().unwrap_or("??");
                        parts.insert(0, name.to_string());
                    }
                }
            }
        }
        write!(f, "{}", parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let path = Path::from_steps([
            Step::byte(0x0F),
            Step::byte(0x10),
            Step::modfield(MODFIELD_REGISTER),
            Step::regfield(3),
            Step::prefix(1),
        ]);
        assert_eq!(path.to_string(), "66 0F 10 R /3");
        assert_eq!(path.to_string(), path.clone().to_string());

        let path = Path::from_steps([Step::byte(0xD9), Step::modfield(1), Step::regfield(0), Step::memfield(7)]);
        assert_eq!(path.to_string(), "D9 R /0 +7");

        // Slot 0 means no prefix, nothing is rendered.
        let path = Path::from_steps([Step::byte(0x90), Step::prefix(0)]);
        assert_eq!(path.to_string(), "90");
    }

    #[test]
    fn test_second_modfield_is_dropped() {
        let mut path = Path::from_steps([Step::byte(0x8D), Step::modfield(MODFIELD_MEMORY)]);
        path.push(Step::modfield(MODFIELD_REGISTER));
        assert_eq!(path.len(), 2);
        assert_eq!(path.steps()[1], Step::modfield(MODFIELD_MEMORY));

        let joined = path.append(&Path::from_steps([Step::modfield(1), Step::regfield(2)]));
        assert_eq!(joined.to_string(), "8D M /2");
    }

    #[test]
    fn test_insert_modfield() {
        // Before the first register field.
        let path = Path::from_steps([Step::byte(0x0F), Step::byte(0x01), Step::regfield(7)]);
        assert_eq!(path.with_modfield(0).to_string(), "0F 01 M /7");

        // Before the prefix when there are no ModRM fields.
        let path = Path::from_steps([Step::byte(0x0F), Step::byte(0x6F), Step::prefix(2)]);
        let path = path.with_modfield(1);
        assert_eq!(path.steps()[2], Step::modfield(1));
        assert_eq!(path.to_string(), "F3 0F 6F R");

        // Appended otherwise.
        let path = Path::from_steps([Step::byte(0x8B)]).with_modfield(1);
        assert_eq!(path.steps().last(), Some(&Step::modfield(1)));

        // No-op when already present.
        let path = Path::from_steps([Step::byte(0x8B), Step::modfield(0)]).with_modfield(1);
        assert_eq!(path.to_string(), "8B M");
    }

    #[test]
    fn test_slice_and_tail() {
        let path = Path::from_steps([Step::byte(0x0F), Step::byte(0xAE), Step::modfield(0), Step::regfield(1)]);
        assert_eq!(path.slice(1..3).unwrap().to_string(), "AE M");
        assert_eq!(path.slice(4..4), Some(Path::new()));
        assert_eq!(path.slice(2..5), None);
        assert_eq!(path.slice(5..6), None);
        assert_eq!(path.tail().len(), 3);
        assert!(Path::new().tail().is_empty());
    }

    #[test]
    fn test_prefix_slot() {
        assert_eq!(prefix_slot(0x66), Some(1));
        assert_eq!(prefix_slot(0xF3), Some(2));
        assert_eq!(prefix_slot(0xF2), Some(3));
        assert_eq!(prefix_slot(0x90), None);
    }
}
