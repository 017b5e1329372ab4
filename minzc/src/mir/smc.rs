//! SMC anchors and patch tables (spec §3.7, §4.3 step 6, §4.5 step 5).

use std::fmt;

/// The width, in bytes, of a patchable immediate.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AnchorWidth {
    Byte,
    Word,
}

impl AnchorWidth {
    pub fn bytes(self) -> u8 {
        match self {
            AnchorWidth::Byte => 1,
            AnchorWidth::Word => 2,
        }
    }

    pub fn for_type_width(width_bytes: u8) -> Self {
        if width_bytes <= 1 {
            AnchorWidth::Byte
        } else {
            AnchorWidth::Word
        }
    }
}

/// An instruction slot in emitted code whose immediate operand is a
/// function parameter (spec §3.7). `label` names the instruction
/// itself; `immediate_label` is the derived label for the immediate
/// bytes (conventionally `<label> + 1`), consulted by `SMCPatch` sites
/// in other functions and emitted into the patch table.
#[derive(Clone, Debug)]
pub struct SmcAnchor {
    pub label: String,
    pub immediate_label: String,
    pub width: AnchorWidth,
    pub parameter_index: u32,
}

impl SmcAnchor {
    /// Build the anchor pair of labels for parameter `index` of
    /// function `func_name`, following the `..._param_x.op` / `...
    /// _param_x` convention spec §3.7 names.
    pub fn new(func_name: &str, param_name: &str, index: u32, width: AnchorWidth) -> Self {
        let label = format!("{}_param_{}.op", func_name, param_name);
        let immediate_label = format!("{}_param_{}", func_name, param_name);
        Self {
            label,
            immediate_label,
            width,
            parameter_index: index,
        }
    }
}

impl fmt::Display for SmcAnchor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} = {} + 1 ; param #{} ({:?})",
            self.immediate_label, self.label, self.parameter_index, self.width
        )
    }
}

/// One row of a function's patch table: the anchor's eventual address,
/// its width, and which parameter it belongs to (spec §6.3's emitted
/// layout: a 2-byte address, 1-byte width, 1-byte parameter index).
#[derive(Clone, Debug)]
pub struct PatchTableEntry {
    pub anchor_label: String,
    pub width: AnchorWidth,
    pub parameter_index: u32,
}

/// The complete set of anchors declared for one function by the SMC
/// rewrite pass.
#[derive(Clone, Debug, Default)]
pub struct PatchTable {
    pub entries: Vec<PatchTableEntry>,
}

impl PatchTable {
    pub fn push(&mut self, anchor: &SmcAnchor) {
        self.entries.push(PatchTableEntry {
            anchor_label: anchor.immediate_label.clone(),
            width: anchor.width,
            parameter_index: anchor.parameter_index,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
