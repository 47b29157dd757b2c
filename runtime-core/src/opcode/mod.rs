//! Bytecode-opcode metadata table
//!
//! A fixed 256-entry table, keyed by opcode number, consumed by an
//! evaluator (out of scope here) to walk the instruction stream and by a
//! compiler (also out of scope) to compute stack depth. Content-addressed:
//! look-ups are `OPCODE_TABLE[opcode as usize]`, never a hash or search.
//! Grounded in `Include/internal/pycore_opcode.h` and
//! `Python/opcode_metadata.h`: the shape of `_PyOpcode_Caches`,
//! `_PyOpcode_Deopt`, and the per-opcode `pop`/`push` stack-effect
//! functions, generalized to a representative opcode set rather than
//! reproducing a concrete bytecode's full 256 entries.
//!
//! # Regeneration
//! [`build_table`] is the single source of truth; it is pure and
//! deterministic, so the table it produces is reproducible from
//! [`OPCODE_DEFS`] alone — regenerating the table after a definition change
//! requires no external tool.

mod table_data;

pub use table_data::{OPCODE_DEFS, OpcodeDef};

use std::sync::OnceLock;

/// Operand-encoding tag: how immediate bytes and cache slots are laid out
/// in the instruction stream following the opcode byte itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One immediate byte, no cache.
    IB,
    /// One immediate byte followed by cache entries.
    IBC,
    /// One immediate byte followed by cache entries, specialized for an
    /// oparg of zero (e.g. a 0-argument call variant).
    IBC0,
    /// Two immediate bytes (a "wide" operand), no cache.
    IBIB,
    /// No immediate byte, no cache.
    IX,
    /// No immediate byte, followed by cache entries.
    IXC,
}

/// A stack-effect function: given the immediate operand and whether a
/// conditional jump at this instruction is taken, returns the number of
/// stack slots involved. `-1` means "variable — consult specialized logic",
/// matching `_PyOpcode_num_popped`/`_PyOpcode_num_pushed`'s use of negative
/// sentinels for data-dependent opcodes.
pub type StackEffectFn = fn(oparg: u32, jump: bool) -> i32;

/// Per-opcode metadata row.
#[derive(Clone, Copy)]
pub struct OpcodeInfo {
    pub cache_slots: u8,
    pub deopt_target: u8,
    pub name: &'static str,
    pub pop: StackEffectFn,
    pub push: StackEffectFn,
    pub format: Format,
    pub valid_entry: bool,
}

const RESERVED_NAME: &str = "<reserved>";

fn pop_zero(_oparg: u32, _jump: bool) -> i32 {
    0
}
fn push_zero(_oparg: u32, _jump: bool) -> i32 {
    0
}

fn reserved_row(opcode: u8) -> OpcodeInfo {
    OpcodeInfo {
        cache_slots: 0,
        deopt_target: opcode,
        name: RESERVED_NAME,
        pop: pop_zero,
        push: push_zero,
        format: Format::IX,
        valid_entry: false,
    }
}

/// Build the 256-entry table from [`OPCODE_DEFS`]. Pure and deterministic:
/// the same definitions always produce the same table.
pub fn build_table() -> [OpcodeInfo; 256] {
    let mut table: [OpcodeInfo; 256] = [reserved_row(0); 256];
    for (idx, slot) in table.iter_mut().enumerate() {
        *slot = reserved_row(idx as u8);
    }

    // First pass: install every defined opcode's own row.
    for def in OPCODE_DEFS {
        let idx = def.opcode as usize;
        assert!(
            table[idx].name == RESERVED_NAME,
            "duplicate opcode number {}",
            def.opcode
        );
        table[idx] = OpcodeInfo {
            cache_slots: def.cache_slots,
            // resolved in the second pass once every family head exists
            deopt_target: def.opcode,
            name: def.name,
            pop: def.pop,
            push: def.push,
            format: def.format,
            valid_entry: true,
        };
    }

    // Second pass: wire up deopt targets now that every opcode number in
    // `OPCODE_DEFS` has a row. A specialized variant's `deopt_family` names
    // the opcode to fall back to; unspecialized opcodes deopt to themselves.
    for def in OPCODE_DEFS {
        if let Some(family) = def.deopt_family {
            let family_idx = OPCODE_DEFS
                .iter()
                .find(|d| d.name == family)
                .unwrap_or_else(|| panic!("unknown deopt family {family:?}"))
                .opcode;
            table[def.opcode as usize].deopt_target = family_idx;
        }
    }

    table
}

static TABLE: OnceLock<[OpcodeInfo; 256]> = OnceLock::new();

/// Access the process-wide opcode metadata table, building it on first use.
/// Read-only thereafter, as the spec requires.
pub fn opcode_table() -> &'static [OpcodeInfo; 256] {
    TABLE.get_or_init(build_table)
}

/// Look up a single opcode's metadata.
pub fn info(opcode: u8) -> &'static OpcodeInfo {
    &opcode_table()[opcode as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_defined_opcode_is_valid() {
        let table = opcode_table();
        for def in OPCODE_DEFS {
            assert!(table[def.opcode as usize].valid_entry);
            assert_eq!(table[def.opcode as usize].name, def.name);
        }
    }

    #[test]
    fn deopt_targets_are_idempotent_fixpoints() {
        let table = opcode_table();
        for (opcode, row) in table.iter().enumerate() {
            if !row.valid_entry {
                continue;
            }
            let target = row.deopt_target;
            assert!(
                table[target as usize].valid_entry,
                "opcode {opcode} deopts to invalid {target}"
            );
            let target_target = table[target as usize].deopt_target;
            assert_eq!(
                target_target, target,
                "deopt_target is not a fixpoint for opcode {opcode}"
            );
        }
    }

    #[test]
    fn reserved_slots_report_invalid() {
        let table = opcode_table();
        let used: std::collections::HashSet<u8> = OPCODE_DEFS.iter().map(|d| d.opcode).collect();
        let mut saw_reserved = false;
        for (opcode, row) in table.iter().enumerate() {
            if !used.contains(&(opcode as u8)) {
                assert!(!row.valid_entry);
                saw_reserved = true;
            }
        }
        assert!(saw_reserved, "test set should leave some opcodes unused");
    }

    #[test]
    fn stack_effect_of_binary_op_is_fixed() {
        let row = OPCODE_DEFS.iter().find(|d| d.name == "BINARY_OP").unwrap();
        assert_eq!((row.pop)(0, false), 2);
        assert_eq!((row.push)(0, false), 1);
    }

    #[test]
    fn variadic_opcode_reports_sentinel() {
        let row = OPCODE_DEFS.iter().find(|d| d.name == "BUILD_LIST").unwrap();
        assert_eq!((row.pop)(3, false), 3);
    }
}
