//! Concrete opcode definitions
//!
//! A representative instruction set, not a full evaluator's worth of
//! opcodes: this crate has no compiler or evaluator (both out of scope), so
//! the table exists to exercise the metadata machinery itself rather than to
//! drive real bytecode. Named and shaped after `Python/opcode_metadata.h`'s
//! switch-statement stack-effect functions and `Include/opcode_ids.h`'s
//! opcode numbering.

use super::{Format, StackEffectFn};

/// One opcode's hand-authored definition, before [`super::build_table`] folds
/// it into a full [`super::OpcodeInfo`] row.
pub struct OpcodeDef {
    pub opcode: u8,
    pub name: &'static str,
    pub cache_slots: u8,
    pub format: Format,
    pub pop: StackEffectFn,
    pub push: StackEffectFn,
    /// Name of the unspecialized opcode this one falls back to on a
    /// deoptimization, or `None` if this opcode doesn't specialize anything
    /// (it deopts to itself).
    pub deopt_family: Option<&'static str>,
}

fn fixed(n: i32) -> StackEffectFn {
    // `StackEffectFn` is a plain fn pointer, so each fixed arity needs its
    // own named function; a macro keeps the boilerplate proportional to the
    // table below instead of to the number of distinct arities.
    match n {
        0 => |_oparg, _jump| 0,
        1 => |_oparg, _jump| 1,
        2 => |_oparg, _jump| 2,
        3 => |_oparg, _jump| 3,
        _ => unreachable!("add a fixed() arm for {n}"),
    }
}

fn oparg_count(_oparg: u32, _jump: bool) -> i32 {
    -1
}

fn variadic_from_oparg(oparg: u32, _jump: bool) -> i32 {
    oparg as i32
}

fn variadic_from_oparg_plus_one(oparg: u32, _jump: bool) -> i32 {
    oparg as i32 + 1
}

pub const OPCODE_DEFS: &[OpcodeDef] = &[
    OpcodeDef {
        opcode: 0,
        name: "NOP",
        cache_slots: 0,
        format: Format::IX,
        pop: fixed(0),
        push: fixed(0),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 1,
        name: "POP_TOP",
        cache_slots: 0,
        format: Format::IX,
        pop: fixed(1),
        push: fixed(0),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 2,
        name: "PUSH_NULL",
        cache_slots: 0,
        format: Format::IX,
        pop: fixed(0),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 3,
        name: "UNARY_NEGATIVE",
        cache_slots: 0,
        format: Format::IX,
        pop: fixed(1),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 4,
        name: "UNARY_NOT",
        cache_slots: 0,
        format: Format::IX,
        pop: fixed(1),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 10,
        name: "BINARY_OP",
        cache_slots: 1,
        format: Format::IBC,
        pop: fixed(2),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 11,
        name: "BINARY_OP_ADD_INT",
        cache_slots: 1,
        format: Format::IBC,
        pop: fixed(2),
        push: fixed(1),
        deopt_family: Some("BINARY_OP"),
    },
    OpcodeDef {
        opcode: 12,
        name: "BINARY_OP_ADD_FLOAT",
        cache_slots: 1,
        format: Format::IBC,
        pop: fixed(2),
        push: fixed(1),
        deopt_family: Some("BINARY_OP"),
    },
    OpcodeDef {
        opcode: 13,
        name: "BINARY_OP_SUBSCR_LIST",
        cache_slots: 1,
        format: Format::IBC,
        pop: fixed(2),
        push: fixed(1),
        deopt_family: Some("BINARY_OP"),
    },
    OpcodeDef {
        opcode: 20,
        name: "COMPARE_OP",
        cache_slots: 1,
        format: Format::IBC,
        pop: fixed(2),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 21,
        name: "COMPARE_OP_INT",
        cache_slots: 1,
        format: Format::IBC,
        pop: fixed(2),
        push: fixed(1),
        deopt_family: Some("COMPARE_OP"),
    },
    OpcodeDef {
        opcode: 30,
        name: "LOAD_FAST",
        cache_slots: 0,
        format: Format::IB,
        pop: fixed(0),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 31,
        name: "LOAD_FAST__LOAD_FAST",
        cache_slots: 0,
        format: Format::IBIB,
        pop: fixed(0),
        push: fixed(2),
        deopt_family: Some("LOAD_FAST"),
    },
    OpcodeDef {
        opcode: 32,
        name: "STORE_FAST",
        cache_slots: 0,
        format: Format::IB,
        pop: fixed(1),
        push: fixed(0),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 33,
        name: "LOAD_CONST",
        cache_slots: 0,
        format: Format::IB,
        pop: fixed(0),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 40,
        name: "LOAD_GLOBAL",
        cache_slots: 1,
        format: Format::IBC,
        pop: fixed(0),
        push: oparg_count,
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 41,
        name: "LOAD_GLOBAL_MODULE",
        cache_slots: 1,
        format: Format::IBC,
        pop: fixed(0),
        push: oparg_count,
        deopt_family: Some("LOAD_GLOBAL"),
    },
    OpcodeDef {
        opcode: 42,
        name: "STORE_GLOBAL",
        cache_slots: 0,
        format: Format::IB,
        pop: fixed(1),
        push: fixed(0),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 50,
        name: "BUILD_LIST",
        cache_slots: 0,
        format: Format::IB,
        pop: variadic_from_oparg,
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 51,
        name: "BUILD_TUPLE",
        cache_slots: 0,
        format: Format::IB,
        pop: variadic_from_oparg,
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 60,
        name: "JUMP_FORWARD",
        cache_slots: 0,
        format: Format::IB,
        pop: fixed(0),
        push: fixed(0),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 61,
        name: "POP_JUMP_IF_FALSE",
        cache_slots: 0,
        format: Format::IB,
        pop: fixed(1),
        push: fixed(0),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 62,
        name: "POP_JUMP_IF_TRUE",
        cache_slots: 0,
        format: Format::IB,
        pop: fixed(1),
        push: fixed(0),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 70,
        name: "GET_ITER",
        cache_slots: 0,
        format: Format::IX,
        pop: fixed(1),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 71,
        name: "FOR_ITER",
        cache_slots: 1,
        format: Format::IBC,
        pop: fixed(1),
        push: |_oparg, jump| if jump { 1 } else { 2 },
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 80,
        name: "CALL",
        cache_slots: 4,
        format: Format::IBC,
        pop: variadic_from_oparg_plus_one,
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 81,
        name: "CALL_PY_EXACT_ARGS",
        cache_slots: 4,
        format: Format::IBC,
        pop: variadic_from_oparg_plus_one,
        push: fixed(1),
        deopt_family: Some("CALL"),
    },
    OpcodeDef {
        opcode: 82,
        name: "CALL_NO_KW",
        cache_slots: 4,
        format: Format::IBC0,
        pop: variadic_from_oparg_plus_one,
        push: fixed(1),
        deopt_family: Some("CALL"),
    },
    OpcodeDef {
        opcode: 90,
        name: "RETURN_VALUE",
        cache_slots: 0,
        format: Format::IX,
        pop: fixed(1),
        push: fixed(0),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 91,
        name: "RETURN_GENERATOR",
        cache_slots: 0,
        format: Format::IX,
        pop: fixed(0),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 92,
        name: "YIELD_VALUE",
        cache_slots: 0,
        format: Format::IX,
        pop: fixed(1),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 100,
        name: "RAISE_VARARGS",
        cache_slots: 0,
        format: Format::IB,
        pop: variadic_from_oparg,
        push: fixed(0),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 101,
        name: "IMPORT_NAME",
        cache_slots: 0,
        format: Format::IB,
        pop: fixed(2),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 102,
        name: "MAKE_FUNCTION",
        cache_slots: 0,
        format: Format::IB,
        pop: fixed(1),
        push: fixed(1),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 110,
        name: "EXTENDED_ARG",
        cache_slots: 0,
        format: Format::IB,
        pop: fixed(0),
        push: fixed(0),
        deopt_family: None,
    },
    OpcodeDef {
        opcode: 255,
        name: "RESUME",
        cache_slots: 1,
        format: Format::IXC,
        pop: fixed(0),
        push: fixed(0),
        deopt_family: None,
    },
];
