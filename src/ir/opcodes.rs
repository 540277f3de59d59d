//! Opcode table: arity, stack effect and base gas of every IR operation.
//!
//! Three families share one namespace. `Evm` entries map 1:1 onto EVM
//! instructions. `Pseudo` entries have a fixed arity like real opcodes but
//! expand into several instructions during assembly. `Control` entries
//! (`seq`, `if`, `with`, ...) have structural rules checked by `IrNode::op`.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    /// A real EVM instruction and its byte value.
    Evm(u8),
    Pseudo,
    Control,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpInfo {
    pub name: &'static str,
    /// Values popped. Ignored for control operations.
    pub inputs: u8,
    /// Values pushed. Ignored for control operations.
    pub outputs: u8,
    /// Base cost before children and dynamic extras.
    pub gas: u64,
    pub kind: OpKind,
}

impl OpInfo {
    pub fn is_control(&self) -> bool {
        self.kind == OpKind::Control
    }
}

const fn evm(name: &'static str, code: u8, inputs: u8, outputs: u8, gas: u64) -> OpInfo {
    OpInfo {
        name,
        inputs,
        outputs,
        gas,
        kind: OpKind::Evm(code),
    }
}

const fn pseudo(name: &'static str, inputs: u8, outputs: u8, gas: u64) -> OpInfo {
    OpInfo {
        name,
        inputs,
        outputs,
        gas,
        kind: OpKind::Pseudo,
    }
}

const fn control(name: &'static str, gas: u64) -> OpInfo {
    OpInfo {
        name,
        inputs: 0,
        outputs: 0,
        gas,
        kind: OpKind::Control,
    }
}

// ─── Table ─────────────────────────────────────────────────────────

pub const OPCODES: &[OpInfo] = &[
    evm("stop", 0x00, 0, 0, 0),
    evm("add", 0x01, 2, 1, 3),
    evm("mul", 0x02, 2, 1, 5),
    evm("sub", 0x03, 2, 1, 3),
    evm("div", 0x04, 2, 1, 5),
    evm("sdiv", 0x05, 2, 1, 5),
    evm("mod", 0x06, 2, 1, 5),
    evm("smod", 0x07, 2, 1, 5),
    evm("addmod", 0x08, 3, 1, 8),
    evm("mulmod", 0x09, 3, 1, 8),
    evm("exp", 0x0a, 2, 1, 10),
    evm("signextend", 0x0b, 2, 1, 5),
    evm("lt", 0x10, 2, 1, 3),
    evm("gt", 0x11, 2, 1, 3),
    evm("slt", 0x12, 2, 1, 3),
    evm("sgt", 0x13, 2, 1, 3),
    evm("eq", 0x14, 2, 1, 3),
    evm("iszero", 0x15, 1, 1, 3),
    evm("and", 0x16, 2, 1, 3),
    evm("or", 0x17, 2, 1, 3),
    evm("xor", 0x18, 2, 1, 3),
    evm("not", 0x19, 1, 1, 3),
    evm("byte", 0x1a, 2, 1, 3),
    evm("shl", 0x1b, 2, 1, 3),
    evm("shr", 0x1c, 2, 1, 3),
    evm("sar", 0x1d, 2, 1, 3),
    evm("sha3", 0x20, 2, 1, 30),
    evm("address", 0x30, 0, 1, 2),
    evm("balance", 0x31, 1, 1, 700),
    evm("origin", 0x32, 0, 1, 2),
    evm("caller", 0x33, 0, 1, 2),
    evm("callvalue", 0x34, 0, 1, 2),
    evm("calldataload", 0x35, 1, 1, 3),
    evm("calldatasize", 0x36, 0, 1, 2),
    evm("calldatacopy", 0x37, 3, 0, 3),
    evm("codesize", 0x38, 0, 1, 2),
    evm("codecopy", 0x39, 3, 0, 3),
    evm("gasprice", 0x3a, 0, 1, 2),
    evm("extcodesize", 0x3b, 1, 1, 700),
    evm("extcodecopy", 0x3c, 4, 0, 700),
    evm("returndatasize", 0x3d, 0, 1, 2),
    evm("returndatacopy", 0x3e, 3, 0, 3),
    evm("extcodehash", 0x3f, 1, 1, 700),
    evm("blockhash", 0x40, 1, 1, 20),
    evm("coinbase", 0x41, 0, 1, 2),
    evm("timestamp", 0x42, 0, 1, 2),
    evm("number", 0x43, 0, 1, 2),
    evm("difficulty", 0x44, 0, 1, 2),
    evm("prevrandao", 0x44, 0, 1, 2),
    evm("gaslimit", 0x45, 0, 1, 2),
    evm("chainid", 0x46, 0, 1, 2),
    evm("selfbalance", 0x47, 0, 1, 5),
    evm("basefee", 0x48, 0, 1, 2),
    evm("pop", 0x50, 1, 0, 2),
    evm("mload", 0x51, 1, 1, 3),
    evm("mstore", 0x52, 2, 0, 3),
    evm("mstore8", 0x53, 2, 0, 3),
    evm("sload", 0x54, 1, 1, 800),
    evm("sstore", 0x55, 2, 0, 5000),
    evm("jump", 0x56, 1, 0, 8),
    evm("jumpi", 0x57, 2, 0, 10),
    evm("pc", 0x58, 0, 1, 2),
    evm("msize", 0x59, 0, 1, 2),
    evm("gas", 0x5a, 0, 1, 2),
    evm("jumpdest", 0x5b, 0, 0, 1),
    evm("log0", 0xa0, 2, 0, 375),
    evm("log1", 0xa1, 3, 0, 750),
    evm("log2", 0xa2, 4, 0, 1125),
    evm("log3", 0xa3, 5, 0, 1500),
    evm("log4", 0xa4, 6, 0, 1875),
    evm("create", 0xf0, 3, 1, 32000),
    evm("call", 0xf1, 7, 1, 700),
    evm("callcode", 0xf2, 7, 1, 700),
    evm("return", 0xf3, 2, 0, 0),
    evm("delegatecall", 0xf4, 6, 1, 700),
    evm("create2", 0xf5, 4, 1, 32000),
    evm("staticcall", 0xfa, 6, 1, 700),
    evm("revert", 0xfd, 2, 0, 0),
    evm("invalid", 0xfe, 0, 0, 0),
    evm("selfdestruct", 0xff, 1, 0, 25000),
    // Bounds checks. `clamp lo x hi` is signed; the `u` forms compare
    // unsigned. Each returns its checked operand.
    pseudo("clamp", 3, 1, 70),
    pseudo("uclamplt", 2, 1, 25),
    pseudo("uclample", 2, 1, 30),
    pseudo("uclampgt", 2, 1, 25),
    pseudo("uclampge", 2, 1, 20),
    pseudo("clamplt", 2, 1, 25),
    pseudo("clample", 2, 1, 30),
    pseudo("clampgt", 2, 1, 25),
    pseudo("clampge", 2, 1, 20),
    pseudo("clamp_nonzero", 1, 1, 19),
    pseudo("assert", 1, 0, 85),
    pseudo("assert_unreachable", 1, 0, 17),
    pseudo("pass", 0, 0, 0),
    pseudo("break", 0, 0, 20),
    pseudo("continue", 0, 0, 0),
    pseudo("sha3_32", 1, 1, 72),
    pseudo("sha3_64", 2, 1, 109),
    pseudo("le", 2, 1, 10),
    pseudo("ge", 2, 1, 10),
    pseudo("sle", 2, 1, 10),
    pseudo("sge", 2, 1, 10),
    pseudo("ne", 2, 1, 6),
    pseudo("ceil32", 1, 1, 20),
    pseudo("debugger", 0, 0, 0),
    control("seq", 0),
    control("multi", 0),
    control("if", 0),
    control("with", 5),
    control("repeat", 30),
    control("set", 20),
    control("label", 1),
    control("goto", 8),
    control("symbol", 3),
    control("deploy", 0),
];

pub fn lookup(name: &str) -> Option<&'static OpInfo> {
    OPCODES.iter().find(|op| op.name == name)
}

/// Is `name` (lowercase) an EVM instruction mnemonic?
pub fn is_evm_opcode(name: &str) -> bool {
    lookup(name).is_some_and(|op| matches!(op.kind, OpKind::Evm(_)))
}

/// Fixed-arity operations, real and pseudo.
pub fn fixed_arity() -> impl Iterator<Item = &'static OpInfo> {
    OPCODES.iter().filter(|op| !op.is_control())
}

/// The `logN` opcode for `topics` topics.
pub fn log_opcode(topics: usize) -> Option<&'static str> {
    ["log0", "log1", "log2", "log3", "log4"].get(topics).copied()
}
