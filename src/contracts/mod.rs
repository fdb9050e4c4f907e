// =============================================================================
// SATKAS - Script Module
// =============================================================================
//
// Kaspa-style stack scripts, limited to what HTLC contracts need.
//
// ┌──────────────┐    ┌───────────────────┐    ┌───────────────────────┐
// │   Opcodes    │───▶│      Builder      │───▶│        Engine         │
// │              │    │                   │    │                       │
// │ • Push/flow  │    │ • Canonical push  │    │ • Stack interpreter   │
// │ • Hashes     │    │ • u64 encoding    │    │ • CLTV against tx     │
// │ • Locktime   │    │ • Disassembly     │    │ • P2SH input check    │
// └──────────────┘    └───────────────────┘    └───────────────────────┘
//
// The engine only runs locally, to check a signed spend before it is
// broadcast. Consensus is the node's job.
//
// =============================================================================

pub mod builder;
pub mod engine;
pub mod opcodes;

pub use builder::{disassemble, parse_script, pay_to_address_script, ScriptBuilder, ScriptElement};
pub use engine::{verify_p2sh_input, ExecutionContext, ScriptEngine, ScriptError};
pub use opcodes::Opcode;
