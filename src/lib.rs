//! regsort: register assignment sequencing for shellcode generation.
//!
//! Given "set these registers to these values", where values may be other
//! registers, produce a `mov`/`xchg` sequence that never clobbers a register
//! before it has been read. Cycles are broken with swaps and destinations
//! that want the same constant share a single materialization.
//!
//! # Module overview
//!
//! - [`error`]: Error types used throughout the crate.
//! - [`types`]: `Value`, `Operation` and the ordered `Assignment` map.
//! - [`arch`]: Target architectures, register tables and the explicit `Context`.
//! - [`regsort`]: The sequencer: collapsing, dependency ordering, cycle breaking.
//! - [`emit`]: `MoveEmitter` seam, assembly text output and a simulated register bank.
//!
//! # Example
//!
//! ```
//! use regsort::arch::{Arch, Context};
//! use regsort::emit::{setregs, AsmText};
//! use regsort::types::{Assignment, Value};
//!
//! let mut asn = Assignment::new();
//! asn.insert("rdi", Value::from("rsi"));
//! asn.insert("rsi", Value::from("rdi"));
//! asn.insert("rax", 59);
//!
//! let mut asm = AsmText::new();
//! setregs(&Context::new(Arch::Amd64), &asn, &mut asm).unwrap();
//! assert_eq!(asm.lines(), &["mov rax, 0x3b", "xchg rdi, rsi"]);
//! ```

pub mod error;
pub mod types;
pub mod arch;
pub mod regsort;
pub mod emit;

pub use error::{Error, Result};
pub use types::{Assignment, Operation, Value};
