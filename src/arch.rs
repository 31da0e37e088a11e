//! Target architecture selection and the explicit generation context.
//!
//! Architectures form a small closed set, so they are an enum resolved once
//! when the context is built. Everything that depends on the target takes a
//! `Context` argument; there is no ambient "current architecture".

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::regsort::{self, SortOptions};

/// x86_64 general-purpose registers.
///
/// Ordered by encoding number, as in the System V AMD64 ABI register table.
pub const AMD64_REGISTERS: &[&str] = &[
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi",
    "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];

/// i386 general-purpose registers.
pub const I386_REGISTERS: &[&str] = &[
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi",
];

/// Supported target architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Arch {
    #[default]
    Amd64,
    I386,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::Amd64, Arch::I386];

    /// Register universe for this architecture.
    pub fn registers(self) -> &'static [&'static str] {
        match self {
            Arch::Amd64 => AMD64_REGISTERS,
            Arch::I386 => I386_REGISTERS,
        }
    }

    /// Native word size in bits.
    pub fn bits(self) -> u32 {
        match self {
            Arch::Amd64 => 64,
            Arch::I386 => 32,
        }
    }

    /// Syscall argument registers, syscall number register first.
    pub fn syscall_registers(self) -> &'static [&'static str] {
        match self {
            Arch::Amd64 => &["rax", "rdi", "rsi", "rdx", "r10", "r8", "r9"],
            Arch::I386 => &["eax", "ebx", "ecx", "edx", "esi", "edi", "ebp"],
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Amd64 => write!(f, "amd64"),
            Arch::I386 => write!(f, "i386"),
        }
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "amd64" | "x86_64" | "x64" => Ok(Arch::Amd64),
            "i386" | "x86" | "i686" => Ok(Arch::I386),
            _ => Err(Error::Parse(format!(
                "unknown architecture '{}' (expected amd64 or i386)",
                s
            ))),
        }
    }
}

/// Immutable configuration threaded into every generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub arch: Arch,
    /// Pick randomly among equally valid move orders.
    pub randomize: bool,
    /// Merge destinations that want the same constant.
    pub collapse: bool,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            arch: Arch::default(),
            randomize: false,
            collapse: true,
        }
    }
}

impl Context {
    pub fn new(arch: Arch) -> Self {
        Self { arch, ..Self::default() }
    }

    pub fn with_randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    pub fn with_collapse(mut self, collapse: bool) -> Self {
        self.collapse = collapse;
        self
    }

    /// Sequencer options derived from this context.
    pub fn sort_options(&self) -> SortOptions {
        SortOptions {
            randomize: self.randomize,
            collapse: if self.collapse {
                regsort::collapse_nonzero
            } else {
                regsort::collapse_never
            },
        }
    }
}
