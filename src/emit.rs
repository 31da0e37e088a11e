//! Rendering sequenced operations.
//!
//! The sequencer only decides *what* to move and in which order. Turning a
//! single `mov`/`xchg` into bytes or assembly is up to a [`MoveEmitter`].
//! Two emitters ship with the crate: [`AsmText`] renders plain Intel-syntax
//! lines, [`RegisterBank`] executes the operations on a simulated register
//! file so the result can be checked.

use std::collections::HashMap;

use tracing::debug;

use crate::arch::Context;
use crate::error::{Error, Result};
use crate::regsort;
use crate::types::{Assignment, Operation, Value};

/// Receives primitive register operations in execution order.
pub trait MoveEmitter {
    /// `dst <- src`, where `src` is a register or an opaque value.
    fn mov(&mut self, dst: &str, src: &Value) -> Result<()>;
    /// Exchange the contents of `a` and `b`.
    fn xchg(&mut self, a: &str, b: &str) -> Result<()>;
}

/// Feed every operation to `emitter`, stopping at the first failure.
pub fn emit_all<E: MoveEmitter + ?Sized>(ops: &[Operation], emitter: &mut E) -> Result<()> {
    for op in ops {
        match op {
            Operation::Move { dst, src } => emitter.mov(dst, src)?,
            Operation::Swap(a, b) => emitter.xchg(a, b)?,
        }
    }
    Ok(())
}

/// Set registers to the values in `assignment` for the target in `ctx`.
///
/// Returns the operations that were handed to `emitter`.
pub fn setregs<E: MoveEmitter + ?Sized>(
    ctx: &Context,
    assignment: &Assignment,
    emitter: &mut E,
) -> Result<Vec<Operation>> {
    let ops = regsort::sequence(assignment, ctx.arch.registers(), ctx.sort_options())?;
    debug!(arch = %ctx.arch, ops = ops.len(), "setregs");
    emit_all(&ops, emitter)?;
    Ok(ops)
}

/// Collects one line of assembly per operation.
#[derive(Debug, Clone, Default)]
pub struct AsmText {
    lines: Vec<String>,
}

impl AsmText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl std::fmt::Display for AsmText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            writeln!(f, "    {}", line)?;
        }
        Ok(())
    }
}

impl MoveEmitter for AsmText {
    fn mov(&mut self, dst: &str, src: &Value) -> Result<()> {
        self.lines.push(format!("mov {}, {}", dst, src));
        Ok(())
    }

    fn xchg(&mut self, a: &str, b: &str) -> Result<()> {
        self.lines.push(format!("xchg {}, {}", a, b));
        Ok(())
    }
}

/// Simulated register file.
///
/// Every register starts out holding its own name, so after replaying a
/// sequence `get("rdi") == Some(&Value::from("rsi"))` reads as "rdi now holds
/// what rsi held at the start".
#[derive(Debug, Clone)]
pub struct RegisterBank {
    regs: HashMap<String, Value>,
}

impl RegisterBank {
    pub fn new(universe: &[&str]) -> Self {
        Self {
            regs: universe
                .iter()
                .map(|&r| (r.to_string(), Value::from(r)))
                .collect(),
        }
    }

    pub fn get(&self, reg: &str) -> Option<&Value> {
        self.regs.get(reg)
    }

    /// Whether every destination in `assignment` holds its intended value.
    ///
    /// A register source means the content that register had initially.
    pub fn satisfies(&self, assignment: &Assignment) -> bool {
        assignment.iter().all(|(dst, want)| self.regs.get(dst) == Some(want))
    }

    fn slot(&mut self, reg: &str) -> Result<&mut Value> {
        self.regs
            .get_mut(reg)
            .ok_or_else(|| Error::Other(format!("register bank has no register {}", reg)))
    }
}

impl MoveEmitter for RegisterBank {
    fn mov(&mut self, dst: &str, src: &Value) -> Result<()> {
        let value = match src {
            Value::Name(name) => self.regs.get(name).cloned().unwrap_or_else(|| src.clone()),
            Value::Int(_) => src.clone(),
        };
        *self.slot(dst)? = value;
        Ok(())
    }

    fn xchg(&mut self, a: &str, b: &str) -> Result<()> {
        let va = self.slot(a)?.clone();
        let vb = std::mem::replace(self.slot(b)?, va);
        *self.slot(a)? = vb;
        Ok(())
    }
}
