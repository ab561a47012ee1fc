//! Textual form of programs.
//!
//! A debugging surface, not an exchange format: there is no parser for it.
//! One op per line, SSA names straight from the value arena, so two
//! compacted programs print identically iff they are structurally equal.

use crate::ir::op::OpKind;
use crate::ir::program::{Function, Operation, Program};
use crate::symbol::SymbolHash;
use std::fmt;

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(graph) = &self.hierarchy {
            for id in graph.class_ids() {
                let class = graph.class(id);
                let root = if id == graph.root { " root" } else { "" };
                writeln!(f, "class @{}{root} {{", class.name)?;
                for slot in &class.slots {
                    let kw = if slot.is_submodule() { "submodule" } else { "slot" };
                    write!(f, "  {kw} {} : {}", slot.name, slot.ty)?;
                    if let Some(init) = &slot.initializer {
                        write!(f, " = {init}")?;
                    }
                    if slot.mutable {
                        write!(f, " mutable")?;
                    }
                    writeln!(f)?;
                }
                for method in &class.methods {
                    let export = if method.exported { " exported" } else { "" };
                    writeln!(
                        f,
                        "  method {} -> @{}{export}",
                        method.name,
                        self.function(method.func).name
                    )?;
                }
                writeln!(f, "}}")?;
            }
        }
        for slot in &self.globals {
            let kw = if slot.mutable { "global mutable" } else { "global" };
            writeln!(f, "{kw} @{} : {} = {}", slot.name, slot.ty, slot.initializer)?;
        }
        for (i, function) in self.functions.iter().enumerate() {
            if i > 0 || !self.globals.is_empty() || self.hierarchy.is_some() {
                writeln!(f)?;
            }
            write_function(f, self, function)?;
        }
        Ok(())
    }
}

/// Print one function the way [`Program`]'s `Display` does.
pub fn write_function(
    f: &mut fmt::Formatter<'_>,
    program: &Program,
    func: &Function,
) -> fmt::Result {
    let vis = if func.is_public() { "public" } else { "private" };
    write!(f, "func {vis} @{}(", func.name)?;
    for (i, &param) in func.params().iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{param}: {}", func.value(param).ty)?;
    }
    write!(f, ")")?;
    match func.results.len() {
        0 => {}
        1 => write!(f, " -> {}", func.results[0])?,
        _ => {
            write!(f, " -> (")?;
            for (i, ty) in func.results.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{ty}")?;
            }
            write!(f, ")")?;
        }
    }
    writeln!(f, " {{")?;
    for (b, block) in func.blocks.iter().enumerate() {
        if b == 0 {
            writeln!(f, "bb0:")?;
        } else {
            write!(f, "bb{b}(")?;
            for (i, &param) in block.params.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{param}: {}", func.value(param).ty)?;
            }
            writeln!(f, "):")?;
        }
        for &op in &block.ops {
            write_op(f, program, func, func.op(op))?;
        }
    }
    writeln!(f, "}}")
}

fn write_symbol(f: &mut fmt::Formatter<'_>, program: &Program, symbol: SymbolHash) -> fmt::Result {
    match program.find_slot(symbol) {
        Some(id) => write!(f, "@{}", program.slot(id).name),
        None => write!(f, "@0x{:016x}", symbol.as_u64()),
    }
}

fn write_op(
    f: &mut fmt::Formatter<'_>,
    program: &Program,
    func: &Function,
    op: &Operation,
) -> fmt::Result {
    write!(f, "  ")?;
    for (i, &result) in op.results.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{result}")?;
    }
    if !op.results.is_empty() {
        write!(f, " = ")?;
    }

    match &op.kind {
        OpKind::Br { target } => {
            write!(f, "br {target}")?;
            write_args(f, &op.operands)?;
            return writeln!(f);
        }
        OpKind::CondBr { on_true, on_false, true_args } => {
            let split = *true_args as usize;
            write!(f, "cond_br {}, {on_true}", op.operand(0))?;
            write_args(f, &op.operands[1..1 + split])?;
            write!(f, ", {on_false}")?;
            write_args(f, &op.operands[1 + split..])?;
            return writeln!(f);
        }
        OpKind::Const(value) => write!(f, "const {value}")?,
        OpKind::GetSlot(name) => write!(f, "get_slot \"{name}\"")?,
        OpKind::SetSlot(name) => write!(f, "set_slot \"{name}\"")?,
        OpKind::CallMethod(name) => write!(f, "call_method \"{name}\"")?,
        OpKind::Call(callee) => write!(f, "call @{callee}")?,
        OpKind::GlobalGet(s) | OpKind::GlobalRead(s) | OpKind::GlobalSet(s) => {
            write!(f, "{} ", op.kind.opcode())?;
            write_symbol(f, program, *s)?;
        }
        OpKind::Transpose { dim0, dim1 } => write!(f, "transpose[{dim0},{dim1}]")?,
        OpKind::Sum { dim: Some(d), keepdim: true } => write!(f, "sum[dim={d},keepdim]")?,
        OpKind::Sum { dim: Some(d), keepdim: false } => write!(f, "sum[dim={d}]")?,
        OpKind::Sum { dim: None, keepdim: true } => write!(f, "sum[all,keepdim]")?,
        OpKind::Sum { dim: None, keepdim: false } => write!(f, "sum[all]")?,
        OpKind::Softmax { dim } => write!(f, "softmax[{dim}]")?,
        OpKind::Mean { dim: Some(d) } => write!(f, "mean[dim={d}]")?,
        OpKind::Mean { dim: None } => write!(f, "mean[all]")?,
        other => write!(f, "{}", other.opcode())?,
    }

    let mut first = true;
    for &operand in &op.operands {
        if first {
            write!(f, " {operand}")?;
            first = false;
        } else {
            write!(f, ", {operand}")?;
        }
    }

    match op.results.len() {
        0 => {}
        1 => write!(f, " : {}", func.value(op.result(0)).ty)?,
        _ => {
            write!(f, " : (")?;
            for (i, &result) in op.results.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", func.value(result).ty)?;
            }
            write!(f, ")")?;
        }
    }
    writeln!(f)
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[crate::ids::ValueId]) -> fmt::Result {
    if args.is_empty() {
        return Ok(());
    }
    write!(f, "(")?;
    for (i, &arg) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{arg}")?;
    }
    write!(f, ")")
}
