//! x86-64 lowering. Uses `dynasmrt::x64`: an `Assembler` that owns a growing
//! code buffer and a relocation table, `dynasm!` macro calls to append
//! instructions, `finalize()` to link and encode in one step.
//!
//! Calling convention (SysV x86-64): `rdi` = tape pointer, `rsi` = `*mut
//! IoContext`. Both are moved into callee-saved registers (`r12`, `r13`) in
//! the prologue so they survive calls into the I/O trampolines.

use dynasmrt::x64::Assembler;
use dynasmrt::{dynasm, AssemblyOffset, DynamicLabel, DynasmApi, DynasmLabelApi, ExecutableBuffer};

use super::Backend;
use crate::error::CompileError;
use crate::jit_io;
use crate::label::LabelPool;

pub struct X86Backend {
    ops: Assembler,
    labels: LabelPool,
}

impl Backend for X86Backend {
    fn new(loop_capacity: usize, misc_capacity: usize) -> Result<Self, CompileError> {
        let mut ops = Assembler::new().map_err(|e| CompileError::LinkFailed(e.to_string()))?;
        let labels = LabelPool::new_from(loop_capacity + misc_capacity, || ops.new_dynamic_label());
        Ok(X86Backend { ops, labels })
    }

    fn offset(&mut self) -> AssemblyOffset {
        self.ops.offset()
    }

    fn new_label(&mut self) -> Result<DynamicLabel, CompileError> {
        self.labels.take()
    }

    fn bind(&mut self, label: DynamicLabel) {
        dynasm!(self.ops
            ; .arch x64
            ; =>label
        );
    }

    fn prologue(&mut self) {
        dynasm!(self.ops
            ; .arch x64
            ; push rbp
            ; mov rbp, rsp
            ; push rbx
            ; push r12
            ; push r13
            // four pushes since entry leave rsp 8 mod 16; pad so the `call`s
            // in `output`/`input` see the 16-byte alignment the SysV ABI
            // requires at the call site.
            ; sub rsp, 8
            ; mov r12, rdi   // tape pointer
            ; mov r13, rsi   // *mut IoContext
        );
    }

    fn epilogue(&mut self) {
        dynasm!(self.ops
            ; .arch x64
            ; xor eax, eax
            ; add rsp, 8
            ; pop r13
            ; pop r12
            ; pop rbx
            ; pop rbp
            ; ret
        );
    }

    fn move_ptr(&mut self, n: i64) {
        let n = n as i32;
        if n >= 0 {
            dynasm!(self.ops ; .arch x64 ; add r12, n);
        } else {
            dynasm!(self.ops ; .arch x64 ; sub r12, -n);
        }
    }

    fn add_val(&mut self, amount: u8, offset: i64) {
        let offset = offset as i32;
        let amount = amount as i32;
        dynasm!(self.ops
            ; .arch x64
            ; add BYTE [r12 + offset], amount
        );
    }

    fn set_const(&mut self, value: u8, offset: i64) {
        let offset = offset as i32;
        let value = value as i32;
        dynasm!(self.ops
            ; .arch x64
            ; mov BYTE [r12 + offset], value
        );
    }

    fn output(&mut self, offset: i64) {
        let offset = offset as i32;
        let target = jit_io::write_byte as i64;
        dynasm!(self.ops
            ; .arch x64
            ; movzx esi, BYTE [r12 + offset]
            ; mov rdi, r13
            ; mov rax, QWORD target
            ; call rax
        );
    }

    fn input(&mut self, offset: i64, eof_skip: DynamicLabel) {
        let offset = offset as i32;
        let target = jit_io::read_byte as i64;
        dynasm!(self.ops
            ; .arch x64
            ; mov rdi, r13
            ; mov rax, QWORD target
            ; call rax
            ; cmp eax, -1
            ; je =>eof_skip
            ; mov BYTE [r12 + offset], al
        );
    }

    fn copy(&mut self, src: i64, dst: i64) {
        let src = src as i32;
        let dst = dst as i32;
        dynasm!(self.ops
            ; .arch x64
            ; movzx eax, BYTE [r12 + src]
            ; add BYTE [r12 + dst], al
        );
    }

    fn mul(&mut self, factor: u8, src: i64, dst: i64) {
        let src = src as i32;
        let dst = dst as i32;
        let factor = factor as i32;
        dynasm!(self.ops
            ; .arch x64
            ; movzx eax, BYTE [r12 + src]
            ; imul eax, eax, factor
            ; add BYTE [r12 + dst], al
        );
    }

    fn loop_test_zero(&mut self, end: DynamicLabel) {
        dynasm!(self.ops
            ; .arch x64
            ; cmp BYTE [r12], 0
            ; je =>end
        );
    }

    fn loop_test_nonzero(&mut self, start: DynamicLabel) {
        dynasm!(self.ops
            ; .arch x64
            ; cmp BYTE [r12], 0
            ; jne =>start
        );
    }

    fn finalize(self, entry: AssemblyOffset) -> Result<(ExecutableBuffer, AssemblyOffset), CompileError> {
        let buf = self
            .ops
            .finalize()
            .map_err(|_| CompileError::EncodeFailed("x86-64 assembler finalize failed".to_string()))?;
        Ok((buf, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{emit, EmitOptions, Safety};
    use crate::parser::parse;

    /// Compiling a trivial program should produce a non-empty buffer with
    /// the entry point at its start.
    #[test]
    fn compiles_empty_program_to_prologue_and_epilogue_only() {
        let block = parse("").unwrap();
        let opts = EmitOptions { safety: Safety::Safe, debug: false };
        let (buf, start, debug_map) = emit::<X86Backend>(&block, &opts).unwrap();
        assert_eq!(start.0, 0);
        assert!(buf.len() > 0);
        assert!(debug_map.is_none());
    }

    #[test]
    fn debug_mode_populates_a_debug_map() {
        let block = parse("+.").unwrap();
        let opts = EmitOptions { safety: Safety::Safe, debug: true };
        let (_buf, _start, debug_map) = emit::<X86Backend>(&block, &opts).unwrap();
        let map = debug_map.unwrap();
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn nesting_over_max_is_rejected_before_emission() {
        let mut src = String::new();
        for _ in 0..crate::label::MAX_NESTING + 1 {
            src.push('[');
        }
        for _ in 0..crate::label::MAX_NESTING + 1 {
            src.push(']');
        }
        let block = parse(&src).unwrap();
        let opts = EmitOptions { safety: Safety::Safe, debug: false };
        let err = emit::<X86Backend>(&block, &opts).unwrap_err();
        assert!(matches!(err, CompileError::TooManyNestedLoops { .. }));
    }

    /// Two sibling loops at depth 1 need four loop labels between them, the
    /// same as one loop nested two deep. The label pool must be sized by
    /// total loop count, not nesting depth, or this is rejected as though it
    /// were over `MAX_NESTING`.
    #[test]
    fn sequential_sibling_loops_are_not_mistaken_for_deep_nesting() {
        let block = parse("[>][>]").unwrap();
        let opts = EmitOptions { safety: Safety::Safe, debug: false };
        assert!(emit::<X86Backend>(&block, &opts).is_ok());
    }
}
