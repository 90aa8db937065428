//! AArch64 lowering, the second concrete backend behind the `Backend` trait.
//! Same `dynasmrt`/`dynasm!` approach as `x86_64.rs`, using
//! `dynasmrt::aarch64::Assembler` instead.
//!
//! Calling convention (AAPCS64): `x0` = tape pointer, `x1` = `*mut
//! IoContext`, moved into callee-saved `x19`/`x20` in the prologue. AArch64
//! has no memory operand with an arbitrary register-plus-immediate
//! addressing mode the way x86 does for large or negative displacements
//! (`ldrb`/`strb`'s unsigned immediate form only covers `0..=4095`), so every
//! access first materializes an effective address in the scratch register
//! `x9` via `effective_address`, then loads/stores through `[x9]`.

use dynasmrt::aarch64::Assembler;
use dynasmrt::{dynasm, AssemblyOffset, DynamicLabel, DynasmApi, DynasmLabelApi, ExecutableBuffer};

use super::Backend;
use crate::error::CompileError;
use crate::jit_io;
use crate::label::LabelPool;

pub struct Aarch64Backend {
    ops: Assembler,
    labels: LabelPool,
}

impl Aarch64Backend {
    /// Set `x9 = x19 + offset`, either as a single `add`/`sub` with an
    /// immediate (offsets up to +/-4095, the common case after basic-block
    /// rewriting) or by building the full 64-bit displacement with
    /// `movz`/`movk` for anything larger.
    fn effective_address(&mut self, offset: i64) {
        if (0..=4095).contains(&offset) {
            let off = offset as u32;
            dynasm!(self.ops ; .arch aarch64 ; add X9, X19, off);
        } else if (-4095..0).contains(&offset) {
            let off = (-offset) as u32;
            dynasm!(self.ops ; .arch aarch64 ; sub X9, X19, off);
        } else {
            self.load_immediate_64(9, offset as u64);
            dynasm!(self.ops ; .arch aarch64 ; add X9, X19, X9);
        }
    }

    /// Load a full 64-bit constant into `Xn` via `movz` + up to three
    /// `movk`s, the standard AArch64 idiom for arbitrary immediates.
    fn load_immediate_64(&mut self, reg: u32, value: u64) {
        let w0 = (value & 0xffff) as u32;
        let w1 = ((value >> 16) & 0xffff) as u32;
        let w2 = ((value >> 32) & 0xffff) as u32;
        let w3 = ((value >> 48) & 0xffff) as u32;
        dynasm!(self.ops
            ; .arch aarch64
            ; movz X(reg), w0
            ; movk X(reg), w1, LSL 16
            ; movk X(reg), w2, LSL 32
            ; movk X(reg), w3, LSL 48
        );
    }
}

impl Backend for Aarch64Backend {
    fn new(loop_capacity: usize, misc_capacity: usize) -> Result<Self, CompileError> {
        let mut ops = Assembler::new().map_err(|e| CompileError::LinkFailed(e.to_string()))?;
        let labels = LabelPool::new_from(loop_capacity + misc_capacity, || ops.new_dynamic_label());
        Ok(Aarch64Backend { ops, labels })
    }

    fn offset(&mut self) -> AssemblyOffset {
        self.ops.offset()
    }

    fn new_label(&mut self) -> Result<DynamicLabel, CompileError> {
        self.labels.take()
    }

    fn bind(&mut self, label: DynamicLabel) {
        dynasm!(self.ops
            ; .arch aarch64
            ; =>label
        );
    }

    fn prologue(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; stp X29, X30, [sp, #-32]!
            ; mov X29, sp
            ; stp X19, X20, [sp, #16]
            ; mov X19, X0   // tape pointer
            ; mov X20, X1   // *mut IoContext
        );
    }

    fn epilogue(&mut self) {
        dynasm!(self.ops
            ; .arch aarch64
            ; mov X0, XZR
            ; ldp X19, X20, [sp, #16]
            ; ldp X29, X30, [sp], #32
            ; ret
        );
    }

    fn move_ptr(&mut self, n: i64) {
        if (0..=4095).contains(&n) {
            dynasm!(self.ops ; .arch aarch64 ; add X19, X19, n as u32);
        } else if (-4095..0).contains(&n) {
            dynasm!(self.ops ; .arch aarch64 ; sub X19, X19, (-n) as u32);
        } else {
            self.load_immediate_64(9, n as u64);
            dynasm!(self.ops ; .arch aarch64 ; add X19, X19, X9);
        }
    }

    fn add_val(&mut self, amount: u8, offset: i64) {
        self.effective_address(offset);
        dynasm!(self.ops
            ; .arch aarch64
            ; ldrb W10, [X9]
            ; add W10, W10, amount as u32
            ; strb W10, [X9]
        );
    }

    fn set_const(&mut self, value: u8, offset: i64) {
        self.effective_address(offset);
        dynasm!(self.ops
            ; .arch aarch64
            ; movz W10, value as u32
            ; strb W10, [X9]
        );
    }

    fn output(&mut self, offset: i64) {
        self.effective_address(offset);
        dynasm!(self.ops ; .arch aarch64 ; ldrb W0, [X9]);
        self.load_immediate_64(16, jit_io::write_byte as u64);
        // byte argument into w1 before x0 is clobbered with the ctx pointer
        // (w0/x0 alias the same register).
        dynasm!(self.ops
            ; .arch aarch64
            ; mov W1, W0
            ; mov X0, X20
            ; blr X16
        );
    }

    fn input(&mut self, offset: i64, eof_skip: DynamicLabel) {
        self.load_immediate_64(16, jit_io::read_byte as u64);
        dynasm!(self.ops
            ; .arch aarch64
            ; mov X0, X20
            ; blr X16
            ; cmn W0, 1
            ; b.eq =>eof_skip
        );
        self.effective_address(offset);
        dynasm!(self.ops ; .arch aarch64 ; strb W0, [X9]);
    }

    fn copy(&mut self, src: i64, dst: i64) {
        self.effective_address(src);
        dynasm!(self.ops ; .arch aarch64 ; ldrb W10, [X9]);
        self.effective_address(dst);
        dynasm!(self.ops
            ; .arch aarch64
            ; ldrb W11, [X9]
            ; add W11, W11, W10
            ; strb W11, [X9]
        );
    }

    fn mul(&mut self, factor: u8, src: i64, dst: i64) {
        self.effective_address(src);
        dynasm!(self.ops
            ; .arch aarch64
            ; ldrb W10, [X9]
            ; movz W12, factor as u32
            ; mul W10, W10, W12
        );
        self.effective_address(dst);
        dynasm!(self.ops
            ; .arch aarch64
            ; ldrb W11, [X9]
            ; add W11, W11, W10
            ; strb W11, [X9]
        );
    }

    fn loop_test_zero(&mut self, end: DynamicLabel) {
        dynasm!(self.ops
            ; .arch aarch64
            ; ldrb W10, [X19]
            ; cbz W10, =>end
        );
    }

    fn loop_test_nonzero(&mut self, start: DynamicLabel) {
        dynasm!(self.ops
            ; .arch aarch64
            ; ldrb W10, [X19]
            ; cbnz W10, =>start
        );
    }

    fn finalize(self, entry: AssemblyOffset) -> Result<(ExecutableBuffer, AssemblyOffset), CompileError> {
        let buf = self
            .ops
            .finalize()
            .map_err(|_| CompileError::EncodeFailed("aarch64 assembler finalize failed".to_string()))?;
        Ok((buf, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{emit, EmitOptions, Safety};
    use crate::parser::parse;

    #[test]
    fn compiles_empty_program() {
        let block = parse("").unwrap();
        let opts = EmitOptions { safety: Safety::Safe, debug: false };
        let (buf, start, _) = emit::<Aarch64Backend>(&block, &opts).unwrap();
        assert_eq!(start.0, 0);
        assert!(buf.len() > 0);
    }

    #[test]
    fn large_offset_uses_full_immediate_path() {
        let block = parse("+").unwrap();
        // Force a large in-block offset synthetically isn't possible through
        // parse alone (basic-block rewriting keeps offsets small for typical
        // programs); this test exercises the helper directly instead.
        let mut backend = Aarch64Backend::new(1, 1).unwrap();
        backend.effective_address(100_000);
        let _ = block;
    }

    /// Two sibling loops at depth 1 need four loop labels between them, the
    /// same as one loop nested two deep. The label pool must be sized by
    /// total loop count, not nesting depth, or this is rejected as though it
    /// were over `MAX_NESTING`.
    #[test]
    fn sequential_sibling_loops_are_not_mistaken_for_deep_nesting() {
        let block = parse("[>][>]").unwrap();
        let opts = EmitOptions { safety: Safety::Safe, debug: false };
        assert!(emit::<Aarch64Backend>(&block, &opts).is_ok());
    }
}
