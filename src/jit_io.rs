//! The I/O side-channel JIT code calls back into for `OUTPUT`/`INPUT`: a
//! one-byte write to standard output, and a one-byte read that leaves the
//! cell unchanged on EOF.
//!
//! Rather than hand-emitting raw `syscall` instructions, the JIT function is
//! handed a pointer to an `IoContext` and calls two small `extern "C"`
//! trampolines to perform actual I/O through ordinary Rust `Read`/`Write`
//! objects. This is what lets the same JIT code run against stdin/stdout in
//! the CLI driver and against an in-memory buffer in tests.

use std::io::{Read, Write};

/// Per-run I/O state, passed to the JIT function as its second argument.
pub struct IoContext<'a> {
    pub input: &'a mut dyn Read,
    pub output: &'a mut dyn Write,
    /// First I/O error encountered; checked after the JIT function returns
    /// so the hot path never has to thread a `Result` through machine code.
    pub error: Option<std::io::Error>,
}

impl<'a> IoContext<'a> {
    pub fn new(input: &'a mut dyn Read, output: &'a mut dyn Write) -> Self {
        IoContext {
            input,
            output,
            error: None,
        }
    }

    pub fn take_error(&mut self) -> Option<std::io::Error> {
        self.error.take()
    }
}

/// Write one byte to `ctx.output`. Called by JIT code for `OUTPUT(off)`.
///
/// # Safety
/// `ctx` must be a valid, exclusively-owned `*mut IoContext` for the
/// duration of the call; the JIT function upholds this by construction,
/// since the `IoContext` is scoped to a single execution.
pub extern "C" fn write_byte(ctx: *mut IoContext, byte: u8) {
    let ctx = unsafe { &mut *ctx };
    if ctx.error.is_some() {
        return;
    }
    if let Err(e) = ctx.output.write_all(&[byte]) {
        ctx.error = Some(e);
    }
}

/// Read one byte from `ctx.input`. Returns the byte as `0..=255`, or `-1` on
/// EOF or I/O error — the JIT-emitted `INPUT` sequence checks for `-1` and
/// leaves the target cell unchanged in that case.
///
/// # Safety
/// Same contract as `write_byte`.
pub extern "C" fn read_byte(ctx: *mut IoContext) -> i32 {
    let ctx = unsafe { &mut *ctx };
    if ctx.error.is_some() {
        return -1;
    }
    let mut byte = [0u8; 1];
    match ctx.input.read(&mut byte) {
        Ok(1) => byte[0] as i32,
        Ok(_) => -1,
        Err(e) => {
            ctx.error = Some(e);
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_byte_returns_minus_one_at_eof() {
        let mut input = Cursor::new(Vec::<u8>::new());
        let mut output = Vec::new();
        let mut ctx = IoContext::new(&mut input, &mut output);
        assert_eq!(read_byte(&mut ctx as *mut _), -1);
    }

    #[test]
    fn read_byte_returns_byte_value() {
        let mut input = Cursor::new(vec![b'Q']);
        let mut output = Vec::new();
        let mut ctx = IoContext::new(&mut input, &mut output);
        assert_eq!(read_byte(&mut ctx as *mut _), b'Q' as i32);
    }

    #[test]
    fn write_byte_appends_to_output() {
        let mut input = Cursor::new(Vec::<u8>::new());
        let mut output = Vec::new();
        {
            let mut ctx = IoContext::new(&mut input, &mut output);
            write_byte(&mut ctx as *mut _, b'Z');
        }
        assert_eq!(output, vec![b'Z']);
    }
}
