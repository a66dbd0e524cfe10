//! x86_64 context switching
//!
//! Voluntary switches only: the System V callee-saved set plus stack and
//! resume pointers. Stable `naked_asm` (Rust 1.88+).

use std::arch::naked_asm;

/// Saved execution context
///
/// Field order is load-bearing: the assembly below addresses fields by
/// offset.
#[repr(C)]
#[allow(dead_code)] // only the switch assembly reads these
pub struct Context {
    rip: u64, // 0x00
    rsp: u64, // 0x08
    rbx: u64, // 0x10
    rbp: u64, // 0x18
    r12: u64, // 0x20
    r13: u64, // 0x28
    r14: u64, // 0x30
    r15: u64, // 0x38
}

impl Context {
    pub const fn new() -> Self {
        Self {
            rip: 0,
            rsp: 0,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
        }
    }
}

/// Prepare a context so that switching to it enters `entry(arg)` on the
/// given stack.
///
/// # Safety
///
/// `ctx` must point to writable `Context` memory and `stack_top` to the
/// high end of a live, sufficiently large stack.
pub unsafe fn init_context(
    ctx: *mut Context,
    stack_top: *mut u8,
    entry: extern "C" fn(usize),
    arg: usize,
) {
    // The trampoline is entered by `jmp` with rsp exactly 16-aligned; its
    // `call` then pushes the return address, giving the entry function the
    // rsp ≡ 8 (mod 16) frame the System V ABI promises a callee.
    let sp = stack_top as usize & !0xF;

    let ctx = &mut *ctx;
    ctx.rip = entry_trampoline as usize as u64;
    ctx.rsp = sp as u64;
    ctx.rbx = 0;
    ctx.rbp = 0;
    ctx.r12 = entry as usize as u64;
    ctx.r13 = arg as u64;
    ctx.r14 = 0;
    ctx.r15 = 0;
}

/// First frame of a fresh coroutine: entry fn in r12, argument in r13.
///
/// The entry function never returns (it finishes with a switch back to the
/// host), so anything past the call is unreachable.
#[unsafe(naked)]
unsafe extern "C" fn entry_trampoline() {
    naked_asm!("mov rdi, r13", "call r12", "ud2",);
}

/// Save the current context into `save` and resume `restore`.
///
/// Returns when something later switches back into `save`.
///
/// # Safety
///
/// Both pointers must reference valid `Context` records; `restore` must
/// hold either an initialized entry context or a previously saved one.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_save: *mut Context, _restore: *const Context) {
    naked_asm!(
        // Save callee-saved state into `save` (rdi); the resume point is
        // the local label at the end.
        "lea rax, [rip + 2f]",
        "mov [rdi + 0x00], rax",
        "mov [rdi + 0x08], rsp",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load `restore` (rsi) and jump to its resume point.
        "mov rax, [rsi + 0x00]",
        "mov rsp, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        "2:",
        "ret",
    );
}
