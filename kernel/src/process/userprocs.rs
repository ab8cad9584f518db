//! Compiled-in user process blobs.
//!
//! The demo process is written as a self-contained assembly blob in its
//! own text/rodata sections so the loader can measure, copy, and relocate
//! it. Constraints on blob code: branches stay inside the blob, literal
//! data is reached only through ADRP into the blob's rodata section, and
//! everything else lives in registers or on the stack.

use core::arch::global_asm;

// Counter ticks on the stack; the only memory reference outside the text
// is the ADRP+ADD pair for the format string, which the relocator rebases.
global_asm!(
    r#"
.section .text.proc1, "ax"
.global proc_1_entry
proc_1_entry:
    mov     x9, #0
1:
    str     x9, [sp, #-16]!
    adrp    x0, proc_1_fmt
    add     x0, x0, :lo12:proc_1_fmt
    mov     x1, sp
    mov     x2, #1
    mov     x8, #3
    svc     #3
    ldr     x9, [sp], #16
    add     x9, x9, #1
    b       1b

.section .rodata.proc1, "a"
.balign 8
.global proc_1_fmt
proc_1_fmt:
    .asciz  "user process tick %i"
"#
);

// Cross-EL shim in the shared region (read-only and executable from both
// levels): a blob can `bl` here instead of open-coding the SVC, because the
// shared section is identity-mapped at a fixed address and survives
// relocation as an external branch target.
global_asm!(
    r#"
.section .shared, "ax"
.global shared_printf
shared_printf:
    mov     x8, #3
    svc     #3
    ret
"#
);

mod sym {
    unsafe extern "C" {
        pub static proc_1_start: u8;
        pub static proc_1_end: u8;
        pub static proc_1_rodata_start: u8;
        pub static proc_1_rodata_end: u8;
    }
}

/// Load one copy of the demo EL0 process.
pub fn spawn_demo() {
    let code_base = unsafe { core::ptr::addr_of!(sym::proc_1_start) as u64 };
    let code_end = unsafe { core::ptr::addr_of!(sym::proc_1_end) as u64 };
    let data_base = unsafe { core::ptr::addr_of!(sym::proc_1_rodata_start) as u64 };
    let data_end = unsafe { core::ptr::addr_of!(sym::proc_1_rodata_end) as u64 };

    if super::loader::create_process(
        code_base,
        code_end - code_base,
        data_base,
        data_end - data_base,
    )
    .is_none()
    {
        log::warn!("demo user process not loaded");
    }
}
