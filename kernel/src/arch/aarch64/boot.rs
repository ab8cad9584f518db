//! Boot entry.
//!
//! QEMU's loader jumps here with the MMU off and a DTB at the base of RAM.
//! Secondary cores park; the primary zeroes BSS, takes the boot stack, and
//! drops into `kernel_main` with everything still masked.

use core::arch::global_asm;

global_asm!(
    r#"
.section ".text.head", "ax"
.global _head
.global _start

_head:
    b       _start
    .long   0
    .quad   0x80000          /* text_offset: image expects RAM_BASE + 0x80000 */
    .quad   _kernel_size     /* image_size from the linker script */
    .quad   0x0A             /* flags: LE, 4K pages */
    .quad   0
    .quad   0
    .quad   0
    .ascii  "ARM\x64"
    .long   0

_start:
    msr     daifset, #0xf
    mrs     x1, mpidr_el1
    and     x1, x1, #0xFF
    cbz     x1, primary_cpu

secondary_halt:
    wfe
    b       secondary_halt

primary_cpu:
    /* Enable FP/SIMD access so compiler-emitted SIMD does not trap */
    mov     x0, #0x300000
    msr     cpacr_el1, x0
    isb

    ldr     x0, =__bss_start
    ldr     x1, =__bss_end
    mov     x2, #0
bss_loop:
    cmp     x0, x1
    b.ge    bss_done
    str     x2, [x0], #8
    b       bss_loop
bss_done:

    ldr     x0, =stack_top
    mov     sp, x0
    bl      kernel_main

hang:
    wfe
    b       hang
"#
);
