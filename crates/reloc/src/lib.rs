//! AArch64 code relocation.
//!
//! Processes are not loaded from ELF objects; their text is compiled into
//! the kernel image and byte-copied into freshly allocated pages. A copy
//! alone breaks every PC-relative instruction whose target stays behind,
//! so the copy runs through this rewriter:
//!
//! - `B`/`BL` and `B.cond` targets **inside** the blob keep their relative
//!   offset and are copied untouched; targets outside are rebased so the
//!   absolute destination is unchanged.
//! - `ADRP` whose page target falls inside the accompanying data blob is
//!   rewritten to the data blob's new home. Any other `ADRP` target is
//!   unsupported: the instruction is copied as-is and a diagnostic logged.
//!
//! Everything else passes through verbatim. Callers own the subsequent
//! I-cache maintenance for the destination pages.

#![cfg_attr(not(feature = "std"), no_std)]

/// A code blob and the data blob its literals live in.
#[derive(Debug, Clone, Copy)]
pub struct RelocSpan {
    /// Base address of the source text.
    pub src: u64,
    /// Size of the text in bytes (multiple of 4).
    pub size: u32,
    /// Base address of the source data blob.
    pub src_data: u64,
    /// Base address the data blob was copied to.
    pub dst_data: u64,
    /// Size of the data blob in bytes.
    pub data_size: u32,
}

const B_OPCODE: u32 = 0b000101;
const BL_OPCODE: u32 = 0b100101;
const B_COND_PREFIX: u32 = 0b0101_0100;

#[inline]
fn sign_extend(value: i64, bits: u32) -> i64 {
    let shift = 64 - bits;
    (value << shift) >> shift
}

/// Decode the signed byte offset of a `B`/`BL` (26-bit imm, times 4).
#[inline]
pub fn branch_offset(instr: u32) -> i64 {
    sign_extend(instr as i64, 26) * 4
}

/// Re-encode a `B`/`BL` with a new word offset.
#[inline]
pub fn encode_branch(instr: u32, word_offset: i64) -> u32 {
    (instr & 0xFC00_0000) | (word_offset as u32 & 0x03FF_FFFF)
}

/// Decode the signed byte offset of a `B.cond` (19-bit imm at [23:5]).
#[inline]
pub fn branch_cond_offset(instr: u32) -> i64 {
    sign_extend(((instr >> 5) & 0x7_FFFF) as i64, 19) * 4
}

/// Re-encode a `B.cond` with a new word offset.
#[inline]
pub fn encode_branch_cond(instr: u32, word_offset: i64) -> u32 {
    (instr & !0x00FF_FFE0) | (((word_offset as u32) & 0x7_FFFF) << 5)
}

/// Decode the page offset of an `ADRP` ({immhi, immlo} << 12, 21-bit sign).
#[inline]
pub fn adrp_offset(instr: u32) -> i64 {
    let immlo = ((instr >> 29) & 0x3) as i64;
    let immhi = ((instr >> 5) & 0x7_FFFF) as i64;
    sign_extend((immhi << 14) | (immlo << 12), 33)
}

/// Re-encode an `ADRP` with a new byte offset (page granular).
#[inline]
pub fn encode_adrp(instr: u32, offset: i64) -> u32 {
    let immlo = ((offset >> 12) & 0x3) as u32;
    let immhi = ((offset >> 14) & 0x7_FFFF) as u32;
    let instr = (instr & !0x6000_0000) | (immlo << 29);
    (instr & !(0x7_FFFF << 5)) | (immhi << 5)
}

#[inline]
pub fn is_branch(instr: u32) -> bool {
    let op = instr >> 26;
    op == B_OPCODE || op == BL_OPCODE
}

#[inline]
pub fn is_branch_cond(instr: u32) -> bool {
    (instr >> 24) == B_COND_PREFIX
}

#[inline]
pub fn is_adrp(instr: u32) -> bool {
    (instr & 0x9F00_0000) == 0x9000_0000
}

/// Rewrite a single instruction word at index `i` of the blob for its new
/// home at `dst`. Pure; the driver loop writes the result to memory.
pub fn relocate_instr(instr: u32, i: u32, dst: u64, span: &RelocSpan) -> u32 {
    let pc = span.src + (i as u64) * 4;
    let new_pc = dst + (i as u64) * 4;

    if is_branch(instr) {
        let target = pc.wrapping_add_signed(branch_offset(instr));
        let internal = target >= span.src && target < span.src + span.size as u64;
        if internal {
            return instr;
        }
        let rel_words = (target.wrapping_sub(new_pc) as i64) >> 2;
        return encode_branch(instr, rel_words);
    }

    if is_branch_cond(instr) {
        let target = pc.wrapping_add_signed(branch_cond_offset(instr));
        let internal = target >= span.src && target < span.src + span.size as u64;
        if internal {
            return instr;
        }
        let rel_words = (target.wrapping_sub(new_pc) as i64) >> 2;
        return encode_branch_cond(instr, rel_words);
    }

    if is_adrp(instr) {
        let pc_page = pc & !0xFFF;
        let target = pc_page.wrapping_add_signed(adrp_offset(instr));
        let in_data = target >= span.src_data && target < span.src_data + span.data_size as u64;
        if !in_data {
            log::warn!(
                "[reloc] adrp at {:#x} targets {:#x}, outside the data blob; left unchanged",
                pc,
                target
            );
            return instr;
        }
        let new_target = span.dst_data + (target - span.src_data);
        let new_pc_page = new_pc & !0xFFF;
        let new_offset = new_target.wrapping_sub(new_pc_page) as i64;
        return encode_adrp(instr, new_offset);
    }

    instr
}

/// Copy `span.size` bytes of text from `span.src` to `dst`, rewriting
/// PC-relative instructions along the way.
///
/// # Safety
///
/// Source and destination ranges must be valid, non-overlapping, and
/// 4-byte aligned; the caller performs I-cache maintenance afterwards.
pub unsafe fn relocate_code(dst: u64, span: &RelocSpan) {
    let src32 = span.src as *const u32;
    let dst32 = dst as *mut u32;
    let count = span.size / 4;

    log::debug!(
        "[reloc] {} words from {:#x} to {:#x}",
        count,
        span.src,
        dst
    );

    for i in 0..count {
        let instr = unsafe { src32.add(i as usize).read() };
        let out = relocate_instr(instr, i, dst, span);
        unsafe { dst32.add(i as usize).write(out) };
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn span(src: u64, size: u32, src_data: u64, dst_data: u64, data_size: u32) -> RelocSpan {
        RelocSpan {
            src,
            size,
            src_data,
            dst_data,
            data_size,
        }
    }

    /// Encode `b <offset>` the assembler way (offset in bytes).
    fn b_instr(offset_bytes: i64) -> u32 {
        encode_branch(B_OPCODE << 26, offset_bytes >> 2)
    }

    fn bl_instr(offset_bytes: i64) -> u32 {
        encode_branch(BL_OPCODE << 26, offset_bytes >> 2)
    }

    fn b_cond_instr(cond: u32, offset_bytes: i64) -> u32 {
        encode_branch_cond((B_COND_PREFIX << 24) | cond, offset_bytes >> 2)
    }

    fn adrp_instr(rd: u32, offset: i64) -> u32 {
        encode_adrp(0x9000_0000 | rd, offset)
    }

    #[test]
    fn test_decode_encode_round_trip() {
        for off in [-4096i64, -4, 0, 4, 1024, 1 << 20] {
            assert_eq!(branch_offset(b_instr(off)), off);
            assert_eq!(branch_cond_offset(b_cond_instr(0, off)), off);
        }
        for off in [-(1i64 << 30), -4096, 0, 4096, 1 << 21, 1 << 30] {
            assert_eq!(adrp_offset(adrp_instr(0, off)), off);
        }
    }

    #[test]
    fn test_internal_branch_untouched() {
        let s = span(0x1000, 0x100, 0, 0, 0);
        // Forward branch to +0x20: stays inside [0x1000, 0x1100).
        let instr = b_instr(0x20);
        assert_eq!(relocate_instr(instr, 0, 0x9000, &s), instr);
        // Backward branch from word 8 to blob start.
        let instr = b_instr(-0x20);
        assert_eq!(relocate_instr(instr, 8, 0x9000, &s), instr);
    }

    #[test]
    fn test_external_branch_rebased_to_same_absolute_target() {
        let s = span(0x1000, 0x100, 0, 0, 0);
        // bl to absolute 0x4000 from word 2 (pc = 0x1008).
        let target = 0x4000u64;
        let instr = bl_instr(target as i64 - 0x1008);
        let out = relocate_instr(instr, 2, 0x9000, &s);
        // After the move, pc = 0x9008; the offset must still land on 0x4000.
        assert_eq!(0x9008u64.wrapping_add_signed(branch_offset(out)), target);
        // Opcode preserved.
        assert_eq!(out >> 26, BL_OPCODE);
    }

    #[test]
    fn test_external_branch_cond_rebased() {
        let s = span(0x1000, 0x40, 0, 0, 0);
        let target = 0x2000u64;
        let instr = b_cond_instr(0b0001, target as i64 - 0x1000); // b.ne
        let out = relocate_instr(instr, 0, 0x3000, &s);
        assert_eq!(0x3000u64.wrapping_add_signed(branch_cond_offset(out)), target);
        // Condition field preserved.
        assert_eq!(out & 0xF, 0b0001);
        assert_eq!(out >> 24, B_COND_PREFIX);
    }

    #[test]
    fn test_adrp_into_data_blob_rewritten() {
        // Data blob at 0x5000 (one page), moved to 0x2_3000.
        let s = span(0x1000, 0x100, 0x5000, 0x2_3000, 0x1000);
        let i = 3u32;
        let pc_page = (0x1000u64 + i as u64 * 4) & !0xFFF;
        let instr = adrp_instr(0, 0x5000i64 - pc_page as i64);

        let dst = 0x2_0000u64;
        let out = relocate_instr(instr, i, dst, &s);

        let new_pc_page = (dst + i as u64 * 4) & !0xFFF;
        let resolved = new_pc_page.wrapping_add_signed(adrp_offset(out));
        assert_eq!(resolved, 0x2_3000);
        // Register field preserved.
        assert_eq!(out & 0x1F, 0);
    }

    #[test]
    fn test_adrp_page_offset_within_blob_preserved() {
        // Target one page into a two-page data blob.
        let s = span(0x1000, 0x100, 0x5000, 0x2_3000, 0x2000);
        let instr = adrp_instr(2, 0x6000 - 0x1000);
        let out = relocate_instr(instr, 0, 0x2_0000, &s);
        let resolved = 0x2_0000u64.wrapping_add_signed(adrp_offset(out));
        assert_eq!(resolved, 0x2_3000 + 0x1000);
    }

    #[test]
    fn test_adrp_outside_data_left_unchanged() {
        let s = span(0x1000, 0x100, 0x5000, 0x2_3000, 0x1000);
        // Points at 0x8000, beyond the data blob.
        let instr = adrp_instr(1, 0x8000 - 0x1000);
        assert_eq!(relocate_instr(instr, 0, 0x2_0000, &s), instr);
    }

    #[test]
    fn test_other_instructions_pass_through() {
        let s = span(0x1000, 0x100, 0, 0, 0);
        for instr in [
            0xD503_201Fu32, // nop
            0x9100_0421,    // add x1, x1, #1
            0xF940_0041,    // ldr x1, [x2]
            0xD400_0061,    // svc #3
        ] {
            assert_eq!(relocate_instr(instr, 0, 0x9000, &s), instr);
        }
    }

    #[test]
    fn test_relocate_code_copies_whole_blob() {
        let src: [u32; 4] = [
            0xD503_201F,               // nop
            b_instr(-4),               // internal backward branch
            bl_instr(0x10_0000),       // external call
            0xD400_0061,               // svc #3
        ];
        let mut dst = [0u32; 4];
        let s = span(src.as_ptr() as u64, 16, 0, 0, 0);
        unsafe { relocate_code(dst.as_mut_ptr() as u64, &s) };

        assert_eq!(dst[0], src[0]);
        assert_eq!(dst[1], src[1], "internal branch untouched");
        assert_eq!(dst[3], src[3]);

        let target = (src.as_ptr() as u64 + 8).wrapping_add_signed(0x10_0000);
        let new_pc = dst.as_ptr() as u64 + 8;
        assert_eq!(new_pc.wrapping_add_signed(branch_offset(dst[2])), target);
    }

    #[test]
    fn test_relocation_idempotence() {
        // Relocating src -> dst1 -> dst2 resolves externals the same as
        // src -> dst2 directly.
        let src = 0x1_0000u64;
        let dst1 = 0x5_0000u64;
        let dst2 = 0x9_0000u64;
        let data_src = 0x2_0000u64;
        let data_dst1 = 0x6_0000u64;
        let data_dst2 = 0xA_0000u64;

        let ext_target = 0x40_0000u64;
        let instrs = [
            bl_instr(ext_target as i64 - src as i64), // word 0, external
            adrp_instr(0, data_src as i64 - (src as i64 & !0xFFF)),
        ];

        let s1 = span(src, 8, data_src, data_dst1, 0x1000);
        let hop: Vec<u32> = instrs
            .iter()
            .enumerate()
            .map(|(i, &ins)| relocate_instr(ins, i as u32, dst1, &s1))
            .collect();

        let s2 = span(dst1, 8, data_dst1, data_dst2, 0x1000);
        let hop2: Vec<u32> = hop
            .iter()
            .enumerate()
            .map(|(i, &ins)| relocate_instr(ins, i as u32, dst2, &s2))
            .collect();

        let direct_span = span(src, 8, data_src, data_dst2, 0x1000);
        let direct: Vec<u32> = instrs
            .iter()
            .enumerate()
            .map(|(i, &ins)| relocate_instr(ins, i as u32, dst2, &direct_span))
            .collect();

        // Semantically equivalent: same resolved targets at dst2.
        assert_eq!(
            dst2.wrapping_add_signed(branch_offset(hop2[0])),
            dst2.wrapping_add_signed(branch_offset(direct[0]))
        );
        assert_eq!(
            dst2.wrapping_add_signed(branch_offset(hop2[0])),
            ext_target
        );
        let page2 = (dst2 + 4) & !0xFFF;
        assert_eq!(
            page2.wrapping_add_signed(adrp_offset(hop2[1])),
            page2.wrapping_add_signed(adrp_offset(direct[1]))
        );
        assert_eq!(page2.wrapping_add_signed(adrp_offset(hop2[1])), data_dst2);
    }
}
