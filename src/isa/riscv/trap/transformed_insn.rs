//! Transformed instruction encodings reported through `mtinst`/`htinst`.
//!
//! Loads and stores are reported with their immediate cleared and `rs1`
//! replaced by the misalignment of the faulting address. Compressed
//! accesses are widened to their 32-bit form with bit 1 cleared.

use crate::config::arch_config::WordType;

/// Pseudo-instruction for a G-stage fault during a VS-stage walk.
pub const PSEUDO_PTE_READ_32: WordType = 0x0000_2000;
pub const PSEUDO_PTE_READ_64: WordType = 0x0000_3000;

#[rustfmt::skip]
mod opc {
    pub const LW  : u32 = 0x2003;
    pub const LD  : u32 = 0x3003;
    pub const FLW : u32 = 0x2007;
    pub const FLD : u32 = 0x3007;
    pub const SW  : u32 = 0x2023;
    pub const SD  : u32 = 0x3023;
    pub const FSW : u32 = 0x2027;
    pub const FSD : u32 = 0x3027;

    pub const LOAD      : u32 = 0x03;
    pub const FP_LOAD   : u32 = 0x07;
    pub const ATOMIC    : u32 = 0x2f;
    pub const STORE     : u32 = 0x23;
    pub const FP_STORE  : u32 = 0x27;
    pub const SYSTEM    : u32 = 0x73;
    /// funct3 of hypervisor virtual-machine loads and stores.
    pub const HLVHSV_F3 : u32 = 0x4;
}

#[inline]
fn bits(insn: u32, hi: u32, lo: u32) -> u32 {
    (insn >> lo) & ((1 << (hi - lo + 1)) - 1)
}

#[inline]
fn set_rd(insn: u32, rd: u32) -> u32 {
    (insn & !(0x1f << 7)) | (rd << 7)
}

#[inline]
fn set_rs1(insn: u32, rs1: u32) -> u32 {
    (insn & !(0x1f << 15)) | ((rs1 & 0x1f) << 15)
}

#[inline]
fn set_rs2(insn: u32, rs2: u32) -> u32 {
    (insn & !(0x1f << 20)) | (rs2 << 20)
}

/// Register operands of the compressed forms.
mod c {
    use super::bits;

    pub fn rs1s(insn: u32) -> u32 {
        8 + bits(insn, 9, 7)
    }

    pub fn rs2s(insn: u32) -> u32 {
        8 + bits(insn, 4, 2)
    }

    pub fn rd(insn: u32) -> u32 {
        bits(insn, 11, 7)
    }

    pub fn rs2(insn: u32) -> u32 {
        bits(insn, 6, 2)
    }

    pub fn lw_imm(insn: u32) -> u32 {
        (bits(insn, 6, 6) << 2) | (bits(insn, 12, 10) << 3) | (bits(insn, 5, 5) << 6)
    }

    pub fn ld_imm(insn: u32) -> u32 {
        (bits(insn, 12, 10) << 3) | (bits(insn, 6, 5) << 6)
    }

    pub fn lwsp_imm(insn: u32) -> u32 {
        (bits(insn, 6, 4) << 2) | (bits(insn, 12, 12) << 5) | (bits(insn, 3, 2) << 6)
    }

    pub fn ldsp_imm(insn: u32) -> u32 {
        (bits(insn, 6, 5) << 3) | (bits(insn, 12, 12) << 5) | (bits(insn, 4, 2) << 6)
    }

    pub fn swsp_imm(insn: u32) -> u32 {
        (bits(insn, 12, 9) << 2) | (bits(insn, 8, 7) << 6)
    }

    pub fn sdsp_imm(insn: u32) -> u32 {
        (bits(insn, 12, 10) << 3) | (bits(insn, 9, 7) << 6)
    }
}

/// The access a faulting instruction made: widened encoding, base
/// register, immediate and size in bytes.
struct Access {
    xinsn: u32,
    rs1: u32,
    imm: WordType,
    size: WordType,
}

impl Access {
    fn none() -> Self {
        Self { xinsn: 0, rs1: 0, imm: 0, size: 0 }
    }
}

fn decode_compressed(insn: u32, rv32: bool) -> Access {
    let quadrant = insn & 0x3;
    let funct = bits(insn, 15, 13);
    // (opcode, widened with rd or rs2, register, base, imm, size)
    let (op, is_load, reg, rs1, imm, size) = match (quadrant, funct) {
        (0, 1) => (opc::FLD, true, c::rs2s(insn), c::rs1s(insn), c::ld_imm(insn), 8),
        (0, 2) => (opc::LW, true, c::rs2s(insn), c::rs1s(insn), c::lw_imm(insn), 4),
        (0, 3) if rv32 => (opc::FLW, true, c::rs2s(insn), c::rs1s(insn), c::lw_imm(insn), 4),
        (0, 3) => (opc::LD, true, c::rs2s(insn), c::rs1s(insn), c::ld_imm(insn), 8),
        (0, 5) => (opc::FSD, false, c::rs2s(insn), c::rs1s(insn), c::ld_imm(insn), 8),
        (0, 6) => (opc::SW, false, c::rs2s(insn), c::rs1s(insn), c::lw_imm(insn), 4),
        (0, 7) if rv32 => (opc::FSW, false, c::rs2s(insn), c::rs1s(insn), c::lw_imm(insn), 4),
        (0, 7) => (opc::SD, false, c::rs2s(insn), c::rs1s(insn), c::ld_imm(insn), 8),
        (2, 1) => (opc::FLD, true, c::rd(insn), 2, c::ldsp_imm(insn), 8),
        (2, 2) => (opc::LW, true, c::rd(insn), 2, c::lwsp_imm(insn), 4),
        (2, 3) if rv32 => (opc::FLW, true, c::rd(insn), 2, c::lwsp_imm(insn), 4),
        (2, 3) => (opc::LD, true, c::rd(insn), 2, c::ldsp_imm(insn), 8),
        (2, 5) => (opc::FSD, false, c::rs2(insn), 2, c::sdsp_imm(insn), 8),
        (2, 6) => (opc::SW, false, c::rs2(insn), 2, c::swsp_imm(insn), 4),
        (2, 7) if rv32 => (opc::FSW, false, c::rs2(insn), 2, c::swsp_imm(insn), 4),
        (2, 7) => (opc::SD, false, c::rs2(insn), 2, c::sdsp_imm(insn), 8),
        _ => return Access::none(),
    };
    let xinsn = if is_load { set_rd(op, reg) } else { set_rs2(op, reg) };
    Access {
        xinsn,
        rs1,
        imm: imm as WordType,
        size,
    }
}

fn decode_full(insn: u32) -> Access {
    let rs1 = bits(insn, 19, 15);
    let funct3 = bits(insn, 14, 12);
    match insn & 0x7f {
        opc::ATOMIC => Access {
            xinsn: insn,
            rs1,
            imm: 0,
            size: 1 << (funct3 & 0x3),
        },
        opc::LOAD | opc::FP_LOAD => Access {
            xinsn: insn & 0x000f_ffff,
            rs1,
            imm: ((insn as i32) >> 20) as i64 as WordType,
            size: 1 << (funct3 & 0x3),
        },
        opc::STORE | opc::FP_STORE => {
            let imm = (((insn as i32) >> 25) << 5) | bits(insn, 11, 7) as i32;
            Access {
                xinsn: insn & 0x01ff_f07f,
                rs1,
                imm: imm as i64 as WordType,
                size: 1 << (funct3 & 0x3),
            }
        }
        opc::SYSTEM if funct3 == opc::HLVHSV_F3 => Access {
            xinsn: insn,
            rs1,
            imm: 0,
            size: 1 << ((bits(insn, 31, 25) >> 1) & 0x3),
        },
        _ => Access::none(),
    }
}

/// Encode `insn`, which faulted on `taddr`, for `*tinst`.
pub fn transformed_insn(insn: WordType, taddr: WordType, gpr: &[WordType; 32], xlen: u32) -> WordType {
    let insn = insn as u32;
    let compressed = insn & 0x3 != 0x3;
    let access = if compressed {
        decode_compressed(insn, xlen == 32)
    } else {
        decode_full(insn)
    };

    let mut xinsn = access.xinsn;
    if compressed {
        xinsn &= !0x2;
    }
    if access.size != 0 {
        let base = gpr[access.rs1 as usize].wrapping_add(access.imm);
        let offset = taddr.wrapping_sub(base) & (access.size - 1);
        xinsn = set_rs1(xinsn, offset as u32);
    }
    xinsn as WordType
}

#[cfg(test)]
mod test {
    use super::*;

    fn regs(pairs: &[(usize, WordType)]) -> [WordType; 32] {
        let mut gpr = [0; 32];
        for &(r, v) in pairs {
            gpr[r] = v;
        }
        gpr
    }

    #[test]
    fn test_load_reports_offset() {
        // lw a0, 8(a1)
        let insn = 0x0085_a503;
        let gpr = regs(&[(11, 0x1000)]);
        // Immediate cleared, rs1 carries the misalignment.
        assert_eq!(transformed_insn(insn, 0x100a, &gpr, 64), 0x0001_2503);
        assert_eq!(transformed_insn(insn, 0x1008, &gpr, 64), 0x0000_2503);
    }

    #[test]
    fn test_store_clears_split_immediate() {
        // sd a0, -8(sp)
        let insn = 0xfea1_3c23;
        let gpr = regs(&[(2, 0x2000)]);
        assert_eq!(transformed_insn(insn, 0x1ff8, &gpr, 64), 0x00a0_3023);
    }

    #[test]
    fn test_compressed_load_is_widened() {
        // c.lw a0, 4(a1)
        let insn = 0x41c8;
        let gpr = regs(&[(11, 0x3000)]);
        let x = transformed_insn(insn, 0x3006, &gpr, 32);
        assert_eq!(x & 0x3, 0x1, "bit 1 marks a compressed source instruction");
        assert_eq!(x & !(0x1f << 15), opc::LW as WordType & !0x2 | (10 << 7));
        assert_eq!((x >> 15) & 0x1f, 2);
    }

    #[test]
    fn test_compressed_sp_store() {
        // c.sdsp ra, 8(sp)
        let insn = 0xe406;
        let gpr = regs(&[(2, 0x4000)]);
        let x = transformed_insn(insn, 0x4008, &gpr, 64);
        assert_eq!(x, (opc::SD as WordType & !0x2) | (1 << 20));
    }

    #[test]
    fn test_hypervisor_load_size() {
        // hlv.w a0, (a1): funct7 0x34
        let insn = (0x34 << 25) | (11 << 15) | (0x4 << 12) | (10 << 7) | 0x73;
        let gpr = regs(&[(11, 0x5000)]);
        let x = transformed_insn(insn as WordType, 0x5002, &gpr, 64);
        assert_eq!((x >> 15) & 0x1f, 2);
    }

    #[test]
    fn test_other_instructions_report_zero() {
        let gpr = [0; 32];
        // addi a0, a0, 1
        assert_eq!(transformed_insn(0x0015_0513, 0, &gpr, 64), 0);
        // c.addi a0, 1: quadrant 1 never faults on data
        assert_eq!(transformed_insn(0x0505, 0, &gpr, 64), 0);
    }
}
