//! Bit-field layouts of the privileged CSRs.

#![allow(unused)]

use crate::config::arch_config::WordType;

#[rustfmt::skip]
pub mod mstatus {
    use super::WordType;
    pub const SIE       : WordType = 1 << 1;
    pub const MIE       : WordType = 1 << 3;
    pub const SPIE      : WordType = 1 << 5;
    pub const UBE       : WordType = 1 << 6;
    pub const MPIE      : WordType = 1 << 7;
    pub const SPP       : WordType = 1 << 8;
    pub const VS        : WordType = 0b11 << 9;
    pub const MPP       : WordType = 0b11 << 11;
    pub const FS        : WordType = 0b11 << 13;
    pub const XS        : WordType = 0b11 << 15;
    pub const MPRV      : WordType = 1 << 17;
    pub const SUM       : WordType = 1 << 18;
    pub const MXR       : WordType = 1 << 19;
    pub const TVM       : WordType = 1 << 20;
    pub const TW        : WordType = 1 << 21;
    pub const TSR       : WordType = 1 << 22;
    pub const SPELP     : WordType = 1 << 23;
    pub const SDT       : WordType = 1 << 24;
    pub const UXL       : WordType = 0b11 << 32;
    pub const SXL       : WordType = 0b11 << 34;
    pub const GVA       : WordType = 1 << 38;
    pub const MPV       : WordType = 1 << 39;
    pub const MPELP     : WordType = 1 << 41;
    pub const MDT       : WordType = 1 << 42;
    pub const SD64      : WordType = 1 << 63;
    pub const SD32      : WordType = 1 << 31;

    pub const FS_DIRTY  : WordType = 3;

    /// Fields visible through `sstatus`.
    pub const SSTATUS_MASK: WordType =
        SIE | SPIE | SPP | FS | XS | SUM | MXR | VS | SDT;
}

#[rustfmt::skip]
pub mod hstatus {
    use super::WordType;
    pub const VSBE      : WordType = 1 << 5;
    pub const GVA       : WordType = 1 << 6;
    pub const SPV       : WordType = 1 << 7;
    pub const SPVP      : WordType = 1 << 8;
    pub const HU        : WordType = 1 << 9;
    pub const VGEIN     : WordType = 0x3f << 12;
    pub const VTVM      : WordType = 1 << 20;
    pub const VTW       : WordType = 1 << 21;
    pub const VTSR      : WordType = 1 << 22;
    pub const VSXL      : WordType = 0b11 << 32;

    pub const WRITE_MASK: WordType =
        VSBE | GVA | SPV | SPVP | HU | VGEIN | VTVM | VTW | VTSR | VSXL;
}

/// Interrupt bit masks, as laid out in `mip`/`mie`.
#[rustfmt::skip]
pub mod mip {
    use super::WordType;
    use crate::isa::riscv::trap::irq;

    pub const SSIP      : WordType = 1 << irq::S_SOFT;
    pub const VSSIP     : WordType = 1 << irq::VS_SOFT;
    pub const MSIP      : WordType = 1 << irq::M_SOFT;
    pub const STIP      : WordType = 1 << irq::S_TIMER;
    pub const VSTIP     : WordType = 1 << irq::VS_TIMER;
    pub const MTIP      : WordType = 1 << irq::M_TIMER;
    pub const SEIP      : WordType = 1 << irq::S_EXT;
    pub const VSEIP     : WordType = 1 << irq::VS_EXT;
    pub const MEIP      : WordType = 1 << irq::M_EXT;
    pub const SGEIP     : WordType = 1 << irq::S_GEXT;
    pub const LCOFIP    : WordType = 1 << irq::PMU_OVF;

    pub const M_MODE_INTERRUPTS : WordType = MSIP | MTIP | MEIP;
    pub const S_MODE_INTERRUPTS : WordType = SSIP | STIP | SEIP;
    pub const VS_MODE_INTERRUPTS: WordType = VSSIP | VSTIP | VSEIP;
    pub const HS_MODE_INTERRUPTS: WordType = SGEIP | VS_MODE_INTERRUPTS;
    /// Bits 13..63: LCOFI and the virtual-only major interrupts.
    pub const LOCAL_INTERRUPTS  : WordType = !0x1FFF;

    pub const DELEGABLE_INTS    : WordType = S_MODE_INTERRUPTS | VS_MODE_INTERRUPTS | LCOFIP;
    pub const VS_DELEGABLE_INTS : WordType = VS_MODE_INTERRUPTS | LOCAL_INTERRUPTS;
    pub const ALL_INTS          : WordType =
        M_MODE_INTERRUPTS | S_MODE_INTERRUPTS | HS_MODE_INTERRUPTS | LOCAL_INTERRUPTS;

    pub const MVIP_WRITABLE     : WordType = SSIP | STIP | SEIP | LOCAL_INTERRUPTS;
    pub const MVIEN_WRITABLE    : WordType = SSIP | SEIP | LOCAL_INTERRUPTS;
    pub const SIP_WRITABLE      : WordType = SSIP | LOCAL_INTERRUPTS;
    pub const HIP_WRITABLE      : WordType = VSSIP;
    pub const HVIP_WRITABLE     : WordType = VSSIP | VSTIP | VSEIP | LOCAL_INTERRUPTS;
    pub const HVIEN_WRITABLE    : WordType = LOCAL_INTERRUPTS;
    pub const VSIP_WRITABLE     : WordType = VSSIP | LOCAL_INTERRUPTS;
}

/// Exception delegation masks.
pub mod deleg {
    use super::WordType;
    use crate::isa::riscv::trap::Exception::{self, *};

    const fn bits(list: &[Exception]) -> WordType {
        let mut mask = 0;
        let mut i = 0;
        while i < list.len() {
            mask |= 1 << (list[i] as u64);
            i += 1;
        }
        mask
    }

    pub const DELEGABLE_EXCPS: WordType = bits(&[
        InstructionMisaligned,
        InstructionFault,
        IllegalInstruction,
        Breakpoint,
        LoadMisaligned,
        LoadFault,
        StoreMisaligned,
        StoreFault,
        UserEnvCall,
        SupervisorEnvCall,
        VirtualSupervisorEnvCall,
        MachineEnvCall,
        InstructionPageFault,
        LoadPageFault,
        StorePageFault,
        SoftwareCheck,
        InstructionGuestPageFault,
        LoadGuestPageFault,
        VirtualInstruction,
        StoreGuestPageFault,
    ]);

    pub const VS_DELEGABLE_EXCPS: WordType = DELEGABLE_EXCPS
        & !bits(&[
            SupervisorEnvCall,
            VirtualSupervisorEnvCall,
            MachineEnvCall,
            InstructionGuestPageFault,
            LoadGuestPageFault,
            VirtualInstruction,
            StoreGuestPageFault,
        ]);
}

#[rustfmt::skip]
pub mod counteren {
    use super::WordType;
    pub const CY        : WordType = 1 << 0;
    pub const TM        : WordType = 1 << 1;
    pub const IR        : WordType = 1 << 2;
}

#[rustfmt::skip]
pub mod hpmevent {
    use super::WordType;
    /// Event selectors that follow one of the hart clocks.
    pub const CYCLES    : WordType = 1;
    pub const INSTRET   : WordType = 2;
    /// Bits 63:56 are overflow and filter controls, not part of the selector.
    pub const SELECTOR  : WordType = 0x00FF_FFFF_FFFF_FFFF;
}

#[rustfmt::skip]
pub mod envcfg {
    use super::WordType;
    pub const FIOM      : WordType = 1 << 0;
    pub const LPE       : WordType = 1 << 2;
    pub const SSE       : WordType = 1 << 3;
    pub const CBIE      : WordType = 0b11 << 4;
    pub const CBCFE     : WordType = 1 << 6;
    pub const CBZE      : WordType = 1 << 7;
    pub const PMM       : WordType = 0b11 << 32;
    pub const DTE       : WordType = 1 << 59;
    pub const CDE       : WordType = 1 << 60;
    pub const ADUE      : WordType = 1 << 61;
    pub const PBMTE     : WordType = 1 << 62;
    pub const STCE      : WordType = 1 << 63;

    pub const PMM_RESERVED: WordType = 1;
}

#[rustfmt::skip]
pub mod mseccfg {
    use super::WordType;
    pub const MML       : WordType = 1 << 0;
    pub const MMWP      : WordType = 1 << 1;
    pub const RLB       : WordType = 1 << 2;
    pub const USEED     : WordType = 1 << 8;
    pub const SSEED     : WordType = 1 << 9;
    pub const MLPE      : WordType = 1 << 10;
    pub const PMM       : WordType = 0b11 << 32;
}

#[rustfmt::skip]
pub mod satp {
    use super::WordType;
    pub const MODE32    : WordType = 0x8000_0000;
    pub const ASID32    : WordType = 0x7fc0_0000;
    pub const PPN32     : WordType = 0x003f_ffff;
    pub const MODE64    : WordType = 0xF000_0000_0000_0000;
    pub const ASID64    : WordType = 0x0FFF_F000_0000_0000;
    pub const PPN64     : WordType = 0x0000_0FFF_FFFF_FFFF;
}

#[rustfmt::skip]
pub mod hvictl {
    use super::WordType;
    pub const VTI       : WordType = 0x4000_0000;
    pub const IID       : WordType = 0x0fff_0000;
    pub const IPRIOM    : WordType = 0x0000_0100;
    pub const IPRIO     : WordType = 0x0000_00ff;
    pub const VALID_MASK: WordType = VTI | IID | IPRIOM | IPRIO;
}

#[rustfmt::skip]
pub mod ctr {
    use super::WordType;
    pub const U_ENABLE      : WordType = 1 << 0;
    pub const S_ENABLE      : WordType = 1 << 1;
    pub const M_ENABLE      : WordType = 1 << 2;
    pub const RASEMU        : WordType = 1 << 7;
    pub const STE           : WordType = 1 << 8;
    pub const MTE           : WordType = 1 << 9;
    pub const BPFRZ         : WordType = 1 << 11;
    pub const LCOFIFRZ      : WordType = 1 << 12;
    pub const EXCINH        : WordType = 1 << 33;
    pub const INTRINH       : WordType = 1 << 34;
    pub const TRETINH       : WordType = 1 << 35;
    pub const NTBREN        : WordType = 1 << 36;
    pub const TKBRINH       : WordType = 1 << 37;
    pub const INDCALL_INH   : WordType = 1 << 40;
    pub const DIRCALL_INH   : WordType = 1 << 41;
    pub const INDJUMP_INH   : WordType = 1 << 42;
    pub const DIRJUMP_INH   : WordType = 1 << 43;
    pub const CORSWAP_INH   : WordType = 1 << 44;
    pub const RET_INH       : WordType = 1 << 45;
    pub const INDOJUMP_INH  : WordType = 1 << 46;
    pub const DIROJUMP_INH  : WordType = 1 << 47;
    /// Inhibit bit of transfer type `t` is `1 << (INH_START + t)`.
    pub const INH_START     : u32 = 32;

    pub const INH_MASK: WordType = EXCINH | INTRINH | TRETINH | NTBREN | TKBRINH
        | INDCALL_INH | DIRCALL_INH | INDJUMP_INH | DIRJUMP_INH | CORSWAP_INH
        | RET_INH | INDOJUMP_INH | DIROJUMP_INH;

    pub const MCTRCTL_MASK: WordType = M_ENABLE | S_ENABLE | U_ENABLE | RASEMU | MTE | STE
        | BPFRZ | LCOFIFRZ | INH_MASK;
    pub const SCTRCTL_MASK: WordType = S_ENABLE | U_ENABLE | RASEMU | STE
        | BPFRZ | LCOFIFRZ | INH_MASK;
    /// `vsctrctl` reuses the S/U enable bits for VS/VU.
    pub const VSCTRCTL_MASK: WordType = SCTRCTL_MASK;

    pub const SCTRSTATUS_WRPTR  : WordType = 0xFF;
    pub const SCTRSTATUS_FROZEN : WordType = 1 << 31;
    pub const SCTRSTATUS_MASK   : WordType = SCTRSTATUS_WRPTR | SCTRSTATUS_FROZEN;
    pub const SCTRDEPTH_MASK    : WordType = 0x7;
    pub const SCTRDEPTH_MAX     : WordType = 4;

    pub const SOURCE_VALID      : WordType = 1 << 0;
    pub const TARGET_MISP       : WordType = 1 << 0;
    pub const DATA_TYPE_MASK    : WordType = 0xF;
    pub const DATA_CCV          : WordType = 1 << 15;
    pub const DATA_CCM_MASK     : WordType = 0x0FFF_0000;
    pub const DATA_CCE_MASK     : WordType = 0xF000_0000;
    pub const DATA_MASK         : WordType =
        DATA_TYPE_MASK | DATA_CCV | DATA_CCM_MASK | DATA_CCE_MASK;
}

#[rustfmt::skip]
pub mod iselect {
    pub const IPRIO0            : u64 = 0x30;
    pub const IPRIO15           : u64 = 0x3f;
    pub const IMSIC_EIDELIVERY  : u64 = 0x70;
    pub const IMSIC_EITHRESHOLD : u64 = 0x72;
    pub const IMSIC_EIP0        : u64 = 0x80;
    pub const IMSIC_EIE63       : u64 = 0xff;
    pub const IMSIC_FIRST       : u64 = IMSIC_EIDELIVERY;
    pub const IMSIC_LAST        : u64 = IMSIC_EIE63;
    pub const MASK_AIA          : u64 = 0x1ff;
    pub const MASK_SXCSRIND     : u64 = 0xfff;
    pub const CTR_FIRST         : u64 = 0x200;
    pub const CTR_LAST          : u64 = 0x2ff;
    pub const IMSIC_TOPEI       : u64 = 0x200;
}

#[rustfmt::skip]
pub mod topi {
    use super::WordType;
    pub const IID_SHIFT     : u32 = 16;
    pub const IID_MASK      : WordType = 0xfff;
    pub const IPRIO_MASK    : WordType = 0xff;
    pub const IMSIC_TOPEI_IPRIO_MASK: WordType = 0x7ff;
}

#[rustfmt::skip]
pub mod seed {
    use super::WordType;
    pub const OPST_ES16     : WordType = 0b10 << 30;
    pub const OPST_DEAD     : WordType = 0b11 << 30;
}

#[rustfmt::skip]
pub mod mttp {
    use super::WordType;
    pub const MODE_MASK_32  : WordType = 0xC000_0000;
    pub const SDID_MASK_32  : WordType = 0x3F00_0000;
    pub const PPN_MASK_32   : WordType = 0x003F_FFFF;
    pub const MODE_SHIFT_32 : u32 = 30;
    pub const SDID_SHIFT_32 : u32 = 24;
    pub const MODE_MASK_64  : WordType = 0xF000_0000_0000_0000;
    pub const SDID_MASK_64  : WordType = 0x0FC0_0000_0000_0000;
    pub const PPN_MASK_64   : WordType = 0x0000_0FFF_FFFF_FFFF;
    pub const MODE_SHIFT_64 : u32 = 60;
    pub const SDID_SHIFT_64 : u32 = 54;
}

#[rustfmt::skip]
pub mod mintstatus {
    use super::WordType;
    pub const MIL       : WordType = 0xFF << 24;
    pub const SIL       : WordType = 0xFF << 8;
}

#[rustfmt::skip]
pub mod xcause {
    use super::WordType;
    /// CLIC previous interrupt level and enable, stored in `xcause`.
    pub const XPIL      : WordType = 0xFF << 16;
    pub const XPIE      : WordType = 1 << 27;
    pub const XPP       : WordType = 0b11 << 28;
}
