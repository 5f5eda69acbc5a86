//! Trap delivery and the trap-return instructions.
//!
//! Exceptions reported by the execution layer and interrupts picked by the
//! resolver both end up in [`Hart::deliver_trap`], which selects the landing
//! mode (M, HS or VS), pushes the privilege stack and redirects `pc`.

use crate::{
    config::{Extensions, PrivVersion, arch_config::WordType},
    isa::riscv::{
        csr_reg::{
            PrivilegeLevel,
            fields::{ctr, hstatus, mintstatus, mstatus, xcause},
        },
        ctr::CtrType,
        hart::Hart,
        mmu::AccessType,
        trap::{
            Exception, Interrupt, Trap, TrapError, irq,
            transformed_insn::{PSEUDO_PTE_READ_32, PSEUDO_PTE_READ_64, transformed_insn},
        },
    },
    utils::{get_field, set_field},
};

/// Values captured from the hart before the privilege stack is pushed.
#[derive(Debug, Clone, Copy)]
struct TrapFrame {
    is_async: bool,
    cause: WordType,
    tval: WordType,
    tinst: WordType,
    /// `tval` holds a guest virtual address.
    write_gva: bool,
    /// Target mode and level of a CLIC interrupt.
    clic: Option<(u8, u8)>,
}

/// Where a trap lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrapTarget {
    M,
    Hs,
    Vs,
}

const CLIC_VECTOR_MODE: WordType = 0b11;
const CLIC_TVEC_MASK: WordType = 0b11_1111;

impl Hart {
    /// Record an exception raised by the execution layer. It is delivered by
    /// the next [`Hart::process_pending_trap`].
    pub fn raise_exception(&mut self, e: Exception) {
        log::trace!("Raise {e:?} at {:#x}", self.state.pc);
        self.state.pending_trap = Some(Trap::Exception(e));
    }

    /// Deliver the recorded exception, if any. Returns whether a trap was taken.
    pub fn process_pending_trap(&mut self) -> Result<bool, TrapError> {
        match self.state.pending_trap.take() {
            Some(trap) => self.deliver_trap(trap).map(|_| true),
            None => Ok(false),
        }
    }

    /// Take the pending interrupt the current mode accepts, if any.
    ///
    /// Called by the execution layer at instruction-block boundaries.
    pub fn interrupt_check(&mut self) -> Result<bool, TrapError> {
        match self.pending_interrupt() {
            Some(int) => self.deliver_trap(Trap::Interrupt(int)).map(|_| true),
            None => Ok(false),
        }
    }

    fn capture(&mut self, trap: Trap) -> TrapFrame {
        match trap {
            Trap::Interrupt(int) => TrapFrame {
                is_async: true,
                cause: int.irq() as WordType,
                tval: 0,
                tinst: 0,
                write_gva: false,
                clic: match int {
                    Interrupt::Clic { mode, level, .. } => Some((mode, level)),
                    Interrupt::Local(_) => None,
                },
            },
            Trap::Exception(e) => self.capture_exception(e),
        }
    }

    fn capture_exception(&mut self, e: Exception) -> TrapFrame {
        use Exception::*;

        let pseudo = if self.cfg.is_rv32() {
            PSEUDO_PTE_READ_32
        } else {
            PSEUDO_PTE_READ_64
        };
        let xlen = self.xlen();
        let st = &self.state;
        let mut frame = TrapFrame {
            is_async: false,
            cause: e.code(),
            tval: 0,
            tinst: 0,
            write_gva: false,
            clic: None,
        };
        match e {
            LoadMisaligned | LoadFault | StoreMisaligned | StoreFault | LoadPageFault
            | StorePageFault | LoadGuestPageFault | StoreGuestPageFault => {
                frame.write_gva = st.two_stage_lookup;
                frame.tval = st.badaddr;
                frame.tinst = if st.two_stage_indirect_lookup {
                    pseudo
                } else {
                    transformed_insn(st.bins, st.badaddr, &st.gpr, xlen)
                };
            }
            InstructionMisaligned | InstructionFault | InstructionPageFault
            | InstructionGuestPageFault => {
                frame.write_gva = st.two_stage_lookup;
                frame.tval = st.badaddr;
                if st.two_stage_indirect_lookup {
                    frame.tinst = pseudo;
                }
            }
            IllegalInstruction | VirtualInstruction => frame.tval = st.bins,
            Breakpoint => {
                frame.tval = st.badaddr;
                self.ctr_freeze(ctr::BPFRZ);
            }
            SoftwareCheck => frame.tval = st.sw_check_code,
            // ecall is reported as one cause and qualified here
            UserEnvCall => {
                frame.cause = match (st.priv_level, st.virt) {
                    (PrivilegeLevel::M, _) => MachineEnvCall,
                    (PrivilegeLevel::S, true) => VirtualSupervisorEnvCall,
                    (PrivilegeLevel::S, false) => SupervisorEnvCall,
                    (PrivilegeLevel::U, _) => UserEnvCall,
                }
                .code();
            }
            _ => {}
        }
        frame
    }

    fn trap_target(&self, frame: &TrapFrame) -> TrapTarget {
        let st = &self.state;
        let below_m = st.priv_level <= PrivilegeLevel::S;
        if let Some((mode, _)) = frame.clic {
            return if below_m && mode == PrivilegeLevel::S as u8 {
                TrapTarget::Hs
            } else {
                TrapTarget::M
            };
        }
        if frame.cause >= 64 {
            return TrapTarget::M;
        }
        let bit = 1 << frame.cause;
        let (deleg, hdeleg) = if frame.is_async {
            (st.mideleg, st.hideleg)
        } else {
            (st.medeleg, st.hedeleg)
        };
        let (s_injected, vs_injected) = if frame.is_async {
            let mip = self.lines.mip();
            (
                st.mvip & st.mvien & bit != 0 && mip & bit == 0,
                st.hvip & st.hvien & bit != 0 && mip & bit == 0,
            )
        } else {
            (false, false)
        };

        if !below_m || (deleg & bit == 0 && !s_injected && !vs_injected) {
            return TrapTarget::M;
        }
        if self.misa_has(Extensions::H) && st.virt && (hdeleg & bit != 0 || vs_injected) {
            TrapTarget::Vs
        } else {
            TrapTarget::Hs
        }
    }

    /// The S-level trap would land while the target is still handling one.
    fn smode_double_trap(&self, target: TrapTarget) -> bool {
        let dte = match target {
            TrapTarget::M => return false,
            TrapTarget::Vs => self.smode_dbltrp_enabled(true),
            // sret clears SDT on the way into V, so HS cannot double trap from a guest
            TrapTarget::Hs if self.state.virt => false,
            TrapTarget::Hs => self.smode_dbltrp_enabled(false),
        };
        dte && self.state.mstatus & mstatus::SDT != 0
    }

    /// CLIC `xcause` with the previous level, enable and privilege folded in.
    /// Updates the interrupt level of the target mode.
    fn clic_cause(&mut self, irq: WordType, mode: PrivilegeLevel, level: u8) -> WordType {
        let st = &mut self.state;
        let mut cause = irq & 0xfff;
        cause = set_field(cause, xcause::XPP, st.priv_level.bits());
        let (il, ie) = match mode {
            PrivilegeLevel::M => (mintstatus::MIL, mstatus::MIE),
            _ => (mintstatus::SIL, mstatus::SIE),
        };
        cause = set_field(cause, xcause::XPIL, get_field(st.mintstatus, il));
        cause = set_field(cause, xcause::XPIE, (st.mstatus & ie != 0) as WordType);
        st.mintstatus = set_field(st.mintstatus, il, level as WordType);
        cause
    }

    /// Enter a trap: pick the landing mode, push the privilege stack and
    /// jump to the trap vector.
    ///
    /// Fails only when an M-mode trap arrives while `mstatus.MDT` is set,
    /// or when a CLIC vector table entry cannot be read.
    pub fn deliver_trap(&mut self, trap: Trap) -> Result<(), TrapError> {
        if trap == Trap::Exception(Exception::Semihost) {
            log::debug!("Semihosting request at {:#x}", self.state.pc);
            self.state.pc = self.state.pc.wrapping_add(4);
            return Ok(());
        }

        let prev_priv = self.state.priv_level;
        let prev_virt = self.state.virt;
        let epc = self.state.pc;
        let frame = self.capture(trap);
        let target = self.trap_target(&frame);
        let double_trap = self.smode_double_trap(target);

        let landed = if target == TrapTarget::M || double_trap {
            self.trap_to_m(&frame, double_trap)?;
            TrapTarget::M
        } else {
            self.trap_to_s(&frame, target)?;
            target
        };
        log::debug!(
            "Trap {trap:?} at {epc:#x} -> {landed:?}, pc {:#x}, tval {:#x}",
            self.state.pc,
            frame.tval
        );

        let ty = if frame.is_async {
            CtrType::Interrupt
        } else {
            CtrType::Exception
        };
        self.ctr_add_entry(epc, self.state.pc, ty, prev_priv, prev_virt);

        let st = &mut self.state;
        st.elp = false;
        st.two_stage_lookup = false;
        st.two_stage_indirect_lookup = false;
        if frame.clic.is_some() {
            st.clic_exccode = None;
        }
        Ok(())
    }

    fn trap_to_s(&mut self, frame: &TrapFrame, target: TrapTarget) -> Result<(), TrapError> {
        let has_h = self.misa_has(Extensions::H);
        let prev_priv = self.state.priv_level;
        let prev_virt = self.state.virt;
        let lpe = self.xlpe();
        let elp = self.state.elp;
        let to_vs = target == TrapTarget::Vs;

        let mut cause = frame.cause;
        let mut write_gva = frame.write_gva;
        if let Some((_, level)) = frame.clic {
            cause = self.clic_cause(cause, PrivilegeLevel::S, level);
        }
        let mut htval = 0;
        if has_h {
            let st = &mut self.state;
            if to_vs {
                // VS interrupts are seen by the guest under their S numbers
                if frame.is_async
                    && matches!(cause as u32, irq::VS_SOFT | irq::VS_TIMER | irq::VS_EXT)
                {
                    cause -= 1;
                }
                write_gva = false;
            } else {
                if prev_virt {
                    st.hstatus = set_field(st.hstatus, hstatus::SPVP, prev_priv.bits());
                }
                st.hstatus = set_field(st.hstatus, hstatus::SPV, prev_virt as WordType);
                htval = st.guest_phys_fault_addr;
            }
            st.hstatus = set_field(st.hstatus, hstatus::GVA, write_gva as WordType);
        }

        self.set_mode(PrivilegeLevel::S, to_vs);

        let sdt = self.smode_dbltrp_enabled(to_vs);
        let xlen = self.xlen();
        let st = &mut self.state;
        let mut s = st.mstatus;
        if lpe {
            s = set_field(s, mstatus::SPELP, elp as WordType);
        }
        s = set_field(s, mstatus::SPIE, get_field(s, mstatus::SIE));
        s = set_field(s, mstatus::SPP, prev_priv.bits());
        s &= !mstatus::SIE;
        if sdt {
            s |= mstatus::SDT;
        }
        st.mstatus = s;

        st.bank.live.cause = cause | (frame.is_async as WordType) << (xlen - 1);
        st.bank.live.epc = st.pc;
        st.bank.live.tval = frame.tval;
        if has_h {
            st.htval = htval;
            st.htinst = frame.tinst;
        }

        let (tvec, tvt) = (st.bank.live.tvec, st.stvt);
        self.state.pc = self.intr_pc(
            tvec,
            tvt,
            frame.is_async,
            frame.clic.is_some(),
            cause & 0xfff,
            PrivilegeLevel::S,
        )?;
        Ok(())
    }

    fn trap_to_m(&mut self, frame: &TrapFrame, double_trap: bool) -> Result<(), TrapError> {
        if self.has(Extensions::SMDBLTRP) && self.state.mstatus & mstatus::MDT != 0 {
            log::error!(
                "M-mode double trap at {:#x}, cause {:#x}",
                self.state.pc,
                frame.cause
            );
            return Err(TrapError::MachineDoubleTrap { cause: frame.cause });
        }

        let has_h = self.misa_has(Extensions::H);
        let prev_priv = self.state.priv_level;
        let prev_virt = self.state.virt;
        let lpe = self.xlpe();
        let elp = self.state.elp;

        let mut cause = frame.cause;
        if let Some((_, level)) = frame.clic {
            cause = self.clic_cause(cause, PrivilegeLevel::M, level);
        }

        self.set_mode(PrivilegeLevel::M, false);

        let xlen = self.xlen();
        let smdbltrp = self.has(Extensions::SMDBLTRP);
        let st = &mut self.state;
        let mut s = st.mstatus;
        if has_h {
            s = set_field(s, mstatus::MPV, prev_virt as WordType);
            s = set_field(s, mstatus::GVA, frame.write_gva as WordType);
        }
        if lpe {
            s = set_field(s, mstatus::MPELP, elp as WordType);
        }
        s = set_field(s, mstatus::MPIE, get_field(s, mstatus::MIE));
        s = set_field(s, mstatus::MPP, prev_priv.bits());
        s &= !mstatus::MIE;
        if smdbltrp {
            s |= mstatus::MDT;
        }
        st.mstatus = s;

        let mcause = cause | (frame.is_async as WordType) << (xlen - 1);
        if double_trap {
            st.mtval2 = mcause;
            st.mcause = Exception::DoubleTrap.code();
        } else {
            st.mtval2 = if has_h { st.guest_phys_fault_addr } else { 0 };
            st.mcause = mcause;
        }
        st.mepc = st.pc;
        st.mtval = frame.tval;
        st.mtinst = frame.tinst;

        let irq = (cause & 0xfff) as u32;
        if frame.clic.is_some() {
            if let Some(clic) = self.clic.as_mut() {
                if clic.is_shv(irq) && clic.is_edge_triggered(irq) {
                    clic.clean_pending(irq);
                }
            }
        }

        let (tvec, tvt) = (self.state.mtvec, self.state.mtvt);
        self.state.pc = self.intr_pc(
            tvec,
            tvt,
            frame.is_async,
            frame.clic.is_some(),
            irq as WordType,
            PrivilegeLevel::M,
        )?;
        Ok(())
    }

    /// Handler address for a trap taken through `tvec`.
    fn intr_pc(
        &mut self,
        tvec: WordType,
        tvt: WordType,
        is_async: bool,
        clic: bool,
        cause: WordType,
        mode: PrivilegeLevel,
    ) -> Result<WordType, TrapError> {
        let base = tvec & !0b11;
        if !is_async {
            return Ok(base);
        }
        match tvec & 0b11 {
            0b00 => Ok(base),
            0b01 => Ok(base.wrapping_add(cause * 4)),
            _ if clic && tvec & CLIC_TVEC_MASK == CLIC_VECTOR_MODE => {
                let shv = self
                    .clic
                    .as_ref()
                    .is_some_and(|c| c.is_shv(cause as u32));
                if shv {
                    self.clic_vector(tvt, cause, mode)
                } else {
                    Ok(tvec & !CLIC_TVEC_MASK)
                }
            }
            _ => {
                log::warn!("Reserved trap vector mode in {tvec:#x}, using direct mode");
                Ok(base)
            }
        }
    }

    /// Load the handler address of a selectively hardware vectored CLIC
    /// interrupt from the vector table at `tvt`.
    fn clic_vector(
        &mut self,
        tvt: WordType,
        cause: WordType,
        mode: PrivilegeLevel,
    ) -> Result<WordType, TrapError> {
        let size = (self.xlen() / 8) as usize;
        let entry = (tvt & !CLIC_TVEC_MASK).wrapping_add(size as WordType * cause);
        let idx = mode.bits() as u32;

        let pa = self.tlb_fill(entry, size, AccessType::Load, idx, true);
        let handler = match pa {
            Ok(Some(pa)) => self.mem.load(pa, size).ok(),
            _ => None,
        };
        let fetchable = |hart: &mut Self, pc: WordType| {
            matches!(hart.tlb_fill(pc, 2, AccessType::Fetch, idx, true), Ok(Some(_)))
        };
        match handler {
            Some(pc) if fetchable(self, pc) => Ok(pc),
            _ => {
                log::error!("CLIC vector table entry at {entry:#x} is not usable");
                Err(TrapError::VectorFetch { addr: entry })
            }
        }
    }

    /// `sret`. Returns the address to resume at.
    pub fn sret(&mut self, curr_pc: WordType) -> Result<WordType, Exception> {
        let src_priv = self.state.priv_level;
        let src_virt = self.state.virt;
        if src_priv < PrivilegeLevel::S {
            return Err(Exception::IllegalInstruction);
        }
        let retpc = self.state.bank.live.epc;
        if !self.misa_has(Extensions::C) && retpc & 0b11 != 0 {
            return Err(Exception::InstructionMisaligned);
        }
        if self.state.mstatus & mstatus::TSR != 0 && src_priv < PrivilegeLevel::M {
            return Err(Exception::IllegalInstruction);
        }
        if src_virt && self.state.hstatus & hstatus::VTSR != 0 {
            return Err(Exception::VirtualInstruction);
        }

        let clear_sdt = self.smode_dbltrp_enabled(src_virt);
        let clear_mprv = self.cfg.priv_ver >= PrivVersion::V1_12;
        let clic = self.clic_mode();
        let has_h = self.misa_has(Extensions::H);

        let st = &mut self.state;
        let mut s = st.mstatus;
        let prev_priv = PrivilegeLevel::from_bits(get_field(s, mstatus::SPP))
            .unwrap_or(PrivilegeLevel::U);
        let spelp = s & mstatus::SPELP != 0;
        s = set_field(s, mstatus::SIE, get_field(s, mstatus::SPIE));
        s |= mstatus::SPIE;
        s &= !(mstatus::SPP | mstatus::SPELP);
        if clear_sdt {
            s &= !mstatus::SDT;
        }
        if clear_mprv {
            s &= !mstatus::MPRV;
        }
        st.mstatus = s;

        let mut prev_virt = src_virt;
        if has_h && !src_virt {
            prev_virt = st.hstatus & hstatus::SPV != 0;
            st.hstatus &= !hstatus::SPV;
        }
        if clic {
            let cause = st.bank.live.cause;
            st.mintstatus = set_field(st.mintstatus, mintstatus::SIL, get_field(cause, xcause::XPIL));
            st.bank.live.cause = set_field(cause | xcause::XPIE, xcause::XPP, PrivilegeLevel::U.bits());
        }

        self.set_mode(prev_priv, prev_virt);
        self.state.elp = spelp && self.xlpe();
        self.ctr_add_entry(curr_pc, retpc, CtrType::ExcepIntRet, src_priv, src_virt);
        Ok(retpc)
    }

    /// `mret`. Returns the address to resume at.
    pub fn mret(&mut self, curr_pc: WordType) -> Result<WordType, Exception> {
        let src_priv = self.state.priv_level;
        let src_virt = self.state.virt;
        if src_priv != PrivilegeLevel::M {
            return Err(Exception::IllegalInstruction);
        }
        let retpc = self.state.mepc;
        if !self.misa_has(Extensions::C) && retpc & 0b11 != 0 {
            return Err(Exception::InstructionMisaligned);
        }

        let s = self.state.mstatus;
        let prev_priv = PrivilegeLevel::from_bits(get_field(s, mstatus::MPP))
            .unwrap_or(PrivilegeLevel::U);
        if self.cfg.pmp_regions > 0
            && !self.state.pmp.has_rules()
            && prev_priv != PrivilegeLevel::M
        {
            return Err(Exception::InstructionFault);
        }

        let has_h = self.misa_has(Extensions::H);
        let prev_virt = has_h && s & mstatus::MPV != 0 && prev_priv != PrivilegeLevel::M;
        let mpelp = s & mstatus::MPELP != 0;
        let idle_mpp = if self.has(Extensions::U) {
            PrivilegeLevel::U
        } else {
            PrivilegeLevel::M
        };
        let clear_mdt = self.has(Extensions::SMDBLTRP);
        let clear_mprv = self.cfg.priv_ver >= PrivVersion::V1_12 && prev_priv != PrivilegeLevel::M;
        let clic = self.clic_mode();

        let st = &mut self.state;
        let mut s = set_field(s, mstatus::MIE, get_field(s, mstatus::MPIE));
        s |= mstatus::MPIE;
        s = set_field(s, mstatus::MPP, idle_mpp.bits());
        s &= !(mstatus::MPV | mstatus::MPELP);
        if clear_mdt {
            s &= !mstatus::MDT;
        }
        if clear_mprv {
            s &= !mstatus::MPRV;
        }
        st.mstatus = s;

        if clic {
            let cause = st.mcause;
            st.mintstatus = set_field(st.mintstatus, mintstatus::MIL, get_field(cause, xcause::XPIL));
            st.mcause = set_field(cause | xcause::XPIE, xcause::XPP, PrivilegeLevel::U.bits());
        }

        self.set_mode(prev_priv, prev_virt);
        self.state.elp = mpelp && self.xlpe();
        self.ctr_add_entry(curr_pc, retpc, CtrType::ExcepIntRet, src_priv, src_virt);
        Ok(retpc)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::InterruptModel,
        device::ClicController,
        isa::riscv::{
            csr_reg::fields::{envcfg, mip, mseccfg},
            hart_tester::{HartChecker, TEST_RAM_BASE, TestHartBuilder},
        },
    };

    const HANDLER: WordType = TEST_RAM_BASE + 0x400;
    const S_HANDLER: WordType = TEST_RAM_BASE + 0x800;

    #[test]
    fn test_exception_to_m_mode() {
        let mut hart = TestHartBuilder::new().mode(PrivilegeLevel::U, false).build();
        hart.state.mtvec = HANDLER;
        hart.state.pc = 0x8000_1000;
        hart.state.mstatus |= mstatus::MIE;
        hart.state.bins = 0xffff_ffff;
        hart.raise_exception(Exception::IllegalInstruction);
        assert_eq!(hart.process_pending_trap(), Ok(true));
        assert_eq!(hart.process_pending_trap(), Ok(false));

        HartChecker::new(&mut hart)
            .mode(PrivilegeLevel::M, false)
            .pc(HANDLER)
            .csr("mepc", 0x8000_1000)
            .csr("mcause", 2)
            .csr("mtval", 0xffff_ffff)
            .mstatus(mstatus::MPP | mstatus::MIE | mstatus::MPIE, mstatus::MPIE);
    }

    #[test]
    fn test_ecall_cause_follows_mode() {
        for (level, virt, code) in [
            (PrivilegeLevel::U, false, 8),
            (PrivilegeLevel::S, false, 9),
            (PrivilegeLevel::S, true, 10),
            (PrivilegeLevel::M, false, 11),
        ] {
            let mut hart = TestHartBuilder::new()
                .with(Extensions::H)
                .mode(level, virt)
                .build();
            hart.deliver_trap(Trap::Exception(Exception::UserEnvCall)).unwrap();
            assert_eq!(hart.state.mcause, code);
        }
    }

    #[test]
    fn test_delegated_interrupt_to_s_mode() {
        let mut hart = TestHartBuilder::new().mode(PrivilegeLevel::U, false).build();
        hart.state.bank.live.tvec = S_HANDLER;
        hart.state.mideleg = mip::STIP;
        hart.state.mie = mip::STIP;
        hart.state.mstatus |= mstatus::SIE;
        hart.state.pc = 0x8000_2000;
        hart.lines.set_irq(irq::S_TIMER, true);

        assert_eq!(hart.interrupt_check(), Ok(true));
        HartChecker::new(&mut hart)
            .mode(PrivilegeLevel::S, false)
            .pc(S_HANDLER)
            .csr("sepc", 0x8000_2000)
            .csr("scause", 1 << 63 | irq::S_TIMER as WordType)
            .mstatus(mstatus::SPP | mstatus::SIE | mstatus::SPIE, mstatus::SPIE);
    }

    #[test]
    fn test_vectored_interrupt_entry() {
        let mut hart = TestHartBuilder::new().build();
        hart.state.mtvec = HANDLER | 1;
        hart.deliver_trap(Trap::Interrupt(Interrupt::Local(irq::M_TIMER))).unwrap();
        assert_eq!(hart.state.pc, HANDLER + 4 * irq::M_TIMER as WordType);

        // exceptions ignore the vectored mode
        hart.deliver_trap(Trap::Exception(Exception::Breakpoint)).unwrap();
        assert_eq!(hart.state.pc, HANDLER);
    }

    #[test]
    fn test_guest_trap_to_hs_swaps_bank() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::H)
            .mode(PrivilegeLevel::U, true)
            .build();
        hart.state.medeleg = 1 << Exception::LoadGuestPageFault.code();
        hart.state.bank.parked.tvec = S_HANDLER;
        hart.state.badaddr = 0x4000;
        hart.state.two_stage_lookup = true;
        hart.state.guest_phys_fault_addr = 0x2000 >> 2;
        hart.deliver_trap(Trap::Exception(Exception::LoadGuestPageFault)).unwrap();

        HartChecker::new(&mut hart)
            .mode(PrivilegeLevel::S, false)
            .pc(S_HANDLER)
            .csr("scause", 21)
            .csr("stval", 0x4000)
            .csr("htval", 0x2000 >> 2)
            .customized(|c| {
                let hs = c.hart.state.hstatus;
                assert_ne!(hs & hstatus::SPV, 0);
                assert_eq!(hs & hstatus::SPVP, 0);
                assert_ne!(hs & hstatus::GVA, 0);
                assert!(!c.hart.state.two_stage_lookup);
                c
            });
    }

    #[test]
    fn test_vs_interrupt_cause_is_shifted() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::H)
            .mode(PrivilegeLevel::U, true)
            .build();
        hart.state.mideleg |= mip::VSTIP;
        hart.state.hideleg = mip::VSTIP;
        hart.state.bank.live.tvec = S_HANDLER;
        hart.deliver_trap(Trap::Interrupt(Interrupt::Local(irq::VS_TIMER))).unwrap();

        HartChecker::new(&mut hart)
            .mode(PrivilegeLevel::S, true)
            .pc(S_HANDLER)
            .csr("scause", 1 << 63 | irq::S_TIMER as WordType);
        assert_eq!(hart.state.bank.parked.cause, 0);
    }

    #[test]
    fn test_s_double_trap_escalates_to_m() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::SSDBLTRP)
            .mode(PrivilegeLevel::S, false)
            .build();
        hart.state.menvcfg |= envcfg::DTE;
        hart.state.medeleg = 1 << Exception::LoadPageFault.code();
        hart.state.mtvec = HANDLER;
        hart.state.bank.live.tvec = S_HANDLER;

        hart.deliver_trap(Trap::Exception(Exception::LoadPageFault)).unwrap();
        assert_eq!(hart.state.pc, S_HANDLER);
        assert_ne!(hart.state.mstatus & mstatus::SDT, 0);

        hart.deliver_trap(Trap::Exception(Exception::LoadPageFault)).unwrap();
        HartChecker::new(&mut hart)
            .mode(PrivilegeLevel::M, false)
            .pc(HANDLER)
            .csr("mcause", Exception::DoubleTrap.code());
        assert_eq!(hart.state.mtval2, Exception::LoadPageFault.code());
    }

    #[test]
    fn test_m_double_trap_is_fatal() {
        let mut hart = TestHartBuilder::new().with(Extensions::SMDBLTRP).build();
        hart.state.mtvec = HANDLER;
        hart.state.pc = 0x8000_0040;
        // MDT is set at reset
        let err = hart.deliver_trap(Trap::Exception(Exception::IllegalInstruction));
        assert_eq!(err, Err(TrapError::MachineDoubleTrap { cause: 2 }));
        assert_eq!(hart.state.pc, 0x8000_0040);

        hart.state.mstatus &= !mstatus::MDT;
        hart.deliver_trap(Trap::Exception(Exception::IllegalInstruction)).unwrap();
        assert_ne!(hart.state.mstatus & mstatus::MDT, 0);
        assert_eq!(hart.mret(0), Ok(0x8000_0040));
        assert_eq!(hart.state.mstatus & mstatus::MDT, 0);
    }

    #[test]
    fn test_sret_restores_guest() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::H)
            .mode(PrivilegeLevel::S, false)
            .build();
        let st = &mut hart.state;
        st.bank.live.epc = 0x8000_3000;
        st.hstatus |= hstatus::SPV;
        st.mstatus |= mstatus::SPP | mstatus::SPIE;
        st.bank.parked.tvec = 0x1234_5000;

        assert_eq!(hart.sret(0x8000_0100), Ok(0x8000_3000));
        HartChecker::new(&mut hart)
            .mode(PrivilegeLevel::S, true)
            .csr("stvec", 0x1234_5000)
            .customized(|c| {
                assert_eq!(c.hart.state.hstatus & hstatus::SPV, 0);
                let hs = c.hart.state.hs_status();
                assert_eq!(hs & (mstatus::SIE | mstatus::SPIE | mstatus::SPP), mstatus::SIE | mstatus::SPIE);
                c
            });
    }

    #[test]
    fn test_return_privilege_checks() {
        let mut hart = TestHartBuilder::new().mode(PrivilegeLevel::U, false).build();
        assert_eq!(hart.sret(0), Err(Exception::IllegalInstruction));
        assert_eq!(hart.mret(0), Err(Exception::IllegalInstruction));

        let mut hart = TestHartBuilder::new().mode(PrivilegeLevel::S, false).build();
        hart.state.mstatus |= mstatus::TSR;
        assert_eq!(hart.sret(0), Err(Exception::IllegalInstruction));

        let mut hart = TestHartBuilder::new()
            .with(Extensions::H)
            .mode(PrivilegeLevel::S, true)
            .build();
        hart.state.hstatus |= hstatus::VTSR;
        assert_eq!(hart.sret(0), Err(Exception::VirtualInstruction));

        let mut hart = TestHartBuilder::new().pmp_regions(16).build();
        assert_eq!(hart.mret(0), Err(Exception::InstructionFault));
    }

    #[test]
    fn test_landing_pad_state_round_trip() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::ZICFILP)
            .mode(PrivilegeLevel::U, false)
            .build();
        hart.state.senvcfg |= envcfg::LPE;
        hart.state.mseccfg |= mseccfg::MLPE;
        hart.state.elp = true;
        hart.state.pc = 0x8000_0200;
        hart.deliver_trap(Trap::Exception(Exception::IllegalInstruction)).unwrap();
        assert!(!hart.state.elp);
        assert_ne!(hart.state.mstatus & mstatus::MPELP, 0);

        assert_eq!(hart.mret(0), Ok(0x8000_0200));
        assert!(hart.state.elp);
        assert_eq!(hart.state.mstatus & mstatus::MPELP, 0);
        assert_eq!(hart.priv_level(), PrivilegeLevel::U);
    }

    #[test]
    fn test_trap_is_recorded_in_ctr() {
        let mut hart = TestHartBuilder::new()
            .with(Extensions::SSCTR | Extensions::SMCTR)
            .mode(PrivilegeLevel::U, false)
            .build();
        hart.state.ctr.mctrctl = ctr::M_ENABLE | ctr::U_ENABLE;
        hart.state.mtvec = HANDLER;
        hart.state.pc = 0x8000_0300;
        hart.deliver_trap(Trap::Exception(Exception::IllegalInstruction)).unwrap();

        let (src, dst, data) = hart.ctr_entry(0).unwrap();
        assert_eq!(src, 0x8000_0300 | ctr::SOURCE_VALID);
        assert_eq!(dst, HANDLER);
        assert_eq!(data & ctr::DATA_TYPE_MASK, CtrType::Exception as WordType);
    }

    struct Shv;

    impl ClicController for Shv {
        fn is_shv(&self, _irq: u32) -> bool {
            true
        }
        fn is_edge_triggered(&self, _irq: u32) -> bool {
            false
        }
        fn clean_pending(&mut self, _irq: u32) {}
    }

    #[test]
    fn test_clic_vectored_entry() {
        let mut hart = TestHartBuilder::new()
            .interrupt_model(InterruptModel::Clic { clint_compat: false })
            .build();
        hart.attach_clic(Box::new(Shv));
        let table = TEST_RAM_BASE + 0x1000;
        hart.state.mtvec = HANDLER | CLIC_VECTOR_MODE;
        hart.state.mtvt = table;
        hart.mem.store(table + 8 * 20, 8, S_HANDLER).unwrap();
        hart.state.mstatus |= mstatus::MIE;
        hart.state.mintstatus = set_field(0, mintstatus::MIL, 3);

        let int = Interrupt::Clic { irq: 20, mode: 3, level: 0x80 };
        hart.deliver_trap(Trap::Interrupt(int)).unwrap();
        assert_eq!(hart.state.pc, S_HANDLER);
        assert_eq!(get_field(hart.state.mintstatus, mintstatus::MIL), 0x80);
        let mcause = hart.state.mcause;
        assert_eq!(mcause & 0xfff, 20);
        assert_eq!(get_field(mcause, xcause::XPIL), 3);
        assert_ne!(mcause & xcause::XPIE, 0);
        assert_eq!(get_field(mcause, xcause::XPP), PrivilegeLevel::M.bits());

        hart.mret(0).unwrap();
        assert_eq!(get_field(hart.state.mintstatus, mintstatus::MIL), 3);
    }

    #[test]
    fn test_clic_vector_outside_memory() {
        let mut hart = TestHartBuilder::new()
            .interrupt_model(InterruptModel::Clic { clint_compat: false })
            .build();
        hart.attach_clic(Box::new(Shv));
        hart.state.mtvec = HANDLER | CLIC_VECTOR_MODE;
        hart.state.mtvt = 0x1000;
        let int = Interrupt::Clic { irq: 4, mode: 3, level: 1 };
        assert_eq!(
            hart.deliver_trap(Trap::Interrupt(int)),
            Err(TrapError::VectorFetch { addr: 0x1000 + 32 })
        );
    }
}
