use phf::phf_map;

use super::counters::*;
use super::hypervisor::*;
use super::indirect::*;
use super::machine::*;
use super::predicate::*;
use super::supervisor::*;
use super::user::*;
use super::write_validator::*;
use super::*;
use crate::{
    config::arch_config::WordType,
    gen_name_list,
    isa::riscv::csr_reg::fields::{deleg, hvictl},
};

/// A register stored in one field of [`HartState`].
macro_rules! plain {
    ($validator:expr, $($field:ident).+) => {
        CsrOps::Plain {
            field: {
                fn field(s: &mut HartState) -> &mut WordType {
                    &mut s.$($field).+
                }
                field
            },
            validator: $validator,
        }
    };
}

/// A register whose accessors compute the architectural value.
macro_rules! rw {
    ($read:expr, $write:expr) => {
        CsrOps::Computed {
            read: $read,
            write: Some($write),
        }
    };
}

/// Writes are silently dropped.
macro_rules! ro {
    ($read:expr) => {
        CsrOps::Computed {
            read: $read,
            write: None,
        }
    };
}

macro_rules! rmw {
    ($op:expr) => {
        CsrOps::Rmw($op)
    };
}

/// Generate [`register_all`] and the name lookup map from one list of
/// `"name" => index: predicate, ops [, min_version]` entries.
macro_rules! gen_csr_table {
    (@ver) => { PrivVersion::V1_10 };
    (@ver $ver:ident) => { PrivVersion::$ver };
    ($($name:literal => $idx:ident : $pred:expr, $ops:expr $(, $ver:ident)?);* $(;)?) => {
        pub(super) fn register_all(table: &mut CsrTable) {
            $(
                table.register(
                    csr_index::$idx,
                    CsrEntry {
                        name: $name,
                        predicate: $pred,
                        ops: $ops,
                        min_priv_ver: gen_csr_table!(@ver $($ver)?),
                    },
                );
            )*
            register_pmp(table);
            register_hpm(table);
        }

        pub const CSR_ADDRESS: phf::Map<&'static str, u16> = phf_map! {
            $(
                $name => csr_index::$idx
            ),*
        };
    };
}

fn register_pmp(table: &mut CsrTable) {
    let cfg_names = gen_name_list!("pmpcfg"; 0, 15);
    for (i, name) in cfg_names.into_iter().enumerate() {
        table.register(
            csr_index::pmpcfg0 + i as u16,
            CsrEntry {
                name,
                predicate: pmp,
                ops: rw!(read_pmpcfg, write_pmpcfg),
                min_priv_ver: PrivVersion::V1_10,
            },
        );
    }
    let addr_names = gen_name_list!("pmpaddr"; 0, 63);
    for (i, name) in addr_names.into_iter().enumerate() {
        table.register(
            csr_index::pmpaddr0 + i as u16,
            CsrEntry {
                name,
                predicate: pmp,
                ops: rw!(read_pmpaddr, write_pmpaddr),
                min_priv_ver: PrivVersion::V1_10,
            },
        );
    }
}

fn register_hpm(table: &mut CsrTable) {
    let groups: [(u16, [&'static str; 29], PredicateFn, CsrOps); 5] = [
        (csr_index::hpmcounter3, gen_name_list!("hpmcounter"; 3, 31), ctr, ro!(read_counter)),
        (csr_index::hpmcounter3h, gen_name_list!("hpmcounter"; 3, 31; "h"), ctr32, ro!(read_counter)),
        (csr_index::mhpmcounter3, gen_name_list!("mhpmcounter"; 3, 31), mctr, rw!(read_counter, write_counter)),
        (csr_index::mhpmcounter3h, gen_name_list!("mhpmcounter"; 3, 31; "h"), mctr32, rw!(read_counter, write_counter)),
        (csr_index::mhpmevent3, gen_name_list!("mhpmevent"; 3, 31), any, rw!(read_mhpmevent, write_mhpmevent)),
    ];
    for (base, names, predicate, ops) in groups {
        for (i, name) in names.into_iter().enumerate() {
            table.register(
                base + i as u16,
                CsrEntry {
                    name,
                    predicate,
                    ops,
                    min_priv_ver: PrivVersion::V1_10,
                },
            );
        }
    }
}

gen_csr_table! {
    // ===== U-Mode =====
    "fflags"        => fflags       : fs,               rw!(read_fflags, write_fflags);
    "frm"           => frm          : fs,               rw!(read_frm, write_frm);
    "fcsr"          => fcsr         : fs,               rw!(read_fcsr, write_fcsr);
    "ssp"           => ssp          : zicfiss_ssp,      rw!(read_ssp, write_ssp);
    "seed"          => seed         : seed,             rmw!(rmw_seed);
    "cycle"         => cycle        : ctr,              ro!(read_counter);
    "time"          => time         : ctr,              ro!(read_time);
    "instret"       => instret      : ctr,              ro!(read_counter);
    "cycleh"        => cycleh       : ctr32,            ro!(read_counter);
    "timeh"         => timeh        : ctr32,            ro!(read_time);
    "instreth"      => instreth     : ctr32,            ro!(read_counter);

    // ===== S-Mode =====
    "sstatus"       => sstatus      : smode,            rw!(read_sstatus, write_sstatus);
    "sie"           => sie          : smode,            rmw!(rmw_sie);
    "stvec"         => stvec        : smode,            rw!(read_stvec, write_stvec);
    "scounteren"    => scounteren   : smode,            rw!(read_counteren, write_counteren);
    "senvcfg"       => senvcfg      : smode,            rw!(read_senvcfg, write_senvcfg), V1_12;
    "sieh"          => sieh         : aia_smode32,      rmw!(rmw_sieh);
    "sscratch"      => sscratch     : smode,            plain!(validate_write_any::<0, 63>, bank.live.scratch);
    "sepc"          => sepc         : smode,            plain!(validate_write_any::<0, 63>, bank.live.epc);
    "scause"        => scause       : smode,            plain!(validate_write_any::<0, 63>, bank.live.cause);
    "stval"         => stval        : smode,            plain!(validate_write_any::<0, 63>, bank.live.tval);
    "sip"           => sip          : smode,            rmw!(rmw_sip);
    "siph"          => siph         : aia_smode32,      rmw!(rmw_siph);
    "satp"          => satp         : satp,             rw!(read_satp, write_satp);
    "stopi"         => stopi        : aia_smode,        ro!(read_stopi);
    "stopei"        => stopei       : aia_smode,        rmw!(rmw_xtopei);
    "siselect"      => siselect     : sxcsrind_or_aia_smode, rmw!(rmw_xiselect);
    "sireg"         => sireg        : sxcsrind_or_aia_smode, rmw!(rmw_xireg);
    "sireg2"        => sireg2       : sxcsrind_smode,   rmw!(rmw_xireg);
    "sireg3"        => sireg3       : sxcsrind_smode,   rmw!(rmw_xireg);
    "sireg4"        => sireg4       : sxcsrind_smode,   rmw!(rmw_xireg);
    "sireg5"        => sireg5       : sxcsrind_smode,   rmw!(rmw_xireg);
    "sireg6"        => sireg6       : sxcsrind_smode,   rmw!(rmw_xireg);
    "sctrctl"       => sctrctl      : ctr_smode,        rmw!(rmw_sctrctl);
    "sctrstatus"    => sctrstatus   : ctr_smode,        rw!(read_sctrstatus, write_sctrstatus);
    "sctrdepth"     => sctrdepth    : ctr_smode,        rw!(read_sctrdepth, write_sctrdepth);
    "sintstatus"    => sintstatus   : clic_smode,       ro!(read_sintstatus);
    "sintthresh"    => sintthresh   : clic_smode,       plain!(validate_write_any::<0, 63>, sintthresh);
    "stvt"          => stvt         : clic_smode,       plain!(validate_mask::<6, 63, { !0 }>, stvt);
    "snxti"         => snxti        : clic_smode,       rmw!(rmw_snxti);

    // ===== VS-Mode =====
    "vsstatus"      => vsstatus     : hmode,            rw!(read_vsstatus, write_vsstatus), V1_12;
    "vsie"          => vsie         : hmode,            rmw!(rmw_vsie), V1_12;
    "vstvec"        => vstvec       : hmode,            rw!(read_vstvec, write_vstvec), V1_12;
    "vsscratch"     => vsscratch    : hmode,            rw!(read_vs_bank, write_vs_bank), V1_12;
    "vsepc"         => vsepc        : hmode,            rw!(read_vs_bank, write_vs_bank), V1_12;
    "vscause"       => vscause      : hmode,            rw!(read_vs_bank, write_vs_bank), V1_12;
    "vstval"        => vstval       : hmode,            rw!(read_vs_bank, write_vs_bank), V1_12;
    "vsip"          => vsip         : hmode,            rmw!(rmw_vsip), V1_12;
    "vsatp"         => vsatp        : hmode,            rw!(read_vsatp, write_vsatp), V1_12;
    "vsieh"         => vsieh        : aia_hmode32,      rmw!(rmw_vsieh);
    "vsiph"         => vsiph        : aia_hmode32,      rmw!(rmw_vsiph);
    "vsiselect"     => vsiselect    : sxcsrind_or_aia_hmode, rmw!(rmw_xiselect);
    "vsireg"        => vsireg       : sxcsrind_or_aia_hmode, rmw!(rmw_xireg);
    "vsireg2"       => vsireg2      : sxcsrind_hmode,   rmw!(rmw_xireg);
    "vsireg3"       => vsireg3      : sxcsrind_hmode,   rmw!(rmw_xireg);
    "vsireg4"       => vsireg4      : sxcsrind_hmode,   rmw!(rmw_xireg);
    "vsireg5"       => vsireg5      : sxcsrind_hmode,   rmw!(rmw_xireg);
    "vsireg6"       => vsireg6      : sxcsrind_hmode,   rmw!(rmw_xireg);
    "vstopei"       => vstopei      : aia_hmode,        rmw!(rmw_xtopei);
    "vstopi"        => vstopi       : aia_hmode,        ro!(read_vstopi);
    "vsctrctl"      => vsctrctl     : ctr_vsmode,       rw!(read_vsctrctl, write_vsctrctl);

    // ===== HS-Mode =====
    "hstatus"       => hstatus      : hmode,            rw!(read_hstatus, write_hstatus), V1_12;
    "hedeleg"       => hedeleg      : hmode,            plain!(validate_mask::<0, 63, { deleg::VS_DELEGABLE_EXCPS }>, hedeleg), V1_12;
    "hideleg"       => hideleg      : hmode,            rmw!(rmw_hideleg), V1_12;
    "hie"           => hie          : hmode,            rmw!(rmw_hie), V1_12;
    "hcounteren"    => hcounteren   : hmode,            rw!(read_counteren, write_counteren), V1_12;
    "htimedelta"    => htimedelta   : hmode,            rw!(read_htimedelta, write_htimedelta), V1_12;
    "htimedeltah"   => htimedeltah  : hmode32,          rw!(read_htimedelta, write_htimedelta), V1_12;
    "hgeie"         => hgeie        : hmode,            rw!(read_hgeie, write_hgeie), V1_12;
    "hvien"         => hvien        : aia_hmode,        rmw!(rmw_hvien);
    "hvictl"        => hvictl       : aia_hmode,        plain!(validate_mask::<0, 63, { hvictl::VALID_MASK }>, hvictl);
    "henvcfg"       => henvcfg      : hmode,            rw!(read_henvcfg, write_henvcfg), V1_12;
    "henvcfgh"      => henvcfgh     : hmode32,          rw!(read_henvcfgh, write_henvcfgh), V1_12;
    "htval"         => htval        : hmode,            plain!(validate_write_any::<0, 63>, htval), V1_12;
    "hip"           => hip          : hmode,            rmw!(rmw_hip), V1_12;
    "hvip"          => hvip         : hmode,            rmw!(rmw_hvip), V1_12;
    "hviprio1"      => hviprio1     : aia_hmode,        rw!(read_hviprio, write_hviprio);
    "hviprio2"      => hviprio2     : aia_hmode,        rw!(read_hviprio, write_hviprio);
    "htinst"        => htinst       : hmode,            plain!(validate_machine_only, htinst), V1_12;
    "hidelegh"      => hidelegh     : aia_hmode32,      rmw!(rmw_hidelegh);
    "hvienh"        => hvienh       : aia_hmode32,      rmw!(rmw_hvienh);
    "hviph"         => hviph        : aia_hmode32,      rmw!(rmw_hviph);
    "hviprio1h"     => hviprio1h    : aia_hmode32,      rw!(read_hviprio, write_hviprio);
    "hviprio2h"     => hviprio2h    : aia_hmode32,      rw!(read_hviprio, write_hviprio);
    "hgatp"         => hgatp        : hgatp,            rw!(read_hgatp, write_hgatp), V1_12;
    "hgeip"         => hgeip        : hmode,            ro!(read_hgeip), V1_12;

    // ===== M-Mode =====
    "mvendorid"     => mvendorid    : any,              ro!(read_mvendorid);
    "marchid"       => marchid      : any,              ro!(read_marchid);
    "mimpid"        => mimpid       : any,              ro!(read_mimpid);
    "mhartid"       => mhartid      : any,              ro!(read_mhartid);
    "mconfigptr"    => mconfigptr   : any,              ro!(read_zero), V1_12;
    "mstatus"       => mstatus      : any,              rw!(read_mstatus, write_mstatus);
    "misa"          => misa         : any,              rw!(read_misa, write_misa);
    "medeleg"       => medeleg      : any,              plain!(validate_mask::<0, 63, { deleg::DELEGABLE_EXCPS }>, medeleg);
    "mideleg"       => mideleg      : any,              rmw!(rmw_mideleg);
    "mie"           => mie          : any,              rmw!(rmw_mie);
    "mtvec"         => mtvec        : any,              rw!(read_mtvec, write_mtvec);
    "mcounteren"    => mcounteren   : umode,            rw!(read_counteren, write_counteren);
    "mcountinhibit" => mcountinhibit : any,             rw!(read_mcountinhibit, write_mcountinhibit), V1_11;
    "mcycle"        => mcycle       : any,              rw!(read_counter, write_counter);
    "minstret"      => minstret     : any,              rw!(read_counter, write_counter);
    "mcycleh"       => mcycleh      : any32,            rw!(read_counter, write_counter);
    "minstreth"     => minstreth    : any32,            rw!(read_counter, write_counter);
    "mstatush"      => mstatush     : any32,            rw!(read_mstatush, write_mstatush);
    "menvcfg"       => menvcfg      : umode,            rw!(read_menvcfg, write_menvcfg), V1_12;
    "menvcfgh"      => menvcfgh     : umode32,          rw!(read_menvcfgh, write_menvcfgh), V1_12;
    "mvien"         => mvien        : aia_any,          rmw!(rmw_mvien);
    "mvip"          => mvip         : aia_any,          rmw!(rmw_mvip);
    "midelegh"      => midelegh     : aia_any32,        rmw!(rmw_midelegh);
    "mieh"          => mieh         : aia_any32,        rmw!(rmw_mieh);
    "mvienh"        => mvienh       : aia_any32,        rmw!(rmw_mvienh);
    "mviph"         => mviph        : aia_any32,        rmw!(rmw_mviph);
    "mscratch"      => mscratch     : any,              plain!(validate_write_any::<0, 63>, mscratch);
    "mepc"          => mepc         : any,              plain!(validate_write_any::<0, 63>, mepc);
    "mcause"        => mcause       : any,              plain!(validate_write_any::<0, 63>, mcause);
    "mtval"         => mtval        : any,              plain!(validate_write_any::<0, 63>, mtval);
    "mip"           => mip          : any,              rmw!(rmw_mip);
    "miph"          => miph         : aia_any32,        rmw!(rmw_miph);
    "mtinst"        => mtinst       : hmode,            plain!(validate_write_any::<0, 63>, mtinst);
    "mtval2"        => mtval2       : dbltrp_hmode,     plain!(validate_write_any::<0, 63>, mtval2);
    "mtopi"         => mtopi        : aia_any,          ro!(read_mtopi);
    "mtopei"        => mtopei       : aia_any,          rmw!(rmw_xtopei);
    "miselect"      => miselect     : sxcsrind_or_aia_any, rmw!(rmw_xiselect);
    "mireg"         => mireg        : sxcsrind_or_aia_any, rmw!(rmw_xireg);
    "mireg2"        => mireg2       : sxcsrind_any,     rmw!(rmw_xireg), V1_12;
    "mireg3"        => mireg3       : sxcsrind_any,     rmw!(rmw_xireg), V1_12;
    "mireg4"        => mireg4       : sxcsrind_any,     rmw!(rmw_xireg), V1_12;
    "mireg5"        => mireg5       : sxcsrind_any,     rmw!(rmw_xireg), V1_12;
    "mireg6"        => mireg6       : sxcsrind_any,     rmw!(rmw_xireg), V1_12;
    "mctrctl"       => mctrctl      : ctr_mmode,        rw!(read_mctrctl, write_mctrctl);
    "mseccfg"       => mseccfg      : have_mseccfg,     rw!(read_mseccfg, write_mseccfg), V1_12;
    "mseccfgh"      => mseccfgh     : have_mseccfg32,   rw!(read_mseccfgh, write_mseccfgh), V1_12;
    "mttp"          => mttp         : smsdid,           rw!(read_mttp, write_mttp);

    // ===== CLIC =====
    "mintstatus"    => mintstatus   : clic,             plain!(validate_readonly, mintstatus);
    "mintthresh"    => mintthresh   : clic,             plain!(validate_write_any::<0, 63>, mintthresh);
    "mtvt"          => mtvt         : clic,             plain!(validate_mask::<6, 63, { !0 }>, mtvt);
    "mnxti"         => mnxti        : clic,             rmw!(rmw_mnxti);
    "mscratchcsw"   => mscratchcsw  : clic,             rmw!(rmw_mscratchcsw);
    "mscratchcsl"   => mscratchcsl  : clic,             rmw!(rmw_mscratchcsl);
}
