use std::{hint::black_box, sync::Arc};

use criterion::{Criterion, criterion_group, criterion_main};

use riscv_priv_core::{
    Hart,
    config::{Extensions, HartConfig, Mxl, arch_config::WordType},
    device::Mem,
    isa::riscv::{
        csr_reg::{PrivilegeLevel, csr_index},
        mmu::{AccessType, mmu_idx},
    },
    ram::Ram,
};

const RAM_BASE: WordType = 0x8000_0000;
const ROOT: WordType = RAM_BASE + 0x1000;
const L1: WordType = RAM_BASE + 0x2000;
const L0: WordType = RAM_BASE + 0x3000;
const PAGES: WordType = 512;

fn pte(pa: WordType, flags: WordType) -> WordType {
    (pa >> 12) << 10 | flags
}

/// S-mode hart with one Sv39 leaf table mapping `PAGES` pages at VA 0.
fn sv39_hart(ext: Extensions) -> Hart {
    let cfg = HartConfig::builder(Mxl::Rv64)
        .with(ext)
        .pmp_regions(0)
        .build()
        .unwrap();
    let ram = Arc::new(Ram::with_range(RAM_BASE, 4 << 20));
    ram.store(ROOT, 8, pte(L1, 1)).unwrap();
    ram.store(L1, 8, pte(L0, 1)).unwrap();
    for i in 0..PAGES {
        let pa = RAM_BASE + 0x10_0000 + (i << 12);
        ram.store(L0 + i * 8, 8, pte(pa, 0xcf)).unwrap();
    }
    let mut hart = Hart::new(cfg, ram);
    hart.set_mode(PrivilegeLevel::S, false);
    hart.state.bank.live.atp = 8 << 60 | ROOT >> 12;
    hart
}

fn bench_page_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate");

    let mut hart = sv39_hart(Extensions::empty());
    group.bench_function("sv39_tlb_fill", |b| {
        let mut page = 0;
        b.iter(|| {
            let va = (page % PAGES) << 12;
            page += 1;
            black_box(hart.tlb_fill(va, 8, AccessType::Load, mmu_idx::S, false).unwrap());
        })
    });

    let mut hart = sv39_hart(Extensions::SMMTT | Extensions::SMEPMP);
    group.bench_function("sv39_tlb_fill_overlays", |b| {
        let mut page = 0;
        b.iter(|| {
            let va = (page % PAGES) << 12;
            page += 1;
            black_box(hart.tlb_fill(va, 8, AccessType::Store, mmu_idx::S, true).unwrap());
        })
    });

    group.finish();
}

fn bench_csr_access(c: &mut Criterion) {
    let mut hart = sv39_hart(Extensions::H);
    c.bench_function("csr_read_sstatus", |b| {
        b.iter(|| black_box(hart.csr_read(csr_index::sstatus).unwrap()))
    });
    c.bench_function("csr_write_stvec", |b| {
        b.iter(|| hart.csr_write(csr_index::stvec, black_box(RAM_BASE | 1)).unwrap())
    });
}

criterion_group!(benches, bench_page_walk, bench_csr_access);
criterion_main!(benches);
