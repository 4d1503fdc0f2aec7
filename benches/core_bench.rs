//! Benchmarks for core ledger operations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use provledger_core::{
    CallContext, CertificateHash, CertificateId, CertificatePolicy, CertificateRegistry, FixedClock, ItemId,
    MemoryStore, OwnershipLedger, Principal, SqliteStore,
};

fn bench_memory_transfer(c: &mut Criterion) {
    let a = Principal::new("ST1BENCHA").unwrap();
    let b = Principal::new("ST1BENCHB").unwrap();

    c.bench_function("memory_transfer_pair", |bench| {
        let mut ledger = OwnershipLedger::new(MemoryStore::new());
        let mut item = 0u64;
        bench.iter(|| {
            item += 1;
            ledger
                .record_initial_ownership(ItemId(item), "", &CallContext::at(&a, 1))
                .unwrap();
            ledger
                .transfer_ownership(black_box(ItemId(item)), &b, "sale", "", &CallContext::at(&a, 2))
                .unwrap()
        })
    });
}

fn bench_sqlite_transfer(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let policy = CertificatePolicy::new(Principal::new("ST1ADMIN").unwrap());
    let store = SqliteStore::create_new(&dir.path().join("bench.db"), &policy).unwrap();
    let owners = [Principal::new("ST1BENCHA").unwrap(), Principal::new("ST1BENCHB").unwrap()];

    let mut ledger = OwnershipLedger::new(store);
    ledger
        .record_initial_ownership(ItemId(1), "", &CallContext::at(&owners[0], 0))
        .unwrap();

    c.bench_function("sqlite_transfer", |bench| {
        let mut turn = 0usize;
        bench.iter(|| {
            let from = &owners[turn % 2];
            let to = &owners[(turn + 1) % 2];
            turn += 1;
            ledger
                .transfer_ownership(ItemId(1), to, "sale", "", &CallContext::at(from, turn as u64))
                .unwrap()
        })
    });
}

fn bench_certificate_validity(c: &mut Criterion) {
    let admin = Principal::new("ST1ADMIN").unwrap();
    let mut registry = CertificateRegistry::new(MemoryStore::new(), CertificatePolicy::new(admin.clone()));
    for item in 0..1_000u64 {
        registry
            .issue_certificate(ItemId(item), CertificateHash::new([7; 32]), &CallContext::at(&admin, item))
            .unwrap();
    }
    let clock = FixedClock(10_000);

    c.bench_function("is_certificate_valid", |bench| {
        bench.iter(|| registry.is_certificate_valid(black_box(CertificateId(500)), &clock).unwrap())
    });
}

criterion_group!(
    benches,
    bench_memory_transfer,
    bench_sqlite_transfer,
    bench_certificate_validity
);
criterion_main!(benches);
