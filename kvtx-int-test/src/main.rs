use kvtx::errors::KvResult;
use kvtx_int_test::test_util::{cleanup, create_context, TestEngine};
use kvtx_int_test::BankTest;

fn stress<E: TestEngine>() -> KvResult<()> {
    let ctx = create_context::<E>()?;
    let bank = BankTest::new(1000, 1_000)
        .workers(8)
        .transfers_per_worker(10_000);

    let db = ctx.db()?;
    let start = std::time::Instant::now();
    bank.setup(&db)?;
    println!("Created 1000 accounts in {:?}", start.elapsed());

    let start = std::time::Instant::now();
    let report = bank.run(&db)?;
    println!(
        "Committed {} transfers ({} failed, {} audits) in {:?}",
        report.committed,
        report.failed,
        report.audits,
        start.elapsed()
    );
    drop(db);

    if ctx.is_persistent() {
        let start = std::time::Instant::now();
        ctx.reopen()?;
        let total = bank.total(&ctx.db()?)?;
        println!("Reopened and audited total {} in {:?}", total, start.elapsed());
    }

    cleanup(ctx)
}

#[cfg(feature = "fjall")]
type StressEngine = kvtx_fjall_adapter::FjallEngine;
#[cfg(not(feature = "fjall"))]
type StressEngine = kvtx::engine::memory::InMemoryEngine;

fn main() -> KvResult<()> {
    println!("Starting bank stress test...");
    stress::<StressEngine>()
}
