use kernel_sync::{CpuId, PerCpu, SpinLock};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn slots_are_built_from_their_cpu_id() {
    let per_cpu: PerCpu<usize, 4> = PerCpu::from_fn(|cpu| cpu.index() * 10);
    assert_eq!(per_cpu.capacity(), 4);
    assert_eq!(per_cpu[CpuId::new(3)], 30);
    assert_eq!(per_cpu.get(CpuId::new(4)), None);

    let collected: Vec<_> = per_cpu.iter().map(|(cpu, v)| (cpu.index(), *v)).collect();
    assert_eq!(collected, [(0, 0), (1, 10), (2, 20), (3, 30)]);
}

#[test]
fn slots_do_not_share_cache_lines() {
    let per_cpu: PerCpu<u8, 2> = PerCpu::default();
    let a = core::ptr::from_ref(&per_cpu[CpuId::new(0)]) as usize;
    let b = core::ptr::from_ref(&per_cpu[CpuId::new(1)]) as usize;
    assert!(b - a >= 64);
}

#[test]
#[should_panic(expected = "index out of bounds")]
fn indexing_past_capacity_panics() {
    let per_cpu: PerCpu<u8, 2> = PerCpu::default();
    let _ = per_cpu[CpuId::new(2)];
}

#[test]
fn peers_visit_every_other_cpu_once() {
    for online in 1..=8 {
        for me in 0..online {
            let mut seen: Vec<usize> = CpuId::new(me).peers(online).map(CpuId::index).collect();
            assert!(!seen.contains(&me));
            assert_eq!(seen.len(), online - 1);
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), online - 1);
        }
    }
    assert_eq!(CpuId::new(0).peers(1).count(), 0);
}

#[test]
fn per_cpu_locks_are_independent() {
    const CPUS: usize = 4;
    let counters: Arc<PerCpu<SpinLock<u64>, CPUS>> = Arc::new(PerCpu::default());
    let start = Arc::new(Barrier::new(CPUS));

    // Hold cpu0's lock for the whole test; the others must make progress anyway.
    let held = counters[CpuId::new(0)].lock();

    let handles: Vec<_> = (1..CPUS)
        .map(|i| {
            let counters = Arc::clone(&counters);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..1_000 {
                    counters[CpuId::new(i)].with_lock(|v| *v += 1);
                }
            })
        })
        .collect();

    start.wait();
    for h in handles {
        h.join().unwrap();
    }
    drop(held);

    for (cpu, counter) in counters.iter() {
        let expected = if cpu.index() == 0 { 0 } else { 1_000 };
        assert_eq!(*counter.lock(), expected);
    }
}

#[test]
fn cpu_id_formatting() {
    assert_eq!(format!("{}", CpuId::new(3)), "cpu3");
    assert_eq!(format!("{:?}", CpuId::new(3)), "CpuId(3)");
}
