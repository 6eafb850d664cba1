use anyhow::{Context, Result, ensure};
use std::fmt;
use std::time::{Duration, Instant};
use tether_backend::Backend;
use tether_channel::PRUNE_EMPTY_PARENTS;
use tether_proxy::{Caller, Handshake, MetricsSnapshot, Proxy};
use tracing::{debug, info, instrument};

/// The engine's exclusive lock level.
pub const LOCK_EXCLUSIVE: i32 = 4;

/// One answered request of a check run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub name: &'static str,
    pub rc: i32,
}

/// Outcome of a [`check`] or [`soak`] run.
#[derive(Debug, Clone)]
pub struct Report {
    pub steps: Vec<Step>,
    pub cycles: u32,
    pub elapsed: Duration,
    pub metrics: MetricsSnapshot,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            writeln!(f, "{:<12} rc={}", step.name, step.rc)?;
        }
        if self.cycles > 0 {
            writeln!(f, "{} cycles in {:.3?}", self.cycles, self.elapsed)?;
        } else {
            writeln!(f, "finished in {:.3?}", self.elapsed)?;
        }
        write!(f, "{}", self.metrics)
    }
}

/// Soak run parameters.
#[derive(Debug, Clone, Copy)]
pub struct SoakPlan {
    pub iterations: u32,
    pub size: usize,
    pub files: u32,
}

/// A spawned and initialized proxy with its caller.
#[derive(Debug)]
struct Connection {
    proxy: Proxy,
    caller: Caller,
}

impl Connection {
    fn open<B: Backend>(backend: B, handshake: &Handshake) -> Result<Self> {
        let proxy = Proxy::spawn(backend).context("Failed to start proxy")?;
        proxy.init(handshake.clone()).context("Proxy rejected the handshake")?;
        let caller = Caller::connect(handshake).context("Failed to attach caller")?;
        Ok(Self { proxy, caller })
    }

    fn record(&self, steps: &mut Vec<Step>, name: &'static str, rc: i32) -> Result<()> {
        let ok = self.caller.codes().ok;
        steps.push(Step { name, rc });
        ensure!(rc == ok, "{name} answered {rc}, expected {ok}");
        Ok(())
    }
}

fn pattern(len: usize, seed: u32) -> Vec<u8> {
    (0..len).map(|i| ((i as u32).wrapping_add(seed) % 251) as u8).collect()
}

/// Opens `/tether-check/check.bin`, writes `size` bytes, checks size and contents, then
/// closes and deletes it.
///
/// # Errors
/// The first request answered with anything but success, or a content mismatch.
#[instrument(skip(backend, handshake))]
pub fn check<B: Backend>(backend: B, handshake: &Handshake, size: usize) -> Result<Report> {
    let started = Instant::now();
    let conn = Connection::open(backend, handshake)?;
    let caller = &conn.caller;
    let codes = *caller.codes();
    let path = "/tether-check/check.bin";
    let data = pattern(size, 0);
    let mut steps = Vec::new();

    conn.record(&mut steps, "open", caller.open(1, path, codes.open_create)?)?;
    conn.record(&mut steps, "write", caller.write(1, &data, 0)?)?;

    let (rc, reported) = caller.file_size(1)?;
    conn.record(&mut steps, "file-size", rc)?;
    ensure!(reported == Some(size as u64), "file-size reported {reported:?}, expected {size}");

    let (rc, read) = caller.read(1, size, 0)?;
    conn.record(&mut steps, "read", rc)?;
    ensure!(read == data, "read back different bytes");

    conn.record(&mut steps, "close", caller.close(1)?)?;
    conn.record(&mut steps, "delete", caller.delete(path, PRUNE_EMPTY_PARENTS, false)?)?;

    info!(size, "Check passed");
    Ok(Report { steps, cycles: 0, elapsed: started.elapsed(), metrics: conn.proxy.dump_metrics()? })
}

/// Runs `plan.iterations` open/lock/write/read/unlock/close cycles rotating over
/// `plan.files` files, then removes them.
///
/// # Errors
/// The first request answered with anything but success, or a content mismatch.
#[instrument(skip(backend, handshake))]
pub fn soak<B: Backend>(backend: B, handshake: &Handshake, plan: SoakPlan) -> Result<Report> {
    ensure!(plan.files > 0, "soak needs at least one file");
    let conn = Connection::open(backend, handshake)?;
    let caller = &conn.caller;
    let codes = *caller.codes();
    let mut steps = Vec::new();
    let started = Instant::now();

    for cycle in 0..plan.iterations {
        let path = format!("/tether-soak/file-{}.bin", cycle % plan.files);
        let data = pattern(plan.size, cycle);
        let offset = u64::from(cycle / plan.files) * plan.size as u64;

        conn.record(&mut steps, "open", caller.open(1, &path, codes.open_create)?)?;
        conn.record(&mut steps, "lock", caller.lock(1, LOCK_EXCLUSIVE)?)?;
        conn.record(&mut steps, "write", caller.write(1, &data, offset)?)?;
        let (rc, read) = caller.read(1, plan.size, offset)?;
        conn.record(&mut steps, "read", rc)?;
        ensure!(read == data, "cycle {cycle} read back different bytes from {path}");
        conn.record(&mut steps, "sync", caller.sync(1)?)?;
        conn.record(&mut steps, "unlock", caller.unlock(1, codes.lock_none)?)?;
        conn.record(&mut steps, "close", caller.close(1)?)?;
        steps.clear();

        if cycle % 100 == 99 {
            debug!(cycle, "Soak progress");
        }
    }
    let elapsed = started.elapsed();

    for file in 0..plan.files.min(plan.iterations) {
        let path = format!("/tether-soak/file-{file}.bin");
        conn.record(&mut steps, "delete", caller.delete(&path, PRUNE_EMPTY_PARENTS, false)?)?;
    }

    info!(iterations = plan.iterations, ?elapsed, "Soak finished");
    Ok(Report { steps, cycles: plan.iterations, elapsed, metrics: conn.proxy.dump_metrics()? })
}
