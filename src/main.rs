/*
 * corun Demo Entry Point
 *
 * Runs a small fan-out/fan-in workload on the runtime so the policies can
 * be compared by their logs:
 *
 *   corun [policy] [workers]
 *
 * `policy` is any name PolicyKind accepts (rr, stcf, mlfq); `workers`
 * defaults to 4. Each worker yields a number of times proportional to its
 * index and returns its index squared; a coordinator joins them all.
 *
 * Set CORUN_LOG to a level (error..trace) to change verbosity.
 */

use std::process::ExitCode;

use corun::{PolicyKind, Runtime, RuntimeConfig, utils::logger};
use log::LevelFilter;

fn worker(rt: &Runtime, index: usize) -> usize {
    for _ in 0..index * 3 {
        if rt.yield_now().is_err() {
            break;
        }
    }
    log::info!("{} done", rt.current());
    index * index
}

fn main() -> ExitCode {
    let level = std::env::var("CORUN_LOG")
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);
    let _ = logger::init(level);

    let mut args = std::env::args().skip(1);
    let policy = match args.next().map(|s| s.parse::<PolicyKind>()) {
        Some(Ok(policy)) => policy,
        Some(Err(err)) => {
            log::error!("{}", err);
            return ExitCode::FAILURE;
        }
        None => PolicyKind::default(),
    };
    let workers: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(4);

    let rt = match Runtime::new(RuntimeConfig::default().with_policy(policy)) {
        Ok(rt) => rt,
        Err(err) => {
            log::error!("Failed to start runtime: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let coordinator = rt.spawn(move |rt| {
        let ids: Vec<_> = (1..=workers)
            .filter_map(|i| rt.create(worker, i).ok())
            .collect();
        ids.into_iter().filter_map(|id| rt.join(id).ok()).sum()
    });
    if let Err(err) = coordinator {
        log::error!("Failed to spawn coordinator: {}", err);
        return ExitCode::FAILURE;
    }

    match rt.run() {
        Ok(summary) => {
            let stats = rt.stats();
            log::info!(
                "{}: {} switches, {} created, {} reclaimed, {} left blocked",
                rt.policy_name(),
                summary.switches,
                stats.created,
                stats.reclaimed,
                summary.blocked
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
