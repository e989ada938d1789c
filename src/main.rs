use std::{
    any::Any,
    env,
    panic::{self, AssertUnwindSafe},
    process,
};

use gpu_histogram::{
    harness::{self, Args, DatasetCache},
    Engine, EngineConfig, Result,
};

/// Failures are reported as `-1` on stdout, never as a non-zero exit code.
fn terminate_gracefully(msg: &str) -> ! {
    println!("-1");
    eprintln!("{}", msg);
    process::exit(0);
}

fn run() -> Result<()> {
    let args = Args::parse(env::args().skip(1))?;
    let engine = Engine::new(EngineConfig::from_env()?)?;
    let elapsed = harness::run(&args, &DatasetCache::in_temp_dir(), &engine)?;
    println!("Execution time: {} ms", elapsed.as_millis());
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("panicked")
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if env::args().len() < 3 {
        terminate_gracefully("Usage: tester <N> <B> <optional:seed>");
    }
    // The default hook would print the panic on stderr before ours does.
    panic::set_hook(Box::new(|_| {}));
    match panic::catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => terminate_gracefully(&err.to_string()),
        Err(payload) => terminate_gracefully(panic_message(&*payload)),
    }
}
