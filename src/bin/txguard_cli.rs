//! txguard CLI: 配置校验与限流/熔断压力模拟的命令行工具
//!
//! Usage:
//!   txguard-cli validate <config.yaml>     Validate a resilience config
//!   txguard-cli show <config.yaml>         Print the effective config with defaults filled in
//!   txguard-cli stress [OPTIONS]           Run an in-process admission simulation

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use txguard::clock::SystemClock;
use txguard::{
    BreakerRule, CallContext, Guard, GuardPolicy, RateLimitRule, ResilienceConfig, SignalsSnapshot,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let outcome = match args[1].as_str() {
        "validate" => cmd_validate(&args[2..]),
        "show" => cmd_show(&args[2..]),
        "stress" => cmd_stress(&args[2..]),
        "version" | "--version" | "-V" => {
            cmd_version();
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"txguard-cli: 交易 API 弹性层命令行工具

USAGE:
    txguard-cli <COMMAND> [OPTIONS]

COMMANDS:
    validate <config.yaml>      Validate rate limits, breakers and cache names
    show <config.yaml>          Print the effective config with defaults filled in
    stress [OPTIONS]            Hammer an in-process guard and print a snapshot
    version                     Show version information
    help                        Show this help message

STRESS OPTIONS:
    --threads <N>               Worker threads (default 8)
    --calls <N>                 Calls per thread (default 1000)
    --limit <N>                 Calls admitted per 60s window (default 1000)
    --fail-every <N>            Make every Nth admitted call fail (default 0, never)
    --config <path>             Take cache names and breaker settings from a config file

ENVIRONMENT:
    RUST_LOG                    Log filter, e.g. txguard=debug"#
    );
}

fn cmd_version() {
    println!("txguard-cli {}", env!("CARGO_PKG_VERSION"));
}

fn config_path(args: &[String], usage: &str) -> Result<PathBuf> {
    match args.first() {
        Some(path) => Ok(PathBuf::from(path)),
        None => bail!("Usage: {usage}"),
    }
}

fn cmd_validate(args: &[String]) -> Result<()> {
    let path = config_path(args, "txguard-cli validate <config.yaml>")?;
    let config = ResilienceConfig::from_path(&path)
        .with_context(|| format!("{} is not a valid resilience config", path.display()))?;

    println!("{}: OK", path.display());
    println!("  rate limit rules: {}", config.rate_limits.len());
    for (name, rule) in &config.rate_limits {
        println!(
            "    {name}: key={} limit={} window={}s",
            rule.key, rule.limit, rule.window_seconds
        );
    }
    println!("  breakers: {}", config.breakers.len());
    for (name, breaker) in &config.breakers {
        println!(
            "    {name}: threshold={}% minimum_calls={} wait={}s",
            breaker.failure_rate_threshold,
            breaker.minimum_calls,
            breaker.wait_duration.as_secs()
        );
    }
    println!("  caches: {}", config.cache.names.join(", "));
    Ok(())
}

fn cmd_show(args: &[String]) -> Result<()> {
    let path = config_path(args, "txguard-cli show <config.yaml>")?;
    let config = ResilienceConfig::from_path(&path)?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

struct StressOptions {
    threads: usize,
    calls: u64,
    limit: u32,
    fail_every: u64,
    config: Option<PathBuf>,
}

fn parse_stress_options(args: &[String]) -> Result<StressOptions> {
    let mut opts = StressOptions {
        threads: 8,
        calls: 1000,
        limit: 1000,
        fail_every: 0,
        config: None,
    };
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .with_context(|| format!("missing value for {flag}"))?;
        match flag.as_str() {
            "--threads" => opts.threads = value.parse().context("--threads expects a number")?,
            "--calls" => opts.calls = value.parse().context("--calls expects a number")?,
            "--limit" => opts.limit = value.parse().context("--limit expects a number")?,
            "--fail-every" => {
                opts.fail_every = value.parse().context("--fail-every expects a number")?
            }
            "--config" => opts.config = Some(PathBuf::from(value)),
            other => bail!("unknown stress option: {other}"),
        }
    }
    if opts.threads == 0 {
        bail!("--threads must be at least 1");
    }
    Ok(opts)
}

fn cmd_stress(args: &[String]) -> Result<()> {
    let opts = parse_stress_options(args)?;
    let config = match &opts.config {
        Some(path) => ResilienceConfig::from_path(path)?,
        None => ResilienceConfig::default(),
    };

    let clock = Arc::new(SystemClock);
    let limiter = Arc::new(config.build_limiter(clock.clone()));
    let breakers = Arc::new(config.build_breakers(clock));
    let cache = config.build_cache::<u64>();
    let guard = Guard::new(limiter.clone(), breakers.clone());
    let policy = Arc::new(
        GuardPolicy::new()
            .with_rate_limit(RateLimitRule::new(opts.limit, 60))
            .with_breaker(BreakerRule::new("stress")),
    );

    let admitted = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));
    let started = Instant::now();

    let handles: Vec<_> = (0..opts.threads)
        .map(|worker| {
            let guard = guard.clone();
            let policy = Arc::clone(&policy);
            let admitted = Arc::clone(&admitted);
            let rejected = Arc::clone(&rejected);
            let failed = Arc::clone(&failed);
            let (calls, fail_every) = (opts.calls, opts.fail_every);
            thread::spawn(move || {
                let ctx = CallContext::new("stress").with_subject(format!("worker-{worker}"));
                for _ in 0..calls {
                    let result = guard.call(&ctx, &policy, || {
                        let n = admitted.fetch_add(1, Ordering::Relaxed) + 1;
                        if fail_every > 0 && n % fail_every == 0 {
                            Err(txguard::Error::configuration_with_context(
                                "simulated failure",
                                Default::default(),
                            ))
                        } else {
                            Ok(n)
                        }
                    });
                    match result {
                        Ok(_) => {}
                        Err(e) if e.is_rejection() => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        if handle.join().is_err() {
            bail!("stress worker panicked");
        }
    }

    let elapsed = started.elapsed();
    let total = opts.threads as u64 * opts.calls;
    println!("calls:    {total}");
    println!("admitted: {}", admitted.load(Ordering::Relaxed));
    println!("rejected: {}", rejected.load(Ordering::Relaxed));
    println!("failed:   {}", failed.load(Ordering::Relaxed));
    println!("elapsed:  {:.3}s", elapsed.as_secs_f64());
    println!();
    println!(
        "{}",
        SignalsSnapshot::collect(&limiter, &breakers, &cache).to_json()?
    );
    Ok(())
}
