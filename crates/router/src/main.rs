use std::process::ExitCode;

use qrx_common::{QrxError, RouterConfig};
use qrx_router::repl::{print_cache_stats, print_result, run_repl};
use qrx_router::Router;
use qrx_store::Catalog;

const USAGE: &str = "\
usage: qrx [--config <path>] [--catalog <path>] [--dialect <name>] <command> [args]

commands:
  execute <sql>            run a SELECT through the router
  explain <sql>            analyze and rank backends without executing
  benchmark <sql> [runs]   run a statement repeatedly and report latencies
  cache-stats              print result cache counters
  cache-clear              drop every cached result
  repl                     interactive shell
";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

fn run() -> Result<(), QrxError> {
    let mut args = std::env::args().skip(1).collect::<Vec<_>>();

    let mut config = RouterConfig::default();
    let mut catalog_path: Option<String> = None;
    while let Some(flag) = args.first().filter(|a| a.starts_with("--")).cloned() {
        args.remove(0);
        let mut value = || -> Result<String, QrxError> {
            if args.is_empty() {
                Err(QrxError::InvalidConfig(format!("{flag} requires a value")))
            } else {
                Ok(args.remove(0))
            }
        };
        match flag.as_str() {
            "--config" => config = RouterConfig::load(&value()?)?,
            "--catalog" => catalog_path = Some(value()?),
            "--dialect" => config.default_dialect = value()?.parse()?,
            "--help" => {
                print!("{USAGE}");
                return Ok(());
            }
            other => {
                return Err(QrxError::InvalidConfig(format!("unknown flag: {other}")));
            }
        }
    }

    let router = Router::new(config)?;
    if let Some(path) = catalog_path {
        for table in Catalog::load(&path)?.tables() {
            let name = table.name.clone();
            router.register_table(name, table);
        }
    }

    let Some(command) = args.first().cloned() else {
        print!("{USAGE}");
        return Err(QrxError::InvalidConfig("missing command".to_string()));
    };

    match command.as_str() {
        "execute" => {
            let sql = args
                .get(1)
                .ok_or_else(|| QrxError::InvalidConfig("execute requires <sql>".to_string()))?;
            let result = router.execute(sql)?;
            print_result(&result);
            Ok(())
        }
        "explain" => {
            let sql = args
                .get(1)
                .ok_or_else(|| QrxError::InvalidConfig("explain requires <sql>".to_string()))?;
            let explanation = router.explain(sql)?;
            println!("{explanation}");
            Ok(())
        }
        "benchmark" => {
            let sql = args
                .get(1)
                .ok_or_else(|| QrxError::InvalidConfig("benchmark requires <sql>".to_string()))?;
            let runs: usize = args
                .get(2)
                .map(|r| {
                    r.parse().map_err(|_| {
                        QrxError::InvalidConfig(format!("invalid run count: {r}"))
                    })
                })
                .transpose()?
                .unwrap_or(5);
            benchmark(&router, sql, runs)
        }
        "cache-stats" => {
            print_cache_stats(&router);
            Ok(())
        }
        "cache-clear" => {
            router.cache_clear();
            println!("cache cleared");
            Ok(())
        }
        "repl" => run_repl(router)
            .map_err(|e| QrxError::InvalidConfig(format!("repl failed: {e}"))),
        other => Err(QrxError::InvalidConfig(format!(
            "unknown command: {other}"
        ))),
    }
}

fn benchmark(router: &Router, sql: &str, runs: usize) -> Result<(), QrxError> {
    let mut wall_times = Vec::with_capacity(runs);
    for run in 0..runs {
        let started = std::time::Instant::now();
        let result = router.execute(sql)?;
        let wall_ms = started.elapsed().as_secs_f64() * 1000.0;
        wall_times.push(wall_ms);
        println!(
            "run {}: wall_ms={wall_ms:.2} backend={} from_cache={}",
            run + 1,
            result.backend_used,
            result.from_cache
        );
    }
    let min = wall_times.iter().cloned().fold(f64::INFINITY, f64::min);
    let avg = wall_times.iter().sum::<f64>() / wall_times.len().max(1) as f64;
    println!("runs={runs} min_ms={min:.2} avg_ms={avg:.2}");
    Ok(())
}
