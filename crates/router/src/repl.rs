//! Interactive shell over a [`Router`].

use std::io::Write;
use std::time::Instant;

use arrow::util::pretty::pretty_format_batches;

use crate::engine::{QueryResult, Router};

/// Run the stdin shell until `\q` or EOF.
pub fn run_repl(router: Router) -> Result<(), Box<dyn std::error::Error>> {
    let mut timing_enabled = false;
    let mut sql_buffer = String::new();

    eprintln!("QRX shell (type \\q to quit, \\help for commands)");
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        let prompt = if sql_buffer.is_empty() { "qrx> " } else { " ...> " };
        print!("{prompt}");
        std::io::stdout().flush()?;
        line.clear();
        // Ctrl+D => EOF => exit
        if stdin.read_line(&mut line)? == 0 {
            if !sql_buffer.trim().is_empty() {
                eprintln!("error: unterminated SQL statement (missing ';')");
            }
            break;
        }
        let raw = line.trim();
        if raw.is_empty() {
            continue;
        }

        // Shell commands are only recognized outside a pending statement.
        if raw.starts_with('\\') && sql_buffer.trim().is_empty() {
            match handle_command(raw, &router, &mut timing_enabled) {
                CommandResult::Continue => continue,
                CommandResult::Exit => break,
            }
        }

        if raw.starts_with("--") {
            continue;
        }

        if !sql_buffer.is_empty() {
            sql_buffer.push('\n');
        }
        sql_buffer.push_str(raw);
        if !sql_buffer.trim_end().ends_with(';') {
            continue;
        }

        let stmt = sql_buffer.trim_end().trim_end_matches(';').trim().to_string();
        sql_buffer.clear();
        if stmt.is_empty() {
            continue;
        }

        let started = Instant::now();
        if let Some(sql) = explain_body(&stmt) {
            match router.explain(sql) {
                Ok(explanation) => println!("{explanation}"),
                Err(e) => eprintln!("error: {e}"),
            }
        } else {
            match router.execute(&stmt) {
                Ok(result) => print_result(&result),
                Err(e) => eprintln!("error: {e}"),
            }
        }
        if timing_enabled {
            eprintln!("time: {:.3} ms", started.elapsed().as_secs_f64() * 1000.0);
        }
    }
    Ok(())
}

fn explain_body(stmt: &str) -> Option<&str> {
    let rest = stmt.strip_prefix("EXPLAIN").or_else(|| {
        stmt.strip_prefix("explain")
            .or_else(|| stmt.strip_prefix("Explain"))
    })?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim())
}

enum CommandResult {
    Continue,
    Exit,
}

fn handle_command(raw: &str, router: &Router, timing_enabled: &mut bool) -> CommandResult {
    let parts = raw.split_whitespace().collect::<Vec<_>>();
    match parts.first().copied().unwrap_or_default() {
        "\\q" => CommandResult::Exit,
        "\\help" => {
            print_help();
            CommandResult::Continue
        }
        "\\timing" => {
            *timing_enabled = !*timing_enabled;
            eprintln!(
                "timing {}",
                if *timing_enabled { "on" } else { "off" }
            );
            CommandResult::Continue
        }
        "\\tables" => {
            for t in router.list_tables() {
                println!("{t}");
            }
            CommandResult::Continue
        }
        "\\cache-stats" => {
            print_cache_stats(router);
            CommandResult::Continue
        }
        "\\cache-clear" => {
            router.cache_clear();
            println!("cache cleared");
            CommandResult::Continue
        }
        "\\metrics" => {
            print!("{}", router.prometheus_metrics());
            CommandResult::Continue
        }
        other => {
            eprintln!("unknown command: {other} (try \\help)");
            CommandResult::Continue
        }
    }
}

fn print_help() {
    eprintln!("commands:");
    eprintln!("  <sql>;           execute a SELECT through the router");
    eprintln!("  EXPLAIN <sql>;   analyze and rank backends without executing");
    eprintln!("  \\tables         list registered tables");
    eprintln!("  \\cache-stats    result cache counters");
    eprintln!("  \\cache-clear    drop every cached result");
    eprintln!("  \\metrics        prometheus metrics dump");
    eprintln!("  \\timing         toggle per-statement timing");
    eprintln!("  \\q              quit");
}

/// Render one result the way the shell shows it.
pub fn print_result(result: &QueryResult) {
    if result.batches.is_empty() {
        println!("OK: 0 rows");
    } else {
        match pretty_format_batches(&result.batches) {
            Ok(table) => println!("{table}"),
            Err(e) => eprintln!("error rendering result: {e}"),
        }
    }
    println!(
        "backend={} rows={} execution_ms={:.1} partitions={}/{} from_cache={}",
        result.backend_used,
        result.rows_processed,
        result.execution_time_ms,
        result.scan.partitions_scanned,
        result.scan.partitions_total,
        result.from_cache
    );
}

/// Render cache counters the way the shell shows them.
pub fn print_cache_stats(router: &Router) {
    let s = router.cache_stats();
    println!(
        "size={}/{} hits={} misses={} hit_rate={:.3} evictions={} expirations={} stale={}",
        s.size,
        s.capacity,
        s.hits,
        s.misses,
        s.hit_rate,
        s.evictions,
        s.expirations,
        s.stale_invalidations
    );
}
