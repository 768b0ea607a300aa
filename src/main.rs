//! LEVEE - Interactive Shell
//! Opens a database through the event-loop bridge and drives it from a
//! small command prompt. Every command is submitted asynchronously and the
//! loop is drained before the next prompt.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use levee::{Context, Database, HostValue, Options, Payload, ReadOptions, Snapshot, WriteOptions};

fn show(payload: &Payload) -> String {
    match payload {
        Payload::Text(s) => format!("\"{}\"", s),
        Payload::Binary(b) => format!("<{} bytes>", b.len()),
    }
}

fn report(result: levee::Result<()>) {
    match result {
        Ok(()) => println!("  OK"),
        Err(e) => println!("  ERROR: {}", e),
    }
}

fn main() {
    env_logger::init();

    let location = std::env::args().nth(1).unwrap_or_else(|| "./levee_data".to_string());

    println!();
    println!("  ╔═══════════════════════════════════════════╗");
    println!("  ║               LEVEE Shell                 ║");
    println!("  ║   Event-loop bridge for a blocking KV     ║");
    println!("  ╚═══════════════════════════════════════════╝");
    println!();
    println!("  Commands:");
    println!("    set <key> <value>  - Store a key-value pair");
    println!("    get <key>          - Retrieve a value (uses the snapshot if held)");
    println!("    del <key>          - Delete a key");
    println!("    scan [from] [to]   - Walk keys in order, bounds inclusive");
    println!("    snap               - Take a snapshot (or drop the one held)");
    println!("    info               - Show engine statistics");
    println!("    exit               - Close and quit");
    println!();

    let ctx = match Context::from_env() {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("[ERROR] Failed to start runtime: {}", err);
            std::process::exit(1);
        }
    };
    let db = match Database::open(&ctx, &location, Options::default().with_create_if_missing(true)) {
        Ok(db) => db,
        Err(err) => {
            eprintln!("[ERROR] Failed to open {}: {}", location, err);
            std::process::exit(1);
        }
    };
    println!("  Opened {} with {} worker threads", location, ctx.event_loop().worker_threads());

    let held: Rc<RefCell<Option<Snapshot>>> = Rc::new(RefCell::new(None));
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("levee> ");
        if stdout.flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }

        let submitted = match parts[0].to_lowercase().as_str() {
            "set" | "put" => {
                if parts.len() < 3 {
                    println!("  Usage: set <key> <value>");
                    continue;
                }
                db.put_async(parts[1], parts[2..].join(" "), WriteOptions::default(), report)
            }
            "get" => {
                if parts.len() < 2 {
                    println!("  Usage: get <key>");
                    continue;
                }
                let mut options = ReadOptions::default();
                options.snapshot = held.borrow().clone();
                db.get_async(parts[1], options, |result| match result {
                    Ok(Some(value)) => println!("  {}", show(&value)),
                    Ok(None) => println!("  (nil)"),
                    Err(e) => println!("  ERROR: {}", e),
                })
            }
            "del" | "delete" => {
                if parts.len() < 2 {
                    println!("  Usage: del <key>");
                    continue;
                }
                db.delete_async(parts[1], WriteOptions::default(), report)
            }
            "scan" => {
                let from: Option<HostValue> = parts.get(1).map(|s| (*s).into());
                let to: Option<HostValue> = parts.get(2).map(|s| (*s).into());
                db.iterator(ReadOptions::default()).and_then(|it| {
                    it.for_range(
                        from,
                        to,
                        |key, value| println!("  {} => {}", show(&key), show(&value)),
                        |done| match done {
                            Ok(count) => println!("  ({} entries)", count),
                            Err(e) => println!("  ERROR: {}", e),
                        },
                    )
                })
            }
            "snap" => {
                let mut slot = held.borrow_mut();
                match slot.take() {
                    Some(snapshot) => {
                        snapshot.release();
                        println!("  Snapshot released");
                        Ok(())
                    }
                    None => {
                        let target = held.clone();
                        db.snapshot_async(move |result| match result {
                            Ok(snapshot) => {
                                println!("  Snapshot at sequence {}", snapshot.sequence());
                                *target.borrow_mut() = Some(snapshot);
                            }
                            Err(e) => println!("  ERROR: {}", e),
                        })
                    }
                }
            }
            "info" | "stats" => {
                match db.property("levee.stats") {
                    Ok(Some(stats)) => println!("{}", stats),
                    Ok(None) => println!("  (no stats)"),
                    Err(e) => println!("  ERROR: {}", e),
                }
                Ok(())
            }
            "exit" | "quit" => break,
            other => {
                println!("  Unknown command: {}", other);
                continue;
            }
        };

        if let Err(e) = submitted {
            println!("  ERROR: {}", e);
        }
        if let Err(e) = ctx.run() {
            eprintln!("[ERROR] {}", e);
        }
    }

    held.borrow_mut().take();
    db.close_async(|result| {
        if let Err(e) = result {
            eprintln!("[ERROR] Close failed: {}", e);
        }
    })
    .ok();
    if let Err(e) = ctx.run() {
        eprintln!("[ERROR] {}", e);
    }
    println!("  Goodbye.");
}
