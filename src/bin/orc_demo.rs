//! Demo programs for the Orc execution engine
//!
//! Usage:
//!   cargo run --bin orc_demo -- --list              # List the demo programs
//!   cargo run --bin orc_demo -- --case 1            # Run demo 1
//!   cargo run --bin orc_demo -- --case 3 --config engine.toml
//!
//! Set `RUST_LOG=orc_engine=debug` to see one line per scheduling round.
//!
//! Demo Cases:
//!   1. Parallel      - `1 | 2 | 3` published in fork order
//!   2. Timers        - three Rtimer calls answering in wall-clock order
//!   3. Pruning       - first of two delayed branches wins, the other is killed
//!   4. Otherwise     - a silent left side falls through to its fallback
//!   5. Exceptions    - a thrown value caught by a handler, then an uncaught one
//!   6. Countdown     - tail-recursive loop printing each step

use clap::Parser;
use orc_engine::{
    from_fn, Arg, Def, Engine, EngineConfig, EngineEvent, Node, NodeRef, Println, Rtimer,
    SourceLocation, TokenError, Value,
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "orc_demo", about = "Run sample programs on the Orc engine")]
struct Args {
    /// Demo program to run
    #[arg(short, long, default_value_t = 1)]
    case: u32,

    /// Engine configuration file (TOML)
    #[arg(short = 'C', long)]
    config: Option<PathBuf>,

    /// List the demo programs and exit
    #[arg(long)]
    list: bool,
}

const CASES: [&str; 6] = [
    "Parallel",
    "Timers",
    "Pruning",
    "Otherwise",
    "Exceptions",
    "Countdown",
];

fn emit(v: impl Into<Value>) -> NodeRef {
    Node::let_(v.into(), Node::publish())
}

fn site(v: Value) -> Arg {
    Arg::Const(v)
}

fn demo_parallel() -> NodeRef {
    Node::fork(emit(1), Node::fork(emit(2), emit(3)))
}

fn demo_timers() -> NodeRef {
    let timer = Value::site(Rtimer::default());
    let wait = |ms: i64, label: &str| {
        Node::call(site(timer.clone()), vec![Value::Int(ms).into()], emit(label))
    };
    Node::fork(wait(300, "slow"), Node::fork(wait(100, "fast"), wait(200, "middle")))
}

fn demo_pruning() -> NodeRef {
    let right = Node::fork(
        Node::delay(Value::Int(5), Node::let_(Value::str("tortoise"), Node::store())),
        Node::delay(Value::Int(2), Node::let_(Value::str("hare"), Node::store())),
    );
    Node::pruning(Node::let_(Arg::Var(0), Node::publish()), right)
}

fn demo_otherwise() -> NodeRef {
    let silent = Node::fork(Node::stop(), Node::delay(Value::Int(1), Node::stop()));
    Node::otherwise(silent, emit("fallback"))
}

fn demo_exceptions() -> NodeRef {
    let file = "exceptions.orc";
    let handler = Def::new("recover", 1, Node::let_(Arg::Var(0), Node::ret()));
    let caught = Node::try_(
        Node::throw(Value::str("caught")).at(SourceLocation::new(file, 2, 5)),
        Arg::Var(0),
        Node::publish(),
    );
    let uncaught = Node::throw(Value::str("escaped")).at(SourceLocation::new(file, 4, 1));
    Node::defs(vec![handler], Node::fork(caught, uncaught))
}

fn demo_countdown() -> NodeRef {
    let dec = Value::site(from_fn("Dec", |args| match args.first().and_then(Value::as_int) {
        Some(n) if n > 0 => Ok(Value::Int(n - 1)),
        Some(_) => Err(TokenError::site("Dec", "finished")),
        None => Err(TokenError::site("Dec", "expected an integer")),
    }));
    let println = Value::site(Println);
    // loop(n) = Println(n) >> Dec(n) >m> loop(m)
    let body = Node::call(
        site(println),
        vec![Arg::Var(0)],
        Node::call(
            site(dec),
            vec![Arg::Var(0)],
            Node::bind(Node::call(Arg::Var(3), vec![Arg::Var(0)], Node::ret())),
        ),
    );
    let def = Def::new("loop", 1, body);
    let handler = Def::new("done", 1, Node::let_(Value::str("liftoff"), Node::ret()));
    Node::defs(
        vec![def, handler],
        Node::try_(
            Node::call(Arg::Var(1), vec![Value::Int(5).into()], Node::pop_handler(Node::publish())),
            Arg::Var(0),
            Node::publish(),
        ),
    )
}

fn program(case: u32) -> Option<NodeRef> {
    Some(match case {
        1 => demo_parallel(),
        2 => demo_timers(),
        3 => demo_pruning(),
        4 => demo_otherwise(),
        5 => demo_exceptions(),
        6 => demo_countdown(),
        _ => return None,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.list {
        for (i, name) in CASES.iter().enumerate() {
            println!("  {}: {}", i + 1, name);
        }
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default().grant("print"),
    }
    .with_env_overrides()?;

    let Some(root) = program(args.case) else {
        return Err(format!("no demo case {} (try --list)", args.case).into());
    };

    info!(case = args.case, "running demo");
    let mut engine = Engine::new(config);
    let events = engine.subscribe();
    let printer = std::thread::spawn(move || {
        for event in events {
            match event {
                EngineEvent::Published(v) => println!("{v}"),
                EngineEvent::Print(s) => println!("> {s}"),
                EngineEvent::Error(report) => eprintln!("{report}"),
            }
        }
    });

    let summary = engine.run(root)?;
    drop(engine);
    let _ = printer.join();
    info!(
        publications = summary.publications.len(),
        errors = summary.errors.len(),
        rounds = summary.rounds,
        "demo finished"
    );
    Ok(())
}
