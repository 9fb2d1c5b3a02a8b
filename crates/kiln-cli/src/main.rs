use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use kiln_autograd::{backward, grad, GradHandler};
use kiln_core::dispatch::{CompiledScope, TracingScope};
use kiln_core::{
    apply, Elemwise, Flags, HookKind, KilnError, Result, Runtime, RuntimeConfig, Tensor,
};
use kiln_host::{HostChannel, HostGraph};
use kiln_trace::{TraceHandler, TraceTape};

const BANNER: &str = r#"
 _  _____ _     _   _
| |/ /_ _| |   | \ | |
| ' / | || |   |  \| |
| . \ | || |___| |\  |
|_|\_\___|_____|_| \_|"#;

#[derive(Parser)]
#[command(
    name = "kiln",
    about = "Kiln tensor dispatch runtime CLI",
    long_about = "Drives the kiln dispatch runtime: tensor handles, capability flags,\nand the gradient and trace handlers layered over a host execution channel.",
    version,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show capability flags, the handler chain and the effective config
    Info {
        /// JSON config file (KILN_* environment variables override it)
        #[arg(long)]
        config: Option<String>,
    },
    /// Run y = relu(a*b + a) through the full dispatch stack
    Demo {
        /// Values of `a` (comma-separated)
        #[arg(long, default_value = "1,-2,3")]
        a: String,
        /// Values of `b` (comma-separated, same length as `a`)
        #[arg(long, default_value = "2,2,-1")]
        b: String,
        /// Track gradients and run the backward pass
        #[arg(long)]
        grad: bool,
        /// Record the calls on a trace tape
        #[arg(long)]
        trace: bool,
        /// Replay the recorded trace once more (implies --trace)
        #[arg(long)]
        replay: bool,
        /// Print the trace tape as JSON
        #[arg(long)]
        json: bool,
        /// JSON config file (KILN_* environment variables override it)
        #[arg(long)]
        config: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { config } => cmd_info(config.as_deref()),
        Commands::Demo {
            a,
            b,
            grad,
            trace,
            replay,
            json,
            config,
        } => cmd_demo(&a, &b, grad, trace || replay, replay, json, config.as_deref()),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> Result<RuntimeConfig> {
    let base = match path {
        Some(path) => {
            let text = std::fs::read_to_string(Path::new(path))
                .map_err(|e| KilnError::Config(format!("{path}: {e}")))?;
            RuntimeConfig::from_json(&text)?
        }
        None => RuntimeConfig::default(),
    };
    base.with_overrides(|key| std::env::var(key).ok())
}

struct Stack {
    channel: Arc<HostChannel>,
    tape: Arc<TraceTape>,
    rt: Runtime,
}

fn build_stack(config: RuntimeConfig) -> Stack {
    let channel = HostChannel::new();
    let tape = Arc::new(TraceTape::from_config(&config));
    let rt = Runtime::builder(channel.clone())
        .graph(HostGraph::new())
        .handler(Arc::new(GradHandler::with_defaults()))
        .handler(Arc::new(TraceHandler::new(tape.clone())))
        .config(config)
        .build();
    Stack { channel, tape, rt }
}

fn cmd_info(config: Option<&str>) -> Result<()> {
    println!("{}", BANNER);
    println!("  v{}  -  tensor handle dispatch runtime\n", env!("CARGO_PKG_VERSION"));

    println!("Capability flags");
    for flag in [Flags::SCALAR, Flags::GRAD, Flags::TRACE] {
        println!("  {:<8} {:#05b}", flag.to_string(), flag.bits());
    }

    let stack = build_stack(load_config(config)?);
    println!("\nHandler chain (first match wins)");
    for handler in stack.rt.handlers() {
        println!(
            "  {:<6} priority {:>3}  capability {}",
            handler.name(),
            handler.priority(),
            handler.capability()
        );
    }
    println!("  plain  channel `{}` or graph builder", stack.rt.channel().name());

    println!("\nApply hooks");
    for kind in HookKind::ALL {
        let state = if stack.rt.hooks().is_set(kind) { "[x]" } else { "[ ]" };
        println!("  {} {}", state, kind);
    }

    println!("\nEffective config");
    println!("{}", stack.rt.config().to_json_pretty()?);
    Ok(())
}

fn parse_values(name: &str, text: &str) -> Result<Vec<f32>> {
    text.split(',')
        .map(|s| {
            s.trim()
                .parse::<f32>()
                .map_err(|e| KilnError::Config(format!("--{name}: `{s}`: {e}")))
        })
        .collect()
}

fn first(out: kiln_core::ApplyResult) -> Result<Tensor> {
    out.into_iter()
        .next()
        .ok_or_else(|| KilnError::Backend("operator produced no output".into()))
}

fn forward(rt: &Runtime, a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let ab = first(apply!(rt, Elemwise::mul(), a, b)?)?;
    let s = first(apply!(rt, Elemwise::add(), ab, a)?)?;
    first(apply!(rt, Elemwise::relu(), s)?)
}

/// One forward (and optionally backward) pass. Returns y and, when tracking
/// gradients, the gradients of a and b.
fn run_pass(stack: &Stack, a: &Tensor, b: &Tensor, with_grad: bool) -> Result<(Tensor, Option<(Tensor, Tensor)>)> {
    let y = forward(&stack.rt, a, b)?;
    if !with_grad {
        return Ok((y, None));
    }
    let n = y.shape()?.total_nr_elems();
    let seed = stack.channel.tensor(vec![1.0; n], y.shape()?.dims())?;
    backward(&stack.rt, &y, seed)?;
    let missing = || KilnError::Backend("leaf received no gradient".into());
    let ga = grad(a).ok_or_else(missing)?;
    let gb = grad(b).ok_or_else(missing)?;
    Ok((y, Some((ga, gb))))
}

fn cmd_demo(
    a: &str,
    b: &str,
    with_grad: bool,
    with_trace: bool,
    replay: bool,
    json: bool,
    config: Option<&str>,
) -> Result<()> {
    let stack = build_stack(load_config(config)?);
    let a_vals = parse_values("a", a)?;
    let b_vals = parse_values("b", b)?;
    let n = a_vals.len();

    let mut a = stack.channel.tensor(a_vals, &[n])?;
    let mut b = stack.channel.tensor(b_vals.clone(), &[b_vals.len()])?;
    if with_grad {
        a.set_requires_grad(true);
        b.set_requires_grad(true);
    }

    println!("=== y = relu(a*b + a) ===");
    println!("a = {:?}", stack.channel.value_of(&a)?);
    println!("b = {:?}", stack.channel.value_of(&b)?);

    let (y, grads) = {
        let _tracing = with_trace.then(|| TracingScope::new(true));
        run_pass(&stack, &a, &b, with_grad)?
    };
    println!("y = {:?}  [{}]", stack.channel.value_of(&y)?, y.flags());
    if let Some((ga, gb)) = &grads {
        println!("dy/da = {:?}", stack.channel.value_of(ga)?);
        println!("dy/db = {:?}", stack.channel.value_of(gb)?);
    }

    if with_trace {
        println!("\nTrace tape ({} entries)", stack.tape.len());
        for (step, entry) in stack.tape.entries().iter().enumerate() {
            println!("  {:>3}  {}", step, entry);
        }
    }

    if replay {
        kiln_autograd::zero_grad(&a);
        kiln_autograd::zero_grad(&b);
        stack.tape.start_replay();
        let (y2, _) = {
            let _tracing = TracingScope::new(true);
            let _compiled = CompiledScope::new(true);
            run_pass(&stack, &a, &b, with_grad)?
        };
        stack.tape.finish_replay()?;
        println!(
            "\nReplay matched {} entries: y = {:?}",
            stack.tape.len(),
            stack.channel.value_of(&y2)?
        );
    }

    if json && with_trace {
        let snapshot = serde_json::to_string_pretty(&stack.tape.snapshot())?;
        println!("\n{}", snapshot);
    }

    tracing::info!(
        live = stack.channel.live_handles(),
        released = stack.channel.released(),
        "demo finished"
    );
    Ok(())
}
