//! Benchmark: per-call dispatch overhead with and without capability handlers.

use std::sync::Arc;
use std::time::Instant;

use kiln_autograd::GradHandler;
use kiln_core::dispatch::TracingScope;
use kiln_core::{Elemwise, Runtime, Tensor};
use kiln_host::HostChannel;
use kiln_trace::{TraceHandler, TraceTape};

fn bench(rt: &Runtime, a: &Tensor, b: &Tensor, iters: usize) -> f64 {
    let start = Instant::now();
    for _ in 0..iters {
        let _ = rt.apply(Elemwise::add(), &[a, b]).unwrap();
    }
    start.elapsed().as_secs_f64() / iters as f64
}

fn main() {
    println!("=== Kiln Dispatch Benchmark ===\n");

    let sizes: &[usize] = &[1, 64, 4096, 65536];
    let iters = 2000;

    println!(
        "{:<10} {:>12} {:>12} {:>12} {:>12}",
        "Elems", "Plain (us)", "Grad (us)", "Trace (us)", "Overhead"
    );
    println!("{}", "-".repeat(62));

    for &n in sizes {
        let channel = HostChannel::new();
        let data: Vec<f32> = (0..n).map(|i| ((i * 7 + 3) % 13) as f32 * 0.1 - 0.6).collect();

        let plain_rt = Runtime::new(channel.clone());
        let grad_rt = Runtime::builder(channel.clone())
            .handler(Arc::new(GradHandler::with_defaults()))
            .build();
        let tape = Arc::new(TraceTape::default());
        let trace_rt = Runtime::builder(channel.clone())
            .handler(Arc::new(TraceHandler::new(tape.clone())))
            .build();

        let a = channel.tensor(data.clone(), &[n]).unwrap();
        let b = channel.tensor(data, &[n]).unwrap();
        let mut ga = a.copy();
        ga.set_requires_grad(true);

        let plain = bench(&plain_rt, &a, &b, iters);
        let grad = bench(&grad_rt, &ga, &b, iters);
        let trace = {
            let _tracing = TracingScope::new(true);
            bench(&trace_rt, &a, &b, iters)
        };

        println!(
            "{:<10} {:>12.2} {:>12.2} {:>12.2} {:>11.2}x",
            n,
            plain * 1e6,
            grad * 1e6,
            trace * 1e6,
            grad.max(trace) / plain
        );
        assert_eq!(tape.len(), iters);
    }
}
