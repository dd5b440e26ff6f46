//! MPSC queue throughput benchmark.
//!
//! Usage:
//!     cargo run --release --bin mpsc_bench -- --producers 4 --items 1048576
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer N to CPU 0 + N (default: unpinned)
//!     CONSUMER_CPU=8  Pin the consumer to CPU 8 (default: unpinned)
//!
//! Every item carries its producer id and sequence number, and the consumer
//! checks that each producer's items arrive in the order they were pushed.

use std::env;
use std::hint;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use minstant::Instant;
use thiserror::Error;

use funnel::sync::mpsc::{self, Consumer};

/// Default number of producer threads.
const DEFAULT_PRODUCERS: usize = 4;

/// Default number of items each producer pushes.
const DEFAULT_ITEMS: u64 = 1 << 20;

/// (producer id, sequence number)
type Payload = (usize, u64);

/// Benchmark parameters.
#[derive(Debug, Clone)]
struct BenchConfig {
    /// Number of producer threads.
    producers: usize,
    /// Items pushed by each producer.
    items_per_producer: u64,
    /// First CPU for producer pinning; producer N goes to this + N.
    producer_cpu: Option<usize>,
    /// CPU for the consumer (the main thread).
    consumer_cpu: Option<usize>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            producers: DEFAULT_PRODUCERS,
            items_per_producer: DEFAULT_ITEMS,
            producer_cpu: None,
            consumer_cpu: None,
        }
    }
}

/// Invalid command line or environment.
#[derive(Debug, Error)]
enum ConfigError {
    /// A flag was given without its value.
    #[error("missing value for {0}")]
    MissingValue(String),
    /// A value could not be parsed.
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },
    /// A count that must be positive was zero.
    #[error("{0} must be greater than 0")]
    Zero(&'static str),
    /// Unrecognized argument.
    #[error("unknown argument: {0}")]
    UnknownArgument(String),
}

/// Error running the benchmark.
#[derive(Debug, Error)]
enum BenchError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Failed to spawn a producer thread.
    #[error("failed to spawn producer: {0}")]
    Spawn(#[from] std::io::Error),
    /// A producer thread panicked.
    #[error("producer {0} panicked")]
    ProducerPanicked(usize),
    /// Items from one producer were observed out of order.
    #[error("producer {producer}: expected sequence {expected}, got {got}")]
    OutOfOrder {
        producer: usize,
        expected: u64,
        got: u64,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("mpsc_bench: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), BenchError> {
    funnel::init_tracing();

    let args: Vec<String> = env::args().collect();
    let mut config = parse_args(&args)?;
    config.producer_cpu = cpu_from_env("PRODUCER_CPU")?;
    config.consumer_cpu = cpu_from_env("CONSUMER_CPU")?;

    println!(
        "funnel MPSC (producers={}, items/producer={}):",
        config.producers, config.items_per_producer
    );
    bench_throughput(&config)
}

/// Parses command line arguments into a BenchConfig.
fn parse_args(args: &[String]) -> Result<BenchConfig, ConfigError> {
    let mut config = BenchConfig::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--producers" | "-p" => config.producers = parse_value(arg, iter.next())?,
            "--items" | "-n" => config.items_per_producer = parse_value(arg, iter.next())?,
            other => return Err(ConfigError::UnknownArgument(other.to_string())),
        }
    }

    if config.producers == 0 {
        return Err(ConfigError::Zero("--producers"));
    }
    if config.items_per_producer == 0 {
        return Err(ConfigError::Zero("--items"));
    }

    Ok(config)
}

fn parse_value<V: FromStr>(flag: &str, value: Option<&String>) -> Result<V, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        name: flag.to_string(),
        value: value.clone(),
    })
}

fn cpu_from_env(var: &str) -> Result<Option<usize>, ConfigError> {
    let Ok(value) = env::var(var) else {
        return Ok(None);
    };
    match value.parse::<usize>() {
        Ok(cpu) => Ok(Some(cpu)),
        Err(_) => Err(ConfigError::InvalidValue {
            name: var.to_string(),
            value,
        }),
    }
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn bench_throughput(config: &BenchConfig) -> Result<(), BenchError> {
    let (producer, consumer) = mpsc::channel::<Payload>();
    let go = Arc::new(AtomicBool::new(false));

    let mut handles = Vec::with_capacity(config.producers);
    for id in 0..config.producers {
        let producer = producer.clone();
        let go = Arc::clone(&go);
        let cpu = config.producer_cpu.map(|base| base + id);
        let items = config.items_per_producer;

        let handle = thread::Builder::new()
            .name(format!("producer-{id}"))
            .spawn(move || {
                pin_to_cpu(cpu);
                while !go.load(Ordering::Acquire) {
                    hint::spin_loop();
                }
                for seq in 0..items {
                    producer.push((id, seq));
                }
            })?;
        handles.push(handle);
    }
    drop(producer);

    pin_to_cpu(config.consumer_cpu);

    let total = config.producers as u64 * config.items_per_producer;
    let start = Instant::now();
    go.store(true, Ordering::Release);

    drain(&consumer, config.producers, total)?;
    let elapsed = start.elapsed();

    for (id, handle) in handles.into_iter().enumerate() {
        handle.join().map_err(|_| BenchError::ProducerPanicked(id))?;
    }

    let ops_per_ms = u128::from(total) * 1_000_000 / elapsed.as_nanos().max(1);
    println!("{ops_per_ms} ops/ms");
    Ok(())
}

/// Pops `total` items, checking per-producer order.
fn drain(consumer: &Consumer<Payload>, producers: usize, total: u64) -> Result<(), BenchError> {
    let mut next_seq = vec![0u64; producers];
    let mut received = 0u64;

    while received < total {
        let Some((producer, seq)) = consumer.pop() else {
            hint::spin_loop();
            continue;
        };
        let expected = next_seq[producer];
        if seq != expected {
            return Err(BenchError::OutOfOrder {
                producer,
                expected,
                got: seq,
            });
        }
        next_seq[producer] += 1;
        received += 1;
    }

    Ok(())
}
