use std::thread;
use tput_topk::tput::previous_window;
use tput_topk::{InMemoryStore, StoreLock, TputConfig, TputNode};
use tracing_subscriber::EnvFilter;

const SAMPLE: &[&str] = &[
    "The quick brown fox jumps over the lazy dog.",
    "A dog, a cat and a fox walk into the barn!",
    "Is the fox quicker than the dog? The dog thinks not.",
    "Lazy days (and lazy dogs) make the barn quiet; the cat sleeps.",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => TputConfig::load(path)?,
        None => TputConfig::from_env()?,
    };
    let nodes: usize = std::env::var("TPUT_NODES")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(3);
    let window = previous_window(60).to_string();

    println!("TPUT top-{} over {} nodes", config.k, nodes);
    println!("==========================");
    println!("Window: {}", window);
    println!();

    let store = InMemoryStore::new();
    let handles: Vec<_> = (0..nodes)
        .map(|i| {
            let store = store.clone();
            let window = window.clone();
            let config = config.clone().with_node(format!("{}-{}", config.node, i));
            thread::spawn(move || {
                let lock = StoreLock::new(store.clone(), config.lock.clone());
                let mut node = TputNode::new(config.clone());
                for line in SAMPLE.iter().cycle().skip(i).take(SAMPLE.len() + i) {
                    node.process_text(line);
                }
                node.save_snapshot(&store, &lock, &window)?;
                drop(node);
                TputNode::sync_saved(config, &store, &lock, &window)
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(report)) => println!(
                "node {}: completed phases {:?}",
                i,
                [report.collect, report.prune, report.finalize].map(|p| p.completed)
            ),
            Ok(Err(e)) => println!("node {}: {}", i, e),
            Err(_) => println!("node {}: panicked", i),
        }
    }
    println!();

    let reader = TputNode::new(config);
    match reader.get_top_k(&store, &window)? {
        Some(top) => {
            for (rank, (word, count)) in top.iter().enumerate() {
                println!("{:>3}. {:<12} {}", rank + 1, word, count);
            }
        }
        None => println!("No result published for window {}", window),
    }
    Ok(())
}
