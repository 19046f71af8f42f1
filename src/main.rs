//! Evolver CLI - Coordinator, peer, and population utilities.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use evolver::{
    animation::Timelapse,
    compute::{Ranker, Renderer, evolution::PopulationFile},
    schema::EvolverConfig,
    sync::{CoordinatorOptions, SyncClient, run_coordinator, run_peer},
};

const CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        usage(&args[0]);
    };
    let rest = &args[2..];

    match command.as_str() {
        "server" => server(rest).await,
        "worker" => worker(rest).await,
        "compare" => compare(rest),
        "render" => render(rest),
        "scale" => scale(rest),
        "download" => download(rest).await,
        "genvideo" => genvideo(rest),
        _ => usage(&args[0]),
    }
}

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} <command> [args]");
    eprintln!();
    eprintln!("Evolve vector paintings toward a target image.");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  server <target> [focus] [--max-seconds N]  Run a coordinator");
    eprintln!("  worker <endpoint>                          Run a peer against a coordinator");
    eprintln!("  compare <a> <b>                            Print the Lab distance of two images");
    eprintln!("  render <population> <output.png> [w h]     Render the top organism");
    eprintln!("  scale <population> <output> <factor>       Scale every organism's geometry");
    eprintln!("  download <endpoint> <output>               Save a coordinator's top organism");
    eprintln!("  genvideo <dir> <prefix> <seconds> <output> Encode snapshots as a time-lapse (needs ffmpeg)");
    eprintln!();
    eprintln!("Configuration is read from {CONFIG_PATH}, created with defaults if missing.");
    std::process::exit(1);
}

fn fail(context: &str, e: impl Display) -> ! {
    eprintln!("Error {context}: {e}");
    std::process::exit(1);
}

fn load_config() -> EvolverConfig {
    let config = EvolverConfig::load_or_create(Path::new(CONFIG_PATH))
        .unwrap_or_else(|e| fail("loading config", e));
    if let Err(e) = config.validate() {
        fail("validating config", e);
    }
    config
}

fn arg<'a>(args: &'a [String], index: usize) -> &'a str {
    args.get(index).map(String::as_str).unwrap_or_else(|| {
        let program = std::env::args().next().unwrap_or_else(|| "evolver".to_string());
        usage(&program)
    })
}

fn parse<T: std::str::FromStr>(value: &str, name: &str) -> T
where
    T::Err: Display,
{
    value
        .parse()
        .unwrap_or_else(|e| fail(&format!("parsing {name} '{value}'"), e))
}

async fn server(args: &[String]) {
    let mut positional = Vec::new();
    let mut max_duration = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--max-seconds" {
            let value = iter.next().map(String::as_str).unwrap_or_default();
            max_duration = Some(Duration::from_secs(parse(value, "--max-seconds")));
        } else {
            positional.push(PathBuf::from(arg));
        }
    }
    let mut positional = positional.into_iter();
    let Some(target) = positional.next() else {
        usage("evolver");
    };

    let options = CoordinatorOptions {
        target,
        focus: positional.next(),
        output_dir: PathBuf::from("."),
        max_duration,
    };
    if let Err(e) = run_coordinator(load_config(), options).await {
        fail("running coordinator", e);
    }
}

async fn worker(args: &[String]) {
    let endpoint = arg(args, 0);
    if let Err(e) = run_peer(load_config(), endpoint).await {
        fail("running worker", e);
    }
}

fn compare(args: &[String]) {
    let open = |path: &str| {
        image::open(path)
            .unwrap_or_else(|e| fail(&format!("reading {path}"), e))
            .to_rgba8()
    };
    let a = open(arg(args, 0));
    let b = open(arg(args, 1));
    let distance = Ranker::distance(&a, &b).unwrap_or_else(|e| fail("comparing images", e));
    println!("{distance:.6}");
}

fn render(args: &[String]) {
    let population = PopulationFile::read(Path::new(arg(args, 0)))
        .unwrap_or_else(|e| fail("reading population", e));
    let output = arg(args, 1);
    let Some(top) = population.top().unwrap_or_else(|e| fail("decoding population", e)) else {
        fail("rendering", "population is empty");
    };

    let (width, height) = match (args.get(2), args.get(3)) {
        (Some(w), Some(h)) => (parse(w, "width"), parse(h, "height")),
        _ => {
            // Fit the canvas to the drawing.
            let (w, h) = top.instructions().iter().fold((1.0f32, 1.0f32), |(w, h), i| {
                let bounds = i.bounds();
                (w.max(bounds.right), h.max(bounds.bottom))
            });
            (w.ceil() as u32, h.ceil() as u32)
        }
    };

    let png = Renderer::new(width, height)
        .render(top.instructions())
        .and_then(|canvas| canvas.encode_png())
        .unwrap_or_else(|e| fail("rendering", e));
    fs::write(output, png).unwrap_or_else(|e| fail(&format!("writing {output}"), e));
    println!("Rendered {} instructions to {output} ({width}x{height})", top.len());
}

fn scale(args: &[String]) {
    let population = PopulationFile::read(Path::new(arg(args, 0)))
        .unwrap_or_else(|e| fail("reading population", e));
    let output = arg(args, 1);
    let factor: f32 = parse(arg(args, 2), "factor");

    let mut organisms = population
        .organisms()
        .unwrap_or_else(|e| fail("decoding population", e));
    for organism in &mut organisms {
        for instruction in organism.instructions_mut() {
            instruction.scale(factor);
        }
    }
    let refs: Vec<_> = organisms.iter().collect();
    PopulationFile::from_organisms(population.iteration, &refs)
        .and_then(|scaled| scaled.write(Path::new(output)))
        .unwrap_or_else(|e| fail(&format!("writing {output}"), e));
    println!("Scaled {} organisms by {factor}", organisms.len());
}

async fn download(args: &[String]) {
    let endpoint = arg(args, 0);
    let output = arg(args, 1);
    let config = load_config();
    let client = SyncClient::new(endpoint, config.sync.http_timeout())
        .unwrap_or_else(|e| fail("creating client", e));
    let organism = client
        .top_organism()
        .await
        .unwrap_or_else(|e| fail(&format!("downloading from {endpoint}"), e));
    PopulationFile::from_organisms(0, &[&organism])
        .and_then(|file| file.write(Path::new(output)))
        .unwrap_or_else(|e| fail(&format!("writing {output}"), e));
    println!("Downloaded {} instructions to {output}", organism.len());
}

fn genvideo(args: &[String]) {
    let source = Path::new(arg(args, 0));
    let prefix = arg(args, 1);
    let seconds: usize = parse(arg(args, 2), "length");
    let output = arg(args, 3);

    let timelapse =
        Timelapse::new(source, prefix, seconds).unwrap_or_else(|e| fail("collecting frames", e));
    timelapse
        .encode(Path::new(output))
        .unwrap_or_else(|e| fail(&format!("encoding {output}"), e));
    println!("Encoded {} frames to {output}", timelapse.frames().len());
}
