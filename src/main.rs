//! Main entry point for the zipflow CLI.
//!
//! A thin consumer of the library: it turns command-line operands into a
//! manifest, then drains the archive stream into a file or stdout. All
//! archive logic lives in the library.

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use std::path::Path;

use zipflow::{
    Cli, CompressionLevel, DeflateOptions, EncodeOptions, EntrySpec, ErrorPolicy, Event,
    ManifestBuilder, Method, SourceSpec, ZipStream,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let method = method_from(&cli)?;
    let mut builder = ManifestBuilder::new();
    for (index, input) in cli.inputs.iter().enumerate() {
        builder = builder.append(EntrySpec {
            source: Some(source_from(input)),
            path: Some(archive_path(input, index)),
            timestamp: Some(Utc::now()),
            method,
            ..EntrySpec::default()
        });
    }
    let manifest = builder.build();

    if !manifest.is_valid() {
        for (index, problem) in manifest.problems() {
            eprintln!("entry {}: {}", cli.inputs[index], problem);
        }
        bail!("refusing to stream an invalid manifest");
    }

    let options = EncodeOptions {
        on_error: if cli.skip_errors {
            ErrorPolicy::Skip
        } else {
            ErrorPolicy::Halt
        },
        on_event: if cli.verbose {
            Some(Box::new(report_event))
        } else {
            None
        },
    };

    let mut stream = ZipStream::new(manifest, options);
    let written = match &cli.output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            stream.write_to(&mut file).await?
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stream.write_to(&mut stdout).await?
        }
    };

    if !cli.quiet {
        eprintln!("Archive size: {}", format_size(written));
    }
    Ok(())
}

fn method_from(cli: &Cli) -> Result<Method> {
    if cli.store {
        if cli.level.is_some() {
            bail!("--store and --level are mutually exclusive");
        }
        return Ok(Method::Store);
    }
    let level = match cli.level {
        Some(n) if n <= 9 => CompressionLevel::Precise(n),
        Some(n) => bail!("deflate level {} out of range 0..=9", n),
        None => CompressionLevel::Default,
    };
    Ok(Method::Deflate(DeflateOptions {
        level,
        ..DeflateOptions::default()
    }))
}

fn source_from(input: &str) -> SourceSpec {
    if Cli::is_http_url(input) {
        SourceSpec::url(input)
    } else if let Some(bytes) = Cli::random_size(input) {
        SourceSpec::random(bytes)
    } else {
        SourceSpec::file(input)
    }
}

/// Pick the path an input gets inside the archive.
fn archive_path(input: &str, index: usize) -> String {
    if Cli::is_http_url(input) {
        let trimmed = input.split(['?', '#']).next().unwrap_or(input);
        trimmed
            .split('/')
            .next_back()
            .filter(|segment| !segment.is_empty() && !segment.contains(':'))
            .map(str::to_string)
            .unwrap_or_else(|| format!("download-{}", index))
    } else if Cli::random_size(input).is_some() {
        format!("random-{}.bin", index)
    } else {
        Path::new(input)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| input.to_string())
    }
}

fn report_event(event: Event<'_>) {
    match event {
        Event::StreamStarted { stream_id } => eprintln!("stream {} started", stream_id),
        Event::EntryStarted { entry } => eprintln!("  adding: {}", entry.path),
        Event::EntryUpdated { .. } => {}
        Event::EntryCompleted { entry } => eprintln!("    done: {}", entry.path),
        Event::EntryFailed { entry, reason } => {
            eprintln!("  failed: {} ({})", entry.path, reason)
        }
        Event::StreamEnded { result } => match result {
            Ok(()) => eprintln!("stream ended"),
            Err(reason) => eprintln!("stream aborted: {}", reason),
        },
    }
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
