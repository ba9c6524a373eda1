use clap::Parser;
use std::io::{self, BufWriter, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tabixq::{Config, Source};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let mut source = Source::open_with(&config.path, config.source_options())?;
    tracing::info!("Querying {} ({:?})", config.path.display(), source.kind());

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    for text in &config.regions {
        let mut count = 0u64;
        for record in source.query_str(text)? {
            let record = record?;
            count += 1;
            if config.json {
                serde_json::to_writer(&mut out, &record)?;
                out.write_all(b"\n")?;
            } else if !config.count {
                out.write_all(record.raw())?;
                out.write_all(b"\n")?;
            }
        }

        if config.count {
            writeln!(out, "{}\t{}", text, count)?;
        }
        tracing::debug!("{}: {} records", text, count);
    }

    out.flush()?;
    source.close();

    Ok(())
}
