use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use futures::executor::block_on;
use hypernote::{HnConfig, MemoryStore, Page, PageLocation};


#[derive(clap::Parser, Debug)]
/// Hydrate a page against events from a JSON file and print the
/// resulting HTML.
struct Args {
    /// The page markup
    #[clap(required(true))]
    page: PathBuf,

    /// JSON file holding an array of events
    #[clap(long)]
    events: Option<PathBuf>,

    /// JSON config file (HN_* env vars override it)
    #[clap(long)]
    config: Option<PathBuf>,

    /// The page URL, carrying cursor entries (`hn.<id>=<event id>`)
    #[clap(long, default_value = "/")]
    url: String,

    /// After attaching, refresh the queries with this id from the
    /// cursor (can be given multiple times)
    #[clap(long)]
    refresh: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let markup = std::fs::read_to_string(&args.page)
        .with_context(|| format!("reading page {:?}", args.page))?;
    let store = match &args.events {
        Some(path) => MemoryStore::from_json_file(path)?,
        None => MemoryStore::new(),
    };
    let config = HnConfig::load(args.config.as_deref())?;
    let location = PageLocation::parse(&args.url)
        .with_context(|| format!("parsing --url {:?}", args.url))?;

    let mut page = Page::new(&markup, store, config, location)?;
    block_on(async {
        page.attach().await;
        for target in &args.refresh {
            page.refresh(target).await;
        }
    });

    println!("{}", page.to_html());
    for notice in page.notices() {
        eprintln!("notice: {notice}");
    }
    Ok(())
}
