#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use clipwire::config::{
    CurationConfig, PressRegistry, DEFAULT_ADDITIONAL_PRESS_ALIASES, DEFAULT_PRESS_ALIASES,
};
use clipwire::gateway::{ChatModel, ProviderGateway};
use clipwire::pipeline::{run_pipeline, PipelineState};
use clipwire::summarize::{summarize_selection, HttpArticleExtractor};
use clipwire::{GoogleNewsClient, Locale, RawNewsItem};

#[derive(Parser)]
#[command(name = "clipwire", version, about = "LLM-curated news selection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch Google News results for each keyword and curate them
    Run {
        /// Subjects to curate, one pipeline run each
        #[arg(long, value_delimiter = ',', required = true)]
        keywords: Vec<String>,

        /// Also query the global (en-US) edition alongside the Korean one
        #[arg(long)]
        global: bool,

        #[command(flatten)]
        curation: CurationArgs,
    },
    /// Curate raw items from a JSON file (no feed access)
    Curate {
        /// Path to a JSON array of raw news items
        #[arg(long)]
        input: PathBuf,

        /// Subject label for the run
        #[arg(long)]
        keyword: String,

        #[command(flatten)]
        curation: CurationArgs,
    },
}

#[derive(Args)]
struct CurationArgs {
    /// Model used for all curation stages
    #[arg(long, default_value = "gpt-4.1")]
    model: String,

    /// Window start, RFC 3339 (default: 24h before the end)
    #[arg(long)]
    window_start: Option<String>,

    /// Window end, RFC 3339 (default: now)
    #[arg(long)]
    window_end: Option<String>,

    /// Hours added to GMT-marked feed timestamps before the window test
    #[arg(long, default_value_t = 9)]
    local_offset_hours: i32,

    /// Press alias file, `Name: ["alias", ...]` per line (default: built-in list)
    #[arg(long)]
    press_file: Option<PathBuf>,

    /// Additional press aliases used only by the re-evaluation pass
    #[arg(long)]
    additional_press_file: Option<PathBuf>,

    /// Fetch and summarize each selected article after curation
    #[arg(long)]
    summarize: bool,

    /// Write full run states as JSON to this file
    #[arg(long)]
    out: Option<PathBuf>,
}

impl CurationArgs {
    fn build_config(&self) -> Result<CurationConfig, Box<dyn std::error::Error>> {
        let end = match &self.window_end {
            Some(s) => DateTime::parse_from_rfc3339(s)?,
            None => {
                let offset = FixedOffset::east_opt(self.local_offset_hours * 3600)
                    .ok_or("local offset out of range")?;
                Utc::now().with_timezone(&offset)
            }
        };
        let start = match &self.window_start {
            Some(s) => DateTime::parse_from_rfc3339(s)?,
            None => end - Duration::hours(24),
        };
        if start > end {
            return Err("window start is after window end".into());
        }

        let press = match &self.press_file {
            Some(path) => PressRegistry::parse(&fs::read_to_string(path)?)?,
            None => PressRegistry::parse(DEFAULT_PRESS_ALIASES)?,
        };
        let additional = match &self.additional_press_file {
            Some(path) => PressRegistry::parse(&fs::read_to_string(path)?)?,
            None => PressRegistry::parse(DEFAULT_ADDITIONAL_PRESS_ALIASES)?,
        };

        let mut config = CurationConfig::new(ChatModel::new(&self.model), start, end, press);
        config.additional_press = additional;
        config.local_offset_hours = self.local_offset_hours;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let gateway = ProviderGateway::from_env()?;

    match cli.command {
        Commands::Run {
            keywords,
            global,
            curation,
        } => {
            let config = curation.build_config()?;
            let client = GoogleNewsClient::new();
            let mut states = Vec::new();

            for keyword in &keywords {
                let mut queries = vec![(keyword.clone(), Locale::korea())];
                if global {
                    queries.push((keyword.clone(), Locale::global()));
                }
                let items = client.search_all(&queries).await;

                let mut state = run_pipeline(&gateway, &config, keyword, items).await?;
                if curation.summarize {
                    let extractor = HttpArticleExtractor::default();
                    summarize_selection(
                        &extractor,
                        &gateway,
                        &config.model,
                        &mut state.final_selection,
                    )
                    .await;
                }
                print_report(&state);
                states.push(state);
            }

            write_states(&curation.out, &states)?;
        }
        Commands::Curate {
            input,
            keyword,
            curation,
        } => {
            let config = curation.build_config()?;
            let items: Vec<RawNewsItem> = serde_json::from_str(&fs::read_to_string(input)?)?;

            let mut state = run_pipeline(&gateway, &config, &keyword, items).await?;
            if curation.summarize {
                let extractor = HttpArticleExtractor::default();
                summarize_selection(
                    &extractor,
                    &gateway,
                    &config.model,
                    &mut state.final_selection,
                )
                .await;
            }
            print_report(&state);
            write_states(&curation.out, &[state])?;
        }
    }

    Ok(())
}

fn print_report(state: &PipelineState) {
    println!("== {} ==", state.keyword);
    println!(
        "candidates: {}  selected: {}{}",
        state.candidates.len(),
        state.final_selection.len(),
        if state.re_evaluated {
            "  (re-evaluated)"
        } else {
            ""
        }
    );
    for item in &state.final_selection {
        println!(
            "[{:?}] {} ({})",
            item.importance, item.title, item.source_label
        );
        if !item.reason.is_empty() {
            println!("       {}", item.reason);
        }
        if !item.keywords.is_empty() {
            println!("       keywords: {}", item.keywords.join(", "));
        }
        println!("       {}", item.url);
    }
    println!();
}

fn write_states(
    out: &Option<PathBuf>,
    states: &[PipelineState],
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = out {
        fs::write(path, serde_json::to_string_pretty(states)?)?;
    }
    Ok(())
}
