mod error;
mod map;
mod models;
mod normalize;
mod profile;
mod reconcile;
mod reference;
mod report;
mod table;

use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use env_logger::Env;
use log::{debug, info};
use map::MapDocument;
use models::{Config, ReferenceSourceMode};
use profile::{EntityKind, EntityProfile};
use reconcile::{search_by_prefix, Reconciler};
use reference::{CachedReference, ReferenceDataset, ReferenceProvider};
use report::{Artifact, TableFormat};
use std::path::{Path, PathBuf};

fn entity_arg() -> Arg {
    Arg::new("entity")
        .short('e')
        .long("entity")
        .value_name("KIND")
        .help("Entity type: district, isd, psa or school")
        .value_parser(["district", "isd", "psa", "school"])
        .ignore_case(true)
        .required(true)
}

fn cli() -> Command {
    Command::new("school-map-matcher")
        .version("0.1")
        .about("Matches district, ISD, PSA and school spreadsheets against Michigan reference data")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("school-map-matcher.toml"),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("map")
                .about("Map Maker: match an upload by code and render the map")
                .arg(entity_arg())
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .value_name("FILE")
                        .help("CSV or XLSX with the label and code columns")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("match")
                .about("Code Matchmaker: look up codes for the names in an upload")
                .arg(entity_arg())
                .arg(
                    Arg::new("input")
                        .short('i')
                        .long("input")
                        .value_name("FILE")
                        .help("CSV or XLSX with the label column")
                        .required(true),
                )
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .value_name("FORMAT")
                        .help("Format of the updated file")
                        .value_parser(["csv", "xlsx"])
                        .default_value("xlsx"),
                ),
        )
        .subcommand(
            Command::new("search")
                .about("List reference names starting with a prefix (case-sensitive)")
                .arg(entity_arg())
                .arg(Arg::new("prefix").value_name("PREFIX").required(true)),
        )
        .subcommand(
            Command::new("example")
                .about("Write an example upload showing the required columns")
                .arg(entity_arg()),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let matches = cli().get_matches();
    let config_file = string_arg(&matches, "config")?;

    // Load or create configuration
    let config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load configuration from {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        let default_config = Config::default();
        default_config.save_to_file(config_file)?;
        println!("⚠️  Please review {} (data_directory in particular), then run the program again.", config_file);
        return Ok(());
    };

    let Some((command, sub_matches)) = matches.subcommand() else {
        return Err(anyhow!("no command given"));
    };

    let outcome = match command {
        "map" => run_map_maker(&config, sub_matches).await,
        "match" => run_code_matchmaker(&config, sub_matches).await,
        "search" => run_search(&config, sub_matches).await,
        "example" => run_example(&config, sub_matches),
        other => Err(anyhow!("unknown command {other}")),
    };

    // Every failure ends the request; nothing has been written at this point
    if let Err(err) = outcome {
        println!("❌ {:#}", err);
        std::process::exit(1);
    }
    Ok(())
}

fn string_arg<'m>(matches: &'m ArgMatches, name: &str) -> Result<&'m str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing argument --{name}"))
}

fn entity_profile(config: &Config, matches: &ArgMatches) -> Result<EntityProfile> {
    let kind: EntityKind = string_arg(matches, "entity")?
        .parse()
        .map_err(|err: String| anyhow!(err))?;
    Ok(kind.profile().with_code_width(config.code_width))
}

fn data_directory(config: &Config) -> PathBuf {
    PathBuf::from(config.data_directory.as_deref().unwrap_or("."))
}

fn output_directory(config: &Config) -> PathBuf {
    PathBuf::from(config.output_directory.as_deref().unwrap_or("output"))
}

/// Local files are parsed lazily and cached; remote ones are downloaded before the run starts.
async fn reference_provider(
    config: &Config,
    profile: &EntityProfile,
    dataset: ReferenceDataset,
) -> Result<Box<dyn ReferenceProvider>> {
    match config.reference_source {
        ReferenceSourceMode::Local => {
            let provider = CachedReference::new(&data_directory(config), profile.clone(), dataset);
            println!("📂 Reference data: {}", provider.path().display());
            Ok(Box::new(provider))
        }
        ReferenceSourceMode::Internet => {
            let key = dataset.url_key(profile);
            let url = config
                .reference_url(&key)
                .ok_or_else(|| anyhow!("no entry for {key:?} in reference_urls"))?;
            let client = reqwest::Client::new();
            let provider = reference::fetch_remote(&client, url, profile, dataset).await?;
            Ok(Box::new(provider))
        }
    }
}

async fn run_map_maker(config: &Config, matches: &ArgMatches) -> Result<()> {
    let profile = entity_profile(config, matches)?;
    let input = Path::new(string_arg(matches, "input")?);

    println!("🗺️  Map Maker | {}", profile.label);
    let provider = reference_provider(config, &profile, ReferenceDataset::Geographic).await?;

    println!("📄 Processing: {}", input.display());
    let upload = table::read_table(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let reference = provider.reference()?;

    let reconciler = Reconciler::new(&profile, config.duplicate_policy);
    let run = reconciler.run(reference, &upload)?;
    info!(
        "joined {} uploaded rows against {} reference {} records",
        run.uploaded_rows,
        reference.len(),
        profile.label
    );

    let outline = match &config.map.state_outline {
        Some(relative) => map::load_outline(&data_directory(config).join(relative))?,
        None => None,
    };
    let page = MapDocument::build(&profile, &run.combined, &config.map, outline).render()?;

    let mut artifacts = Vec::new();
    if !run.partition.matched.is_empty() {
        artifacts.push(Artifact {
            file_name: profile.verify_list_file(),
            bytes: report::write_code_list(&profile, &run.partition.matched)?,
        });
    }
    if !run.partition.unmatched_from_user.is_empty() {
        artifacts.push(Artifact {
            file_name: profile.unmatched_list_file(),
            bytes: report::write_code_list(&profile, &run.partition.unmatched_from_user)?,
        });
    }
    artifacts.push(Artifact {
        file_name: profile.map_file(),
        bytes: page.into_bytes(),
    });

    println!();
    print!("{}", report::map_summary(&profile, &run));
    finish(config, &artifacts)
}

async fn run_code_matchmaker(config: &Config, matches: &ArgMatches) -> Result<()> {
    let profile = entity_profile(config, matches)?;
    let input = Path::new(string_arg(matches, "input")?);
    let format = match string_arg(matches, "format")? {
        "csv" => TableFormat::Csv,
        _ => TableFormat::Xlsx,
    };

    println!("🔎 Code Matchmaker | {}", profile.label);
    let provider = reference_provider(config, &profile, ReferenceDataset::CodeLookup).await?;

    println!("📄 Processing: {}", input.display());
    let upload = table::read_table(input).with_context(|| format!("Failed to read {}", input.display()))?;

    let reconciler = Reconciler::new(&profile, config.duplicate_policy);
    let outcome = reconciler.match_by_exact_name(provider.reference()?, &upload)?;

    let artifacts = [Artifact {
        file_name: profile.updated_file(format.extension()),
        bytes: report::write_updated_table(&outcome, format)?,
    }];

    println!();
    print!("{}", report::name_match_summary(&outcome));
    println!("ℹ️  Names are matched exactly: spelling, spacing and capitalization must agree.");
    finish(config, &artifacts)
}

async fn run_search(config: &Config, matches: &ArgMatches) -> Result<()> {
    let profile = entity_profile(config, matches)?;
    let prefix = string_arg(matches, "prefix")?;

    let provider = reference_provider(config, &profile, ReferenceDataset::CodeLookup).await?;
    let hits = search_by_prefix(provider.reference()?, prefix);
    debug!("{} reference names start with {:?}", hits.len(), prefix);

    println!("{}\t{}", profile.name_column(), profile.code_column());
    for record in &hits {
        println!("{}\t{}", record.name, record.code);
    }
    println!("🔢 Matching rows: {}", hits.len());
    Ok(())
}

fn run_example(config: &Config, matches: &ArgMatches) -> Result<()> {
    let profile = entity_profile(config, matches)?;
    let artifacts = [Artifact {
        file_name: profile.example_file(),
        bytes: report::write_example(&profile)?,
    }];
    println!(
        "📝 Your {} spreadsheet must include two columns: '{}' and '{}'.",
        profile.label,
        profile.name_column(),
        profile.code_column()
    );
    finish(config, &artifacts)
}

fn finish(config: &Config, artifacts: &[Artifact]) -> Result<()> {
    let output_dir = output_directory(config);
    let written = report::write_artifacts(&output_dir, artifacts)
        .with_context(|| format!("Failed to write results to {}", output_dir.display()))?;

    println!();
    for path in &written {
        println!("💾 Saved: {}", path.display());
    }
    println!("✅ Done!");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn map_command_requires_an_input() {
        let result = cli().try_get_matches_from(["school-map-matcher", "map", "--entity", "isd"]);
        assert!(result.is_err());
    }

    #[test]
    fn entity_kinds_are_case_insensitive_on_the_command_line() {
        let matches = cli()
            .try_get_matches_from(["school-map-matcher", "search", "-e", "PSA", "Detroit"])
            .unwrap();
        let (_, sub_matches) = matches.subcommand().unwrap();

        let profile = entity_profile(&Config::default(), sub_matches).unwrap();
        assert_eq!(profile.label, "PSA");
        assert_eq!(string_arg(sub_matches, "prefix").unwrap(), "Detroit");
    }

    #[test]
    fn configured_code_width_reaches_the_profile() {
        let config = Config {
            code_width: 6,
            ..Config::default()
        };
        let matches = cli()
            .try_get_matches_from(["school-map-matcher", "example", "-e", "school"])
            .unwrap();
        let (_, sub_matches) = matches.subcommand().unwrap();

        assert_eq!(entity_profile(&config, sub_matches).unwrap().code_width, 6);
    }
}
