//! Triagraph CLI - topic-aware bug triage over a per-tenant graph.

use clap::Parser;
use std::process;

use triagraph::cli::{
    BugCommands, Cli, Commands, DevCommands, RecommendCommands, TopicCommands, TrainCommands,
};
use triagraph::commands::{self, Output};
use triagraph::tenant::{resolve_data_dir, Engine, Tenant};

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let human = cli.human_readable;

    // Data dir: --data-dir flag > TG_DATA_DIR env > XDG data dir
    let data_dir = match resolve_data_dir(cli.data_dir) {
        Ok(dir) => dir,
        Err(e) => {
            print_error(&e, human);
            process::exit(1);
        }
    };

    let engine = Engine::new(data_dir);
    let tenant = Tenant::new(&cli.organization, &cli.project);

    if let Err(e) = run_command(cli.command, &engine, &tenant, human) {
        print_error(&e, human);
        process::exit(1);
    }
}

fn run_command(
    command: Commands,
    engine: &Engine,
    tenant: &Tenant,
    human: bool,
) -> triagraph::Result<()> {
    match command {
        Commands::Init => {
            output(&commands::init(engine, tenant)?, human);
        }
        Commands::Bug { command } => match command {
            BugCommands::Ingest { file } => {
                let record = commands::read_bug_record(file.as_deref())?;
                output(&commands::bug_ingest(engine, tenant, &record)?, human);
            }
            BugCommands::Show { id } => {
                output(&commands::bug_show(engine, tenant, &id)?, human);
            }
            BugCommands::List { limit, offset } => {
                output(&commands::bug_list(engine, tenant, limit, offset)?, human);
            }
            BugCommands::Search { query, limit } => {
                output(&commands::bug_search(engine, tenant, &query, limit)?, human);
            }
            BugCommands::Similar { id } => {
                output(&commands::bug_similar(engine, tenant, &id)?, human);
            }
        },
        Commands::Topic { command } => match command {
            TopicCommands::Infer { text } => {
                output(&commands::topic_infer(engine, tenant, &text)?, human);
            }
            TopicCommands::List => {
                output(&commands::topic_list(engine, tenant)?, human);
            }
        },
        Commands::Dev { command } => match command {
            DevCommands::List => {
                output(&commands::dev_list(engine, tenant)?, human);
            }
            DevCommands::Topics { id } => {
                output(&commands::dev_topics(engine, tenant, &id)?, human);
            }
        },
        Commands::Recommend { command } => match command {
            RecommendCommands::Frequency { query, bug, limit } => {
                // clap guarantees exactly one of --query/--bug is present
                let target = match (&query, &bug) {
                    (_, Some(id)) => commands::FrequencyTarget::Bug(id),
                    (Some(q), None) => commands::FrequencyTarget::Query(q),
                    (None, None) => unreachable!(),
                };
                output(
                    &commands::recommend_frequency(engine, tenant, target, limit)?,
                    human,
                );
            }
            RecommendCommands::Rank {
                bug,
                limit,
                fallback,
            } => {
                output(
                    &commands::recommend_rank(engine, tenant, &bug, limit, fallback)?,
                    human,
                );
            }
        },
        Commands::Feedback {
            bug,
            topic,
            not_relevant,
            ..
        } => {
            output(
                &commands::feedback(engine, tenant, &bug, topic, !not_relevant)?,
                human,
            );
        }
        Commands::Train { command } => match command {
            TrainCommands::Start => {
                output(&commands::train_start(engine, tenant)?, human);
            }
            TrainCommands::Status { run_id } => {
                output(
                    &commands::train_status(engine, tenant, run_id.as_deref())?,
                    human,
                );
            }
        },
    }

    Ok(())
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

fn print_error(e: &triagraph::Error, human: bool) {
    if human {
        eprintln!("Error: {}", e);
    } else {
        let payload = serde_json::json!({ "error": e.to_string() });
        eprintln!("{}", payload);
    }
}

/// Logs go to stderr so stdout stays machine-parseable.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("TG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
