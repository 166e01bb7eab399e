use std::fmt;

use exam_core::model::{ExamParams, QuestionFilter, SessionState, TemplateId, Timing, UserId};
use services::{AnswerSubmission, AppServices, Clock, ExamError, ExamSource};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod sample;

use config::Config;

const DEFAULT_SEED_QUESTIONS: u32 = 60;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidUserId { raw: String },
    InvalidTemplateId { raw: String },
    InvalidSeedCount { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUserId { raw } => write!(f, "invalid --user value: {raw}"),
            ArgsError::InvalidTemplateId { raw } => write!(f, "invalid --template value: {raw}"),
            ArgsError::InvalidSeedCount { raw } => {
                write!(f, "invalid --seed-questions value: {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  exam seed [--db <sqlite_url>] [--seed-questions <n>]");
    eprintln!("  exam demo [--db <sqlite_url>] [--user <id>] [--template <id>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db {}", config::DEFAULT_DB_URL);
    eprintln!("  --user 1");
    eprintln!("  --seed-questions {DEFAULT_SEED_QUESTIONS}");
    eprintln!();
    eprintln!("Environment (also read from .env):");
    eprintln!("  EXAM_DB_URL, EXAM_USER_ID, RUST_LOG");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Seed,
    Demo,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "seed" => Some(Self::Seed),
            "demo" => Some(Self::Demo),
            _ => None,
        }
    }
}

struct Args {
    db_url: String,
    user_id: UserId,
    template_id: Option<TemplateId>,
    seed_questions: u32,
}

impl Args {
    fn parse(config: &Config, args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = normalize_sqlite_url(config.db_url.clone());
        let mut user_id = config.user_id;
        let mut template_id = None;
        let mut seed_questions = DEFAULT_SEED_QUESTIONS;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidUserId { raw: value.clone() })?;
                    user_id = UserId::new(parsed);
                }
                "--template" => {
                    let value = require_value(args, "--template")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidTemplateId { raw: value.clone() })?;
                    template_id = Some(TemplateId::new(parsed));
                }
                "--seed-questions" => {
                    let value = require_value(args, "--seed-questions")?;
                    seed_questions = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidSeedCount { raw: value.clone() })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            user_id,
            template_id,
            seed_questions,
        })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing(filter: &str) {
    let env_filter =
        EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

async fn seed(services: &AppServices, count: u32) -> Result<(), Box<dyn std::error::Error>> {
    let questions = services.questions();
    for n in 1..=u64::from(count) {
        questions.upsert_question(&sample::question(n)?).await?;
    }

    let templates = services.templates();
    let existing = templates.list_templates(1, 1).await?;
    let template = match existing.items.into_iter().next() {
        Some(template) => template,
        None => templates.create_template(sample::mock_exam_template()?).await?,
    };

    println!(
        "Seeded {count} questions; template {} \"{}\" is ready.",
        template.id(),
        template.name()
    );
    Ok(())
}

/// Plays one exam end to end, always picking the first option shown.
async fn demo(
    services: &AppServices,
    user: UserId,
    template_id: Option<TemplateId>,
) -> Result<(), Box<dyn std::error::Error>> {
    let source = template_id.map_or_else(
        || {
            ExamSource::AdHoc(ExamParams {
                name: Some("Demo drill".into()),
                timing: Timing::Practice,
                question_count: 10,
                filter: QuestionFilter::any(),
                shuffle_questions: true,
                allow_backtrack: true,
            })
        },
        ExamSource::Template,
    );

    let manager = services.sessions();
    let mut view = manager.start_session(user, source).await?;
    let session_id = view.status.session_id;
    println!(
        "Started \"{}\" ({} questions, {})",
        view.status.name,
        view.status.total_questions,
        view.status.mode.as_str()
    );

    while let Some(question) = view.question.take() {
        let submission = match question.options.first() {
            Some(option) => AnswerSubmission::choose(question.position, option.letter.as_str()),
            None => AnswerSubmission::skip(question.position),
        };
        let ack = manager.submit_answer(session_id, user, submission).await?;
        println!(
            "  {:>2}. {} -> {}",
            question.position + 1,
            question.title,
            if ack.recorded { "answered" } else { "timed out" }
        );

        let status = ack.status;
        if status.state != SessionState::InProgress
            || status.current_index + 1 >= status.total_questions
        {
            break;
        }
        view = manager.next(session_id, user).await?;
    }

    let result = match manager.finish(session_id, user).await {
        Ok(result) => result,
        Err(ExamError::SessionAlreadyFinished(_)) => manager.get_result(session_id, user).await?,
        Err(err) => return Err(err.into()),
    };
    let score = &result.result;
    println!(
        "Score {}% ({} correct, {} incorrect, {} skipped) - {}",
        score.score_percent,
        score.correct_count,
        score.incorrect_count,
        score.skipped_count,
        if score.passed { "passed" } else { "not passed" }
    );

    let stats = services.history().statistics(user).await?;
    println!(
        "History: {} sessions, {} completed, average {}",
        stats.total_sessions,
        stats.completed,
        stats
            .average_score
            .map_or_else(|| "n/a".to_owned(), |avg| format!("{avg:.1}%"))
    );
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    init_tracing(&config.rust_log);

    let mut argv = std::env::args().skip(1);
    let cmd = match argv.next() {
        None => {
            print_usage();
            return Ok(());
        }
        Some(flag) if flag == "--help" || flag == "-h" => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(&first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let args = Args::parse(&config, &mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    prepare_sqlite_file(&args.db_url)?;
    let services = AppServices::new_sqlite(&args.db_url, Clock::default_clock()).await?;
    tracing::info!(db = %args.db_url, command = ?cmd, "storage ready");

    match cmd {
        Command::Seed => seed(&services, args.seed_questions).await,
        Command::Demo => demo(&services, args.user_id, args.template_id).await,
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
