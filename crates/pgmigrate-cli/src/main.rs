//! pgmigrate CLI - apply SQL migrations and dump PostgreSQL schemas.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pgmigrate::{
    connect, load_migrations, schema, ChecksumUpdate, Config, LogFormat, MigrateError, Migrator,
    VerificationError,
};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default config file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = ".pgmigrate.yaml";

#[derive(Parser)]
#[command(name = "pgmigrate")]
#[command(about = "Apply SQL migrations to a PostgreSQL database and dump its schema")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long)]
    configfile: Option<PathBuf>,

    /// Database connection string
    #[arg(short, long)]
    database: Option<String>,

    /// Path to the migrations directory
    #[arg(short, long)]
    migrations: Option<PathBuf>,

    /// Migrations table name, possibly schema-qualified
    #[arg(long)]
    table_name: Option<String>,

    /// Log format: text or json
    #[arg(long)]
    log_format: Option<String>,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all migrations that have not yet been applied
    #[command(alias = "apply")]
    Migrate,

    /// Show the migrations that would be applied, in order
    Plan,

    /// Show the migrations recorded as applied
    Applied,

    /// Check for drift between the migrations directory and the database
    Verify,

    /// Dump the database schema as a single SQL file
    Dump {
        /// Write the dump here instead of the configured path; - for stdout
        #[arg(long)]
        out: Option<String>,
    },

    /// Create a new migration file with the next sequence number
    New {
        /// Short description used in the filename, e.g. create_users
        name: String,
    },

    /// Manual operations on the migrations table
    #[command(subcommand)]
    Ops(OpsCommands),
}

#[derive(Subcommand)]
enum OpsCommands {
    /// Mark migrations as applied without running them
    MarkApplied { ids: Vec<String> },

    /// Mark every known migration as applied without running it
    MarkAllApplied,

    /// Remove migrations from the applied set
    MarkUnapplied { ids: Vec<String> },

    /// Remove every migration from the applied set
    MarkAllUnapplied,

    /// Set the recorded checksum of an applied migration
    SetChecksum { id: String, checksum: String },

    /// Recalculate recorded checksums from the migration files; all
    /// migrations when no ids are given
    RecalculateChecksum { ids: Vec<String> },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    setup_logging(&cli.verbosity, config.log_format())
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let cancel = cancel_on_ctrl_c();

    match cli.command {
        Commands::Migrate => {
            let migrator = migrator_from(&config)?;
            let pool = connect(config.database()?).await?;
            let warnings = migrator.migrate(&pool, &cancel).await?;
            print_warnings(&warnings);
            Ok(ExitCode::SUCCESS)
        }

        Commands::Plan => {
            let migrator = migrator_from(&config)?;
            let pool = connect(config.database()?).await?;
            let client = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e, "getting connection for plan"))?;
            let plan = migrator.plan(&**client).await?;
            for migration in plan {
                println!("{}", migration.id);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Applied => {
            let migrator = migrator_from(&config)?;
            let pool = connect(config.database()?).await?;
            let client = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e, "getting connection for applied"))?;
            let applied = migrator.applied(&**client).await?;
            for row in applied {
                println!(
                    "{}\t{}\t{}\t{}ms",
                    row.id, row.checksum, row.applied_at, row.execution_time_in_millis
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Verify => {
            let migrator = migrator_from(&config)?;
            let pool = connect(config.database()?).await?;
            let client = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e, "getting connection for verify"))?;
            let warnings = migrator.verify(&**client).await?;
            print_warnings(&warnings);
            if warnings.is_empty() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }

        Commands::Dump { out } => {
            let pool = connect(config.database()?).await?;
            let client = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e, "getting connection for dump"))?;
            let rendered = schema::dump(config.schema.clone(), &**client).await?;
            let target = out.or_else(|| config.schema.out.clone());
            match target.as_deref() {
                None | Some("-") => println!("{rendered}"),
                Some(path) => std::fs::write(path, format!("{rendered}\n"))?,
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::New { name } => {
            let path = new_migration_file(&config.migrations_dir(), &name)?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Ops(ops) => run_ops(&config, ops).await,
    }
}

async fn run_ops(config: &Config, ops: OpsCommands) -> Result<ExitCode, MigrateError> {
    let migrator = migrator_from(config)?;
    let pool = connect(config.database()?).await?;
    let mut client = pool
        .get()
        .await
        .map_err(|e| MigrateError::pool(e, "getting connection for ops"))?;

    let changed = match ops {
        OpsCommands::MarkApplied { ids } => migrator.mark_applied(&mut client, &ids).await?,
        OpsCommands::MarkAllApplied => migrator.mark_all_applied(&mut client).await?,
        OpsCommands::MarkUnapplied { ids } => migrator.mark_unapplied(&mut client, &ids).await?,
        OpsCommands::MarkAllUnapplied => migrator.mark_all_unapplied(&mut client).await?,
        OpsCommands::SetChecksum { id, checksum } => {
            let updates = vec![ChecksumUpdate {
                migration_id: id,
                new_checksum: checksum,
            }];
            migrator.set_checksums(&mut client, &updates).await?
        }
        OpsCommands::RecalculateChecksum { ids } => {
            if ids.is_empty() {
                migrator.recalculate_all_checksums(&mut client).await?
            } else {
                migrator.recalculate_checksums(&mut client, &ids).await?
            }
        }
    };
    for row in changed {
        println!("{}\t{}", row.id, row.checksum);
    }
    Ok(ExitCode::SUCCESS)
}

/// Load config per the precedence rules: explicit flags beat environment
/// variables beat config-file entries beat defaults.
fn resolve_config(cli: &Cli) -> Result<Config, MigrateError> {
    let mut config = match &cli.configfile {
        Some(path) => Config::load(path)?,
        None => {
            if std::path::Path::new(DEFAULT_CONFIG_FILE).exists() {
                Config::load(DEFAULT_CONFIG_FILE)?
            } else {
                Config::from_env()
            }
        }
    };
    if let Some(database) = &cli.database {
        config.database = Some(database.clone());
    }
    if let Some(migrations) = &cli.migrations {
        config.migrations = Some(migrations.clone());
    }
    if let Some(table_name) = &cli.table_name {
        config.table_name = Some(table_name.clone());
    }
    if let Some(log_format) = &cli.log_format {
        config.log_format = Some(log_format.parse()?);
    }
    Ok(config)
}

fn migrator_from(config: &Config) -> Result<Migrator, MigrateError> {
    let migrations = load_migrations(&config.migrations_dir())?;
    Ok(Migrator::new(migrations).with_table_name(config.table_name()))
}

fn print_warnings(warnings: &[VerificationError]) {
    for verr in warnings {
        let fields = serde_json::to_string(&verr.fields).unwrap_or_default();
        warn!(fields = %fields, "{}", verr.message);
    }
}

/// Create an empty migration file named with the next zero-padded sequence
/// number.
fn new_migration_file(dir: &std::path::Path, name: &str) -> Result<PathBuf, MigrateError> {
    std::fs::create_dir_all(dir)?;
    let mut next = 1u32;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let digits: String = file_name
            .to_string_lossy()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(seq) = digits.parse::<u32>() {
            next = next.max(seq + 1);
        }
    }
    let path = dir.join(format!("{next:04}_{name}.sql"));
    std::fs::write(&path, "")?;
    Ok(path)
}

fn setup_logging(
    verbosity: &str,
    format: LogFormat,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(verbosity.to_string()));
    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()?;
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()?;
        }
    }
    Ok(())
}

/// Cancel the returned token on Ctrl-C so in-flight migrations roll back and
/// the session lock is released.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received interrupt, cancelling");
            trigger.cancel();
        }
    });
    cancel
}
