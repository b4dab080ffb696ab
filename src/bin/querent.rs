//! querent: compile and run JSON-described queries.
//!
//! # Usage
//!
//! ```bash
//! # Show the SQL for a query
//! querent compile query.json --dialect postgres
//!
//! # Update matching rows
//! querent run query.json --kind update --changes changes.json
//!
//! # Read the query from stdin
//! echo '{"collection":"users","limit":5}' | querent run - --format json
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use querent::prelude::*;

#[derive(Parser)]
#[command(name = "querent")]
#[command(version)]
#[command(about = "Compose queries as JSON, compile them to SQL, run them", long_about = None)]
#[command(after_help = "EXAMPLES:
    querent compile query.json --dialect mysql
    querent run query.json --database-url sqlite://app.db
    querent run query.json --kind delete")]
struct Cli {
    /// Configuration file (defaults to ./querent.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log statements and connection events
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SQL and bindings for a query
    Compile {
        #[command(flatten)]
        input: QueryInput,

        /// Target dialect (defaults to the configured one)
        #[arg(short, long)]
        dialect: Option<Dialect>,
    },
    /// Execute a query against the configured database
    Run {
        #[command(flatten)]
        input: QueryInput,

        /// Database connection URL
        #[arg(long, env = "QUERENT_DATABASE_URL")]
        database_url: Option<String>,

        /// Output format for rows
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct QueryInput {
    /// Query JSON file, or `-` for stdin
    query: String,

    /// Statement kind
    #[arg(short, long, value_enum, default_value = "select")]
    kind: Kind,

    /// Changes JSON file for insert and update
    #[arg(long)]
    changes: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "querent=debug".into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Compile { input, dialect } => {
            let (query, changes) = input.load()?;
            let statement = input.statement(&changes);
            statement.check()?;
            let builder = Builder::new(dialect.unwrap_or_else(|| config.dialect()));
            let compiled = builder.compile(&query, statement);
            print_compiled(&compiled);
        }
        Commands::Run {
            input,
            database_url,
            format,
        } => {
            let (query, changes) = input.load()?;
            input.statement(&changes).check()?;
            let mut config = config;
            if database_url.is_some() {
                config.database_url = database_url;
            }
            if config.database_url.is_none() {
                bail!("no database URL. Use --database-url or set QUERENT_DATABASE_URL");
            }

            let mut adapter = SqlxAdapter::connect(&config).await?;
            let outcome = execute(&mut adapter, &query, &changes, input.kind, format).await;
            adapter.close().await?;
            outcome?;
        }
    }

    Ok(())
}

async fn execute(
    adapter: &mut SqlxAdapter,
    query: &Query,
    changes: &Changes,
    kind: Kind,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let result = match kind {
        Kind::Select => {
            let rows = adapter.find(query).await?;
            format_output(&rows, format);
            return Ok(());
        }
        Kind::Insert => adapter.insert(query, changes).await?,
        Kind::Update => adapter.update(query, changes).await?,
        Kind::Delete => adapter.delete(query).await?,
    };

    println!("{} {} rows affected", "✓".green(), result.rows_affected);
    if let Some(id) = result.last_insert_id {
        println!("{} {}", "Last insert id:".dimmed(), id.to_string().cyan());
    }
    Ok(())
}

impl QueryInput {
    fn load(&self) -> anyhow::Result<(Query, Changes)> {
        let text = if self.query == "-" {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("failed to read stdin")?;
            buf
        } else {
            read(Path::new(&self.query))?
        };
        let query: Query = serde_json::from_str(&text).context("invalid query JSON")?;

        let changes = match &self.changes {
            Some(path) => serde_json::from_str(&read(path)?).context("invalid changes JSON")?,
            None => Changes::new(),
        };

        if matches!(self.kind, Kind::Insert) && changes.is_empty() {
            tracing::warn!("inserting defaults into {}: no changes given", query.collection);
        }

        // Resolve implicit join columns against the query's own collection.
        Ok((compose(String::new(), [query]), changes))
    }

    fn statement<'a>(&self, changes: &'a Changes) -> Statement<'a> {
        match self.kind {
            Kind::Select => Statement::Select,
            Kind::Insert => Statement::Insert(changes),
            Kind::Update => Statement::Update(changes),
            Kind::Delete => Statement::Delete,
        }
    }
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_compiled(compiled: &Compiled) {
    println!("{}", "Generated SQL:".green().bold());
    println!("{}", compiled.sql.white());

    if !compiled.args.is_empty() {
        println!();
        println!("{}", "Bindings:".cyan());
        for (i, arg) in compiled.args.iter().enumerate() {
            println!("  {} = {}", (i + 1).to_string().dimmed(), arg.to_string().yellow());
        }
    }
}

fn format_output(rows: &[Row], format: OutputFormat) {
    if rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows).unwrap_or_default());
        }
        OutputFormat::Table => {
            // Columns keep select order.
            let columns: Vec<&String> = rows[0].keys().collect();

            let widths: Vec<usize> = columns
                .iter()
                .map(|c| {
                    rows.iter()
                        .filter_map(|row| row.get(*c))
                        .map(|v| cell(v).chars().count())
                        .fold(c.chars().count(), usize::max)
                })
                .collect();

            let header: Vec<String> = columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:w$}", c, w = *w))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in rows {
                let cells: Vec<String> = columns
                    .iter()
                    .zip(&widths)
                    .map(|(c, w)| {
                        let val = row.get(*c).map(cell).unwrap_or_default();
                        format!("{:w$}", val, w = *w)
                    })
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", rows.len().to_string().cyan());
        }
    }
}

fn cell(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => val.to_string(),
    }
}
