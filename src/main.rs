mod config;
mod logging;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use remotable::{
  Level, LocalStore, ReconciliationEngine, Record, Setting, SqliteStore, SyncContext, SyncModel,
};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "remotable")]
#[command(about = "Keep a local record store in step with remote REST resources")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./remotable.yaml, then $XDG_CONFIG_HOME/remotable/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Never talk to the remote side
  #[arg(long, global = true)]
  nosync: bool,

  /// Debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Look a record up, fetching it remotely on a miss and pulling it when expired
  Find {
    model: String,
    #[arg(value_parser = parse_pair, required = true)]
    attrs: Vec<(String, Value)>,
  },
  /// Refresh a local record from the remote side
  Pull {
    model: String,
    #[arg(value_parser = parse_pair, required = true)]
    attrs: Vec<(String, Value)>,
  },
  /// Mark a local record expired so the next lookup pulls it
  Expire {
    model: String,
    #[arg(value_parser = parse_pair, required = true)]
    attrs: Vec<(String, Value)>,
  },
  /// Destroy a record remotely and locally
  Destroy {
    model: String,
    #[arg(value_parser = parse_pair, required = true)]
    attrs: Vec<(String, Value)>,
  },
  /// Fetch a remote collection and reconcile it into the local store
  Sync {
    model: String,
    /// Collection route (default: the model's collection)
    path: Option<String>,
  },
  /// Print a model's attribute map, remote key and finder routes
  Show { model: String },
}

impl Command {
  fn model(&self) -> &str {
    match self {
      Command::Find { model, .. }
      | Command::Pull { model, .. }
      | Command::Expire { model, .. }
      | Command::Destroy { model, .. }
      | Command::Sync { model, .. }
      | Command::Show { model } => model,
    }
  }
}

/// `attr=value`; the value is read as JSON when it parses, else as a string.
fn parse_pair(s: &str) -> Result<(String, Value), String> {
  let (name, raw) = s
    .split_once('=')
    .ok_or_else(|| format!("expected attr=value, got '{}'", s))?;
  if name.is_empty() {
    return Err(format!("missing attribute name in '{}'", s));
  }
  let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
  Ok((name.to_string(), value))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log, args.verbose)?;

  let mut ctx = config.context();
  if args.nosync {
    ctx.set(&Level::Process, Setting::NoSync, Some(true));
  }

  let name = args.command.model().to_string();
  let model_config = config.model(&name)?;
  let model = model_config.sync_model(&name)?;

  if let Command::Show { .. } = args.command {
    show(&model);
    return Ok(());
  }

  let store = match &config.database {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open()?,
  };
  let remote = Arc::new(model_config.remote(&name)?);
  let engine = ReconciliationEngine::new(model, remote, Arc::new(store), &ctx)?;

  run(&engine, &ctx, args.command).await
}

async fn run(
  engine: &ReconciliationEngine<SqliteStore>,
  ctx: &SyncContext,
  command: Command,
) -> Result<()> {
  let name = engine.model().name().to_string();

  match command {
    Command::Find { attrs, .. } => {
      let attrs = borrowed(&attrs);
      match engine.fetch_by(ctx, &attrs).await? {
        Some(fetched) => {
          println!("# source: {:?}", fetched.source);
          print_record(&fetched.data)?;
        }
        None => println!("No {} found", name),
      }
    }
    Command::Pull { attrs, .. } => {
      let mut record = local(engine, &attrs)?;
      let outcome = engine.pull(ctx, &mut record).await?;
      println!("# {:?}", outcome);
      if !record.is_destroyed() {
        print_record(&record)?;
      }
    }
    Command::Expire { attrs, .. } => {
      let mut record = local(engine, &attrs)?;
      engine.expire(&mut record)?;
      println!("Expired {} {}", name, record.id.unwrap_or_default());
    }
    Command::Destroy { attrs, .. } => {
      let mut record = engine.find_by_or_fail(ctx, &borrowed(&attrs)).await?;
      engine.destroy(ctx, &mut record).await?;
      println!("Destroyed {} {}", name, record.id.unwrap_or_default());
    }
    Command::Sync { path, .. } => {
      let records = engine.all_by_remote(ctx, path.as_deref()).await?;
      for record in &records {
        print_record(record)?;
      }
      println!("# {} {} record(s) reconciled", records.len(), name);
    }
    Command::Show { .. } => show(engine.model()),
  }

  Ok(())
}

fn borrowed(attrs: &[(String, Value)]) -> Vec<(&str, Value)> {
  attrs
    .iter()
    .map(|(name, value)| (name.as_str(), value.clone()))
    .collect()
}

fn local(engine: &ReconciliationEngine<SqliteStore>, attrs: &[(String, Value)]) -> Result<Record> {
  let name = engine.model().name();
  engine
    .store()
    .find_one(name, attrs)?
    .ok_or_else(|| eyre!("No local {} matches the given attributes", name))
}

fn print_record(record: &Record) -> Result<()> {
  let mut fields = serde_json::Map::new();
  fields.insert("_id".to_string(), Value::from(record.id));
  fields.insert(
    "_expires_at".to_string(),
    Value::from(record.expires_at.map(|t| t.to_rfc3339())),
  );
  for (name, value) in record.fields() {
    fields.insert(name.clone(), value.clone());
  }
  println!("{}", serde_json::to_string_pretty(&fields)?);
  Ok(())
}

fn show(model: &SyncModel) {
  println!("model: {}", model.name());
  println!("primary key: {}", model.primary_key());
  println!(
    "remote key: {} (local: {})",
    model.remote_key().remote().join(", "),
    model.local_key().join(", ")
  );
  println!("expires after: {}s", model.expires_after().num_seconds());
  println!("attributes (local -> remote):");
  for (remote, local) in model.attributes().pairs() {
    println!("  {} -> {}", local, remote);
  }
  println!("finders:");
  for finder in model.finders().iter() {
    println!("  [{}] {}", finder.local_keys.join(", "), finder.route);
  }
}
