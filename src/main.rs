use anyhow::Result;
use clap::{Parser, Subcommand};
use portfolio_query::context::SessionStore;
use portfolio_query::templates::TemplateSet;
use portfolio_query::{build_dispatcher, AppConfig, ChatReply, QueryCandidate, SchemaRegistry};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portfolio-query")]
#[command(about = "Ask questions about portfolio holdings and trades in plain English")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question
    Ask { question: Vec<String> },
    /// Interactive session; follow-up questions reuse earlier context
    Chat,
    /// List the built-in question templates
    Templates,
    /// Run the SQL safety validator on a statement without executing it
    CheckSql { sql: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;

    match args.command {
        Command::Templates => {
            let templates = TemplateSet::builtin()?;
            for rule in templates.rules() {
                println!("{:<28} {}\n{:<28} e.g. \"{}\"", rule.id, rule.description, "", rule.example);
            }
        }
        Command::CheckSql { sql } => {
            let sql = sql.join(" ");
            let validator = portfolio_query::safety::SqlValidator::new(
                Arc::new(SchemaRegistry::builtin()),
                config.default_row_limit,
                config.max_row_limit,
            );
            match validator.validate(&QueryCandidate::generated(sql.clone(), sql)) {
                Ok(accepted) => {
                    println!("ACCEPTED ({:?})\n{}", accepted.row_cap, accepted.sql());
                    for warning in &accepted.warnings {
                        println!("note: {}", warning.message);
                    }
                }
                Err(reason) => println!("REJECTED: {}", reason),
            }
        }
        Command::Ask { question } => {
            let dispatcher = build_dispatcher(&config)?;
            let reply = dispatcher
                .handle(&SessionStore::new_session_id(), &question.join(" "))
                .await;
            print_reply(&reply);
        }
        Command::Chat => {
            let dispatcher = build_dispatcher(&config)?;
            let session_id = SessionStore::new_session_id();
            println!("Ask about holdings and trades. Empty line or Ctrl-D to quit.");
            let stdin = io::stdin();
            loop {
                print!("> ");
                io::stdout().flush()?;
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 || line.trim().is_empty() {
                    break;
                }
                let reply = dispatcher.handle(&session_id, &line).await;
                print_reply(&reply);
            }
            dispatcher.end_session(&session_id);
        }
    }

    Ok(())
}

fn print_reply(reply: &ChatReply) {
    println!("\n{}", reply.answer);
    if let Some(table) = &reply.table {
        if table.row_count() > 1 || table.columns.len() > 1 {
            println!("\n{}", table.to_markdown());
        }
    }
    if let Some(sql) = &reply.sql {
        let source = match (&reply.origin, &reply.template_id) {
            (_, Some(id)) => format!("template {}", id),
            (Some(origin), None) => origin.to_string(),
            (None, None) => "unknown".to_string(),
        };
        println!("\nSQL ({}):\n{}\n", source, sql);
    }
}
