use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use larder_db::Database;
use larder_db::models::{PartnerRow, UserRow};
use larder_remote::{DEFAULT_API_BASE, RemoteClient};
use larder_sync::{account, copier, partners, refresh};
use larder_types::models::{CopyAction, CopyReport};

/// Mirror recipes from the remote service and copy recipes between
/// partnered accounts.
#[derive(Parser)]
#[command(name = "larder", version)]
struct Cli {
    /// Account email (defaults to LARDER_EMAIL)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// SQLite database path (defaults to LARDER_DB_PATH, then larder.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in to the remote recipe service; creates the local account on
    /// first use
    Login,
    /// Print your partner code; share it so others can add you
    Code,
    /// Re-fetch every kind whose remote change counter advanced
    Refresh,
    /// Copy recipes from your active partners into your own remote account
    Copy {
        /// Report what would happen without creating or uploading anything
        #[arg(short = 'n', long)]
        dry_run: bool,
        /// Only copy from the named partner
        #[arg(short, long)]
        partner: Option<String>,
    },
    /// Manage partnerships
    #[command(subcommand)]
    Partners(PartnersCommand),
}

#[derive(Subcommand)]
enum PartnersCommand {
    /// List active and pending partners
    List,
    /// Request a partnership using the other account's partner code
    Request { code: String },
    /// Approve a pending incoming request
    Approve { name: String },
    /// Remove an active partner (does not remove anything already copied)
    Remove { name: String },
    /// Reject an incoming request or cancel an outgoing one
    Reject { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "larder=warn".into()),
        )
        .init();

    let cli = Cli::parse();

    let db_path = cli
        .db
        .clone()
        .or_else(|| std::env::var("LARDER_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("larder.db"));
    let db = Database::open(&db_path)?;
    let remote = RemoteClient::new(
        std::env::var("LARDER_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.into()),
    );

    match cli.command {
        Command::Login => {
            let email = match cli.user {
                Some(email) => email,
                None => prompt("Email")?,
            };
            let password = prompt("Password")?;
            let user = account::login_or_create(&remote, &db, &email, &password).await?;
            println!("Logged in successfully!");
            println!("Your partner code: {}", user.partner_code);
        }
        Command::Code => {
            let user = require_user(&db, cli.user.as_deref())?;
            println!("Share this code so others can add you as a partner:");
            println!("{}", user.partner_code);
        }
        Command::Refresh => {
            let user = require_user(&db, cli.user.as_deref())?;
            let outcome = refresh::refresh(&remote, &db, &user).await?;
            for (kind, touched) in [
                ("categories", outcome.categories),
                ("recipes", outcome.recipes),
                ("photos", outcome.photos),
            ] {
                println!("{kind}: {}", if touched { "synced" } else { "up to date" });
            }
        }
        Command::Copy { dry_run, partner } => {
            let user = require_user(&db, cli.user.as_deref())?;
            let active = db.active_partners(&user.id)?;
            if active.is_empty() {
                println!("You do not have any partners yet.");
                return Ok(());
            }
            let mut found = false;
            for row in &active {
                if let Some(only) = &partner {
                    if !row.name.eq_ignore_ascii_case(only) {
                        continue;
                    }
                }
                found = true;
                let partner_user = db
                    .get_user_by_id(&row.id)?
                    .context("partner account vanished")?;
                println!("Syncing from {}", partner_user.name);
                let report = copier::copy_from_partner(
                    &remote,
                    &user.remote_token,
                    &partner_user.remote_token,
                    &partner_user.name,
                    dry_run,
                )
                .await?;
                print_report(&report);
            }
            if partner.is_some() && !found {
                bail!("No such partner");
            }
        }
        Command::Partners(cmd) => run_partners(&db, cli.user.as_deref(), cmd)?,
    }

    Ok(())
}

fn run_partners(db: &Database, user_arg: Option<&str>, cmd: PartnersCommand) -> anyhow::Result<()> {
    let user = require_user(db, user_arg)?;
    match cmd {
        PartnersCommand::List => {
            let active = db.active_partners(&user.id)?;
            let incoming = db.pending_incoming(&user.id)?;
            let outgoing = db.pending_outgoing(&user.id)?;
            if active.is_empty() && incoming.is_empty() && outgoing.is_empty() {
                println!("You do not have any partners yet.");
                return Ok(());
            }
            if !active.is_empty() {
                println!("Your partners:");
                for p in &active {
                    println!("- {} ({} recipes)", p.name, p.recipe_count);
                }
            }
            for p in &incoming {
                println!("- {} (incoming request, approve with `larder partners approve`)", p.name);
            }
            for p in &outgoing {
                println!("- {} (awaiting their approval)", p.name);
            }
        }
        PartnersCommand::Request { code } => {
            match partners::request_partner(db, &user, code.trim())? {
                partners::RequestOutcome::Requested => println!("Request sent!"),
                partners::RequestOutcome::Approved => {
                    println!("They had already asked, you are partners now!")
                }
            }
        }
        PartnersCommand::Approve { name } => {
            let incoming = db.pending_incoming(&user.id)?;
            let row = find_by_name(&incoming, &name).context("No pending request from that name")?;
            partners::approve_partner(db, &user, &row.id)?;
            println!("Partner approved!");
        }
        PartnersCommand::Remove { name } => {
            let active = db.active_partners(&user.id)?;
            let row = find_by_name(&active, &name).context("No such partner")?;
            partners::remove_active_partner(db, &user, &row.id)?;
            println!("Partner removed!");
        }
        PartnersCommand::Reject { name } => {
            let mut pending = db.pending_incoming(&user.id)?;
            pending.extend(db.pending_outgoing(&user.id)?);
            let row = find_by_name(&pending, &name).context("No pending request with that name")?;
            partners::remove_pending_partner(db, &user, &row.id)?;
            println!("Request removed!");
        }
    }
    Ok(())
}

fn print_report(report: &CopyReport) {
    if report.dry_run {
        println!("(dry run: nothing was changed)");
    }
    for name in &report.created_categories {
        println!("  created category \"{name}\"");
    }
    for recipe in &report.recipes {
        let label = recipe.name.as_deref().unwrap_or(recipe.uid.as_str());
        match recipe.action {
            CopyAction::AlreadyPresent => println!("  {label}: already synced"),
            CopyAction::Trashed => println!("  {label}: in trash, skipped"),
            CopyAction::Copied { photos } => println!("  {label}: copied ({photos} photos)"),
        }
    }
    println!(
        "{} recipes copied{}",
        report.copied_count(),
        if report.dry_run { " (dry run)" } else { "" }
    );
}

fn require_user(db: &Database, email: Option<&str>) -> anyhow::Result<UserRow> {
    let email = email
        .map(str::to_string)
        .or_else(|| std::env::var("LARDER_EMAIL").ok())
        .context("Pass --user or set LARDER_EMAIL")?;
    db.get_user_by_email(&email.to_lowercase())?
        .context("You need to login first")
}

fn find_by_name<'a>(rows: &'a [PartnerRow], name: &str) -> Option<&'a PartnerRow> {
    rows.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

fn prompt(label: &str) -> anyhow::Result<String> {
    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
