//! Command implementations for the tabtrail CLI.
//!
//! Main commands:
//! - login/logout: manage the collector bearer token
//! - sync: drain the local queue once, with a spinner
//! - host/daemon: long-running modes driven by the scheduler

use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::time::Duration;
use tabtrail::event::now_millis;
use tabtrail::messaging::Host;
use tabtrail::{Agent, Config, EventRecord, EventType, SyncOutcome};

/// Prompt for the token without echoing it
fn prompt_token() -> Result<String> {
    print!("Collector token: ");
    io::stdout().flush()?;

    let token = rpassword::read_password().context("Cannot read token")?;
    if token.trim().is_empty() {
        bail!("Token cannot be empty");
    }
    Ok(token)
}

pub fn login(config: &Config, token: Option<String>, email: Option<String>) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => prompt_token()?,
    };

    let agent = Agent::open(config)?;
    agent.login(&token).context("Cannot store token")?;
    agent
        .set_user_email(email.as_deref())
        .context("Cannot store email")?;

    match &email {
        Some(email) => println!("{} Logged in as {}", "✓".green(), email.bold()),
        None => println!("{} Logged in", "✓".green()),
    }
    println!(
        "Run {} to deliver queued events.",
        "tabtrail sync".cyan()
    );
    Ok(())
}

pub fn logout(config: &Config) -> Result<()> {
    let agent = Agent::open(config)?;
    agent.logout()?;
    println!("{} Logged out", "✓".green());
    Ok(())
}

pub fn status(config: &Config) -> Result<()> {
    let agent = Agent::open(config)?;
    let status = agent.status()?;

    println!("{}", "tabtrail Status".bold().cyan());
    println!();

    let auth = if status.authenticated {
        "Authenticated".green().to_string()
    } else {
        "Not authenticated".red().to_string()
    };
    println!("Auth:      {}", auth);
    if let Some(email) = &status.user_email {
        println!("Account:   {}", email);
    }
    println!("Collector: {}", config.collector.base_url);
    println!("Database:  {}", config.database_path().display());
    println!(
        "Pending:   {}",
        status.pending_events.to_string().cyan()
    );
    for (event_type, count) in agent.counts_by_type()? {
        println!("  - {}: {}", event_type, count);
    }

    match status.last_sync {
        Some(ts) => println!(
            "Last sync: {} ({})",
            format_timestamp(ts),
            format_time_ago(ts, now_millis()).dimmed()
        ),
        None => println!("Last sync: {}", "Never".yellow()),
    }

    if !status.authenticated {
        println!();
        println!("Run {} to set up.", "tabtrail login".cyan());
    }
    Ok(())
}

pub fn sync(config: &Config) -> Result<()> {
    let agent = Agent::open(config)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .context("Invalid spinner template")?,
    );
    spinner.set_message(format!(
        "Syncing {} pending events...",
        agent.pending_count()?
    ));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let outcome = agent.trigger_manual_sync();
    spinner.finish_and_clear();

    match &outcome {
        SyncOutcome::Synced { synced } => {
            println!("{} {} ({} events)", "✓".green(), outcome.message(), synced);
        }
        SyncOutcome::AlreadyRunning => {
            println!("{} {}", "!".yellow(), outcome.message());
        }
        SyncOutcome::Failed { message, synced, .. } => {
            println!("{} Sync failed: {}", "✗".red(), message);
            if *synced > 0 {
                println!("  {} events were delivered before the failure", synced);
            }
            if outcome.requires_auth() {
                println!("Run {} to log in again.", "tabtrail login".cyan());
            }
            bail!("Sync failed");
        }
    }
    Ok(())
}

pub fn events(
    config: &Config,
    since: Option<i64>,
    until: Option<i64>,
    event_type: Option<String>,
) -> Result<()> {
    let agent = Agent::open(config)?;
    let start = since.unwrap_or(0);
    let end = until.unwrap_or(i64::MAX);

    let records: Vec<EventRecord> = match event_type {
        Some(event_type) => agent
            .events_by_type(&EventType::parse(&event_type))?
            .into_iter()
            .filter(|record| record.timestamp >= start && record.timestamp <= end)
            .collect(),
        None => agent.events_in_range(start, end)?,
    };

    if records.is_empty() {
        println!("{}", "No events found.".yellow());
        return Ok(());
    }

    for record in &records {
        println!(
            "{}  {}  {}",
            format_timestamp(record.timestamp).dimmed(),
            record.event_type.to_string().cyan(),
            serde_json::Value::Object(record.payload.clone())
        );
    }
    println!();
    println!("{} events", records.len().to_string().bold());
    Ok(())
}

pub fn wipe(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        bail!("Refusing to wipe local data without --yes");
    }

    let agent = Agent::open(config)?;
    let removed = agent.wipe_local_data()?;
    println!(
        "{} Local data wiped ({} events removed)",
        "✓".green(),
        removed
    );
    Ok(())
}

/// Native-messaging host. Nothing may be printed to stdout here.
pub fn host(config: &Config) -> Result<()> {
    let agent = Agent::open(config)?;
    agent.start_scheduler()?;

    let result = Host::new(&agent).serve(io::stdin().lock(), io::stdout());
    agent.stop_scheduler();
    result.context("Native-messaging host failed")
}

pub fn daemon(config: &Config) -> Result<()> {
    let agent = Agent::open(config)?;
    println!(
        "{} Scheduler running (every {}s). Press Ctrl+C to stop.",
        "✓".green(),
        config.sync.interval_secs
    );
    agent.start_scheduler()?;
    agent.wait_scheduler();
    Ok(())
}

fn format_timestamp(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => millis.to_string(),
    }
}

/// Human-readable distance between two wall-clock ms values
fn format_time_ago(then: i64, now: i64) -> String {
    let secs = (now - then).max(0) / 1000;
    match secs {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time_ago() {
        let now = 1_700_000_000_000;
        assert_eq!(format_time_ago(now, now), "just now");
        assert_eq!(format_time_ago(now - 59_000, now), "just now");
        assert_eq!(format_time_ago(now - 5 * 60_000, now), "5m ago");
        assert_eq!(format_time_ago(now - 3 * 3_600_000, now), "3h ago");
        assert_eq!(format_time_ago(now - 2 * 86_400_000, now), "2d ago");
        // Clock skew never yields a negative distance
        assert_eq!(format_time_ago(now + 10_000, now), "just now");
    }

    #[test]
    fn test_format_timestamp_is_readable() {
        let formatted = format_timestamp(0);
        assert_eq!(formatted.len(), "1970-01-01 00:00:00".len());
    }
}
