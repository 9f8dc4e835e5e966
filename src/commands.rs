use chrono::{DateTime, Local, Utc};
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use std::time::Duration;

use crate::config::Config;
use crate::harvest::api_types::{NewTimeEntry, TimeEntryUpdate};
use crate::harvest::cache::HarvestQueryKey;
use crate::harvest::types::{TimeEntry, TimeEntryParams};
use crate::harvest::{CachedHarvestClient, Credentials};
use crate::quickstart::{QuickstartEntry, Quickstarts};
use crate::stack::TimerStack;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Store Harvest credentials for later runs
  Auth {
    access_token: String,
    refresh_token: String,
  },
  /// Start a new timer
  Start {
    project_id: u64,
    task_id: u64,
    #[arg(short, long)]
    notes: Option<String>,
  },
  /// Restart a stopped timer
  Restart { id: u64 },
  /// Stop a timer (the running one if no id is given)
  Stop { id: Option<u64> },
  /// Replace the notes of a timer
  Notes { id: u64, notes: String },
  /// Delete a time entry
  Delete { id: u64 },
  /// Show a single time entry
  Show { id: u64 },
  /// Show the running timer
  Running {
    /// Keep refreshing every SECONDS
    #[arg(short, long, value_name = "SECONDS")]
    watch: Option<u64>,
  },
  /// List today's time entries
  Today,
  /// List projects and tasks you can track time against
  Projects,
  /// Show the authenticated user
  Whoami,
  /// Refresh cached project assignments
  Sync,
  /// Timer templates
  #[command(subcommand)]
  Quickstart(QuickstartCommand),
  /// Recently started timers
  #[command(subcommand)]
  Stack(StackCommand),
  /// Local response cache
  #[command(subcommand)]
  Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum StackCommand {
  /// List timers in the stack, most recent first
  #[command(alias = "l")]
  List,
  /// Restart the timer at INDEX
  #[command(alias = "s")]
  Start { index: usize },
  /// Remove the timer at INDEX from the stack
  #[command(alias = "r")]
  Remove { index: usize },
  /// Empty the stack
  #[command(alias = "c")]
  Clear,
}

#[derive(Subcommand, Debug)]
pub enum QuickstartCommand {
  /// Start a timer from the template NAME
  #[command(alias = "s")]
  Start {
    name: String,
    /// Use these notes instead of the template's
    #[arg(long)]
    notes: Option<String>,
    /// Don't run the template's command
    #[arg(short = 'n', long)]
    no_exec: bool,
  },
  /// Save a template
  #[command(alias = "a")]
  Add {
    name: String,
    project_id: u64,
    task_id: u64,
    #[arg(long)]
    notes: Option<String>,
    /// Shell command to run after the timer starts
    #[arg(long)]
    exec: Option<String>,
  },
  /// Delete a template
  #[command(alias = "r")]
  Remove { name: String },
  /// List templates
  #[command(alias = "l")]
  List,
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
  /// Drop every cached response
  Clear,
}

/// Store credentials. Needs neither config nor a client.
pub fn auth(access_token: String, refresh_token: String) -> Result<()> {
  Config::save_credentials(&Credentials {
    access_token,
    refresh_token,
  })?;
  println!("Credentials saved.");
  Ok(())
}

/// Run a command against the client and timer stack.
pub async fn run(
  command: Command,
  client: &CachedHarvestClient,
  stack: &mut TimerStack,
) -> Result<()> {
  match command {
    Command::Auth {
      access_token,
      refresh_token,
    } => auth(access_token, refresh_token),
    Command::Start {
      project_id,
      task_id,
      notes,
    } => {
      let entry = NewTimeEntry {
        project_id,
        task_id,
        spent_date: Local::now().date_naive(),
        notes,
      };
      let created = client.create_timer(&entry, stack).await?;
      println!("Timer started: {}", describe(&created));
      Ok(())
    }
    Command::Restart { id } => {
      let restarted = client.restart_timer(id, stack).await?;
      println!("Timer restarted: {}", describe(&restarted));
      Ok(())
    }
    Command::Stop { id } => {
      let id = match id {
        Some(id) => id,
        None => client
          .running_timer()
          .await?
          .map(|timer| timer.id)
          .ok_or_else(|| eyre!("No timer is running"))?,
      };
      let stopped = client.stop_timer(id).await?;
      println!("Timer stopped: {}", describe(&stopped));
      Ok(())
    }
    Command::Notes { id, notes } => {
      let update = TimeEntryUpdate {
        notes: Some(notes),
        ..TimeEntryUpdate::default()
      };
      let updated = client.update_timer(id, &update).await?;
      println!("Timer updated: {}", describe(&updated));
      Ok(())
    }
    Command::Delete { id } => {
      client.delete_timer(id, stack).await?;
      println!("Time entry {} deleted.", id);
      Ok(())
    }
    Command::Show { id } => {
      let entry = client.time_entry(id).await?;
      println!("{} {}  {}", entry.id, entry.spent_date, describe(&entry));
      Ok(())
    }
    Command::Running { watch: None } => {
      print_running(client).await?;
      Ok(())
    }
    Command::Running {
      watch: Some(seconds),
    } => watch_running(client, Duration::from_secs(seconds.max(1))).await,
    Command::Today => {
      let params = TimeEntryParams::on(Local::now().date_naive());
      let entries = client.time_entries(&params).await?;
      if entries.is_empty() {
        println!("No time entries today.");
      }
      for entry in &entries {
        let marker = if entry.is_running { "*" } else { " " };
        println!("{} {:>8}  {}", marker, entry.id, describe(entry));
      }
      Ok(())
    }
    Command::Projects => {
      for assignment in client.projects().await?.iter().filter(|a| a.is_active) {
        println!("{:>8}  {}", assignment.project.id, assignment.project.name);
        for task in &assignment.task_assignments {
          println!("    {:>8}  {}", task.task.id, task.task.name);
        }
      }
      Ok(())
    }
    Command::Whoami => {
      let user = client.me().await?;
      println!("{} {} <{}>", user.first_name, user.last_name, user.email);
      Ok(())
    }
    Command::Sync => {
      let assignments = client.sync_projects().await?;
      println!("Synced {} project assignments.", assignments.len());
      Ok(())
    }
    Command::Quickstart(command) => {
      let mut quickstarts = Quickstarts::open_default()?;
      run_quickstart(command, client, stack, &mut quickstarts).await
    }
    Command::Stack(command) => run_stack(command, client, stack).await,
    Command::Cache(CacheCommand::Clear) => {
      client.clear_cache()?;
      println!("Cache cleared.");
      Ok(())
    }
  }
}

async fn run_stack(
  command: StackCommand,
  client: &CachedHarvestClient,
  stack: &mut TimerStack,
) -> Result<()> {
  match command {
    StackCommand::List => {
      if stack.is_empty() {
        println!("The stack is empty.");
      }
      for (index, entry) in stack.iter().enumerate() {
        println!(
          "{:>3}  {} - {}  {}  ({})",
          index,
          entry.project,
          entry.task,
          entry.notes.as_deref().unwrap_or(""),
          format_hours(entry.time / 3600.0)
        );
      }
    }
    StackCommand::Start { index } => {
      let id = stack.get(index)?.id;
      let restarted = client.restart_timer(id, stack).await?;
      println!("Timer started: {}", describe(&restarted));
    }
    StackCommand::Remove { index } => {
      stack.pop(index)?;
      println!("Removed entry from stack.");
    }
    StackCommand::Clear => {
      stack.clear();
      println!("Stack cleared.");
    }
  }
  Ok(())
}

async fn run_quickstart(
  command: QuickstartCommand,
  client: &CachedHarvestClient,
  stack: &mut TimerStack,
  quickstarts: &mut Quickstarts,
) -> Result<()> {
  match command {
    QuickstartCommand::Start {
      name,
      notes,
      no_exec,
    } => {
      let template = quickstarts.get(&name)?.clone();
      let entry = template.to_new_entry(Local::now().date_naive(), notes);
      let created = client.create_timer(&entry, stack).await?;
      println!("Timer started: {}", describe(&created));

      if let Some(exec) = template.exec.filter(|_| !no_exec) {
        println!("$ {}", exec);
        let status = tokio::process::Command::new("sh")
          .arg("-c")
          .arg(&exec)
          .status()
          .await?;
        if !status.success() {
          return Err(eyre!("`{}` failed with {}", exec, status));
        }
      }
    }
    QuickstartCommand::Add {
      name,
      project_id,
      task_id,
      notes,
      exec,
    } => {
      quickstarts.insert(
        name.clone(),
        QuickstartEntry {
          project: project_id,
          task: task_id,
          notes,
          exec,
        },
      );
      quickstarts.save()?;
      println!("Saved quickstart {}.", name);
    }
    QuickstartCommand::Remove { name } => {
      quickstarts.remove(&name)?;
      quickstarts.save()?;
      println!("Removed quickstart {}.", name);
    }
    QuickstartCommand::List => {
      if quickstarts.is_empty() {
        println!("No quickstart entries.");
      }
      for (name, entry) in quickstarts.iter() {
        println!(
          "{:<16} project {} task {}  {}",
          name,
          entry.project,
          entry.task,
          entry.notes.as_deref().unwrap_or("")
        );
      }
    }
  }
  Ok(())
}

async fn print_running(client: &CachedHarvestClient) -> Result<()> {
  let timer = client.running_timer_live().await?;
  let synced = client
    .cache()
    .updated_at(&HarvestQueryKey::Running.cache_key())?;
  println!("{}", running_line(timer.as_ref(), synced));
  Ok(())
}

/// Redraw the running timer until the process is killed.
async fn watch_running(client: &CachedHarvestClient, interval: Duration) -> Result<()> {
  let mut stdout = std::io::stdout();
  loop {
    execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
    print_running(client).await?;
    tokio::time::sleep(interval).await;
  }
}

fn running_line(timer: Option<&TimeEntry>, synced: Option<DateTime<Utc>>) -> String {
  let mut line = match timer {
    Some(timer) if timer.is_running => describe(timer),
    _ => "No timer running".to_string(),
  };
  if let Some(synced) = synced {
    line.push_str(&format!(
      "  [synced {}]",
      synced.with_timezone(&Local).format("%H:%M")
    ));
  }
  line
}

/// One-line summary of a time entry.
pub fn describe(entry: &TimeEntry) -> String {
  let mut line = format!(
    "{} - {} ({})",
    entry.project.name,
    entry.task.name,
    format_hours(entry.hours)
  );
  if let Some(notes) = entry.notes.as_deref().filter(|n| !n.is_empty()) {
    line.push_str(": ");
    line.push_str(notes);
  }
  line
}

/// Format decimal hours as H:MM.
pub fn format_hours(hours: f64) -> String {
  let minutes = (hours.max(0.0) * 60.0).round() as u64;
  format!("{}:{:02}", minutes / 60, minutes % 60)
}
