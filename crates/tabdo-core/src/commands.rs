use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::{DataStore, KvStorage};
use crate::datetime::{ensure_not_past, parse_due_date, today};
use crate::render::Renderer;
use crate::store::TaskStore;
use crate::task::{CategoryFilter, validate_text};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "list",
        "done",
        "toggle",
        "edit",
        "delete",
        "categories",
        "theme",
        "export",
        "_commands",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch<S: KvStorage>(
    store: &mut DataStore<S>,
    cfg: &Config,
    renderer: &Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let today = today();
    let command = inv.command.as_str();

    debug!(command, args = ?inv.command_args, "dispatching command");

    match command {
        "add" => cmd_add(store, cfg, &inv.command_args, today),
        "list" => cmd_list(store, renderer, &inv.command_args, today),
        "done" | "toggle" => cmd_toggle(store, &inv.command_args),
        "edit" => cmd_edit(store, &inv.command_args, today),
        "delete" => cmd_delete(store, cfg, &inv.command_args, io::stdin().is_terminal()),
        "categories" => cmd_categories(store, renderer),
        "theme" => cmd_theme(store, &inv.command_args),
        "export" => cmd_export(store),
        "_commands" => cmd_commands(),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

#[instrument(skip(store, cfg, args, today))]
fn cmd_add<S: KvStorage>(
    store: &mut DataStore<S>,
    cfg: &Config,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command add");

    let (text, mods) = parse_desc_and_mods(args, today)?;
    let category = match mods.category {
        Some(category) => category,
        None => cfg.default_category()?,
    };
    let due_date = mods.due.flatten();

    let task = store.add_task(&text, category, due_date)?;
    debug!(id = %task.id, count = store.tasks().len(), "task added");

    println!("\"{}\" added to {}", task.text, task.category);
    report_unsaved(store);
    Ok(())
}

#[instrument(skip(store, renderer, args, today))]
fn cmd_list<S: KvStorage>(
    store: &mut DataStore<S>,
    renderer: &Renderer,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command list");

    let filter = match args {
        [] => CategoryFilter::All,
        [one] => one.parse::<CategoryFilter>()?,
        _ => return Err(anyhow!("list takes at most one category")),
    };
    store.set_active_category(filter);

    let tasks = store.tasks();
    let rows: Vec<(usize, _)> = tasks
        .visible()
        .into_iter()
        .map(|task| (position_of(tasks, &task.id), task))
        .collect();

    if rows.is_empty() {
        match filter {
            CategoryFilter::All => println!("No tasks yet."),
            CategoryFilter::Only(category) => println!("No tasks in {category}."),
        }
        return Ok(());
    }

    renderer.print_task_table(&rows, today)
}

#[instrument(skip(store, args))]
fn cmd_toggle<S: KvStorage>(store: &mut DataStore<S>, args: &[String]) -> anyhow::Result<()> {
    info!("command toggle");

    let id = resolve_single(store.tasks(), args, "done")?;
    match store.toggle_complete(&id) {
        Some(true) => println!("Task completed."),
        Some(false) => println!("Task marked incomplete."),
        None => println!("No matching task."),
    }
    report_unsaved(store);
    Ok(())
}

#[instrument(skip(store, args, today))]
fn cmd_edit<S: KvStorage>(store: &mut DataStore<S>, args: &[String], today: NaiveDate) -> anyhow::Result<()> {
    info!("command edit");

    match apply_edit(store, args, today)? {
        EditOutcome::Updated => println!("Task updated."),
        EditOutcome::Cancelled(reason) => eprintln!("{reason}; edit cancelled."),
    }
    report_unsaved(store);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EditOutcome {
    Updated,
    Cancelled(String),
}

/// Runs one edit session. A bare `due:` edit keeps the current text and a
/// text-only edit keeps the current due date.
fn apply_edit<S: KvStorage>(
    store: &mut DataStore<S>,
    args: &[String],
    today: NaiveDate,
) -> anyhow::Result<EditOutcome> {
    let (selector, rest) = args
        .split_first()
        .ok_or_else(|| anyhow!("edit requires a task number or id"))?;
    let id = resolve_selector(store.tasks(), selector)?;

    let (text, mods) = parse_desc_and_mods(rest, today)?;
    if mods.category.is_some() {
        return Err(anyhow!("edit cannot change a task's category"));
    }

    let (current_text, current_due) = store
        .tasks()
        .get(&id)
        .map(|task| (task.text.clone(), task.due_date))
        .unwrap_or_default();
    let due_date = mods.due.unwrap_or(current_due);
    let text = if text.trim().is_empty() && mods.due.is_some() {
        current_text
    } else {
        text
    };

    store.start_edit(&id);
    if store.save_edit(&id, &text, due_date) {
        return Ok(EditOutcome::Updated);
    }

    let reason = validate_text(&text)
        .err()
        .map(|err| err.to_string())
        .unwrap_or_else(|| "Task text cannot be empty".to_string());
    warn!(id = %id, reason = %reason, "edit cancelled");
    Ok(EditOutcome::Cancelled(reason))
}

#[instrument(skip(store, cfg, args))]
fn cmd_delete<S: KvStorage>(
    store: &mut DataStore<S>,
    cfg: &Config,
    args: &[String],
    interactive: bool,
) -> anyhow::Result<()> {
    info!("command delete");

    let id = resolve_single(store.tasks(), args, "delete")?;
    let text = store
        .tasks()
        .get(&id)
        .map(|task| task.text.clone())
        .unwrap_or_default();

    if needs_confirmation(cfg, interactive) && !confirm_delete(&text)? {
        println!("Deletion cancelled.");
        return Ok(());
    }

    if store.delete_task(&id) {
        println!("Task deleted.");
    } else {
        println!("No matching task.");
    }
    report_unsaved(store);
    Ok(())
}

/// The prompt only appears when someone can answer it.
fn needs_confirmation(cfg: &Config, interactive: bool) -> bool {
    interactive && cfg.get_bool("confirmation").unwrap_or(true)
}

fn confirm_delete(text: &str) -> anyhow::Result<bool> {
    let mut out = io::stdout().lock();
    write!(
        out,
        "Delete \"{text}\"? This action cannot be undone. (yes/no) "
    )?;
    out.flush()?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("failed reading confirmation")?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

#[instrument(skip(store, renderer))]
fn cmd_categories<S: KvStorage>(store: &mut DataStore<S>, renderer: &Renderer) -> anyhow::Result<()> {
    info!("command categories");
    renderer.print_category_counts(&store.tasks().category_counts())
}

#[instrument(skip(store, args))]
fn cmd_theme<S: KvStorage>(store: &mut DataStore<S>, args: &[String]) -> anyhow::Result<()> {
    info!("command theme");

    let enabled = match args.first().map(|arg| arg.to_ascii_lowercase()) {
        None => store.dark_mode(),
        Some(arg) => {
            let enabled = match arg.as_str() {
                "dark" | "on" => true,
                "light" | "off" => false,
                "toggle" => !store.dark_mode(),
                other => return Err(anyhow!("unknown theme: {other} (expected dark, light or toggle)")),
            };
            store.set_dark_mode(enabled);
            report_unsaved(store);
            enabled
        }
    };

    println!("{}", if enabled { "dark" } else { "light" });
    Ok(())
}

#[instrument(skip(store))]
fn cmd_export<S: KvStorage>(store: &mut DataStore<S>) -> anyhow::Result<()> {
    info!("command export");
    println!("{}", store.export()?);
    Ok(())
}

fn cmd_commands() -> anyhow::Result<()> {
    for command in known_command_names() {
        println!("{command}");
    }
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    let mut entries: Vec<_> = cfg.iter().collect();
    entries.sort();
    for (k, v) in entries {
        println!("{k}={v}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Commands:
  add [cat:CATEGORY] [due:DATE] TEXT   add a task
  list [all|work|personal|shopping]    show tasks (default)
  done|toggle N                        toggle completion
  edit N [due:DATE|due:] TEXT          change text and due date
  delete N                             remove a task
  categories                           task counts per category
  theme [dark|light|toggle]            show or change the theme
  export                               print the stored task list
N is a position from `list` or an id prefix."
    );
    Ok(())
}

fn report_unsaved<S: KvStorage>(store: &DataStore<S>) {
    if !store.last_save_ok() {
        eprintln!("warning: changes could not be saved; they will be lost on exit");
    }
}

fn position_of(tasks: &TaskStore, id: &str) -> usize {
    tasks
        .tasks()
        .iter()
        .position(|task| task.id == id)
        .map(|idx| idx + 1)
        .unwrap_or(0)
}

fn resolve_single(tasks: &TaskStore, args: &[String], command: &str) -> anyhow::Result<String> {
    match args {
        [one] => resolve_selector(tasks, one),
        [] => Err(anyhow!("{command} requires a task number or id")),
        _ => Err(anyhow!("{command} takes exactly one task number or id")),
    }
}

/// Maps a 1-based list position or an id prefix to a task id.
fn resolve_selector(tasks: &TaskStore, selector: &str) -> anyhow::Result<String> {
    if let Ok(position) = selector.parse::<usize>()
        && let Some(task) = position.checked_sub(1).and_then(|idx| tasks.tasks().get(idx))
    {
        return Ok(task.id.clone());
    }

    tasks
        .find_by_prefix(selector)
        .map(|task| task.id.clone())
        .ok_or_else(|| anyhow!("no task matches '{selector}'"))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Mods {
    category: Option<CategoryFilter>,
    /// `Some(None)` clears the due date.
    due: Option<Option<NaiveDate>>,
}

#[instrument(skip(args, today))]
fn parse_desc_and_mods(args: &[String], today: NaiveDate) -> anyhow::Result<(String, Mods)> {
    let mut desc_parts = Vec::new();
    let mut mods = Mods::default();

    let mut literal = false;
    for arg in args {
        if arg == "--" && !literal {
            literal = true;
            continue;
        }

        if !literal && parse_one_mod(arg, today, &mut mods)? {
            continue;
        }

        desc_parts.push(arg.as_str());
    }

    Ok((desc_parts.join(" "), mods))
}

fn parse_one_mod(tok: &str, today: NaiveDate, mods: &mut Mods) -> anyhow::Result<bool> {
    let Some((key, value)) = tok.split_once(':') else {
        return Ok(false);
    };

    match key.to_ascii_lowercase().as_str() {
        "cat" | "category" => {
            mods.category = Some(value.parse()?);
            Ok(true)
        }
        "due" => {
            mods.due = Some(if value.trim().is_empty() {
                None
            } else {
                let date = parse_due_date(value, today)?;
                Some(ensure_not_past(date, today)?)
            });
            Ok(true)
        }
        _ => Ok(false),
    }
}
