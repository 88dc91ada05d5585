use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_long_date;
use crate::store::CategoryCount;
use crate::task::{Category, Task};

/// ANSI codes for one theme.
#[derive(Debug, Clone, Copy)]
struct Palette {
    header: &'static str,
    position: &'static str,
    overdue: &'static str,
    done: &'static str,
    work: &'static str,
    personal: &'static str,
    shopping: &'static str,
}

const LIGHT: Palette = Palette {
    header: "1",
    position: "34",
    overdue: "31",
    done: "2;9",
    work: "31",
    personal: "32",
    shopping: "33",
};

const DARK: Palette = Palette {
    header: "1;97",
    position: "96",
    overdue: "91",
    done: "90;9",
    work: "91",
    personal: "92",
    shopping: "93",
};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    palette: Palette,
}

impl Renderer {
    pub fn new(cfg: &Config, dark_mode: bool) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            palette: if dark_mode { DARK } else { LIGHT },
        })
    }

    #[tracing::instrument(skip(self, rows, today))]
    pub fn print_task_table(&self, rows: &[(usize, Task)], today: NaiveDate) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        self.write_task_table(out, rows, today)
    }

    /// Writes the list view. Each row carries the task's 1-based position
    /// in the full collection.
    pub fn write_task_table<W: Write>(
        &self,
        writer: W,
        rows: &[(usize, Task)],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let headers = ["#", "ID", "Done", "Category", "Due", "Task"]
            .iter()
            .map(|h| self.paint(h, self.palette.header))
            .collect::<Vec<_>>();

        let mut body = Vec::with_capacity(rows.len());
        for (position, task) in rows {
            let due = task.due_date.map(format_long_date).unwrap_or_default();
            let due = if task.is_overdue(today) {
                self.paint(&due, self.palette.overdue)
            } else {
                due
            };

            let text = if task.completed {
                self.paint(&task.text, self.palette.done)
            } else {
                task.text.clone()
            };

            body.push(vec![
                self.paint(&position.to_string(), self.palette.position),
                task.short_id().to_string(),
                if task.completed { "[x]" } else { "[ ]" }.to_string(),
                self.paint_category(task.category),
                due,
                text,
            ]);
        }

        write_table(writer, headers, body)
    }

    #[tracing::instrument(skip(self, counts))]
    pub fn print_category_counts(&self, counts: &[CategoryCount]) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        self.write_category_counts(out, counts)
    }

    pub fn write_category_counts<W: Write>(&self, writer: W, counts: &[CategoryCount]) -> anyhow::Result<()> {
        let headers = ["Category", "Tasks", "Done"]
            .iter()
            .map(|h| self.paint(h, self.palette.header))
            .collect::<Vec<_>>();
        let rows = counts
            .iter()
            .map(|count| {
                vec![
                    count.filter.to_string(),
                    count.total.to_string(),
                    count.completed.to_string(),
                ]
            })
            .collect();
        write_table(writer, headers, rows)
    }

    fn paint_category(&self, category: Category) -> String {
        let code = match category {
            Category::Work => self.palette.work,
            Category::Personal => self.palette.personal,
            Category::Shopping => self.palette.shopping,
        };
        self.paint(category.as_str(), code)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || text.is_empty() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(header).as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    write_row(&mut writer, &headers, &widths)?;

    let rule = widths
        .iter()
        .map(|width| "-".repeat(*width))
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(writer, "{rule}")?;

    for row in &rows {
        write_row(&mut writer, row, &widths)?;
    }

    Ok(())
}

fn write_row<W: Write>(writer: &mut W, cells: &[String], widths: &[usize]) -> anyhow::Result<()> {
    let mut line = String::new();
    for (idx, cell) in cells.iter().enumerate() {
        if idx > 0 {
            line.push(' ');
        }
        let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
        line.push_str(cell);
        if idx + 1 < cells.len() {
            line.push_str(&" ".repeat(widths[idx].saturating_sub(visible_width)));
        }
    }
    writeln!(writer, "{line}")?;
    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
