use std::ops::Range;

use gateway_core::config::TableMode;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

/// Rewrites markdown tables in `text` per the configured per-channel mode
/// (spec §4.7). `Preserve` is a no-op; `Code` wraps each table in a fenced
/// code block so channels with no table rendering at least get monospace
/// alignment; `Plain` flattens each table to space-joined rows.
pub fn rewrite_tables(text: &str, mode: TableMode) -> String {
    if mode == TableMode::Preserve {
        return text.to_string();
    }

    let ranges = table_ranges(text);
    if ranges.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for range in ranges {
        out.push_str(&text[cursor..range.start]);
        let table_src = &text[range.start..range.end];
        match mode {
            TableMode::Code => {
                out.push_str("```\n");
                out.push_str(table_src.trim_end());
                out.push_str("\n```");
            }
            TableMode::Plain => out.push_str(&flatten_table(table_src)),
            TableMode::Preserve => unreachable!("handled above"),
        }
        cursor = range.end;
    }
    out.push_str(&text[cursor..]);
    out
}

fn table_ranges(text: &str) -> Vec<Range<usize>> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);

    let mut ranges = Vec::new();
    let mut current_start: Option<usize> = None;
    for (event, range) in Parser::new_ext(text, options).into_offset_iter() {
        match event {
            Event::Start(Tag::Table(_)) => current_start = Some(range.start),
            Event::End(TagEnd::Table) => {
                if let Some(start) = current_start.take() {
                    ranges.push(start..range.end);
                }
            }
            _ => {}
        }
    }
    ranges
}

fn flatten_table(table_src: &str) -> String {
    table_src
        .lines()
        .filter(|line| !is_separator_row(line))
        .map(|line| {
            line.trim()
                .trim_start_matches('|')
                .trim_end_matches('|')
                .split('|')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("  ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}
