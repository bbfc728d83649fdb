use comfy_table::modifiers::{UTF8_ROUND_CORNERS, UTF8_SOLID_INNER_BORDERS};
use comfy_table::presets::{UTF8_FULL, UTF8_FULL_CONDENSED};
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crt_cli::types::RunResult;
use crt_model::ResourceKind;

pub fn print_summary(result: &RunResult) {
    let summary = &result.summary;
    println!("Batch: {}", summary.batch);
    println!("Output: {} ({} lines)", result.output.display(), result.lines_written);

    let mut files = Table::new();
    files.set_header(vec![
        header_cell("File"),
        header_cell("Schema"),
        header_cell("Version"),
        header_cell("Rows"),
        header_cell("Row errors"),
    ]);
    apply_summary_table_style(&mut files);
    align_column(&mut files, 3, CellAlignment::Right);
    align_column(&mut files, 4, CellAlignment::Right);
    for report in &result.files {
        let name = report
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");
        files.add_row(vec![
            Cell::new(name),
            Cell::new(&report.schema),
            Cell::new(&report.version),
            Cell::new(report.rows),
            count_cell(report.row_errors, Color::Red),
        ]);
    }
    for skipped in &result.skipped_files {
        let name = skipped
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");
        files.add_row(vec![
            Cell::new(name),
            dim_cell("-"),
            Cell::new("skipped").fg(Color::Yellow),
            dim_cell("-"),
            dim_cell("-"),
        ]);
    }
    println!("{files}");

    let mut totals = Table::new();
    totals.set_header(vec![
        header_cell("Items"),
        header_cell("Filed"),
        header_cell("Deleted"),
        header_cell("Skipped"),
        header_cell("Resolved"),
        header_cell("Patched"),
        header_cell("Leftover"),
        header_cell("Broken"),
    ]);
    apply_table_style(&mut totals);
    for index in 0..8 {
        align_column(&mut totals, index, CellAlignment::Right);
    }
    totals.add_row(vec![
        Cell::new(summary.items),
        Cell::new(summary.filed).add_attribute(Attribute::Bold),
        Cell::new(summary.deleted),
        count_cell(summary.skipped, Color::Yellow),
        Cell::new(summary.resolved),
        Cell::new(summary.patched),
        count_cell(summary.leftover, Color::Yellow),
        count_cell(summary.broken, Color::Red),
    ]);
    println!("{totals}");

    if !result.skipped_files.is_empty() {
        eprintln!("Skipped files:");
        for skipped in &result.skipped_files {
            eprintln!("- {}: {}", skipped.path.display(), skipped.reason);
        }
    }
}

pub fn print_kinds(kinds: &[(ResourceKind, bool)]) {
    let mut table = Table::new();
    table.set_header(vec![header_cell("Kind"), header_cell("Administrative")]);
    apply_table_style(&mut table);
    align_column(&mut table, 1, CellAlignment::Center);
    for (kind, administrative) in kinds {
        let flag = if *administrative {
            Cell::new("✓").fg(Color::Green)
        } else {
            dim_cell("-")
        };
        table.add_row(vec![Cell::new(kind.as_str()), flag]);
    }
    println!("{table}");
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

fn dim_cell<T: ToString>(value: T) -> Cell {
    Cell::new(value.to_string()).fg(Color::DarkGrey)
}

fn count_cell(count: usize, color: Color) -> Cell {
    if count > 0 {
        Cell::new(count).fg(color).add_attribute(Attribute::Bold)
    } else {
        dim_cell(count)
    }
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(120);
}

fn apply_summary_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .apply_modifier(UTF8_SOLID_INNER_BORDERS)
        .set_content_arrangement(ContentArrangement::DynamicFullWidth)
        .set_width(140);
}

fn align_column(table: &mut Table, index: usize, alignment: CellAlignment) {
    if let Some(column) = table.column_mut(index) {
        column.set_cell_alignment(alignment);
    }
}
