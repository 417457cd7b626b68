//! HTML table rendering for records.
//!
//! Output is deterministic: the same records and columns always produce the
//! same markup, with no generated ids.
//!
//! ```text
//! {"a": 1, "b": {"c": 2, "d": null}}
//!
//! <tr><td>1</td><td><details><summary>b</summary><ul>
//!   <li><span class="key">b.c</span>2</li>
//!   <li><span class="key">b.d</span></li>
//! </ul></details></td></tr>
//! ```

use crate::record::{Columns, Record, Value};

/// Full table, header taken from the first record.
pub fn render_table(records: &[Record]) -> String {
    render_table_with(&Columns::from_first(records), records)
}

/// Full table with an explicit column set.
pub fn render_table_with(columns: &Columns, records: &[Record]) -> String {
    let mut out = String::from("<table>");
    out.push_str(&render_header(columns));
    out.push_str("<tbody>");
    out.push_str(&render_rows(columns, records));
    out.push_str("</tbody></table>");
    out
}

/// `<thead>` row for `columns`.
pub fn render_header(columns: &Columns) -> String {
    let mut out = String::from("<thead><tr>");
    for name in columns.iter() {
        out.push_str("<th>");
        push_escaped(&mut out, name);
        out.push_str("</th>");
    }
    out.push_str("</tr></thead>");
    out
}

/// Rows only, projected onto `columns`. Used for fragments appended to an
/// already rendered table.
pub fn render_rows(columns: &Columns, records: &[Record]) -> String {
    let mut out = String::new();
    for record in records {
        push_row(&mut out, columns, record);
    }
    out
}

fn push_row(out: &mut String, columns: &Columns, record: &Record) {
    out.push_str("<tr>");
    for name in columns.iter() {
        out.push_str("<td>");
        if let Some(value) = record.get(name) {
            push_value(out, name, value);
        }
        out.push_str("</td>");
    }
    out.push_str("</tr>");
}

fn push_value(out: &mut String, key: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => push_escaped(out, s),
        Value::Object(map) => push_nested(out, key, map),
        // Numbers and booleans print as-is. Arrays have no table shape and
        // fall back to their compact JSON text.
        other => push_escaped(out, &other.to_string()),
    }
}

fn push_nested(out: &mut String, key: &str, map: &Record) {
    out.push_str("<details><summary>");
    push_escaped(out, key);
    out.push_str("</summary><ul>");
    for (child, value) in map {
        out.push_str("<li><span class=\"key\">");
        push_escaped(out, key);
        out.push('.');
        push_escaped(out, child);
        out.push_str("</span>");
        push_value(out, child, value);
        out.push_str("</li>");
    }
    out.push_str("</ul></details>");
}

/// Escape text for use in element content and double-quoted attributes.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    push_escaped(&mut out, s);
    out
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}
