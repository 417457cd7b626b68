//! Embedded HTML pages and the live client script.

use jsonl_tail_core::{Columns, TailSession, escape_html, render_table_with};
use serde::Serialize;

use crate::reader::Snapshot;

/// Page shell. `{html}` is replaced with the body markup.
pub const LAYOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>jsonl-tail</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 1rem; color: #333; font-size: 14px; }
        h1 { font-size: 1.1rem; font-weight: 600; }
        form { display: flex; gap: 0.5rem; margin-bottom: 1rem; }
        input[type=text] { flex: 1; padding: 0.4rem; font-family: ui-monospace, monospace; }
        table { border-collapse: collapse; width: 100%; }
        th, td { border: 1px solid #e0e0e0; padding: 0.3rem 0.5rem; text-align: left; vertical-align: top; }
        th { background: #f5f5f5; position: sticky; top: 0; }
        td { font-family: ui-monospace, monospace; font-size: 12px; }
        details ul { margin: 0.2rem 0 0 0; padding-left: 1rem; list-style: none; }
        .key { color: #666; margin-right: 0.5rem; }
        .meta { color: #666; font-size: 12px; margin-bottom: 0.5rem; }
        .error { color: #991b1b; }
        #live-status.closed { color: #991b1b; }
    </style>
</head>
<body>
{html}
</body>
</html>
"#;

const FORM: &str = r#"<h1>jsonl-tail</h1>
<form method="post" action="/">
    <input type="text" name="file_or_folder" placeholder="/path/to/file.jsonl" autofocus>
    <button type="submit">Open</button>
</form>"#;

const CLIENT_JS: &str = r#"<script>
(function () {
    var session = JSON.parse(document.getElementById('tail-session').textContent);
    var table = document.getElementById('rows');
    var status = document.getElementById('live-status');
    var host = location.hostname || '127.0.0.1';
    var ws = new WebSocket('ws://' + host + ':' + session.ws_port);

    ws.onopen = function () {
        status.textContent = 'live';
        ws.send(JSON.stringify({
            jsonrpc: '2.0',
            id: 1,
            method: 'tail',
            params: { path: session.path, byte_offset: session.byte_offset, columns: session.columns }
        }));
    };

    ws.onmessage = function (ev) {
        var msg = JSON.parse(ev.data);
        if (msg.error) {
            status.textContent = 'error: ' + msg.error.message;
            status.className = 'closed';
            return;
        }
        if (msg.method === 'rows') {
            var p = msg.params;
            if (p.header) {
                table.tHead.outerHTML = p.header;
            }
            var body = table.tBodies[0];
            if (p.replace) {
                body.innerHTML = p.html;
            } else {
                body.insertAdjacentHTML('beforeend', p.html);
            }
            session.byte_offset = p.byte_offset;
        } else if (msg.method === 'closed') {
            status.textContent = 'closed: ' + msg.params.reason;
            status.className = 'closed';
        }
    };

    ws.onclose = function () {
        if (status.className !== 'closed') {
            status.textContent = 'disconnected';
            status.className = 'closed';
        }
    };
})();
</script>"#;

pub fn layout(body: &str) -> String {
    LAYOUT.replace("{html}", body)
}

pub fn form_page() -> String {
    layout(FORM)
}

pub fn error_page(message: &str) -> String {
    layout(&format!(
        "{FORM}\n<p class=\"error\">{}</p>",
        escape_html(message)
    ))
}

/// Session handed to the client script: `{path, byte_offset, columns, ws_port}`.
#[derive(Debug, Serialize)]
struct PageSession<'a> {
    #[serde(flatten)]
    session: &'a TailSession,
    columns: &'a Columns,
    ws_port: u16,
}

/// Full table for a freshly read file, wired to the live channel on `ws_port`.
pub fn table_page(snapshot: &Snapshot, ws_port: u16) -> Result<String, serde_json::Error> {
    let session = PageSession {
        session: &snapshot.session,
        columns: &snapshot.columns,
        ws_port,
    };
    // `<` is escaped so the payload can never close its script element.
    let session_json = serde_json::to_string(&session)?.replace('<', "\\u003c");
    let table = render_table_with(&snapshot.columns, &snapshot.decoded.records)
        .replacen("<table>", "<table id=\"rows\">", 1);

    let mut body = String::from(FORM);
    body.push_str(&format!(
        "\n<div class=\"meta\">{path} &middot; {records} rows{malformed} &middot; <span id=\"live-status\">connecting</span></div>\n",
        path = escape_html(&snapshot.session.path().display().to_string()),
        records = snapshot.decoded.records.len(),
        malformed = malformed_note(snapshot.decoded.malformed),
    ));
    body.push_str(&table);
    body.push_str(&format!(
        "\n<script type=\"application/json\" id=\"tail-session\">{session_json}</script>\n"
    ));
    body.push_str(CLIENT_JS);
    Ok(layout(&body))
}

/// Static page for `jsonl-tail render`: the table without the live channel.
pub fn static_page(path: &str, table: &str, records: usize, malformed: usize) -> String {
    layout(&format!(
        "<h1>{}</h1>\n<div class=\"meta\">{records} rows{}</div>\n{table}",
        escape_html(path),
        malformed_note(malformed),
    ))
}

fn malformed_note(malformed: usize) -> String {
    match malformed {
        0 => String::new(),
        1 => ", 1 malformed line skipped".into(),
        n => format!(", {n} malformed lines skipped"),
    }
}
