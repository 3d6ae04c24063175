use axum::{response::Html, routing::get, Router};

pub fn router() -> Router {
    Router::new().route("/", get(index))
}

async fn index() -> Html<&'static str> {
    Html(r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>CSV Analysis Chatbot</title>
  <style>
    body { font-family: Arial, sans-serif; margin: 2rem auto; max-width: 72rem; color: #1d1d1f; padding: 0 1rem; }
    h1 { margin-bottom: 0.5rem; }
    .card { border: 1px solid #ddd; padding: 1rem; border-radius: 8px; margin-bottom: 1rem; }
    .error { background: #fdecea; color: #8a1c1c; padding: 0.75rem; border-radius: 6px; margin-top: 0.75rem; }
    .info { background: #e8f1fb; color: #124a80; padding: 0.75rem; border-radius: 6px; }
    .hidden { display: none; }
    table { border-collapse: collapse; width: 100%; font-size: 0.9rem; }
    th, td { border: 1px solid #e3e3e3; padding: 0.35rem 0.6rem; text-align: left; }
    th { background: #f6f8fa; }
    th small { color: #666; font-weight: normal; }
    .msg { padding: 0.6rem 0.8rem; border-radius: 6px; margin: 0.5rem 0; white-space: pre-wrap; }
    .msg.user { background: #f1f1f4; }
    .msg.assistant { background: #eef8f0; }
    .msg .role { font-size: 0.75rem; font-weight: 600; text-transform: uppercase; color: #666; display: block; }
    #chatForm { display: flex; gap: 0.5rem; margin-top: 0.75rem; }
    #chatInput { flex: 1; padding: 0.5rem; }
    button { padding: 0.5rem 1rem; }
    footer { border-top: 1px solid #ddd; margin-top: 2rem; padding-top: 1rem; color: #666; }
  </style>
</head>
<body>
  <h1>CSV/Excel Analysis Chatbot</h1>
  <p>Upload your file and start chatting with your data!</p>

  <div class="card">
    <label for="fileInput"><strong>Upload your CSV or Excel file</strong></label><br />
    <input id="fileInput" type="file" accept=".csv,.xlsx" />
    <div id="uploadError" class="error hidden"></div>
  </div>

  <div id="welcome" class="card">
    <div class="info">Please upload a file to begin analysis.</div>
    <h3>Example questions you can ask:</h3>
    <ul>
      <li>What is the total number of rows and columns in this dataset?</li>
      <li>What are the main statistical measures for column X?</li>
      <li>Can you show me the top 5 values in column Y?</li>
      <li>Is there any correlation between column A and B?</li>
      <li>What are the unique values in column Z?</li>
      <li>Generate a summary of the main insights from this data</li>
      <li>What are the minimum and maximum values in each column?</li>
      <li>Are there any missing values in the dataset?</li>
    </ul>
  </div>

  <div id="workspace" class="hidden">
    <div class="card">
      <h3>Data Preview:</h3>
      <div id="previewMeta"></div>
      <div id="preview"></div>
    </div>
    <div class="card">
      <h3>Chat with your data:</h3>
      <div id="messages"></div>
      <div id="chatError" class="error hidden"></div>
      <form id="chatForm">
        <input id="chatInput" placeholder="Ask anything about your data..." autocomplete="off" />
        <button id="sendBtn" type="submit">Send</button>
      </form>
    </div>
  </div>

  <footer>Built with Rust using axum, tokio and an OpenAI-compatible chat model</footer>

  <script>
    let sessionId = sessionStorage.getItem('sessionId');

    const el = (id) => document.getElementById(id);

    function show(node, visible) {
      node.classList.toggle('hidden', !visible);
    }

    function showError(node, text) {
      node.textContent = text || '';
      show(node, Boolean(text));
    }

    async function api(path, options) {
      const res = await fetch(path, options);
      const body = res.status === 204 ? null : await res.json().catch(() => null);
      if (!res.ok) {
        const err = new Error(body && body.error ? body.error : `Request failed (${res.status})`);
        err.status = res.status;
        throw err;
      }
      return body;
    }

    async function ensureSession() {
      if (sessionId) {
        try {
          return await api(`/api/sessions/${sessionId}`);
        } catch (e) {
          if (e.status !== 404) throw e;
        }
      }
      const created = await api('/api/sessions', { method: 'POST' });
      sessionId = created.session_id;
      sessionStorage.setItem('sessionId', sessionId);
      return api(`/api/sessions/${sessionId}`);
    }

    const EXPIRED = 'Your session expired after a period of inactivity. Please upload your file again.';

    // The server drops idle sessions; start a fresh one and reset the page
    async function restartSession() {
      sessionStorage.removeItem('sessionId');
      sessionId = null;
      const view = await ensureSession();
      renderPreview(view.dataset);
      renderMessages(view.messages);
    }

    function renderPreview(preview) {
      if (!preview) {
        show(el('workspace'), false);
        show(el('welcome'), true);
        return;
      }
      show(el('welcome'), false);
      show(el('workspace'), true);
      el('previewMeta').textContent =
        `${preview.filename}: ${preview.total_rows} rows x ${preview.total_columns} columns`;

      const table = document.createElement('table');
      const head = table.insertRow();
      preview.columns.forEach((c) => {
        const th = document.createElement('th');
        th.textContent = c.name + ' ';
        const small = document.createElement('small');
        small.textContent = c.dtype;
        th.appendChild(small);
        head.appendChild(th);
      });
      preview.rows.forEach((row) => {
        const tr = table.insertRow();
        row.forEach((cell) => { tr.insertCell().textContent = cell; });
      });
      el('preview').replaceChildren(table);
    }

    function appendMessage(role, content) {
      const div = document.createElement('div');
      div.className = `msg ${role}`;
      const label = document.createElement('span');
      label.className = 'role';
      label.textContent = role;
      div.appendChild(label);
      div.appendChild(document.createTextNode(content));
      el('messages').appendChild(div);
      return div;
    }

    function renderMessages(messages) {
      el('messages').replaceChildren();
      messages.forEach((m) => appendMessage(m.role, m.content));
    }

    el('fileInput').addEventListener('change', async () => {
      const input = el('fileInput');
      if (!input.files.length) return;
      const form = new FormData();
      form.append('file', input.files[0]);
      showError(el('uploadError'), null);
      try {
        const res = await api(`/api/sessions/${sessionId}/file`, { method: 'POST', body: form });
        renderPreview(res.preview);
      } catch (e) {
        if (e.status === 404) {
          await restartSession();
          showError(el('uploadError'), EXPIRED);
          return;
        }
        renderPreview(null);
        showError(el('uploadError'), e.message);
      }
    });

    el('chatForm').addEventListener('submit', async (event) => {
      event.preventDefault();
      const text = el('chatInput').value.trim();
      if (!text) return;
      el('chatInput').value = '';
      el('sendBtn').disabled = true;
      showError(el('chatError'), null);
      appendMessage('user', text);
      const pending = appendMessage('assistant', 'Analyzing...');
      try {
        const res = await api(`/api/sessions/${sessionId}/messages`, {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ message: text })
        });
        renderMessages(res.messages);
      } catch (e) {
        pending.remove();
        if (e.status === 404) {
          await restartSession();
          showError(el('uploadError'), EXPIRED);
        } else {
          showError(el('chatError'), e.message);
        }
      } finally {
        el('sendBtn').disabled = false;
      }
    });

    ensureSession()
      .then((view) => {
        renderPreview(view.dataset);
        renderMessages(view.messages);
        if (view.last_error) showError(el('chatError'), view.last_error);
      })
      .catch((e) => showError(el('uploadError'), e.message));
  </script>
</body>
</html>"#)
}
