//! Embedded viewer page served at `/`.
//!
//! Kept as a `&'static str` so the binary needs no asset directory.

pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>Vision Stream</title>
  <style>
    body { margin: 0; background: #0b1120; color: #e2e8f0; font-family: ui-monospace, monospace; }
    header { padding: 12px 20px; border-bottom: 1px solid #1e293b; display: flex; gap: 24px; align-items: baseline; }
    h1 { font-size: 18px; margin: 0; }
    .stat { color: #94a3b8; }
    .stat b { color: #4ade80; }
    main { display: flex; gap: 16px; padding: 16px 20px; flex-wrap: wrap; }
    img { max-width: 100%; border: 1px solid #1e293b; background: #000; }
    ul { list-style: none; padding: 0; margin: 0; min-width: 240px; }
    li { padding: 4px 0; border-bottom: 1px solid #1e293b; }
    .stalled { color: #fb7185; }
  </style>
</head>
<body>
  <header>
    <h1>Vision Stream</h1>
    <span class="stat">status <b id="status">-</b></span>
    <span class="stat">fps <b id="fps">-</b></span>
    <span class="stat">detector <b id="detector">-</b></span>
    <span class="stat">viewers <b id="viewers">-</b></span>
    <span class="stat stalled" id="stalled"></span>
  </header>
  <main>
    <img src="/video_feed" alt="annotated stream" />
    <ul id="detections"></ul>
  </main>
  <script>
    async function refresh() {
      try {
        const status = await (await fetch('/status')).json();
        document.getElementById('status').textContent = status.status;
        document.getElementById('fps').textContent = status.fps.toFixed(1);
        document.getElementById('detector').textContent = status.detector;
        document.getElementById('viewers').textContent = status.viewers;
        document.getElementById('stalled').textContent = status.stalled ? 'stalled: ' + status.stalled : '';

        const snapshot = await (await fetch('/detections')).json();
        const list = document.getElementById('detections');
        list.replaceChildren(...snapshot.detections.map((d) => {
          const item = document.createElement('li');
          item.textContent = `${d.class_name} ${Math.floor(d.confidence * 100)}%`;
          return item;
        }));
      } catch (err) {
        document.getElementById('status').textContent = 'offline';
      }
    }
    setInterval(refresh, 1000);
    refresh();
  </script>
</body>
</html>
"#;
