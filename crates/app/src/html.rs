//! Embedded live-view page served at `/`.

pub(crate) const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Larva Monitor</title>
<style>
  body { font-family: system-ui, sans-serif; background: #101418; color: #d8dee4; margin: 0; padding: 1rem; }
  h1 { font-size: 1.1rem; font-weight: 600; }
  #view { max-width: 720px; }
  img { width: 100%; background: #000; border-radius: 4px; }
  #stats { margin: 0.5rem 0; font-variant-numeric: tabular-nums; }
  #stats .high { color: #ff6464; font-weight: 700; }
  #alerts { font-size: 0.9rem; }
  #alerts li { color: #ffb347; }
</style>
</head>
<body>
<div id="view">
  <h1>Larva Monitor</h1>
  <img id="camera" alt="live camera stream">
  <p id="stats">waiting for stats&hellip;</p>
  <ul id="alerts"></ul>
</div>
<script>
  const base = location.host;
  const img = document.getElementById('camera');
  let lastUrl = null;
  const cameraWs = new WebSocket(`ws://${base}/ws/camera`);
  cameraWs.binaryType = 'blob';
  cameraWs.onmessage = (event) => {
    const url = URL.createObjectURL(event.data);
    img.src = url;
    if (lastUrl) URL.revokeObjectURL(lastUrl);
    lastUrl = url;
  };

  const stats = document.getElementById('stats');
  const statsWs = new WebSocket(`ws://${base}/ws/camera-stats`);
  statsWs.onmessage = (event) => {
    const m = JSON.parse(event.data);
    stats.innerHTML =
      `larvae: ${m.larvae_count} &middot; ` +
      `${m.density_per_cm2.toFixed(3)}/cm&sup2; &middot; ` +
      `${m.density_per_m2.toFixed(1)}/m&sup2;` +
      (m.is_high_density ? ' <span class="high">HIGH DENSITY</span>' : '');
  };

  const alerts = document.getElementById('alerts');
  const notifyWs = new WebSocket(`ws://${base}/ws/notify`);
  notifyWs.onmessage = (event) => {
    const alert = JSON.parse(event.data);
    const item = document.createElement('li');
    item.textContent = `${alert.timestamp}: ${alert.message}`;
    alerts.prepend(item);
  };
</script>
</body>
</html>
"#;
