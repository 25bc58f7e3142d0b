// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder untuk tick, ack dan order request:
// - Satu Event per baris (append), BufWriter agar hemat syscall.
// - Flush periodik tiap 1s dan tiap 1000 event.
// - Gagal tulis -> reopen sekali, kalau tetap gagal event di-drop.
//
// ENV: `RECORD_FILE=/path/to/events.jsonl` (lihat config.rs).
//
use std::path::Path;
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

async fn open_writer(path: &str) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

pub async fn run(mut rx: mpsc::Receiver<Event>, path: String) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(%path, %e, "recorder: open failed, recording disabled");
            return;
        }
    };
    info!(%path, "recorder: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_ev = rx.recv() => {
                let Some(ev) = maybe_ev else {
                    let _ = writer.flush().await;
                    info!("recorder: channel closed, stopped");
                    break;
                };
                let line = match serde_json::to_string(&ev) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(%e, "recorder: serialize error, skip event");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(%e, "recorder: write failed, attempting reopen");
                    match open_writer(&path).await {
                        Ok(w) => writer = w,
                        Err(e) => {
                            error!(%e, "recorder: reopen failed, drop event");
                            continue;
                        }
                    }
                    if let Err(e) = write_line(&mut writer, &line).await {
                        error!(%e, "recorder: write failed again after reopen, drop event");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AckEvent, OrderAck};

    #[tokio::test]
    async fn events_land_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec/events.jsonl");
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run(rx, path.display().to_string()));
        tx.send(Event::Note("start".into())).await.unwrap();
        tx.send(Event::Ack(OrderAck { ts_ns: 1, order_id: 42, event: AckEvent::CancelConfirm })).await.unwrap();
        drop(tx);
        task.await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let v: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(v["Ack"]["order_id"], 42);
    }
}
